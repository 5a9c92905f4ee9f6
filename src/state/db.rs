//! Photo store trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::observe::{ObserverRegistry, PhotoChange, PhotoSubscription};
use super::schema;
use super::types::{
    GenerationGuard, PhotoRecord, PinRecord, MAP_CURRENT_LATITUDE, MAP_CURRENT_LATITUDE_DELTA,
    MAP_CURRENT_LONGITUDE, MAP_CURRENT_LONGITUDE_DELTA,
};
use crate::types::{Coordinate, Viewport};

/// Presentation order for a pin's photos: remote id descending, then
/// insertion order for duplicate ids.
const PHOTO_ORDER: &str = "ORDER BY photo_id DESC, id ASC";

/// Rows of the same pin that sort before the row `(photo_id, id)`.
const POSITION_SQL: &str = "SELECT COUNT(*) FROM photos \
     WHERE pin_latitude = ?1 AND pin_longitude = ?2 \
     AND (photo_id > ?3 OR (photo_id = ?3 AND id < ?4))";

/// Trait for photo store operations.
///
/// This trait is object-safe and can be used with `Arc<dyn PhotoStore>` for
/// shared access across async tasks. Every mutation is visible to the next
/// read the moment it returns; observers are notified asynchronously.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Place a pin. Placing an existing pin returns the existing record.
    async fn add_pin(&self, pin: Coordinate) -> Result<PinRecord, StateError>;

    /// One pin with its photo count, or `None` if it was never placed.
    async fn pin(&self, pin: Coordinate) -> Result<Option<PinRecord>, StateError>;

    /// All pins with their current photo counts, oldest first.
    async fn list_pins(&self) -> Result<Vec<PinRecord>, StateError>;

    /// Delete a pin and every photo that belongs to it.
    ///
    /// Returns false when no such pin existed.
    async fn delete_pin(&self, pin: Coordinate) -> Result<bool, StateError>;

    /// True iff at least one photo row references the pin.
    async fn has_photos(&self, pin: Coordinate) -> Result<bool, StateError>;

    /// Number of photo rows referencing the pin.
    async fn count(&self, pin: Coordinate) -> Result<u64, StateError>;

    /// The pin's photos in presentation order.
    async fn photos(&self, pin: Coordinate) -> Result<Vec<PhotoRecord>, StateError>;

    /// One photo by row id.
    async fn photo(&self, id: i64) -> Result<Option<PhotoRecord>, StateError>;

    /// Persist downloaded bytes as a new photo row and emit an insert event.
    ///
    /// Duplicate `photo_id`s for the same pin are stored as separate rows.
    async fn add_photo(
        &self,
        pin: Coordinate,
        photo_id: &str,
        data: Vec<u8>,
    ) -> Result<PhotoRecord, StateError>;

    /// Like [`add_photo`](Self::add_photo), but the row is only written while
    /// `guard` is current. Fails with `Superseded` otherwise.
    async fn add_photo_if_current(
        &self,
        pin: Coordinate,
        photo_id: &str,
        data: Vec<u8>,
        guard: &GenerationGuard,
    ) -> Result<PhotoRecord, StateError>;

    /// Delete one photo row and emit a delete event.
    ///
    /// Returns false when the row was already gone.
    async fn delete_photo(&self, id: i64) -> Result<bool, StateError>;

    /// Delete every photo of the pin, emitting one delete event per row.
    ///
    /// Returns the number of rows removed.
    async fn clear_all(&self, pin: Coordinate) -> Result<u64, StateError>;

    /// Register for the pin's change events until the subscription is dropped.
    fn observe(&self, pin: Coordinate) -> PhotoSubscription;

    /// Persist the last-known map viewport.
    async fn save_viewport(&self, viewport: Viewport) -> Result<(), StateError>;

    /// Load the saved viewport, or `None` if none has been saved.
    async fn load_viewport(&self) -> Result<Option<Viewport>, StateError>;
}

/// SQLite implementation of the photo store.
pub struct SqlitePhotoStore {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync. The mutex
    /// is the single-writer discipline: every statement runs under it on a
    /// blocking thread, never on the caller's task.
    conn: Arc<Mutex<Connection>>,
    observers: Arc<ObserverRegistry>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqlitePhotoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePhotoStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqlitePhotoStore {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| StateError::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }

            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            // WAL lets the read path proceed while a photo write commits.
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            configure(&conn)?;
            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self::from_connection(conn, path))
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        configure(&conn)?;
        Ok(Self::from_connection(conn, PathBuf::from(":memory:")))
    }

    fn from_connection(conn: Connection, path: PathBuf) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            observers: Arc::new(ObserverRegistry::default()),
            path,
        }
    }

    /// Get the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live observers for a pin.
    #[cfg(test)]
    pub fn observer_count(&self, pin: Coordinate) -> usize {
        self.observers.observer_count(pin)
    }

    async fn insert_photo(
        &self,
        pin: Coordinate,
        photo_id: &str,
        data: Vec<u8>,
        guard: Option<GenerationGuard>,
    ) -> Result<PhotoRecord, StateError> {
        let photo_id = photo_id.to_string();
        let created_at = Utc::now();

        self.with_conn(move |conn, observers| {
            if let Some(guard) = guard.filter(|guard| !guard.is_current()) {
                return Err(StateError::Superseded {
                    generation: guard.generation(),
                });
            }

            let tx = conn.transaction().map_err(StateError::query)?;

            if query_pin(&tx, pin)?.is_none() {
                return Err(StateError::PinNotFound(pin));
            }

            tx.execute(
                "INSERT INTO photos (photo_id, pin_latitude, pin_longitude, data, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    &photo_id,
                    pin.latitude(),
                    pin.longitude(),
                    &data,
                    created_at.timestamp(),
                ],
            )
            .map_err(StateError::query)?;
            let id = tx.last_insert_rowid();
            let index = position_of(&tx, pin, &photo_id, id)?;
            tx.commit().map_err(StateError::query)?;

            observers.notify(
                pin,
                PhotoChange::Inserted {
                    index,
                    id,
                    photo_id: photo_id.clone(),
                },
            );

            Ok(PhotoRecord {
                id,
                photo_id,
                pin,
                data,
                created_at: timestamp(created_at.timestamp()),
            })
        })
        .await
    }

    /// Run `f` against the connection on a blocking thread.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StateError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &ObserverRegistry) -> Result<T, StateError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let observers = Arc::clone(&self.observers);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StateError::Query(e.to_string()))?;
            f(&mut conn, &observers)
        })
        .await?
    }
}

fn configure(conn: &Connection) -> Result<(), StateError> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(StateError::Migration)?;
    schema::migrate(conn)
}

#[async_trait]
impl PhotoStore for SqlitePhotoStore {
    async fn add_pin(&self, pin: Coordinate) -> Result<PinRecord, StateError> {
        let created_at = Utc::now().timestamp();
        self.with_conn(move |conn, _| {
            conn.execute(
                "INSERT OR IGNORE INTO pins (latitude, longitude, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![pin.latitude(), pin.longitude(), created_at],
            )
            .map_err(StateError::query)?;

            query_pin(conn, pin)?.ok_or(StateError::PinNotFound(pin))
        })
        .await
    }

    async fn pin(&self, pin: Coordinate) -> Result<Option<PinRecord>, StateError> {
        self.with_conn(move |conn, _| query_pin(conn, pin)).await
    }

    async fn list_pins(&self) -> Result<Vec<PinRecord>, StateError> {
        self.with_conn(|conn, _| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT p.latitude, p.longitude, p.created_at, COUNT(ph.id) \
                     FROM pins p \
                     LEFT JOIN photos ph \
                       ON ph.pin_latitude = p.latitude AND ph.pin_longitude = p.longitude \
                     GROUP BY p.latitude, p.longitude \
                     ORDER BY p.created_at ASC, p.rowid ASC",
                )
                .map_err(StateError::query)?;

            let pins = stmt
                .query_map([], row_to_pin_record)
                .map_err(StateError::query)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(StateError::query)?;
            Ok(pins)
        })
        .await
    }

    async fn delete_pin(&self, pin: Coordinate) -> Result<bool, StateError> {
        self.with_conn(move |conn, observers| {
            let tx = conn.transaction().map_err(StateError::query)?;
            let ids = photo_ids_in_order(&tx, pin)?;
            tx.execute(
                "DELETE FROM photos WHERE pin_latitude = ?1 AND pin_longitude = ?2",
                rusqlite::params![pin.latitude(), pin.longitude()],
            )
            .map_err(StateError::query)?;
            let removed = tx
                .execute(
                    "DELETE FROM pins WHERE latitude = ?1 AND longitude = ?2",
                    rusqlite::params![pin.latitude(), pin.longitude()],
                )
                .map_err(StateError::query)?;
            tx.commit().map_err(StateError::query)?;

            notify_cleared(observers, pin, &ids);
            if removed > 0 {
                tracing::info!(%pin, photos = ids.len(), "Deleted pin");
            }
            Ok(removed > 0)
        })
        .await
    }

    async fn has_photos(&self, pin: Coordinate) -> Result<bool, StateError> {
        self.with_conn(move |conn, _| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM photos WHERE pin_latitude = ?1 AND pin_longitude = ?2)",
                rusqlite::params![pin.latitude(), pin.longitude()],
                |row| row.get::<_, bool>(0),
            )
            .map_err(StateError::query)
        })
        .await
    }

    async fn count(&self, pin: Coordinate) -> Result<u64, StateError> {
        self.with_conn(move |conn, _| count_photos(conn, pin)).await
    }

    async fn photos(&self, pin: Coordinate) -> Result<Vec<PhotoRecord>, StateError> {
        self.with_conn(move |conn, _| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT id, photo_id, pin_latitude, pin_longitude, data, created_at \
                     FROM photos WHERE pin_latitude = ?1 AND pin_longitude = ?2 {PHOTO_ORDER}"
                ))
                .map_err(StateError::query)?;

            let photos = stmt
                .query_map(
                    rusqlite::params![pin.latitude(), pin.longitude()],
                    row_to_photo_record,
                )
                .map_err(StateError::query)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(StateError::query)?;
            Ok(photos)
        })
        .await
    }

    async fn photo(&self, id: i64) -> Result<Option<PhotoRecord>, StateError> {
        self.with_conn(move |conn, _| {
            conn.query_row(
                "SELECT id, photo_id, pin_latitude, pin_longitude, data, created_at \
                 FROM photos WHERE id = ?1",
                [id],
                row_to_photo_record,
            )
            .optional()
            .map_err(StateError::query)
        })
        .await
    }

    async fn add_photo(
        &self,
        pin: Coordinate,
        photo_id: &str,
        data: Vec<u8>,
    ) -> Result<PhotoRecord, StateError> {
        self.insert_photo(pin, photo_id, data, None).await
    }

    async fn add_photo_if_current(
        &self,
        pin: Coordinate,
        photo_id: &str,
        data: Vec<u8>,
        guard: &GenerationGuard,
    ) -> Result<PhotoRecord, StateError> {
        self.insert_photo(pin, photo_id, data, Some(guard.clone()))
            .await
    }

    async fn delete_photo(&self, id: i64) -> Result<bool, StateError> {
        self.with_conn(move |conn, observers| {
            let tx = conn.transaction().map_err(StateError::query)?;

            let row: Option<(String, f64, f64)> = tx
                .query_row(
                    "SELECT photo_id, pin_latitude, pin_longitude FROM photos WHERE id = ?1",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(StateError::query)?;

            let Some((photo_id, lat, lon)) = row else {
                return Ok(false);
            };
            let pin = Coordinate::new(lat, lon).map_err(|e| StateError::Query(e.to_string()))?;
            let index = position_of(&tx, pin, &photo_id, id)?;

            tx.execute("DELETE FROM photos WHERE id = ?1", [id])
                .map_err(StateError::query)?;
            tx.commit().map_err(StateError::query)?;

            observers.notify(pin, PhotoChange::Deleted { index, id });
            Ok(true)
        })
        .await
    }

    async fn clear_all(&self, pin: Coordinate) -> Result<u64, StateError> {
        self.with_conn(move |conn, observers| {
            let tx = conn.transaction().map_err(StateError::query)?;
            let ids = photo_ids_in_order(&tx, pin)?;
            let removed = tx
                .execute(
                    "DELETE FROM photos WHERE pin_latitude = ?1 AND pin_longitude = ?2",
                    rusqlite::params![pin.latitude(), pin.longitude()],
                )
                .map_err(StateError::query)?;
            tx.commit().map_err(StateError::query)?;

            notify_cleared(observers, pin, &ids);
            Ok(removed as u64)
        })
        .await
    }

    fn observe(&self, pin: Coordinate) -> PhotoSubscription {
        self.observers.subscribe(pin)
    }

    async fn save_viewport(&self, viewport: Viewport) -> Result<(), StateError> {
        self.with_conn(move |conn, _| {
            let tx = conn.transaction().map_err(StateError::query)?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT INTO settings (key, value) VALUES (?1, ?2) \
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    )
                    .map_err(StateError::query)?;
                for (key, value) in [
                    (MAP_CURRENT_LATITUDE, viewport.center_latitude),
                    (MAP_CURRENT_LONGITUDE, viewport.center_longitude),
                    (MAP_CURRENT_LATITUDE_DELTA, viewport.latitude_delta),
                    (MAP_CURRENT_LONGITUDE_DELTA, viewport.longitude_delta),
                ] {
                    stmt.execute(rusqlite::params![key, value])
                        .map_err(StateError::query)?;
                }
            }
            tx.commit().map_err(StateError::query)?;
            Ok(())
        })
        .await
    }

    async fn load_viewport(&self) -> Result<Option<Viewport>, StateError> {
        self.with_conn(|conn, _| {
            let setting = |key: &str| -> Result<f64, StateError> {
                Ok(conn
                    .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                        row.get::<_, f64>(0)
                    })
                    .optional()
                    .map_err(StateError::query)?
                    .unwrap_or(0.0))
            };

            // An unset center latitude reads as 0.0, which means "never saved".
            let center_latitude = setting(MAP_CURRENT_LATITUDE)?;
            if center_latitude == 0.0 {
                return Ok(None);
            }
            Ok(Some(Viewport {
                center_latitude,
                center_longitude: setting(MAP_CURRENT_LONGITUDE)?,
                latitude_delta: setting(MAP_CURRENT_LATITUDE_DELTA)?,
                longitude_delta: setting(MAP_CURRENT_LONGITUDE_DELTA)?,
            }))
        })
        .await
    }
}

fn query_pin(conn: &Connection, pin: Coordinate) -> Result<Option<PinRecord>, StateError> {
    conn.query_row(
        "SELECT p.latitude, p.longitude, p.created_at, \
           (SELECT COUNT(*) FROM photos ph \
            WHERE ph.pin_latitude = p.latitude AND ph.pin_longitude = p.longitude) \
         FROM pins p WHERE p.latitude = ?1 AND p.longitude = ?2",
        rusqlite::params![pin.latitude(), pin.longitude()],
        row_to_pin_record,
    )
    .optional()
    .map_err(StateError::query)
}

fn count_photos(conn: &Connection, pin: Coordinate) -> Result<u64, StateError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM photos WHERE pin_latitude = ?1 AND pin_longitude = ?2",
            rusqlite::params![pin.latitude(), pin.longitude()],
            |row| row.get(0),
        )
        .map_err(StateError::query)?;
    Ok(count as u64)
}

fn position_of(
    conn: &Connection,
    pin: Coordinate,
    photo_id: &str,
    id: i64,
) -> Result<usize, StateError> {
    let before: i64 = conn
        .query_row(
            POSITION_SQL,
            rusqlite::params![pin.latitude(), pin.longitude(), photo_id, id],
            |row| row.get(0),
        )
        .map_err(StateError::query)?;
    Ok(before as usize)
}

fn photo_ids_in_order(conn: &Connection, pin: Coordinate) -> Result<Vec<i64>, StateError> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT id FROM photos WHERE pin_latitude = ?1 AND pin_longitude = ?2 {PHOTO_ORDER}"
        ))
        .map_err(StateError::query)?;
    let ids = stmt
        .query_map(rusqlite::params![pin.latitude(), pin.longitude()], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(StateError::query)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StateError::query)?;
    Ok(ids)
}

/// Emit deletions last-to-first so every index is valid when it arrives.
fn notify_cleared(observers: &ObserverRegistry, pin: Coordinate, ids: &[i64]) {
    for (index, id) in ids.iter().enumerate().rev() {
        observers.notify(pin, PhotoChange::Deleted { index, id: *id });
    }
}

fn coordinate_from_row(row: &rusqlite::Row<'_>, lat_idx: usize) -> rusqlite::Result<Coordinate> {
    let lat: f64 = row.get(lat_idx)?;
    let lon: f64 = row.get(lat_idx + 1)?;
    Coordinate::new(lat, lon)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(lat_idx, Type::Real, Box::new(e)))
}

fn timestamp(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Convert a `(latitude, longitude, created_at, count)` row to a PinRecord.
fn row_to_pin_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PinRecord> {
    Ok(PinRecord {
        coordinate: coordinate_from_row(row, 0)?,
        created_at: timestamp(row.get(2)?),
        photo_count: row.get::<_, i64>(3)? as u64,
    })
}

/// Convert a photos row to a PhotoRecord.
fn row_to_photo_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PhotoRecord> {
    Ok(PhotoRecord {
        id: row.get(0)?,
        photo_id: row.get(1)?,
        pin: coordinate_from_row(row, 2)?,
        data: row.get(4)?,
        created_at: timestamp(row.get(5)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("pinalbum")
            .join("photo_store_tests")
            .join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn pin() -> Coordinate {
        Coordinate::new(37.0, -122.0).unwrap()
    }

    async fn store_with_pin() -> SqlitePhotoStore {
        let store = SqlitePhotoStore::open_in_memory().unwrap();
        store.add_pin(pin()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_open_creates_db() {
        let dir = test_dir("open_creates");
        let path = dir.join("nested").join("album.db");
        let store = SqlitePhotoStore::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_photos_survive_reopen() {
        let dir = test_dir("reopen");
        let path = dir.join("album.db");
        {
            let store = SqlitePhotoStore::open(&path).await.unwrap();
            store.add_pin(pin()).await.unwrap();
            store.add_photo(pin(), "a", vec![1, 2, 3]).await.unwrap();
        }
        let store = SqlitePhotoStore::open(&path).await.unwrap();
        let photos = store.photos(pin()).await.unwrap();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_add_pin_is_idempotent() {
        let store = SqlitePhotoStore::open_in_memory().unwrap();
        let first = store.add_pin(pin()).await.unwrap();
        store.add_photo(pin(), "a", vec![1]).await.unwrap();
        let second = store.add_pin(pin()).await.unwrap();

        assert_eq!(first.coordinate, second.coordinate);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.photo_count, 1);
        assert_eq!(store.list_pins().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_pins_counts_rows() {
        let store = store_with_pin().await;
        let other = Coordinate::new(48.85, 2.35).unwrap();
        store.add_pin(other).await.unwrap();
        store.add_photo(pin(), "a", vec![1]).await.unwrap();
        store.add_photo(pin(), "b", vec![2]).await.unwrap();

        let pins = store.list_pins().await.unwrap();
        assert_eq!(pins.len(), 2);
        let counts: Vec<(Coordinate, u64)> =
            pins.iter().map(|p| (p.coordinate, p.photo_count)).collect();
        assert!(counts.contains(&(pin(), 2)));
        assert!(counts.contains(&(other, 0)));
    }

    #[tokio::test]
    async fn test_has_photos_and_count() {
        let store = store_with_pin().await;
        assert!(!store.has_photos(pin()).await.unwrap());
        assert_eq!(store.count(pin()).await.unwrap(), 0);

        store.add_photo(pin(), "a", vec![1]).await.unwrap();
        assert!(store.has_photos(pin()).await.unwrap());
        assert_eq!(store.count(pin()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_photo_unknown_pin() {
        let store = SqlitePhotoStore::open_in_memory().unwrap();
        let err = store.add_photo(pin(), "a", vec![1]).await.unwrap_err();
        assert!(matches!(err, StateError::PinNotFound(p) if p == pin()));
        assert_eq!(store.count(pin()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pin_lookup() {
        let store = SqlitePhotoStore::open_in_memory().unwrap();
        assert!(store.pin(pin()).await.unwrap().is_none());

        store.add_pin(pin()).await.unwrap();
        store.add_photo(pin(), "a", vec![1]).await.unwrap();
        let record = store.pin(pin()).await.unwrap().unwrap();
        assert_eq!(record.coordinate, pin());
        assert_eq!(record.photo_count, 1);
    }

    #[tokio::test]
    async fn test_guarded_write_rejected_once_superseded() {
        let store = store_with_pin().await;
        let current = Arc::new(AtomicU64::new(4));
        let guard = GenerationGuard::new(Arc::clone(&current), 4);
        let mut sub = store.observe(pin());

        store
            .add_photo_if_current(pin(), "a", vec![1], &guard)
            .await
            .unwrap();

        current.store(5, Ordering::SeqCst);
        let err = store
            .add_photo_if_current(pin(), "b", vec![2], &guard)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Superseded { generation: 4 }));
        assert_eq!(store.count(pin()).await.unwrap(), 1);

        assert!(matches!(sub.try_recv(), Some(PhotoChange::Inserted { .. })));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_photo_lookup_by_row() {
        let store = store_with_pin().await;
        let added = store.add_photo(pin(), "42", vec![4, 2]).await.unwrap();
        let found = store.photo(added.id).await.unwrap().unwrap();
        assert_eq!(found.photo_id, "42");
        assert_eq!(found.pin, pin());
        assert_eq!(found.data, vec![4, 2]);
        assert!(store.photo(added.id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_photo_ids_coexist() {
        let store = store_with_pin().await;
        let first = store.add_photo(pin(), "same", vec![1]).await.unwrap();
        let second = store.add_photo(pin(), "same", vec![2]).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.count(pin()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_photos_in_presentation_order() {
        let store = store_with_pin().await;
        store.add_photo(pin(), "200", vec![1]).await.unwrap();
        store.add_photo(pin(), "300", vec![2]).await.unwrap();
        store.add_photo(pin(), "100", vec![3]).await.unwrap();

        let ids: Vec<String> = store
            .photos(pin())
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.photo_id)
            .collect();
        assert_eq!(ids, vec!["300", "200", "100"]);
    }

    #[tokio::test]
    async fn test_insert_events_carry_positions() {
        let store = store_with_pin().await;
        let mut sub = store.observe(pin());

        let b = store.add_photo(pin(), "b", vec![1]).await.unwrap();
        let c = store.add_photo(pin(), "c", vec![2]).await.unwrap();
        let a = store.add_photo(pin(), "a", vec![3]).await.unwrap();

        assert_eq!(
            sub.recv().await,
            Some(PhotoChange::Inserted { index: 0, id: b.id, photo_id: "b".into() })
        );
        // "c" sorts ahead of "b"
        assert_eq!(
            sub.recv().await,
            Some(PhotoChange::Inserted { index: 0, id: c.id, photo_id: "c".into() })
        );
        assert_eq!(
            sub.recv().await,
            Some(PhotoChange::Inserted { index: 2, id: a.id, photo_id: "a".into() })
        );
    }

    #[tokio::test]
    async fn test_delete_photo_emits_position() {
        let store = store_with_pin().await;
        store.add_photo(pin(), "c", vec![1]).await.unwrap();
        let b = store.add_photo(pin(), "b", vec![2]).await.unwrap();
        store.add_photo(pin(), "a", vec![3]).await.unwrap();

        let mut sub = store.observe(pin());
        assert!(store.delete_photo(b.id).await.unwrap());
        assert_eq!(
            sub.recv().await,
            Some(PhotoChange::Deleted { index: 1, id: b.id })
        );
        assert_eq!(store.count(pin()).await.unwrap(), 2);

        // Second delete of the same row is a no-op with no event.
        assert!(!store.delete_photo(b.id).await.unwrap());
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_clear_all_empties_pin_and_notifies() {
        let store = store_with_pin().await;
        let other = Coordinate::new(1.0, 1.0).unwrap();
        store.add_pin(other).await.unwrap();
        for id in ["x", "y", "z"] {
            store.add_photo(pin(), id, vec![0]).await.unwrap();
        }
        store.add_photo(other, "keep", vec![0]).await.unwrap();

        let mut sub = store.observe(pin());
        assert_eq!(store.clear_all(pin()).await.unwrap(), 3);
        assert_eq!(store.count(pin()).await.unwrap(), 0);
        assert!(!store.has_photos(pin()).await.unwrap());
        assert_eq!(store.count(other).await.unwrap(), 1);

        let mut indexes = Vec::new();
        while let Some(change) = sub.try_recv() {
            match change {
                PhotoChange::Deleted { index, .. } => indexes.push(index),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(indexes, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_concurrent_adds_lose_nothing() {
        let store = Arc::new(store_with_pin().await);
        let mut sub = store.observe(pin());
        let n = 32;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .add_photo(pin(), &format!("{:03}", i % 5), vec![i as u8])
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count(pin()).await.unwrap(), n as u64);
        assert_eq!(store.photos(pin()).await.unwrap().len(), n);

        let mut inserts = 0;
        while let Some(PhotoChange::Inserted { .. }) = sub.try_recv() {
            inserts += 1;
        }
        assert_eq!(inserts, n);
    }

    #[tokio::test]
    async fn test_observer_released_on_drop() {
        let store = store_with_pin().await;
        let sub = store.observe(pin());
        assert_eq!(store.observer_count(pin()), 1);
        drop(sub);
        assert_eq!(store.observer_count(pin()), 0);

        // Late write with nobody listening is still persisted.
        store.add_photo(pin(), "late", vec![9]).await.unwrap();
        assert_eq!(store.count(pin()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_pin_cascades() {
        let store = store_with_pin().await;
        store.add_photo(pin(), "a", vec![1]).await.unwrap();
        store.add_photo(pin(), "b", vec![2]).await.unwrap();
        let mut sub = store.observe(pin());

        assert!(store.delete_pin(pin()).await.unwrap());
        assert_eq!(store.count(pin()).await.unwrap(), 0);
        assert!(store.list_pins().await.unwrap().is_empty());
        assert!(matches!(sub.try_recv(), Some(PhotoChange::Deleted { index: 1, .. })));
        assert!(matches!(sub.try_recv(), Some(PhotoChange::Deleted { index: 0, .. })));

        assert!(!store.delete_pin(pin()).await.unwrap());
    }

    #[tokio::test]
    async fn test_viewport_roundtrip() {
        let store = SqlitePhotoStore::open_in_memory().unwrap();
        assert_eq!(store.load_viewport().await.unwrap(), None);

        let viewport = Viewport {
            center_latitude: 37.7749,
            center_longitude: -122.4194,
            latitude_delta: 0.5,
            longitude_delta: 0.25,
        };
        store.save_viewport(viewport).await.unwrap();
        assert_eq!(store.load_viewport().await.unwrap(), Some(viewport));

        let moved = Viewport {
            center_latitude: 51.5,
            ..viewport
        };
        store.save_viewport(moved).await.unwrap();
        assert_eq!(store.load_viewport().await.unwrap(), Some(moved));
    }
}
