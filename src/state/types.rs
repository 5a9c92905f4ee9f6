//! Records returned by the photo store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::types::Coordinate;

/// Settings keys for the last-known map viewport.
pub const MAP_CURRENT_LATITUDE: &str = "MAP_CURRENT_LATITUDE";
pub const MAP_CURRENT_LONGITUDE: &str = "MAP_CURRENT_LONGITUDE";
pub const MAP_CURRENT_LATITUDE_DELTA: &str = "MAP_CURRENT_LATITUDE_DELTA";
pub const MAP_CURRENT_LONGITUDE_DELTA: &str = "MAP_CURRENT_LONGITUDE_DELTA";

/// Admits a photo write only while the fetch generation it was issued for is
/// still the pin's latest. The store checks it under the connection lock, in
/// the same step as the insert.
#[derive(Debug, Clone)]
pub struct GenerationGuard {
    current: Arc<AtomicU64>,
    generation: u64,
}

impl GenerationGuard {
    pub fn new(current: Arc<AtomicU64>, generation: u64) -> Self {
        Self {
            current,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }
}

/// A placed pin with its photo count as of the query.
#[derive(Debug, Clone, PartialEq)]
pub struct PinRecord {
    pub coordinate: Coordinate,
    pub created_at: DateTime<Utc>,
    pub photo_count: u64,
}

/// A persisted photo. Rows only exist once the image bytes have arrived.
///
/// `photo_id` is the remote identifier and is not unique: the same remote
/// photo may be stored twice for one pin. `id` is the row key.
#[derive(Clone, PartialEq)]
pub struct PhotoRecord {
    pub id: i64,
    pub photo_id: String,
    pub pin: Coordinate,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for PhotoRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoRecord")
            .field("id", &self.id)
            .field("photo_id", &self.photo_id)
            .field("pin", &self.pin)
            .field("bytes", &self.data.len())
            .field("created_at", &self.created_at)
            .finish()
    }
}
