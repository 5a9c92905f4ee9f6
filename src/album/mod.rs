//! Album sync controller.
//!
//! Drives one pin's album through `Idle -> Checking -> FetchingRemote ->
//! Downloading -> Done`. Each activation that actually fetches runs as a
//! numbered generation on its own task: search, then resolve and download
//! every stub with bounded concurrency, persisting each photo as it lands.
//! Whoever started the generation awaits it, but dropping that wait does not
//! cancel the work; downloads still complete and persist.
//!
//! Results are tagged with their generation. Deleting the pin bumps the
//! generation, so anything the old run produces afterwards is discarded
//! instead of repopulating the album.

pub mod error;
pub mod state;

pub use error::{PhotoError, SyncError};
pub use state::{AlbumSnapshot, AlbumState, SyncPhase};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::download::ImageFetcher;
use crate::flickr::{PhotoSource, PhotoStub};
use crate::state::{GenerationGuard, PhotoRecord, PhotoStore, StateError};
use crate::types::Coordinate;

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Upper bound on resolve+download tasks in flight for one generation.
    pub max_concurrent: usize,
}

/// Per-pin bookkeeping. The sender keeps the latest snapshot even when no
/// view is watching.
///
/// The generation counter is only advanced under the controller's lock, but
/// it is shared with the store through [`GenerationGuard`] so a photo write
/// can be checked against it in the same step as the insert.
struct PinSync {
    generation: Arc<AtomicU64>,
    tx: watch::Sender<AlbumSnapshot>,
    /// The most recent failed generation and the error its starter received.
    failure: Option<(u64, String)>,
}

impl PinSync {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(AlbumSnapshot::default());
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            tx,
            failure: None,
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn advance(&mut self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn guard(&self, generation: u64) -> GenerationGuard {
        GenerationGuard::new(Arc::clone(&self.generation), generation)
    }

    fn snapshot(&self) -> AlbumSnapshot {
        *self.tx.borrow()
    }

    fn publish(&self, phase: SyncPhase, state: AlbumState) {
        self.tx.send_replace(AlbumSnapshot {
            phase,
            state,
            generation: self.generation(),
        });
    }
}

enum Activation {
    Run(u64),
    Join(watch::Receiver<AlbumSnapshot>),
}

pub struct AlbumSyncController {
    store: Arc<dyn PhotoStore>,
    source: Arc<dyn PhotoSource>,
    fetcher: Arc<dyn ImageFetcher>,
    config: SyncConfig,
    pins: Mutex<HashMap<Coordinate, PinSync>>,
}

impl std::fmt::Debug for AlbumSyncController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlbumSyncController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AlbumSyncController {
    pub fn new(
        store: Arc<dyn PhotoStore>,
        source: Arc<dyn PhotoSource>,
        fetcher: Arc<dyn ImageFetcher>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            source,
            fetcher,
            config,
            pins: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the pin's snapshots. The receiver starts at the current one.
    pub fn watch(&self, pin: Coordinate) -> watch::Receiver<AlbumSnapshot> {
        self.lock()
            .entry(pin)
            .or_insert_with(PinSync::new)
            .tx
            .subscribe()
    }

    pub fn snapshot(&self, pin: Coordinate) -> AlbumSnapshot {
        self.lock()
            .get(&pin)
            .map(PinSync::snapshot)
            .unwrap_or_default()
    }

    pub fn phase(&self, pin: Coordinate) -> SyncPhase {
        self.snapshot(pin).phase
    }

    pub fn state(&self, pin: Coordinate) -> AlbumState {
        self.snapshot(pin).state
    }

    pub async fn has_photos(&self, pin: Coordinate) -> Result<bool, SyncError> {
        Ok(self.store.has_photos(pin).await?)
    }

    /// Wait until no generation is running for the pin.
    pub async fn wait_settled(&self, pin: Coordinate) -> AlbumSnapshot {
        settled(self.watch(pin)).await
    }

    /// Bring the pin's album up to date and report its settled state.
    ///
    /// A pin that already has photos is reported as is; the remote service is
    /// only searched for a pin with none. Activating while a generation is
    /// already running joins it instead of starting another.
    pub async fn activate(self: &Arc<Self>, pin: Coordinate) -> Result<AlbumState, SyncError> {
        let activation = {
            let mut pins = self.lock();
            let entry = pins.entry(pin).or_insert_with(PinSync::new);
            let current = entry.snapshot();
            if current.phase.is_settled() {
                let generation = entry.advance();
                entry.publish(SyncPhase::Checking, current.state);
                Activation::Run(generation)
            } else {
                Activation::Join(entry.tx.subscribe())
            }
        };

        match activation {
            Activation::Run(generation) => self.spawn_generation(pin, generation, false).await,
            Activation::Join(rx) => {
                debug!(%pin, "Joining in-flight album fetch");
                let snapshot = settled(rx).await;
                match self.failure(pin, snapshot.generation) {
                    Some(message) => Err(SyncError::Joined {
                        generation: snapshot.generation,
                        message,
                    }),
                    None => Ok(snapshot.state),
                }
            }
        }
    }

    /// Drop every photo of the pin and fetch a fresh page.
    ///
    /// Only allowed once the album is `Done`.
    pub async fn request_new_collection(
        self: &Arc<Self>,
        pin: Coordinate,
    ) -> Result<AlbumState, SyncError> {
        let generation = {
            let mut pins = self.lock();
            let entry = pins.entry(pin).or_insert_with(PinSync::new);
            let phase = entry.snapshot().phase;
            if phase != SyncPhase::Done {
                return Err(SyncError::NotSettled { pin, phase });
            }
            let generation = entry.advance();
            entry.publish(SyncPhase::Checking, AlbumState::Loading);
            generation
        };

        info!(%pin, generation, "New collection requested");
        self.spawn_generation(pin, generation, true).await
    }

    /// Delete one photo from a settled album.
    ///
    /// Returns false if the row is gone or belongs to another pin.
    pub async fn delete_photo(&self, pin: Coordinate, id: i64) -> Result<bool, SyncError> {
        self.require_done(pin)?;

        match self.store.photo(id).await? {
            Some(record) if record.pin == pin => {}
            _ => return Ok(false),
        }
        let deleted = self.store.delete_photo(id).await?;
        let count = self.store.count(pin).await?;

        let pins = self.lock();
        if let Some(entry) = pins.get(&pin) {
            if entry.snapshot().phase == SyncPhase::Done {
                entry.publish(SyncPhase::Done, AlbumState::from_count(count));
            }
        }
        Ok(deleted)
    }

    /// Delete the pin with its photos. A generation still running for it is
    /// superseded and its remaining results are dropped.
    pub async fn delete_pin(&self, pin: Coordinate) -> Result<bool, SyncError> {
        {
            let mut pins = self.lock();
            if let Some(entry) = pins.get_mut(&pin) {
                entry.advance();
                entry.publish(SyncPhase::Idle, AlbumState::Unknown);
            }
        }
        Ok(self.store.delete_pin(pin).await?)
    }

    fn require_done(&self, pin: Coordinate) -> Result<(), SyncError> {
        match self.phase(pin) {
            SyncPhase::Done => Ok(()),
            phase => Err(SyncError::NotSettled { pin, phase }),
        }
    }

    /// Run the generation on its own task and wait for it.
    ///
    /// The work runs on a nested task so that a panic inside it still
    /// settles the pin: the outer task sees the `JoinError` and moves the
    /// album back to `Idle`.
    async fn spawn_generation(
        self: &Arc<Self>,
        pin: Coordinate,
        generation: u64,
        clear_first: bool,
    ) -> Result<AlbumState, SyncError> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let worker = Arc::clone(&this);
            let outcome = tokio::spawn(async move {
                worker.run_phases(pin, generation, clear_first).await
            })
            .await;
            this.settle(pin, generation, outcome)
        })
        .await?
    }

    /// Record how the generation ended. A failure leaves the album `Idle`
    /// and `Unknown` and is kept for any activation that joined it.
    fn settle(
        &self,
        pin: Coordinate,
        generation: u64,
        outcome: Result<Result<AlbumState, SyncError>, tokio::task::JoinError>,
    ) -> Result<AlbumState, SyncError> {
        let result = match outcome {
            Ok(result) => result,
            Err(e) => Err(SyncError::Join(e)),
        };
        if let Err(e) = &result {
            error!(%pin, generation, error = %e, "Album fetch failed");
            let mut pins = self.lock();
            if let Some(entry) = pins.get_mut(&pin) {
                if entry.generation() == generation {
                    entry.failure = Some((generation, e.to_string()));
                    entry.publish(SyncPhase::Idle, AlbumState::Unknown);
                }
            }
        }
        result
    }

    /// Error message of `generation`, if that generation failed.
    fn failure(&self, pin: Coordinate, generation: u64) -> Option<String> {
        self.lock()
            .get(&pin)
            .and_then(|entry| entry.failure.as_ref())
            .filter(|(failed, _)| *failed == generation)
            .map(|(_, message)| message.clone())
    }

    async fn run_phases(
        &self,
        pin: Coordinate,
        generation: u64,
        clear_first: bool,
    ) -> Result<AlbumState, SyncError> {
        if self.store.pin(pin).await?.is_none() {
            return Err(StateError::PinNotFound(pin).into());
        }

        if clear_first {
            let removed = self.store.clear_all(pin).await?;
            info!(%pin, generation, removed, "Cleared album");
        }

        if self.store.has_photos(pin).await? {
            let count = self.store.count(pin).await?;
            debug!(%pin, generation, count, "Album already populated locally");
            return Ok(self.finish(pin, generation, AlbumState::from_count(count)));
        }

        self.publish(pin, generation, SyncPhase::FetchingRemote, AlbumState::Loading);
        let stubs = self
            .source
            .search_photos(pin)
            .await
            .map_err(SyncError::Search)?;

        if stubs.is_empty() {
            info!(%pin, generation, "No photos near this pin");
            return Ok(self.finish(pin, generation, AlbumState::Empty));
        }

        let Some(guard) = self.guard(pin, generation) else {
            return Ok(self.state(pin));
        };
        let requested = stubs.len();
        self.publish(pin, generation, SyncPhase::Downloading, AlbumState::Loading);
        info!(%pin, generation, requested, "Downloading photos");

        let downloads = stream::iter(stubs)
            .map(|stub| self.acquire_photo(pin, &guard, stub))
            .buffer_unordered(self.config.max_concurrent.max(1));
        tokio::pin!(downloads);

        let mut stored = 0usize;
        let mut failed = 0usize;
        let mut persist_error = None;
        while let Some((photo_id, result)) = downloads.next().await {
            match result {
                Ok(record) => {
                    stored += 1;
                    debug!(%pin, generation, %photo_id, row = record.id, "Stored photo");
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        %pin,
                        generation,
                        %photo_id,
                        kind = e.kind(),
                        status = ?e.http_status(),
                        error = %e,
                        "Skipping photo"
                    );
                    if let PhotoError::Persist(e) = e {
                        persist_error = Some(e);
                    }
                }
            }
        }

        if !self.is_current(pin, generation) {
            info!(%pin, generation, stored, failed, "Discarded superseded album fetch");
            return Ok(self.state(pin));
        }

        // Nothing could be written: the fetch failed, the album is not empty.
        if let (0, Some(e)) = (stored, persist_error) {
            return Err(e.into());
        }

        let count = self.store.count(pin).await?;
        info!(%pin, generation, requested, stored, failed, count, "Album fetch complete");
        Ok(self.finish(pin, generation, AlbumState::from_count(count)))
    }

    async fn acquire_photo(
        &self,
        pin: Coordinate,
        guard: &GenerationGuard,
        stub: PhotoStub,
    ) -> (String, Result<PhotoRecord, PhotoError>) {
        let result = self.persist_photo(pin, guard, &stub).await;
        (stub.id, result)
    }

    async fn persist_photo(
        &self,
        pin: Coordinate,
        guard: &GenerationGuard,
        stub: &PhotoStub,
    ) -> Result<PhotoRecord, PhotoError> {
        if !guard.is_current() {
            return Err(PhotoError::Superseded(guard.generation()));
        }
        let resolved = self.source.resolve_download_url(stub).await?;
        let data = self.fetcher.download(&resolved.url).await?;
        // The store re-checks the guard under its lock, in the same step as
        // the insert.
        match self
            .store
            .add_photo_if_current(pin, &resolved.id, data, guard)
            .await
        {
            Err(StateError::Superseded { generation }) => Err(PhotoError::Superseded(generation)),
            result => Ok(result?),
        }
    }

    fn guard(&self, pin: Coordinate, generation: u64) -> Option<GenerationGuard> {
        self.lock()
            .get(&pin)
            .map(|entry| entry.guard(generation))
            .filter(GenerationGuard::is_current)
    }

    fn is_current(&self, pin: Coordinate, generation: u64) -> bool {
        self.lock()
            .get(&pin)
            .is_some_and(|entry| entry.generation() == generation)
    }

    /// Publish a snapshot if `generation` is still the pin's latest.
    fn publish(
        &self,
        pin: Coordinate,
        generation: u64,
        phase: SyncPhase,
        state: AlbumState,
    ) -> bool {
        let pins = self.lock();
        match pins.get(&pin) {
            Some(entry) if entry.generation() == generation => {
                entry.publish(phase, state);
                true
            }
            _ => false,
        }
    }

    /// Settle the generation in `Done`. A superseded generation leaves the
    /// newer state alone and reports it instead.
    fn finish(&self, pin: Coordinate, generation: u64, state: AlbumState) -> AlbumState {
        if self.publish(pin, generation, SyncPhase::Done, state) {
            info!(%pin, generation, %state, "Album ready");
            state
        } else {
            self.state(pin)
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Coordinate, PinSync>> {
        self.pins.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn settled(mut rx: watch::Receiver<AlbumSnapshot>) -> AlbumSnapshot {
    let snapshot = rx
        .wait_for(|snapshot| snapshot.phase.is_settled())
        .await
        .map(|snapshot| *snapshot);
    snapshot.unwrap_or_else(|_| *rx.borrow())
}
