//! Per-pin change notifications.
//!
//! Observers register for one pin and receive [`PhotoChange`] events over an
//! unbounded channel. Registration is tied to the [`PhotoSubscription`]
//! value: dropping it unregisters, however the owner goes away. Writes that
//! land after that are still persisted, they just have nobody to tell.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::types::Coordinate;

/// A change to a pin's album, with positions in presentation order
/// (see [`super::PhotoStore::photos`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoChange {
    /// A row was written; `index` is its position after the insert.
    Inserted {
        index: usize,
        id: i64,
        photo_id: String,
    },
    /// A row was removed; `index` is its position before the delete.
    Deleted { index: usize, id: i64 },
}

type Observers = HashMap<Coordinate, Vec<(u64, mpsc::UnboundedSender<PhotoChange>)>>;

#[derive(Debug, Default)]
pub(crate) struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<Observers>,
}

impl ObserverRegistry {
    pub(crate) fn subscribe(self: &Arc<Self>, pin: Coordinate) -> PhotoSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().entry(pin).or_default().push((id, tx));
        tracing::debug!(%pin, observer = id, "Observer registered");
        PhotoSubscription {
            pin,
            id,
            rx,
            registry: Arc::downgrade(self),
        }
    }

    /// Fan a change out to every observer of `pin`.
    ///
    /// Called by the store while it still holds its connection lock, so
    /// observers see changes in commit order.
    pub(crate) fn notify(&self, pin: Coordinate, change: PhotoChange) {
        let mut observers = self.lock();
        if let Some(list) = observers.get_mut(&pin) {
            list.retain(|(_, tx)| tx.send(change.clone()).is_ok());
            if list.is_empty() {
                observers.remove(&pin);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn observer_count(&self, pin: Coordinate) -> usize {
        self.lock().get(&pin).map_or(0, Vec::len)
    }

    fn unsubscribe(&self, pin: Coordinate, id: u64) {
        let mut observers = self.lock();
        if let Some(list) = observers.get_mut(&pin) {
            list.retain(|(observer, _)| *observer != id);
            if list.is_empty() {
                observers.remove(&pin);
            }
        }
        tracing::debug!(%pin, observer = id, "Observer released");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Observers> {
        // Observer lists stay valid even if a holder panicked mid-update.
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A live registration for one pin's change events.
#[derive(Debug)]
pub struct PhotoSubscription {
    pin: Coordinate,
    id: u64,
    rx: mpsc::UnboundedReceiver<PhotoChange>,
    registry: Weak<ObserverRegistry>,
}

impl PhotoSubscription {
    /// Wait for the next change. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<PhotoChange> {
        self.rx.recv().await
    }

    /// Take a change if one is already queued.
    pub fn try_recv(&mut self) -> Option<PhotoChange> {
        self.rx.try_recv().ok()
    }
}

impl Drop for PhotoSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.pin, self.id);
        }
    }
}
