//! Local photo store.
//!
//! This module provides SQLite-backed persistence for pins and their photos:
//! - Pins keyed by coordinate, with photo counts derived from rows
//! - Photo rows written only once image bytes are available
//! - Per-pin change events with positions in presentation order
//! - The last-known map viewport

pub mod db;
pub mod error;
pub mod observe;
pub mod schema;
pub mod types;

pub use db::{PhotoStore, SqlitePhotoStore};
pub use error::StateError;
pub use observe::{PhotoChange, PhotoSubscription};
pub use types::{GenerationGuard, PhotoRecord, PinRecord};
