use thiserror::Error;

use super::state::SyncPhase;
use crate::download::DownloadError;
use crate::flickr::FlickrError;
use crate::state::StateError;
use crate::types::Coordinate;

/// Failures surfaced to whoever drives the controller.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The page search for the whole pin failed; the album is left `Unknown`.
    #[error("Unable to load photos: {0}")]
    Search(#[source] FlickrError),

    #[error(transparent)]
    Store(#[from] StateError),

    #[error("Album for {pin} is {phase}, not done")]
    NotSettled { pin: Coordinate, phase: SyncPhase },

    #[error("Sync task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// An activation joined a generation that failed. Carries the error the
    /// generation's starter received.
    #[error("{message} (generation {generation})")]
    Joined { generation: u64, message: String },
}

/// Why a single photo did not make it into the album. Logged and counted.
#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("resolve failed: {0}")]
    Resolve(#[from] FlickrError),

    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("persist failed: {0}")]
    Persist(#[from] StateError),

    #[error("generation {0} was superseded")]
    Superseded(u64),
}

impl PhotoError {
    /// Failure class for logs: network, decode, no-usable-size, persist or superseded.
    pub fn kind(&self) -> &'static str {
        match self {
            PhotoError::Resolve(FlickrError::NoUsableSize { .. }) => "no-usable-size",
            PhotoError::Resolve(e) if e.is_decode() => "decode",
            PhotoError::Resolve(_) | PhotoError::Download(_) => "network",
            PhotoError::Persist(_) => "persist",
            PhotoError::Superseded(_) => "superseded",
        }
    }

    /// HTTP status behind the failure, when a server answered.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            PhotoError::Resolve(FlickrError::HttpStatus { status, .. }) => Some(*status),
            PhotoError::Download(e) => e.status(),
            _ => None,
        }
    }
}
