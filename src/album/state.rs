//! Album phases and the states reported to the presentation layer.

use std::fmt;

/// Where a pin's album is in the fetch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Checking,
    FetchingRemote,
    Downloading,
    Done,
}

impl SyncPhase {
    /// No generation is running for the pin.
    pub fn is_settled(self) -> bool {
        matches!(self, SyncPhase::Idle | SyncPhase::Done)
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Checking => "checking",
            SyncPhase::FetchingRemote => "fetching",
            SyncPhase::Downloading => "downloading",
            SyncPhase::Done => "done",
        })
    }
}

/// What the album view should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlbumState {
    /// Nothing known yet, or the last search failed.
    #[default]
    Unknown,
    Loading,
    /// A fetch completed and left no photos.
    Empty,
    Populated(u64),
}

impl AlbumState {
    /// Settled state for a pin holding `count` rows.
    pub fn from_count(count: u64) -> Self {
        if count == 0 {
            AlbumState::Empty
        } else {
            AlbumState::Populated(count)
        }
    }
}

impl fmt::Display for AlbumState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlbumState::Unknown => f.write_str("unknown"),
            AlbumState::Loading => f.write_str("loading"),
            AlbumState::Empty => f.write_str("This pin has no images"),
            AlbumState::Populated(n) => write!(f, "{n} photo(s)"),
        }
    }
}

/// A consistent view of one pin's album, published on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlbumSnapshot {
    pub phase: SyncPhase,
    pub state: AlbumState,
    /// Fetch cycle that produced this snapshot.
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settled_phases() {
        assert!(SyncPhase::Idle.is_settled());
        assert!(SyncPhase::Done.is_settled());
        assert!(!SyncPhase::Checking.is_settled());
        assert!(!SyncPhase::FetchingRemote.is_settled());
        assert!(!SyncPhase::Downloading.is_settled());
    }

    #[test]
    fn test_state_from_count() {
        assert_eq!(AlbumState::from_count(0), AlbumState::Empty);
        assert_eq!(AlbumState::from_count(4), AlbumState::Populated(4));
    }

    #[test]
    fn test_default_snapshot() {
        let snapshot = AlbumSnapshot::default();
        assert_eq!(snapshot.phase, SyncPhase::Idle);
        assert_eq!(snapshot.state, AlbumState::Unknown);
        assert_eq!(snapshot.generation, 0);
    }
}
