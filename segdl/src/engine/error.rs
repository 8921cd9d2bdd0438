//! Error types for segment workers and engines.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::InvalidTransition;
use crate::storage::StorageError;
use crate::transport::TransportError;

/// Why a segment attempt failed.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no data received for {0:?}")]
    Stalled(Duration),

    #[error("segment {index} wrote {actual} bytes, expected {expected}")]
    Integrity {
        index: usize,
        expected: u64,
        actual: u64,
    },

    #[error("failed to write {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("disk full while writing {}", path.display())]
    DiskFull { path: PathBuf },

    #[error("no attempts left after {attempts}: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl SegmentError {
    /// Network and data errors are retried; local disk errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Stalled(_) | Self::Integrity { .. }
        )
    }

    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::StorageFull {
            Self::DiskFull {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Errors that abort an engine run before it reaches an outcome.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("engine for {0} is already running")]
    AlreadyRunning(crate::model::TransferId),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let transport = SegmentError::Transport(TransportError::Stream("reset".into()));
        assert!(transport.is_retryable());
        assert!(SegmentError::Stalled(Duration::from_secs(1)).is_retryable());
        assert!(SegmentError::Integrity {
            index: 0,
            expected: 10,
            actual: 5
        }
        .is_retryable());

        let disk = SegmentError::io(
            std::path::Path::new("/tmp/x"),
            io::Error::from(io::ErrorKind::StorageFull),
        );
        assert!(matches!(disk, SegmentError::DiskFull { .. }));
        assert!(!disk.is_retryable());

        let denied = SegmentError::io(
            std::path::Path::new("/tmp/x"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(!denied.is_retryable());
    }
}
