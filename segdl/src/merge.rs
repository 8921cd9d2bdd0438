//! Segment merging.
//!
//! Concatenates segment sinks in index order into the destination while
//! hashing the output, compares the digest with the expected value and
//! removes the sinks.
//!
//! Merges are serialized: every engine shares one single-permit pool, and
//! the copy itself runs on the blocking thread pool so it never stalls the
//! async workers of other transfers.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::checksum::{digests_match, DigestAlgorithm, HashingWriter};
use crate::model::{Segment, TransferId};

/// Write buffer for the merged file (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("segment {index} sink {} is missing", path.display())]
    MissingSink { index: usize, path: PathBuf },

    #[error("segment {index} sink holds {actual} bytes, expected {expected}")]
    SinkSize {
        index: usize,
        expected: u64,
        actual: u64,
    },

    #[error("merge I/O failed on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("merge aborted: {0}")]
    Aborted(String),
}

/// Everything needed to assemble one transfer.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub transfer_id: TransferId,
    pub destination: PathBuf,
    pub segments: Vec<Segment>,
    pub algorithm: DigestAlgorithm,
    pub expected: Option<String>,
    /// Treat a digest mismatch as an error.
    pub strict: bool,
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub path: PathBuf,
    pub digest: String,
    pub bytes: u64,
    /// `Some(false)` when an expected digest was given and did not match.
    pub verified: Option<bool>,
}

/// Handle to the shared, serialized merge pool.
#[derive(Debug, Clone)]
pub struct Merger {
    pool: Arc<Semaphore>,
}

impl Default for Merger {
    fn default() -> Self {
        Self::new()
    }
}

impl Merger {
    pub fn new() -> Self {
        Self {
            pool: Arc::new(Semaphore::new(1)),
        }
    }

    pub async fn merge(&self, request: MergeRequest) -> Result<MergeReport, MergeError> {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| MergeError::Aborted("merge pool closed".to_string()))?;

        tokio::task::spawn_blocking(move || merge_blocking(request))
            .await
            .map_err(|e| MergeError::Aborted(e.to_string()))?
    }
}

fn merge_blocking(request: MergeRequest) -> Result<MergeReport, MergeError> {
    let MergeRequest {
        transfer_id,
        destination,
        mut segments,
        algorithm,
        expected,
        strict,
    } = request;

    segments.sort_by_key(|s| s.index);
    verify_sinks(&segments)?;

    let io_err = |path: &PathBuf| {
        let path = path.clone();
        move |source| MergeError::Io { path, source }
    };

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err(&parent.to_path_buf()))?;
        }
    }

    let file = File::create(&destination).map_err(io_err(&destination))?;
    let mut writer = HashingWriter::new(BufWriter::with_capacity(BUFFER_SIZE, file), algorithm);

    for segment in &segments {
        let mut source = File::open(&segment.sink).map_err(io_err(&segment.sink))?;
        io::copy(&mut source, &mut writer).map_err(io_err(&destination))?;
    }

    writer.flush().map_err(io_err(&destination))?;
    let bytes = writer.bytes_written();
    let (buffered, digest) = writer.finish();
    let file = buffered
        .into_inner()
        .map_err(|e| MergeError::Io {
            path: destination.clone(),
            source: e.into_error(),
        })?;
    file.sync_all().map_err(io_err(&destination))?;

    let verified = expected.as_deref().map(|e| digests_match(e, &digest));

    for segment in &segments {
        if let Err(e) = fs::remove_file(&segment.sink) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(sink = %segment.sink.display(), error = %e, "failed to remove sink");
            }
        }
    }

    info!(
        transfer_id = %transfer_id,
        path = %destination.display(),
        bytes,
        segments = segments.len(),
        %digest,
        ?verified,
        "merged transfer"
    );

    if verified == Some(false) && strict {
        return Err(MergeError::DigestMismatch {
            expected: expected.unwrap_or_default(),
            actual: digest,
        });
    }

    Ok(MergeReport {
        path: destination,
        digest,
        bytes,
        verified,
    })
}

fn verify_sinks(segments: &[Segment]) -> Result<(), MergeError> {
    for segment in segments {
        let actual = match fs::metadata(&segment.sink) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MergeError::MissingSink {
                    index: segment.index,
                    path: segment.sink.clone(),
                })
            }
            Err(source) => {
                return Err(MergeError::Io {
                    path: segment.sink.clone(),
                    source,
                })
            }
        };

        if let Some(expected) = segment.range.len() {
            if actual != expected {
                return Err(MergeError::SinkSize {
                    index: segment.index,
                    expected,
                    actual,
                });
            }
        }
    }
    Ok(())
}

/// Removes every sink of `segments`, ignoring ones already gone.
pub fn remove_sinks(segments: &[Segment]) {
    for segment in segments {
        match fs::remove_file(&segment.sink) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(sink = %segment.sink.display(), error = %e, "failed to remove sink"),
        }
    }
}
