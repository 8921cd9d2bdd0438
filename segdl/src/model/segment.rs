//! Byte ranges and segment records.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TransferId;

// =============================================================================
// Byte Range
// =============================================================================

/// An inclusive byte range `start..=end`.
///
/// `end` is `None` when the resource length is unknown; such a range reads
/// to the end of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Creates a closed range. `end` is inclusive.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start {} beyond end {}", start, end);
        Self {
            start,
            end: Some(end),
        }
    }

    /// Creates a range that reads from `start` to the end of the resource.
    pub fn open(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Number of bytes covered, `None` for an open range.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end - self.start + 1)
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// The same range with its start advanced by `offset` bytes.
    ///
    /// Used to resume a partially written segment.
    pub fn advance(&self, offset: u64) -> Self {
        Self {
            start: self.start + offset,
            end: self.end,
        }
    }

    /// Value for an HTTP `Range` header.
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}-{}", self.start, end),
            None => write!(f, "{}-", self.start),
        }
    }
}

// =============================================================================
// Segment Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    #[default]
    Pending,
    Downloading,
    Paused,
    /// No bytes arrived within the stall timeout; retried like a failure.
    Stalled,
    Completed,
    Failed,
    Cancelled,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Stalled => "stalled",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the worker for this segment has finished for good in the
    /// current engine run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Segment
// =============================================================================

/// One byte range of a transfer and the sink it streams into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub transfer_id: TransferId,

    /// Position in merge order.
    pub index: usize,

    pub range: ByteRange,

    /// Bytes currently present in the sink.
    pub downloaded: u64,

    pub status: SegmentStatus,

    /// Attempts consumed in the current retry budget.
    pub attempts: u32,

    pub last_activity: Option<DateTime<Utc>>,

    pub sink: PathBuf,

    /// Digest of the sink, when per-segment digests are enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Segment {
    pub fn new(transfer_id: TransferId, index: usize, range: ByteRange, sink: PathBuf) -> Self {
        Self {
            transfer_id,
            index,
            range,
            downloaded: 0,
            status: SegmentStatus::Pending,
            attempts: 0,
            last_activity: None,
            sink,
            digest: None,
            error: None,
        }
    }

    /// Builds the segment records for a planned set of ranges.
    pub fn from_plan(transfer_id: &TransferId, destination: &Path, ranges: &[ByteRange]) -> Vec<Self> {
        ranges
            .iter()
            .enumerate()
            .map(|(index, range)| {
                Self::new(
                    transfer_id.clone(),
                    index,
                    *range,
                    sink_path(destination, index),
                )
            })
            .collect()
    }

    /// Bytes still missing, `None` for an open range.
    pub fn remaining(&self) -> Option<u64> {
        self.range
            .len()
            .map(|len| len.saturating_sub(self.downloaded))
    }

    pub fn is_complete(&self) -> bool {
        self.status == SegmentStatus::Completed
    }
}

/// Path of the sink for segment `index` of `destination`.
///
/// Sinks live next to the destination as `<file name>.part<index>`.
pub fn sink_path(destination: &Path, index: usize) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    destination.with_file_name(format!("{}.part{}", name, index))
}
