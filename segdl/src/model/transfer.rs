//! Transfer records and their lifecycle.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RequestHeaders;
use crate::checksum::DigestAlgorithm;

// =============================================================================
// Transfer Id
// =============================================================================

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh id from the wall clock and a process-wide counter.
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis();
        let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xffff;
        Self(format!("{:011x}{:04x}", millis, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// Priority
// =============================================================================

/// Scheduling priority of a transfer. Higher values are admitted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const HIGH: Priority = Priority(100);
    pub const NORMAL: Priority = Priority(0);
    pub const LOW: Priority = Priority(-50);

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::HIGH => write!(f, "High(100)"),
            Self::NORMAL => write!(f, "Normal(0)"),
            Self::LOW => write!(f, "Low(-50)"),
            Self(v) => write!(f, "Priority({})", v),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle state of a transfer.
///
/// ```text
/// Pending ──► Queued ──► Active ──► Merging ──► Completed
///                ▲  │       │  │        │
///                │  ▼       │  └──► Failed ◄──┘
///             Paused ◄──────┘
///   (Cancelled reachable from Pending, Queued, Active, Paused)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    #[default]
    Pending,
    Queued,
    Active,
    Paused,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, Failed and Cancelled admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transfer in this state holds an active slot.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Active | Self::Merging)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `Active -> Active`, `Merging -> Active` and the demotions to `Queued`
    /// only occur when restoring state after a restart.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, Queued | Active | Failed | Cancelled)
                | (Queued, Active | Paused | Cancelled)
                | (Active, Active | Queued | Paused | Merging | Completed | Failed | Cancelled)
                | (Paused, Queued | Cancelled)
                | (Merging, Active | Queued | Completed | Failed)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "merging" => Ok(Self::Merging),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown transfer status '{}'", other)),
        }
    }
}

/// A rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transfer {id} cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub id: TransferId,
    pub from: TransferStatus,
    pub to: TransferStatus,
}

// =============================================================================
// Integrity
// =============================================================================

/// Checksum expectation and outcome for the merged file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integrity {
    pub algorithm: DigestAlgorithm,

    /// Expected hex digest, if the submitter supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,

    /// Digest computed while merging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,

    /// `None` when there was nothing to compare against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

// =============================================================================
// Transfer
// =============================================================================

/// One user-requested download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub url: String,
    pub destination: PathBuf,

    /// `None` until the size is known; resolved by a probe when the engine
    /// starts.
    pub total_size: Option<u64>,

    pub status: TransferStatus,
    pub priority: Priority,

    /// Desired number of segments.
    pub segment_hint: usize,

    /// Attempts each segment may make before it fails.
    pub max_attempts: u32,

    pub downloaded: u64,

    /// Aggregate speed in bytes per second.
    pub speed: u64,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub integrity: Integrity,

    #[serde(default)]
    pub headers: RequestHeaders,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Index of the first segment that exhausted its retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_segment: Option<usize>,

    /// Submission order, used to keep equal priorities FIFO.
    #[serde(default)]
    pub sequence: u64,
}

impl Transfer {
    pub fn builder(url: impl Into<String>, destination: impl Into<PathBuf>) -> TransferBuilder {
        TransferBuilder::new(url, destination)
    }

    /// Applies a status change, rejecting illegal transitions.
    ///
    /// Timestamps are maintained here: `started_at` on the first activation,
    /// `completed_at` on entering a terminal state.
    pub fn transition(&mut self, next: TransferStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        if next == TransferStatus::Active && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
            self.speed = 0;
        }
        if next == TransferStatus::Paused {
            self.speed = 0;
        }
        self.status = next;
        Ok(())
    }

    /// Percent complete, 0 while the size is unknown.
    pub fn percent(&self) -> u8 {
        match self.total_size {
            Some(total) if total > 0 => ((self.downloaded.min(total) * 100) / total) as u8,
            _ => 0,
        }
    }

    /// Marks the transfer failed with a reason, regardless of the current
    /// non-terminal state.
    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
        self.status = TransferStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.speed = 0;
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Default segment hint for new transfers.
pub const DEFAULT_SEGMENT_HINT: usize = 8;

/// Default retry budget per segment.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Builder for [`Transfer`] requests.
///
/// ```ignore
/// let transfer = Transfer::builder("https://example.com/file.iso", "/tmp/file.iso")
///     .priority(Priority::HIGH)
///     .segments(16)
///     .expected_digest(DigestAlgorithm::Sha256, "ab12...")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TransferBuilder {
    transfer: Transfer,
}

impl TransferBuilder {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            transfer: Transfer {
                id: TransferId::generate(),
                url: url.into(),
                destination: destination.into(),
                total_size: None,
                status: TransferStatus::Pending,
                priority: Priority::NORMAL,
                segment_hint: DEFAULT_SEGMENT_HINT,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                downloaded: 0,
                speed: 0,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                integrity: Integrity::default(),
                headers: RequestHeaders::default(),
                error: None,
                failed_segment: None,
                sequence: 0,
            },
        }
    }

    pub fn id(mut self, id: TransferId) -> Self {
        self.transfer.id = id;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.transfer.priority = priority;
        self
    }

    pub fn segments(mut self, hint: usize) -> Self {
        self.transfer.segment_hint = hint;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.transfer.max_attempts = attempts;
        self
    }

    pub fn total_size(mut self, size: u64) -> Self {
        self.transfer.total_size = Some(size);
        self
    }

    pub fn algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.transfer.integrity.algorithm = algorithm;
        self
    }

    pub fn expected_digest(mut self, algorithm: DigestAlgorithm, hex: impl Into<String>) -> Self {
        self.transfer.integrity.algorithm = algorithm;
        self.transfer.integrity.expected = Some(hex.into());
        self
    }

    pub fn headers(mut self, headers: RequestHeaders) -> Self {
        self.transfer.headers = headers;
        self
    }

    pub fn build(self) -> Transfer {
        self.transfer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer() -> Transfer {
        Transfer::builder("https://example.com/a.bin", "/tmp/a.bin").build()
    }

    #[test]
    fn test_generated_ids_unique() {
        let a = TransferId::generate();
        let b = TransferId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut t = transfer();
        t.transition(TransferStatus::Queued).unwrap();
        t.transition(TransferStatus::Active).unwrap();
        assert!(t.started_at.is_some());
        t.transition(TransferStatus::Merging).unwrap();
        t.transition(TransferStatus::Completed).unwrap();
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn test_pause_resume_cycle() {
        let mut t = transfer();
        t.transition(TransferStatus::Queued).unwrap();
        t.transition(TransferStatus::Active).unwrap();
        t.transition(TransferStatus::Paused).unwrap();
        t.transition(TransferStatus::Queued).unwrap();
        t.transition(TransferStatus::Active).unwrap();
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for terminal in [
            TransferStatus::Completed,
            TransferStatus::Failed,
            TransferStatus::Cancelled,
        ] {
            for next in [
                TransferStatus::Queued,
                TransferStatus::Active,
                TransferStatus::Paused,
                TransferStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
    }

    #[test]
    fn test_invalid_transition_leaves_status() {
        let mut t = transfer();
        let err = t.transition(TransferStatus::Merging).unwrap_err();
        assert_eq!(err.from, TransferStatus::Pending);
        assert_eq!(err.to, TransferStatus::Merging);
        assert_eq!(t.status, TransferStatus::Pending);
    }

    #[test]
    fn test_merging_cannot_be_cancelled() {
        assert!(!TransferStatus::Merging.can_transition_to(TransferStatus::Cancelled));
        assert!(!TransferStatus::Merging.can_transition_to(TransferStatus::Paused));
    }

    #[test]
    fn test_percent() {
        let mut t = transfer();
        assert_eq!(t.percent(), 0);
        t.total_size = Some(200);
        t.downloaded = 50;
        assert_eq!(t.percent(), 25);
        t.downloaded = 200;
        assert_eq!(t.percent(), 100);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        assert_eq!("Paused".parse::<TransferStatus>(), Ok(TransferStatus::Paused));
        assert!("bogus".parse::<TransferStatus>().is_err());
    }

    #[test]
    fn test_serde_shape() {
        let t = Transfer::builder("https://e.com/x", "/tmp/x")
            .id(TransferId::new("abc"))
            .priority(Priority(7))
            .build();
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["priority"], 7);

        let back: Transfer = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }
}
