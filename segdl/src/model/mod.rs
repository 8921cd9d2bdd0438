//! Persistent data model for transfers and their segments.
//!
//! A [`Transfer`] is one user-requested download. It is split into one or
//! more [`Segment`]s, each covering a contiguous [`ByteRange`] of the remote
//! resource and streaming into its own sink file next to the destination.
//!
//! Both records are serializable so that any [`TransferStore`] can persist
//! them and the orchestrator can restore in-flight work after a restart.
//!
//! [`TransferStore`]: crate::storage::TransferStore

mod headers;
mod segment;
mod transfer;

pub use headers::RequestHeaders;
pub use segment::{sink_path, ByteRange, Segment, SegmentStatus};
pub use transfer::{
    Integrity, InvalidTransition, Priority, Transfer, TransferBuilder, TransferId, TransferStatus,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_SEGMENT_HINT,
};
