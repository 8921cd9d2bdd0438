//! Range-capable transport abstraction.
//!
//! The engine never talks HTTP directly. It issues range requests and
//! metadata probes through the [`Transport`] trait, which keeps workers
//! testable against in-memory fakes and lets callers plug in their own
//! client.
//!
//! # Design Principles
//!
//! - **Streaming bodies**: responses expose a [`ByteStream`], never a buffer
//! - **Status passthrough**: non-2xx replies are returned, not converted to
//!   errors, so the worker decides what a status means for its range
//! - **Dyn-compatible**: uses [`BoxFuture`] so engines can hold
//!   `Arc<dyn Transport>`
//!
//! # Example
//!
//! ```ignore
//! use segdl::transport::{ReqwestTransport, Transport, TransportConfig};
//!
//! let transport = ReqwestTransport::new(&TransportConfig::default())?;
//! let info = transport.probe("https://example.com/file.iso", &headers).await?;
//! println!("{:?} bytes, ranges: {}", info.total_size, info.accepts_ranges);
//! ```

mod http;
pub mod metadata;

#[cfg(test)]
pub mod testing;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

use crate::model::{ByteRange, RequestHeaders};

pub use http::ReqwestTransport;

/// Boxed future used by dyn-compatible async traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Response body as a stream of chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Default connect timeout (30 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Errors raised by a transport. All of them are considered transient by
/// the segment worker.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    #[error("response stream interrupted: {0}")]
    Stream(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// A response to a data request.
pub struct TransportResponse {
    /// HTTP status code (200 for a whole-resource reply, 206 for a range).
    pub status: u16,

    /// Body length advertised by the server, if any.
    pub content_length: Option<u64>,

    pub body: ByteStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Resource metadata returned by a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceInfo {
    /// Length of the resource; `None` when the server does not say.
    pub total_size: Option<u64>,

    /// Whether the server advertises byte-range support.
    pub accepts_ranges: bool,

    /// File name derived from `Content-Disposition` or the URL.
    pub filename: Option<String>,

    pub content_type: Option<String>,
}

/// A source of byte ranges.
pub trait Transport: Send + Sync {
    /// Requests `range` of `url`, or the whole resource when `range` is `None`.
    fn request<'a>(
        &'a self,
        url: &'a str,
        range: Option<ByteRange>,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>>;

    /// Fetches resource metadata without downloading the body.
    fn probe<'a>(
        &'a self,
        url: &'a str,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<ResourceInfo, TransportError>>;
}

/// Settings for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,

    /// Used when a transfer does not carry its own user agent.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            user_agent: format!("segdl/{}", crate::VERSION),
        }
    }
}

impl TransportConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
