//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::broadcast;

use segdl::engine::{EngineConfig, TransferEvent};
use segdl::model::{ByteRange, RequestHeaders, TransferId, TransferStatus};
use segdl::orchestrator::OrchestratorConfig;
use segdl::transport::{
    BoxFuture, ByteStream, ResourceInfo, Transport, TransportError, TransportResponse,
};

/// Deterministic payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

/// In-memory server: every URL serves the same buffer.
pub struct FakeTransport {
    data: Bytes,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
    fail_all: bool,
    requests: Mutex<Vec<(String, Option<ByteRange>)>>,
}

impl FakeTransport {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
            chunk_size: 512,
            chunk_delay: None,
            fail_all: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chunks(mut self, size: usize, delay: Duration) -> Self {
        self.chunk_size = size.max(1);
        self.chunk_delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Ranges requested for `url`, in order.
    pub fn requests_for(&self, url: &str) -> Vec<Option<ByteRange>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, r)| *r)
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for FakeTransport {
    fn request<'a>(
        &'a self,
        url: &'a str,
        range: Option<ByteRange>,
        _headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push((url.to_string(), range));
            if self.fail_all {
                return Err(TransportError::Connection {
                    url: url.to_string(),
                    reason: "refused".to_string(),
                });
            }

            let len = self.data.len() as u64;
            let (status, body) = match range {
                Some(r) => {
                    let start = r.start.min(len) as usize;
                    let end = r.end.map(|e| (e + 1).min(len)).unwrap_or(len) as usize;
                    (206, self.data.slice(start..end.max(start)))
                }
                None => (200, self.data.clone()),
            };

            let chunks: Vec<Bytes> = body
                .chunks(self.chunk_size)
                .map(Bytes::copy_from_slice)
                .collect();
            let delay = self.chunk_delay;
            let stream: ByteStream =
                Box::pin(futures::stream::iter(chunks).then(move |chunk| async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    Ok::<_, TransportError>(chunk)
                }));

            Ok(TransportResponse {
                status,
                content_length: Some(body.len() as u64),
                body: stream,
            })
        })
    }

    fn probe<'a>(
        &'a self,
        url: &'a str,
        _headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<ResourceInfo, TransportError>> {
        Box::pin(async move {
            Ok(ResourceInfo {
                total_size: Some(self.data.len() as u64),
                accepts_ranges: true,
                filename: segdl::transport::metadata::filename_from_url(url),
                content_type: None,
            })
        })
    }
}

/// Small segments, fast retries, frequent progress.
pub fn test_config(max_active: usize) -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_max_active(max_active)
        .with_event_capacity(1 << 16)
        .with_engine(
            EngineConfig::default()
                .with_min_segment_size(1000)
                .with_retry_delay(Duration::from_millis(1))
                .with_progress_interval(Duration::from_millis(20)),
        )
}

/// Waits until `id` reports `status`, failing the test after `timeout`.
pub async fn wait_for_status(
    events: &mut broadcast::Receiver<TransferEvent>,
    id: &TransferId,
    status: TransferStatus,
    timeout: Duration,
) {
    let found = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(TransferEvent::StatusChanged { id: got, status: s }) if &got == id && s == status => {
                    return true
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    })
    .await;
    assert_eq!(found, Ok(true), "{} never reached {}", id, status);
}

/// Waits until every id in `ids` has completed.
pub async fn wait_all_completed(
    events: &mut broadcast::Receiver<TransferEvent>,
    ids: &[TransferId],
    timeout: Duration,
) {
    let mut pending: HashSet<TransferId> = ids.iter().cloned().collect();
    let done = tokio::time::timeout(timeout, async {
        while !pending.is_empty() {
            match events.recv().await {
                Ok(TransferEvent::Completed { id, .. }) => {
                    pending.remove(&id);
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        pending.is_empty()
    })
    .await;
    assert_eq!(done, Ok(true), "not every transfer completed in time");
}

/// Sink files (`*.part<N>`) left in `dir`.
pub fn sinks_in(dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.to_string_lossy().contains(".part"))
                .collect()
        })
        .unwrap_or_default()
}
