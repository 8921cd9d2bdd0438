//! In-memory transport for unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;

use super::{BoxFuture, ByteStream, ResourceInfo, Transport, TransportError, TransportResponse};
use crate::model::{ByteRange, RequestHeaders};

/// Serves byte ranges of a fixed buffer.
pub struct MockTransport {
    data: Bytes,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
    fail_first: AtomicU32,
    always_fail: bool,
    fail_start: Option<u64>,
    ignore_ranges: bool,
    advertise_size: bool,
    hang_after_chunks: Option<usize>,
    requests: Mutex<Vec<Option<ByteRange>>>,
}

impl MockTransport {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
            chunk_size: 1024,
            chunk_delay: None,
            fail_first: AtomicU32::new(0),
            always_fail: false,
            fail_start: None,
            ignore_ranges: false,
            advertise_size: true,
            hang_after_chunks: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Fail the first `n` data requests with a connection error.
    pub fn failing_first(self, n: u32) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every data request.
    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Fail every data request for a range beginning at `start`.
    pub fn failing_at(mut self, start: u64) -> Self {
        self.fail_start = Some(start);
        self
    }

    /// Answer every request with 200 and the whole body.
    pub fn ignoring_ranges(mut self) -> Self {
        self.ignore_ranges = true;
        self
    }

    /// Probe reports an unknown size.
    pub fn without_size(mut self) -> Self {
        self.advertise_size = false;
        self
    }

    /// Stop producing chunks after `n` without closing the stream.
    pub fn hanging_after(mut self, n: usize) -> Self {
        self.hang_after_chunks = Some(n);
        self
    }

    /// Ranges requested so far, in order.
    pub fn requests(&self) -> Vec<Option<ByteRange>> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn slice(&self, range: Option<ByteRange>) -> (u16, Bytes) {
        let len = self.data.len() as u64;
        match range {
            Some(range) if !self.ignore_ranges => {
                let start = range.start.min(len) as usize;
                let end = range
                    .end
                    .map(|e| (e + 1).min(len))
                    .unwrap_or(len) as usize;
                (206, self.data.slice(start..end.max(start)))
            }
            _ => (200, self.data.clone()),
        }
    }

    fn body(&self, payload: Bytes) -> ByteStream {
        let chunks: Vec<Bytes> = payload
            .chunks(self.chunk_size)
            .map(Bytes::copy_from_slice)
            .collect();
        let delay = self.chunk_delay;

        let stream = futures::stream::iter(chunks).then(move |chunk| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, TransportError>(chunk)
        });

        match self.hang_after_chunks {
            Some(n) => Box::pin(stream.take(n).chain(futures::stream::pending())),
            None => Box::pin(stream),
        }
    }
}

impl Transport for MockTransport {
    fn request<'a>(
        &'a self,
        url: &'a str,
        range: Option<ByteRange>,
        _headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            self.requests.lock().push(range);

            let fail_once = self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            let targeted = self.fail_start.is_some()
                && range.map(|r| r.start) == self.fail_start;
            if self.always_fail || fail_once || targeted {
                return Err(TransportError::Connection {
                    url: url.to_string(),
                    reason: "connection reset".to_string(),
                });
            }

            let (status, payload) = self.slice(range);
            Ok(TransportResponse {
                status,
                content_length: Some(payload.len() as u64),
                body: self.body(payload),
            })
        })
    }

    fn probe<'a>(
        &'a self,
        _url: &'a str,
        _headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<ResourceInfo, TransportError>> {
        Box::pin(async move {
            Ok(ResourceInfo {
                total_size: self.advertise_size.then_some(self.data.len() as u64),
                accepts_ranges: !self.ignore_ranges,
                filename: Some("mock.bin".to_string()),
                content_type: Some("application/octet-stream".to_string()),
            })
        })
    }
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(response: TransportResponse) -> Vec<u8> {
        let mut out = Vec::new();
        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_mock_serves_range() {
        let mock = MockTransport::new(payload(100)).with_chunk_size(7);
        let headers = RequestHeaders::default();

        let response = mock
            .request("mem://x", Some(ByteRange::new(10, 19)), &headers)
            .await
            .unwrap();
        assert_eq!(response.status, 206);
        assert_eq!(collect(response).await, payload(100)[10..20].to_vec());
        assert_eq!(mock.requests(), vec![Some(ByteRange::new(10, 19))]);
    }

    #[tokio::test]
    async fn test_mock_fails_first() {
        let mock = MockTransport::new(payload(10)).failing_first(2);
        let headers = RequestHeaders::default();

        assert!(mock.request("mem://x", None, &headers).await.is_err());
        assert!(mock.request("mem://x", None, &headers).await.is_err());
        assert!(mock.request("mem://x", None, &headers).await.is_ok());
    }
}
