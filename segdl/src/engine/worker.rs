//! Segment worker: fetches one byte range into its sink.
//!
//! # Attempt lifecycle
//!
//! 1. Measure the sink; bytes already present are kept and only the rest of
//!    the range is requested (open ranges always restart from zero).
//! 2. Issue the request and validate the status against the range.
//! 3. Stream chunks into the sink, updating the atomic counters after each
//!    chunk and sampling speed at a fixed cadence. A window without data
//!    reports a speed of zero.
//! 4. Check that exactly the range length was written.
//!
//! Every wait (request, next chunk, backoff) races the run token, so pause
//! and cancel take effect at the next chunk boundary and never consume an
//! attempt. Waiting longer than the stall timeout for a chunk abandons the
//! attempt as [`SegmentStatus::Stalled`].

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::SegmentError;
use super::events::{EventBus, TransferEvent};
use super::policy::RetryPolicy;
use super::progress::SegmentCounters;
use crate::checksum::{file_digest, DigestAlgorithm};
use crate::model::{ByteRange, RequestHeaders, Segment, SegmentStatus};
use crate::transport::{Transport, TransportError};

/// How a worker run ended.
#[derive(Debug)]
pub enum SegmentOutcome {
    Completed,
    Failed(SegmentError),
    /// Pause or cancel was observed; the sink keeps what was written.
    Interrupted,
}

/// Inputs shared by all workers of one engine run.
#[derive(Clone)]
pub struct WorkerContext {
    pub transport: Arc<dyn Transport>,
    pub url: Arc<str>,
    pub headers: Arc<RequestHeaders>,
    pub policy: RetryPolicy,
    pub stall_timeout: Duration,
    pub speed_interval: Duration,
    pub buffer_size: usize,
    pub digest: Option<DigestAlgorithm>,
    pub events: EventBus,
    pub token: CancellationToken,
}

enum AttemptError {
    Interrupted,
    Failed(SegmentError),
}

impl From<SegmentError> for AttemptError {
    fn from(e: SegmentError) -> Self {
        Self::Failed(e)
    }
}

pub struct SegmentWorker {
    ctx: WorkerContext,
    counters: Arc<SegmentCounters>,
    segment: Segment,
}

impl SegmentWorker {
    pub fn new(ctx: WorkerContext, counters: Arc<SegmentCounters>, segment: Segment) -> Self {
        Self {
            ctx,
            counters,
            segment,
        }
    }

    /// Waits for a pool permit, then runs attempts until the segment
    /// completes, fails for good or is interrupted.
    ///
    /// Returns the updated segment record with the outcome.
    pub async fn run(mut self, pool: Arc<Semaphore>) -> (Segment, SegmentOutcome) {
        let permit = tokio::select! {
            biased;
            _ = self.ctx.token.cancelled() => None,
            permit = pool.acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.segment.status = SegmentStatus::Paused;
            return (self.segment, SegmentOutcome::Interrupted);
        };

        let outcome = self.attempt_loop().await;
        self.counters.set_speed(0);
        self.segment.last_activity = self.counters.last_activity();
        (self.segment, outcome)
    }

    async fn attempt_loop(&mut self) -> SegmentOutcome {
        let index = self.segment.index;
        if self.segment.attempts >= self.ctx.policy.max_attempts() {
            let last = self
                .segment
                .error
                .take()
                .unwrap_or_else(|| "previous run".to_string());
            return self.fail(SegmentError::Exhausted {
                attempts: self.segment.attempts,
                last,
            });
        }
        self.segment.status = SegmentStatus::Downloading;
        self.segment.error = None;

        loop {
            if self.ctx.token.is_cancelled() {
                self.segment.status = SegmentStatus::Paused;
                return SegmentOutcome::Interrupted;
            }

            self.segment.attempts += 1;
            let attempt = self.segment.attempts;

            let error = match self.attempt().await {
                Ok(()) => {
                    self.segment.status = SegmentStatus::Completed;
                    self.segment.error = None;
                    self.record_digest().await;
                    debug!(
                        transfer_id = %self.segment.transfer_id,
                        segment = index,
                        bytes = self.segment.downloaded,
                        attempt,
                        "segment completed"
                    );
                    return SegmentOutcome::Completed;
                }
                Err(AttemptError::Interrupted) => {
                    self.segment.attempts -= 1;
                    self.segment.status = SegmentStatus::Paused;
                    return SegmentOutcome::Interrupted;
                }
                Err(AttemptError::Failed(e)) => e,
            };

            if matches!(error, SegmentError::Stalled(_)) {
                self.segment.status = SegmentStatus::Stalled;
            }
            self.segment.error = Some(error.to_string());

            let delay = if error.is_retryable() {
                self.ctx.policy.delay_for_attempt(attempt)
            } else {
                None
            };

            let Some(delay) = delay else {
                return self.fail(error);
            };

            warn!(
                transfer_id = %self.segment.transfer_id,
                segment = index,
                attempt,
                max_attempts = self.ctx.policy.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "segment attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = self.ctx.token.cancelled() => {
                    self.segment.status = SegmentStatus::Paused;
                    return SegmentOutcome::Interrupted;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            self.segment.status = SegmentStatus::Downloading;
        }
    }

    fn fail(&mut self, error: SegmentError) -> SegmentOutcome {
        warn!(
            transfer_id = %self.segment.transfer_id,
            segment = self.segment.index,
            attempts = self.segment.attempts,
            error = %error,
            "segment failed"
        );
        self.segment.status = SegmentStatus::Failed;
        self.segment.error = Some(error.to_string());
        self.ctx.events.emit(TransferEvent::SegmentFailed {
            id: self.segment.transfer_id.clone(),
            index: self.segment.index,
            reason: error.to_string(),
        });
        SegmentOutcome::Failed(error)
    }

    fn emit_progress(&self, downloaded: u64, speed: u64) {
        self.ctx.events.emit(TransferEvent::SegmentProgress {
            id: self.segment.transfer_id.clone(),
            index: self.segment.index,
            downloaded,
            speed,
        });
    }

    async fn record_digest(&mut self) {
        let Some(algorithm) = self.ctx.digest else {
            return;
        };
        let sink = self.segment.sink.clone();
        match tokio::task::spawn_blocking(move || file_digest(&sink, algorithm)).await {
            Ok(Ok(digest)) => self.segment.digest = Some(digest),
            Ok(Err(e)) => warn!(segment = self.segment.index, error = %e, "segment digest failed"),
            Err(e) => warn!(segment = self.segment.index, error = %e, "segment digest task failed"),
        }
    }

    /// Bytes already in the sink that can be kept for this attempt.
    async fn resume_offset(&self) -> Result<u64, SegmentError> {
        let existing = match fs::metadata(&self.segment.sink).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(SegmentError::io(&self.segment.sink, e)),
        };

        Ok(match self.segment.range.len() {
            Some(len) if existing <= len => existing,
            // Oversized sinks and open ranges start over.
            _ => 0,
        })
    }

    async fn attempt(&mut self) -> Result<(), AttemptError> {
        let range = self.segment.range;
        let expected = range.len();
        let offset = self.resume_offset().await?;

        self.segment.downloaded = offset;
        self.counters.set_downloaded(offset);

        if Some(offset) == expected {
            return Ok(());
        }

        let requested = if range.is_open() {
            None
        } else {
            Some(range.advance(offset))
        };

        let response = tokio::select! {
            biased;
            _ = self.ctx.token.cancelled() => return Err(AttemptError::Interrupted),
            result = tokio::time::timeout(
                self.ctx.stall_timeout,
                self.ctx.transport.request(&self.ctx.url, requested, &self.ctx.headers),
            ) => match result {
                Err(_) => return Err(SegmentError::Stalled(self.ctx.stall_timeout).into()),
                Ok(response) => response.map_err(SegmentError::from)?,
            },
        };

        check_status(&self.ctx.url, requested, response.status, response.content_length)?;

        let sink = self.segment.sink.clone();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(offset == 0)
            .open(&sink)
            .await
            .map_err(|e| SegmentError::io(&sink, e))?;
        if offset > 0 {
            file.set_len(offset)
                .await
                .map_err(|e| SegmentError::io(&sink, e))?;
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| SegmentError::io(&sink, e))?;
        }
        let mut writer = BufWriter::with_capacity(self.ctx.buffer_size, file);
        let mut body = response.body;

        let mut written = offset;
        let mut sample_bytes = written;
        let mut sample_at = Instant::now();

        loop {
            let stall_at = TokioInstant::now() + self.ctx.stall_timeout;
            let mut idle_at = TokioInstant::now() + self.ctx.speed_interval;
            let next = loop {
                tokio::select! {
                    biased;
                    _ = self.ctx.token.cancelled() => {
                        // Keep what arrived so the next run resumes from it.
                        let _ = writer.flush().await;
                        self.segment.downloaded = written;
                        return Err(AttemptError::Interrupted);
                    }
                    next = body.next() => break Some(next),
                    _ = tokio::time::sleep_until(stall_at.min(idle_at)) => {
                        if TokioInstant::now() >= stall_at {
                            break None;
                        }
                        // A whole sampling window without data.
                        if self.counters.speed() != 0 {
                            self.counters.set_speed(0);
                            self.emit_progress(written, 0);
                        }
                        idle_at += self.ctx.speed_interval;
                    }
                }
            };

            let chunk = match next {
                None => {
                    let _ = writer.flush().await;
                    return Err(SegmentError::Stalled(self.ctx.stall_timeout).into());
                }
                Some(None) => break,
                Some(Some(Err(e))) => {
                    let _ = writer.flush().await;
                    return Err(SegmentError::Transport(e).into());
                }
                Some(Some(Ok(chunk))) => chunk,
            };

            let mut data = &chunk[..];
            if let Some(len) = expected {
                let room = (len - written) as usize;
                if data.len() > room {
                    warn!(
                        segment = self.segment.index,
                        extra = data.len() - room,
                        "server sent more than the requested range, discarding excess"
                    );
                    data = &data[..room];
                }
            }

            writer
                .write_all(data)
                .await
                .map_err(|e| SegmentError::io(&sink, e))?;
            written += data.len() as u64;
            self.segment.downloaded = written;
            self.counters.set_downloaded(written);
            self.counters.touch();

            let elapsed = sample_at.elapsed();
            if elapsed >= self.ctx.speed_interval {
                let speed = (written - sample_bytes) * 1000 / (elapsed.as_millis().max(1) as u64);
                self.counters.set_speed(speed);
                self.segment.last_activity = Some(Utc::now());
                self.emit_progress(written, speed);
                sample_bytes = written;
                sample_at = Instant::now();
            }

            if Some(written) == expected {
                break;
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| SegmentError::io(&sink, e))?;

        if let Some(len) = expected {
            if written != len {
                return Err(SegmentError::Integrity {
                    index: self.segment.index,
                    expected: len,
                    actual: written,
                }
                .into());
            }
        }

        Ok(())
    }
}

/// A range request must be answered with 206. A 200 (whole resource) is
/// accepted for a ranged request only when the range starts at zero and the
/// body length equals the range length; a request without a range expects
/// 200.
fn check_status(
    url: &str,
    requested: Option<ByteRange>,
    status: u16,
    content_length: Option<u64>,
) -> Result<(), SegmentError> {
    let ok = match (requested, status) {
        (None, 200) => true,
        (Some(_), 206) => true,
        (Some(range), 200) => range.start == 0 && content_length.is_some() && content_length == range.len(),
        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(SegmentError::Transport(TransportError::Status {
            status,
            url: url.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransferId;
    use crate::transport::testing::{payload, MockTransport};
    use tempfile::TempDir;

    fn context(transport: Arc<dyn Transport>, policy: RetryPolicy) -> WorkerContext {
        WorkerContext {
            transport,
            url: Arc::from("mem://resource"),
            headers: Arc::new(RequestHeaders::default()),
            policy,
            stall_timeout: Duration::from_secs(5),
            speed_interval: Duration::from_millis(1),
            buffer_size: 4096,
            digest: None,
            events: EventBus::new(64),
            token: CancellationToken::new(),
        }
    }

    fn segment(dir: &TempDir, index: usize, range: ByteRange) -> Segment {
        Segment::new(
            TransferId::new("w"),
            index,
            range,
            dir.path().join(format!("out.bin.part{}", index)),
        )
    }

    fn pool() -> Arc<Semaphore> {
        Arc::new(Semaphore::new(1))
    }

    #[tokio::test]
    async fn test_downloads_range_into_sink() {
        let dir = TempDir::new().unwrap();
        let data = payload(10_000);
        let transport = Arc::new(MockTransport::new(data.clone()).with_chunk_size(333));
        let seg = segment(&dir, 1, ByteRange::new(2000, 5999));

        let counters = Arc::new(SegmentCounters::default());
        let worker = SegmentWorker::new(
            context(transport, RetryPolicy::None),
            counters.clone(),
            seg,
        );
        let (seg, outcome) = worker.run(pool()).await;

        assert!(matches!(outcome, SegmentOutcome::Completed));
        assert_eq!(seg.status, SegmentStatus::Completed);
        assert_eq!(seg.downloaded, 4000);
        assert_eq!(counters.downloaded(), 4000);
        assert_eq!(std::fs::read(&seg.sink).unwrap(), data[2000..6000].to_vec());
    }

    #[tokio::test]
    async fn test_resumes_from_partial_sink() {
        let dir = TempDir::new().unwrap();
        let data = payload(1000);
        let transport = Arc::new(MockTransport::new(data.clone()));
        let seg = segment(&dir, 0, ByteRange::new(0, 999));
        std::fs::write(&seg.sink, &data[..400]).unwrap();

        let worker = SegmentWorker::new(
            context(transport.clone(), RetryPolicy::None),
            Arc::new(SegmentCounters::default()),
            seg,
        );
        let (seg, outcome) = worker.run(pool()).await;

        assert!(matches!(outcome, SegmentOutcome::Completed));
        assert_eq!(transport.requests(), vec![Some(ByteRange::new(400, 999))]);
        assert_eq!(std::fs::read(&seg.sink).unwrap(), data);
    }

    #[tokio::test]
    async fn test_complete_sink_skips_request() {
        let dir = TempDir::new().unwrap();
        let data = payload(100);
        let transport = Arc::new(MockTransport::new(data.clone()));
        let seg = segment(&dir, 0, ByteRange::new(0, 99));
        std::fs::write(&seg.sink, &data).unwrap();

        let worker = SegmentWorker::new(
            context(transport.clone(), RetryPolicy::None),
            Arc::new(SegmentCounters::default()),
            seg,
        );
        let (_, outcome) = worker.run(pool()).await;

        assert!(matches!(outcome, SegmentOutcome::Completed));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(payload(500)).failing_first(2));
        let worker = SegmentWorker::new(
            context(
                transport.clone(),
                RetryPolicy::linear(3, Duration::from_millis(1)),
            ),
            Arc::new(SegmentCounters::default()),
            segment(&dir, 0, ByteRange::new(0, 499)),
        );
        let (seg, outcome) = worker.run(pool()).await;

        assert!(matches!(outcome, SegmentOutcome::Completed));
        assert_eq!(seg.attempts, 3);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_fails_once() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(payload(500)).always_failing());
        let ctx = context(
            transport.clone(),
            RetryPolicy::linear(3, Duration::from_millis(1)),
        );
        let mut events = ctx.events.subscribe();
        let worker = SegmentWorker::new(
            ctx,
            Arc::new(SegmentCounters::default()),
            segment(&dir, 2, ByteRange::new(0, 499)),
        );
        let (seg, outcome) = worker.run(pool()).await;

        assert!(matches!(outcome, SegmentOutcome::Failed(_)));
        assert_eq!(seg.status, SegmentStatus::Failed);
        assert_eq!(transport.request_count(), 3);

        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TransferEvent::SegmentFailed { index: 2, .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_rejects_full_body_for_inner_range() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(payload(1000)).ignoring_ranges());
        let worker = SegmentWorker::new(
            context(transport, RetryPolicy::None),
            Arc::new(SegmentCounters::default()),
            segment(&dir, 1, ByteRange::new(500, 999)),
        );
        let (_, outcome) = worker.run(pool()).await;

        assert!(matches!(
            outcome,
            SegmentOutcome::Failed(SegmentError::Transport(TransportError::Status {
                status: 200,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_accepts_full_body_for_whole_range() {
        let dir = TempDir::new().unwrap();
        let data = payload(1000);
        let transport = Arc::new(MockTransport::new(data.clone()).ignoring_ranges());
        let worker = SegmentWorker::new(
            context(transport, RetryPolicy::None),
            Arc::new(SegmentCounters::default()),
            segment(&dir, 0, ByteRange::new(0, 999)),
        );
        let (seg, outcome) = worker.run(pool()).await;

        assert!(matches!(outcome, SegmentOutcome::Completed));
        assert_eq!(std::fs::read(&seg.sink).unwrap(), data);
    }

    #[tokio::test]
    async fn test_open_range_reads_to_end() {
        let dir = TempDir::new().unwrap();
        let data = payload(3000);
        let transport = Arc::new(MockTransport::new(data.clone()));
        let worker = SegmentWorker::new(
            context(transport.clone(), RetryPolicy::None),
            Arc::new(SegmentCounters::default()),
            segment(&dir, 0, ByteRange::open(0)),
        );
        let (seg, outcome) = worker.run(pool()).await;

        assert!(matches!(outcome, SegmentOutcome::Completed));
        assert_eq!(transport.requests(), vec![None]);
        assert_eq!(seg.downloaded, 3000);
    }

    #[tokio::test]
    async fn test_stall_is_retried() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(payload(4096)).with_chunk_size(1024).hanging_after(1));
        let mut ctx = context(transport.clone(), RetryPolicy::linear(2, Duration::from_millis(1)));
        ctx.stall_timeout = Duration::from_millis(50);

        let worker = SegmentWorker::new(
            ctx,
            Arc::new(SegmentCounters::default()),
            segment(&dir, 0, ByteRange::new(0, 4095)),
        );
        let (seg, outcome) = worker.run(pool()).await;

        assert!(matches!(outcome, SegmentOutcome::Failed(SegmentError::Stalled(_))));
        assert_eq!(transport.request_count(), 2);
        // Second attempt resumed after the first chunk.
        assert_eq!(transport.requests()[1], Some(ByteRange::new(1024, 4095)));
        assert_eq!(seg.downloaded, 2048);
    }

    #[tokio::test]
    async fn test_interrupt_keeps_partial_sink() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(
            MockTransport::new(payload(100_000))
                .with_chunk_size(1000)
                .with_chunk_delay(Duration::from_millis(2)),
        );
        let ctx = context(transport, RetryPolicy::None);
        let token = ctx.token.clone();
        let worker = SegmentWorker::new(
            ctx,
            Arc::new(SegmentCounters::default()),
            segment(&dir, 0, ByteRange::new(0, 99_999)),
        );

        let handle = tokio::spawn(worker.run(pool()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        let (seg, outcome) = handle.await.unwrap();

        assert!(matches!(outcome, SegmentOutcome::Interrupted));
        assert_eq!(seg.status, SegmentStatus::Paused);
        assert_eq!(seg.attempts, 0);
        let on_disk = std::fs::metadata(&seg.sink).unwrap().len();
        assert_eq!(on_disk, seg.downloaded);
        assert!(on_disk < 100_000);
    }

    #[tokio::test]
    async fn test_spent_budget_fails_without_request() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(payload(500)));
        let mut seg = segment(&dir, 0, ByteRange::new(0, 499));
        seg.attempts = 3;
        seg.error = Some("connection reset".to_string());

        let worker = SegmentWorker::new(
            context(transport.clone(), RetryPolicy::linear(3, Duration::from_millis(1))),
            Arc::new(SegmentCounters::default()),
            seg,
        );
        let (seg, outcome) = worker.run(pool()).await;

        assert!(matches!(
            outcome,
            SegmentOutcome::Failed(SegmentError::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(seg.status, SegmentStatus::Failed);
        assert_eq!(seg.attempts, 3);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_speed_drops_to_zero_while_idle() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(
            MockTransport::new(payload(4096))
                .with_chunk_size(512)
                .with_chunk_delay(Duration::from_millis(15))
                .hanging_after(4),
        );
        let mut ctx = context(transport, RetryPolicy::None);
        ctx.speed_interval = Duration::from_millis(10);
        ctx.stall_timeout = Duration::from_secs(10);
        let token = ctx.token.clone();
        let mut events = ctx.events.subscribe();
        let counters = Arc::new(SegmentCounters::default());

        let worker = SegmentWorker::new(
            ctx,
            counters.clone(),
            segment(&dir, 0, ByteRange::new(0, 4095)),
        );
        let handle = tokio::spawn(worker.run(pool()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while counters.downloaded() < 2048 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counters.speed(), 0);

        token.cancel();
        let (_, outcome) = handle.await.unwrap();
        assert!(matches!(outcome, SegmentOutcome::Interrupted));

        let mut speeds = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TransferEvent::SegmentProgress { speed, .. } = event {
                speeds.push(speed);
            }
        }
        assert!(speeds.iter().any(|s| *s > 0));
        assert_eq!(speeds.last(), Some(&0));
    }

    #[test]
    fn test_check_status() {
        let url = "u";
        assert!(check_status(url, None, 200, None).is_ok());
        assert!(check_status(url, Some(ByteRange::new(5, 9)), 206, None).is_ok());
        assert!(check_status(url, Some(ByteRange::new(0, 9)), 200, Some(10)).is_ok());
        assert!(check_status(url, Some(ByteRange::new(0, 9)), 200, Some(20)).is_err());
        assert!(check_status(url, Some(ByteRange::new(0, 9)), 200, None).is_err());
        assert!(check_status(url, Some(ByteRange::new(0, 9)), 404, None).is_err());
        assert!(check_status(url, None, 206, None).is_err());
    }
}
