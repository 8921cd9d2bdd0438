//! Progress aggregation for segmented transfers.
//!
//! Workers publish into per-segment atomic counters; the engine's reporter
//! reads them at a fixed cadence. Aggregate speed is the sum of segment
//! speeds, aggregate bytes the sum of segment bytes.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::model::Segment;

/// Counters owned by one segment worker.
#[derive(Debug, Default)]
pub struct SegmentCounters {
    downloaded: AtomicU64,
    speed: AtomicU64,
    last_activity_ms: AtomicI64,
}

impl SegmentCounters {
    pub fn new(downloaded: u64) -> Self {
        Self {
            downloaded: AtomicU64::new(downloaded),
            ..Default::default()
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn set_downloaded(&self, bytes: u64) {
        self.downloaded.store(bytes, Ordering::Relaxed);
    }

    /// Bytes per second over the last sampling window.
    pub fn speed(&self) -> u64 {
        self.speed.load(Ordering::Relaxed)
    }

    pub fn set_speed(&self, bytes_per_sec: u64) {
        self.speed.store(bytes_per_sec, Ordering::Relaxed);
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        match self.last_activity_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}

/// Aggregated figures at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub downloaded: u64,
    pub total: Option<u64>,
    pub percent: u8,
    pub speed: u64,
}

/// Counters for every segment of one transfer run.
#[derive(Debug)]
pub struct TransferProgress {
    segments: Vec<Arc<SegmentCounters>>,
    total: Option<u64>,
}

impl TransferProgress {
    /// Seeds counters from persisted segment state.
    pub fn new(segments: &[Segment], total: Option<u64>) -> Self {
        Self {
            segments: segments
                .iter()
                .map(|s| Arc::new(SegmentCounters::new(s.downloaded)))
                .collect(),
            total,
        }
    }

    /// Counters for the segment at `position` in index order.
    pub fn segment(&self, position: usize) -> Option<&Arc<SegmentCounters>> {
        self.segments.get(position)
    }

    pub fn downloaded(&self) -> u64 {
        self.segments.iter().map(|c| c.downloaded()).sum()
    }

    pub fn speed(&self) -> u64 {
        self.segments.iter().map(|c| c.speed()).sum()
    }

    pub fn percent(&self) -> u8 {
        percent(self.downloaded(), self.total)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let downloaded = self.downloaded();
        ProgressSnapshot {
            downloaded,
            total: self.total,
            percent: percent(downloaded, self.total),
            speed: self.speed(),
        }
    }
}

/// `downloaded * 100 / total`, 0 while the total is unknown.
pub fn percent(downloaded: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => (downloaded.min(total) * 100 / total) as u8,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ByteRange, TransferId};
    use std::path::PathBuf;

    fn segments(n: usize) -> Vec<Segment> {
        (0..n)
            .map(|i| {
                Segment::new(
                    TransferId::new("p"),
                    i,
                    ByteRange::new(i as u64 * 100, i as u64 * 100 + 99),
                    PathBuf::from(format!("/tmp/p.part{}", i)),
                )
            })
            .collect()
    }

    #[test]
    fn test_aggregates_sum_segments() {
        let progress = TransferProgress::new(&segments(3), Some(300));

        progress.segment(0).unwrap().set_downloaded(100);
        progress.segment(1).unwrap().set_downloaded(50);
        progress.segment(0).unwrap().set_speed(10);
        progress.segment(2).unwrap().set_speed(5);

        let snap = progress.snapshot();
        assert_eq!(snap.downloaded, 150);
        assert_eq!(snap.speed, 15);
        assert_eq!(snap.percent, 50);
    }

    #[test]
    fn test_percent_unknown_total() {
        assert_eq!(percent(1000, None), 0);
        assert_eq!(percent(1000, Some(0)), 0);
        assert_eq!(percent(5000, Some(1000)), 100);
    }

    #[test]
    fn test_seeded_from_segments() {
        let mut segs = segments(2);
        segs[1].downloaded = 40;
        let progress = TransferProgress::new(&segs, Some(200));
        assert_eq!(progress.downloaded(), 40);
    }

    #[test]
    fn test_touch_records_activity() {
        let counters = SegmentCounters::default();
        assert!(counters.last_activity().is_none());
        counters.touch();
        assert!(counters.last_activity().is_some());
    }
}
