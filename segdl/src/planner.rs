//! Segment planning.
//!
//! Splits a resource of known size into contiguous, non-overlapping byte
//! ranges. Planning is pure: no I/O, no clock.
//!
//! # Rules
//!
//! - Unknown or zero length: a single open-ended range.
//! - Otherwise `count = total / min_segment_size`, clamped to
//!   `[min_segments, max_segments]` and never above `total` so that no range
//!   is empty.
//! - Each range holds `total / count` bytes; the remainder goes to the last
//!   range.
//!
//! # Example
//!
//! ```ignore
//! use segdl::planner::plan;
//!
//! // 10 MiB, at most 8 segments, 1 MiB minimum
//! let ranges = plan(10 * 1024 * 1024, 8, 1024 * 1024);
//! assert_eq!(ranges.len(), 8);
//! assert_eq!(ranges[7].end, Some(10_485_759));
//! ```

use crate::model::ByteRange;

/// Smallest segment the planner will create by default (1 MiB).
pub const DEFAULT_MIN_SEGMENT_SIZE: u64 = 1024 * 1024;

/// Upper bound on segments per transfer.
pub const DEFAULT_MAX_SEGMENTS: usize = 32;

/// Lower bound on segments for resources large enough to split.
pub const DEFAULT_MIN_SEGMENTS: usize = 1;

/// Plans ranges for `total_size` bytes.
///
/// Shorthand for a [`SegmentPlanner`] with the default floor.
pub fn plan(total_size: u64, max_segments: usize, min_segment_size: u64) -> Vec<ByteRange> {
    SegmentPlanner::new(max_segments, min_segment_size).plan(Some(total_size))
}

/// Segment planner with configurable bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlanner {
    pub max_segments: usize,
    pub min_segment_size: u64,
    pub min_segments: usize,
}

impl Default for SegmentPlanner {
    fn default() -> Self {
        Self {
            max_segments: DEFAULT_MAX_SEGMENTS,
            min_segment_size: DEFAULT_MIN_SEGMENT_SIZE,
            min_segments: DEFAULT_MIN_SEGMENTS,
        }
    }
}

impl SegmentPlanner {
    pub fn new(max_segments: usize, min_segment_size: u64) -> Self {
        Self {
            max_segments,
            min_segment_size,
            ..Default::default()
        }
    }

    /// Sets the floor applied when the size-derived count is smaller.
    pub fn with_min_segments(mut self, min_segments: usize) -> Self {
        self.min_segments = min_segments;
        self
    }

    /// Same planner with the ceiling lowered to `limit`.
    pub fn capped(mut self, limit: usize) -> Self {
        self.max_segments = self.max_segments.min(limit.max(1));
        self
    }

    /// Number of segments for a resource of `total_size` bytes.
    pub fn segment_count(&self, total_size: u64) -> usize {
        if total_size == 0 {
            return 1;
        }
        let by_size = total_size / self.min_segment_size.max(1);
        let floor = self.min_segments.max(1) as u64;
        let ceiling = self.max_segments.max(1) as u64;

        let count = by_size.max(floor).min(ceiling).min(total_size);
        count as usize
    }

    /// Plans ranges for a resource whose size may be unknown.
    pub fn plan(&self, total_size: Option<u64>) -> Vec<ByteRange> {
        let total = match total_size {
            Some(total) if total > 0 => total,
            _ => return vec![ByteRange::open(0)],
        };

        let count = self.segment_count(total) as u64;
        let base = total / count;
        let remainder = total % count;

        (0..count)
            .map(|i| {
                let start = i * base;
                let mut len = base;
                if i == count - 1 {
                    len += remainder;
                }
                ByteRange::new(start, start + len - 1)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_ten_mib_eight_segments() {
        let ranges = plan(10 * MIB, 8, MIB);

        assert_eq!(ranges.len(), 8);
        for (i, range) in ranges.iter().enumerate() {
            assert_eq!(range.len(), Some(1_310_720), "segment {}", i);
        }
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges[7].end, Some(10_485_759));
    }

    #[test]
    fn test_unknown_size_single_open_range() {
        let planner = SegmentPlanner::default();
        assert_eq!(planner.plan(None), vec![ByteRange::open(0)]);
        assert_eq!(planner.plan(Some(0)), vec![ByteRange::open(0)]);
    }

    #[test]
    fn test_small_resource_single_segment() {
        let ranges = plan(1000, 8, MIB);
        assert_eq!(ranges, vec![ByteRange::new(0, 999)]);
    }

    #[test]
    fn test_remainder_goes_to_last() {
        let ranges = SegmentPlanner::new(3, 1).plan(Some(10));
        assert_eq!(
            ranges,
            vec![
                ByteRange::new(0, 2),
                ByteRange::new(3, 5),
                ByteRange::new(6, 9),
            ]
        );
    }

    #[test]
    fn test_floor_raises_count() {
        let planner = SegmentPlanner::new(32, MIB).with_min_segments(8);
        assert_eq!(planner.segment_count(2 * MIB), 8);
    }

    #[test]
    fn test_count_never_exceeds_bytes() {
        let planner = SegmentPlanner::new(32, 1).with_min_segments(16);
        assert_eq!(planner.segment_count(3), 3);
    }

    #[test]
    fn test_capped() {
        let planner = SegmentPlanner::default().capped(4);
        assert_eq!(planner.segment_count(100 * MIB), 4);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_ranges_cover_resource_exactly(
                total in 1u64..50_000_000,
                max_segments in 1usize..64,
                min_size in 1u64..4_000_000,
                min_segments in 1usize..16
            ) {
                let ranges = SegmentPlanner::new(max_segments, min_size)
                    .with_min_segments(min_segments)
                    .plan(Some(total));

                prop_assert!(!ranges.is_empty());
                prop_assert!(ranges.len() <= max_segments);
                prop_assert_eq!(ranges[0].start, 0);
                prop_assert_eq!(ranges[ranges.len() - 1].end, Some(total - 1));

                let mut covered = 0u64;
                for pair in ranges.windows(2) {
                    prop_assert_eq!(pair[0].end.map(|e| e + 1), Some(pair[1].start));
                }
                for range in &ranges {
                    let len = range.len().unwrap_or(0);
                    prop_assert!(len > 0);
                    covered += len;
                }
                prop_assert_eq!(covered, total);
            }

            #[test]
            fn test_all_but_last_equal(
                total in 1u64..50_000_000,
                max_segments in 1usize..64,
                min_size in 1u64..4_000_000
            ) {
                let ranges = plan(total, max_segments, min_size);
                let base = ranges[0].len().unwrap_or(0);
                for range in &ranges[..ranges.len() - 1] {
                    prop_assert_eq!(range.len(), Some(base));
                }
                prop_assert!(ranges[ranges.len() - 1].len().unwrap_or(0) >= base);
            }
        }
    }
}
