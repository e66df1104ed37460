//! A sorted set of disjoint half-open `u64` ranges.
//!
//! Used for received packet numbers (to build ACK frames) and for the byte
//! ranges of a send stream the peer has acknowledged.  Adjacent and
//! overlapping insertions coalesce, so the set stays as small as the number
//! of gaps.

use std::ops::Range;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    /// Ascending, non-overlapping, non-adjacent.
    ranges: Vec<Range<u64>>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `range`, returning how many values were not already present.
    pub fn insert(&mut self, range: Range<u64>) -> u64 {
        if range.start >= range.end {
            return 0;
        }

        let mut start = range.start;
        let mut end = range.end;
        let first = self.ranges.partition_point(|r| r.end < start);
        let mut last = first;
        let mut absorbed = 0;

        while last < self.ranges.len() && self.ranges[last].start <= end {
            let r = &self.ranges[last];
            absorbed += r.end - r.start;
            start = start.min(r.start);
            end = end.max(r.end);
            last += 1;
        }

        self.ranges.splice(first..last, std::iter::once(start..end));
        (end - start) - absorbed
    }

    pub fn contains(&self, value: u64) -> bool {
        self.covers(&(value..value + 1))
    }

    /// True if every value in `range` is present.  Empty ranges are covered.
    pub fn covers(&self, range: &Range<u64>) -> bool {
        if range.start >= range.end {
            return true;
        }
        let idx = self.ranges.partition_point(|r| r.end < range.end);
        self.ranges
            .get(idx)
            .is_some_and(|r| r.start <= range.start)
    }

    /// Drop the lowest ranges until at most `max` remain.
    pub fn retain_highest(&mut self, max: usize) {
        if self.ranges.len() > max {
            let excess = self.ranges.len() - max;
            self.ranges.drain(..excess);
        }
    }

    /// Ranges from highest to lowest, the order ACK frames carry them in.
    pub fn iter_desc(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.ranges.iter().rev().cloned()
    }
}
