//! Verse lookup over a part's timing intervals.
//!
//! An index is built once when a part is selected and then queried on every
//! playback tick. Source data is not trusted: malformed intervals are
//! dropped at build time and overlapping intervals resolve to the one that
//! appears first in the input list.

use crate::model::TimingInterval;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct VerseTimingIndex {
    /// Well-formed intervals in input order.
    entries: Vec<TimingInterval>,
    /// Positions into `entries`, ordered by start time.
    by_start: Vec<usize>,
    disjoint: bool,
}

impl VerseTimingIndex {
    pub fn build(timings: &[TimingInterval]) -> Self {
        let mut entries = Vec::with_capacity(timings.len());
        for interval in timings {
            if interval.is_well_formed() {
                entries.push(*interval);
            } else {
                warn!(
                    verse_id = interval.verse_id,
                    start = interval.start_time,
                    end = interval.end_time,
                    "Dropping malformed timing interval"
                );
            }
        }

        let mut by_start: Vec<usize> = (0..entries.len()).collect();
        by_start.sort_by(|a, b| {
            entries[*a]
                .start_time
                .total_cmp(&entries[*b].start_time)
                .then(a.cmp(b))
        });

        // Touching edges count as overlap: both intervals contain the shared
        // instant, so only the ordered scan can honour input order there.
        let disjoint = by_start
            .windows(2)
            .all(|pair| entries[pair[0]].end_time < entries[pair[1]].start_time);

        debug!(
            intervals = entries.len(),
            dropped = timings.len() - entries.len(),
            disjoint,
            "Built verse timing index"
        );
        Self {
            entries,
            by_start,
            disjoint,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_overlaps(&self) -> bool {
        !self.disjoint
    }

    pub fn verse_at(&self, time: f64) -> Option<u32> {
        self.interval_at(time).map(|interval| interval.verse_id)
    }

    pub fn interval_at(&self, time: f64) -> Option<&TimingInterval> {
        if !time.is_finite() || time < 0.0 {
            return None;
        }
        if self.disjoint {
            let upper = self
                .by_start
                .partition_point(|idx| self.entries[*idx].start_time <= time);
            let candidate = &self.entries[*self.by_start.get(upper.checked_sub(1)?)?];
            return candidate.contains(time).then_some(candidate);
        }
        self.entries.iter().find(|interval| interval.contains(time))
    }

    /// Start of the earliest interval for `verse_id`, if the verse has audio.
    pub fn first_start_for_verse(&self, verse_id: u32) -> Option<f64> {
        self.entries
            .iter()
            .filter(|interval| interval.verse_id == verse_id)
            .map(|interval| interval.start_time)
            .min_by(f64::total_cmp)
    }

    /// Earliest start and latest end across all intervals.
    pub fn span(&self) -> Option<(f64, f64)> {
        let first = self.by_start.first().map(|idx| self.entries[*idx].start_time)?;
        let last = self
            .entries
            .iter()
            .map(|interval| interval.end_time)
            .max_by(f64::total_cmp)?;
        Some((first, last))
    }
}

/// Unindexed lookup: first interval in list order containing `time`.
pub fn lookup_verse(time: f64, timings: &[TimingInterval]) -> Option<u32> {
    if !time.is_finite() || time < 0.0 {
        return None;
    }
    timings
        .iter()
        .find(|interval| interval.is_well_formed() && interval.contains(time))
        .map(|interval| interval.verse_id)
}
