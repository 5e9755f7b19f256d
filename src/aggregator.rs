//! Aggregation of stack samples into a folded-stack frequency table
//!
//! The aggregator is a cumulative counter: samples are only ever added,
//! never decayed or evicted. It is written by exactly one caller (the
//! sampler loop) and read exactly once, after the sampler has stopped.
//! `snapshot()` consumes the aggregator so a mid-mutation read cannot be
//! expressed at all.

use std::collections::HashMap;

use crate::sample::StackSample;

/// Final frequency table: folded stack key -> occurrence count.
///
/// Invariant: every count is strictly positive and the counts sum to the
/// number of samples ever submitted to the owning aggregator.
#[derive(Debug, Clone, Default)]
pub struct AggregatedData {
    counts: HashMap<String, u64>,
}

impl AggregatedData {
    /// Number of distinct call-stack paths observed.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts, i.e. the number of samples submitted.
    pub fn total_samples(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.counts.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Folds a stream of `StackSample`s into `AggregatedData`.
#[derive(Debug, Default)]
pub struct Aggregator {
    counts: HashMap<String, u64>,
    submitted: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample into the table. O(stack depth) for the key build,
    /// then a single hash map update.
    pub fn add_sample(&mut self, sample: &StackSample) {
        *self.counts.entry(sample.key()).or_insert(0) += 1;
        self.submitted += 1;
    }

    /// Number of samples submitted so far.
    pub fn samples_submitted(&self) -> u64 {
        self.submitted
    }

    /// Consume the aggregator and yield the final table.
    pub fn snapshot(self) -> AggregatedData {
        AggregatedData {
            counts: self.counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{StackFrame, StackSample};

    fn sample(path: &[(&str, &str)], tid: u64) -> StackSample {
        let frames = path
            .iter()
            .map(|(func, file)| StackFrame::new(*func, *file, 0))
            .collect();
        StackSample::new(frames, tid)
    }

    #[test]
    fn test_counts_sum_to_samples_submitted() {
        let mut agg = Aggregator::new();
        agg.add_sample(&sample(&[("main", "a.rs")], 1));
        agg.add_sample(&sample(&[("main", "a.rs"), ("f", "a.rs")], 1));
        agg.add_sample(&sample(&[("main", "a.rs")], 2));
        assert_eq!(agg.samples_submitted(), 3);

        let data = agg.snapshot();
        assert_eq!(data.total_samples(), 3);
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_identical_stacks_share_a_counter() {
        let mut agg = Aggregator::new();
        // Same frames, different threads: must collapse.
        agg.add_sample(&sample(&[("main", "a.rs"), ("work", "b.rs")], 10));
        agg.add_sample(&sample(&[("main", "a.rs"), ("work", "b.rs")], 20));

        let data = agg.snapshot();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("a.rs:main;b.rs:work"), Some(2));
    }

    #[test]
    fn test_first_sample_creates_entry_at_one() {
        let mut agg = Aggregator::new();
        agg.add_sample(&sample(&[("main", "a.rs")], 1));
        let data = agg.snapshot();
        assert_eq!(data.get("a.rs:main"), Some(1));
    }

    #[test]
    fn test_empty_stack_is_still_counted() {
        // A degenerate sample with no frames folds to the empty key but
        // must not be silently dropped.
        let mut agg = Aggregator::new();
        agg.add_sample(&sample(&[], 1));
        let data = agg.snapshot();
        assert_eq!(data.total_samples(), 1);
        assert_eq!(data.get(""), Some(1));
    }

    #[test]
    fn test_empty_aggregator_snapshot() {
        let data = Aggregator::new().snapshot();
        assert!(data.is_empty());
        assert_eq!(data.total_samples(), 0);
    }

    #[test]
    fn test_iter_yields_all_entries() {
        let mut agg = Aggregator::new();
        agg.add_sample(&sample(&[("a", "x.rs")], 1));
        agg.add_sample(&sample(&[("b", "x.rs")], 1));
        let data = agg.snapshot();
        let mut keys: Vec<_> = data.iter().map(|(k, _)| k.to_string()).collect();
        keys.sort();
        assert_eq!(keys, vec!["x.rs:a", "x.rs:b"]);
    }
}
