//! Property-based tests for sample folding and aggregation

use flameiq::aggregator::Aggregator;
use flameiq::sample::{StackFrame, StackSample};
use proptest::prelude::*;

fn arb_frame() -> impl Strategy<Value = StackFrame> {
    ("[a-z]{1,8}", "[a-z]{1,8}\\.rs", 0u32..500)
        .prop_map(|(func, file, line)| StackFrame::new(func, file, line))
}

fn arb_stack() -> impl Strategy<Value = Vec<StackFrame>> {
    prop::collection::vec(arb_frame(), 0..6)
}

proptest! {
    /// No sample is ever lost or double-counted.
    #[test]
    fn prop_counts_sum_to_samples_submitted(
        stacks in prop::collection::vec(arb_stack(), 0..64)
    ) {
        let mut agg = Aggregator::new();
        for (tid, frames) in stacks.iter().enumerate() {
            agg.add_sample(&StackSample::new(frames.clone(), tid as u64));
        }
        let n = stacks.len() as u64;
        prop_assert_eq!(agg.samples_submitted(), n);
        prop_assert_eq!(agg.snapshot().total_samples(), n);
    }

    /// The key depends only on the frame sequence.
    #[test]
    fn prop_key_ignores_thread_id(
        frames in arb_stack(),
        tid_a in 0u64..1000,
        tid_b in 0u64..1000,
    ) {
        let a = StackSample::new(frames.clone(), tid_a);
        let b = StackSample::new(frames, tid_b);
        prop_assert_eq!(a.key(), b.key());
    }

    /// N identical stacks collapse into one entry of count N.
    #[test]
    fn prop_identical_stacks_collapse(frames in arb_stack(), n in 1usize..32) {
        let key = StackSample::new(frames.clone(), 0).key();
        let mut agg = Aggregator::new();
        for tid in 0..n {
            agg.add_sample(&StackSample::new(frames.clone(), tid as u64));
        }
        let data = agg.snapshot();
        prop_assert_eq!(data.len(), 1);
        prop_assert_eq!(data.get(&key), Some(n as u64));
    }
}
