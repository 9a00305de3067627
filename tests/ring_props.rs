//! Property tests for the SPSC slot recycler: slot conservation and FIFO
//! hand-off under arbitrary operation interleavings.

use proptest::prelude::*;

use tickfan::ring::spsc_ring_with;

#[derive(Debug, Clone, Copy)]
enum Op {
    Acquire,
    Publish,
    Consume,
    Release,
}

fn any_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Acquire),
        Just(Op::Publish),
        Just(Op::Consume),
        Just(Op::Release),
    ]
}

proptest! {
    /// Drives the cycle single-threaded with a model of who holds what.
    /// At every step: |free| + |ready| + held-by-producer + held-by-consumer
    /// equals the capacity, published values come out in publish order, and
    /// no operation panics.
    #[test]
    fn slot_conservation(ops in prop::collection::vec(any_op(), 1..2000), cap in 1usize..64) {
        let (mut tx, mut rx) = spsc_ring_with(cap, || 0u64);

        let mut producer_held: Vec<u64> = Vec::new();
        let mut consumer_held: Vec<u64> = Vec::new();
        let mut next_value = 1u64;
        let mut published = std::collections::VecDeque::new();

        for op in ops {
            match op {
                Op::Acquire => {
                    if let Some(slot) = tx.acquire() {
                        producer_held.push(slot);
                    } else {
                        // Exhaustion is only legal when no free slots exist.
                        prop_assert_eq!(tx.free_len(), 0);
                    }
                }
                Op::Publish => {
                    if let Some(mut slot) = producer_held.pop() {
                        slot = next_value;
                        prop_assert!(tx.publish(slot));
                        published.push_back(next_value);
                        next_value += 1;
                    }
                }
                Op::Consume => {
                    if let Some(slot) = rx.consume() {
                        let expected = published.pop_front();
                        prop_assert_eq!(Some(slot), expected);
                        consumer_held.push(slot);
                    } else {
                        prop_assert!(published.is_empty());
                    }
                }
                Op::Release => {
                    if let Some(slot) = consumer_held.pop() {
                        rx.release(slot);
                    }
                }
            }

            let total = tx.free_len()
                + rx.ready_len()
                + producer_held.len()
                + consumer_held.len();
            prop_assert_eq!(total, cap);
        }
    }
}

#[test]
fn ready_order_matches_publish_order() {
    let (mut tx, mut rx) = spsc_ring_with(8, || 0u64);
    for v in 1..=8u64 {
        let mut slot = tx.acquire().unwrap();
        slot = v;
        assert!(tx.publish(slot));
    }
    for v in 1..=8u64 {
        let got = rx.consume().unwrap();
        assert_eq!(got, v);
        rx.release(got);
    }
}
