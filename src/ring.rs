//! Lock-free SPSC slot recycler.
//!
//! Two `rtrb` rings per channel:
//! - `free`: reusable slots owned by the ring, pre-populated at startup
//! - `ready`: filled slots travelling producer -> consumer
//!
//! Slot life cycle (strict, per slot):
//! `acquire (free -> producer) -> publish (producer -> ready) ->
//! consume (ready -> consumer) -> release (consumer -> free)`.
//!
//! Splitting free and ready keeps the producer and consumer halves on
//! disjoint index pairs, so neither side's progress dirties the other's
//! cache lines. Every operation is a single wait-free push or pop; nothing
//! here allocates or syscalls.

/// Payload ring capacity (slots per session).
pub const RAW_RING_CAPACITY: usize = 16_384;

/// Latency ring capacity (events per session).
pub const LATENCY_RING_CAPACITY: usize = 1 << 16;

/// Builds a recycler ring of `capacity` slots produced by `init`, returning
/// the producer and consumer halves. The free ring starts full, the ready
/// ring empty.
pub fn spsc_ring_with<T>(
    capacity: usize,
    mut init: impl FnMut() -> T,
) -> (RingProducer<T>, RingConsumer<T>) {
    let (mut free_tx, free_rx) = rtrb::RingBuffer::new(capacity);
    let (ready_tx, ready_rx) = rtrb::RingBuffer::new(capacity);
    for _ in 0..capacity {
        // Cannot fail: the ring was just created with exactly this capacity.
        let _ = free_tx.push(init());
    }
    (
        RingProducer {
            free: free_rx,
            ready: ready_tx,
            parked: None,
        },
        RingConsumer {
            ready: ready_rx,
            free: free_tx,
        },
    )
}

/// Producer half: acquires empty slots and publishes filled ones.
pub struct RingProducer<T> {
    free: rtrb::Consumer<T>,
    ready: rtrb::Producer<T>,
    // A slot the ready ring refused. Reused by the next acquire so the slot
    // stays in the cycle instead of being dropped.
    parked: Option<T>,
}

impl<T> RingProducer<T> {
    /// Takes an empty slot, or `None` when the consumer has not recycled any.
    /// `None` is the backpressure signal; the caller drops the current read.
    #[inline]
    pub fn acquire(&mut self) -> Option<T> {
        if let Some(slot) = self.parked.take() {
            return Some(slot);
        }
        self.free.pop().ok()
    }

    /// Hands a filled slot to the consumer. Returns `false` if the ready
    /// ring refused it; the slot is parked for the next acquire.
    #[inline]
    pub fn publish(&mut self, item: T) -> bool {
        match self.ready.push(item) {
            Ok(()) => true,
            Err(rtrb::PushError::Full(item)) => {
                self.parked = Some(item);
                false
            }
        }
    }

    /// Number of slots currently sitting in the free ring.
    pub fn free_len(&self) -> usize {
        self.free.slots() + usize::from(self.parked.is_some())
    }
}

/// Consumer half: consumes filled slots and releases them back.
pub struct RingConsumer<T> {
    ready: rtrb::Consumer<T>,
    free: rtrb::Producer<T>,
}

impl<T> RingConsumer<T> {
    #[inline]
    pub fn consume(&mut self) -> Option<T> {
        self.ready.pop().ok()
    }

    /// Returns a processed slot to the free ring for reuse.
    #[inline]
    pub fn release(&mut self, item: T) {
        // Cannot fail in the acquire/publish/consume/release cycle: at most
        // `capacity` slots exist, so the free ring always has room.
        let _ = self.free.push(item);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ready.slots() == 0
    }

    pub fn ready_len(&self) -> usize {
        self.ready.slots()
    }
}
