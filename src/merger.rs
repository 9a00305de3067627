//! K-way stream merger.
//!
//! Consumes K payload rings and produces one append-only NDJSON file whose
//! lines are strictly increasing in the update id `u`:
//! - a min-heap on `u` re-establishes order across connections
//! - a small hold-back window delays emission long enough to absorb
//!   inter-connection jitter (one to two network RTTs)
//! - `last_emitted_u` deduplicates with a first-wins policy; late copies of
//!   an already-emitted update are dropped
//! - ready entries coalesce into one vectored write per flush
//!
//! The run loop polls; it never blocks on wakeups. Buffers return to the
//! ring they came from once written or dropped.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, IoSlice};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arrayvec::ArrayVec;
use tracing::info;

use crate::ring::RingConsumer;
use crate::vio;
use crate::wire;

/// Payloads per flush batch; two iovecs each (payload + newline).
pub const MAX_BATCH_PAYLOADS: usize = 64;

const MAX_BATCH_IOVECS: usize = MAX_BATCH_PAYLOADS * 2;

#[derive(Debug, Clone, Copy)]
pub struct MergerConfig {
    /// Hold-back window: how long an entry waits in the heap before it may
    /// be emitted. Bounds the reorder the merger can repair.
    pub holdback: Duration,
    pub max_batch: usize,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            holdback: Duration::from_millis(20),
            max_batch: MAX_BATCH_PAYLOADS,
        }
    }
}

struct HeapEntry {
    u: u64,
    first_seen: Instant,
    src: usize,
    payload: Vec<u8>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.u == other.u
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.u.cmp(&other.u)
    }
}

#[derive(Debug, Default)]
struct MergerStats {
    emitted: u64,
    late_dropped: u64,
    parse_failed: u64,
}

enum Top {
    Empty,
    NotRipe,
    Stale,
    Ripe,
}

pub struct StreamMerger {
    inputs: Vec<RingConsumer<Vec<u8>>>,
    out: File,
    cfg: MergerConfig,
    stop: Arc<AtomicBool>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    last_emitted_u: u64,
    batch: Vec<HeapEntry>,
    stats: MergerStats,
}

impl StreamMerger {
    pub fn new(inputs: Vec<RingConsumer<Vec<u8>>>, out: File, mut cfg: MergerConfig) -> Self {
        cfg.max_batch = cfg.max_batch.clamp(1, MAX_BATCH_PAYLOADS);
        let batch = Vec::with_capacity(cfg.max_batch);
        Self {
            inputs,
            out,
            cfg,
            stop: Arc::new(AtomicBool::new(false)),
            heap: BinaryHeap::new(),
            last_emitted_u: 0,
            batch,
            stats: MergerStats::default(),
        }
    }

    /// Flag observed by the run loop. Set it only after every producer has
    /// quiesced; the merger drains and exits once its rings are empty.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Main loop: ingest, flush ready entries, and on stop with empty rings
    /// drain everything. Write errors are fatal and terminate the merger.
    pub fn run(mut self) -> io::Result<()> {
        loop {
            self.ingest();
            self.flush(false)?;
            if self.stop.load(Ordering::Relaxed) && self.all_inputs_empty() {
                self.drain()?;
                break;
            }
            std::thread::yield_now();
        }
        info!(
            emitted = self.stats.emitted,
            late_dropped = self.stats.late_dropped,
            parse_failed = self.stats.parse_failed,
            "merger finished"
        );
        Ok(())
    }

    fn all_inputs_empty(&self) -> bool {
        self.inputs.iter().all(RingConsumer::is_empty)
    }

    /// Drains every ready entry from every ring into the heap. Payloads
    /// without a usable `u`, and updates at or below the emission watermark,
    /// go straight back to their ring.
    fn ingest(&mut self) {
        for (src, ring) in self.inputs.iter_mut().enumerate() {
            while let Some(payload) = ring.consume() {
                match wire::extract_update_id(&payload) {
                    None => {
                        self.stats.parse_failed += 1;
                        ring.release(payload);
                    }
                    Some(u) if u <= self.last_emitted_u => {
                        self.stats.late_dropped += 1;
                        ring.release(payload);
                    }
                    Some(u) => self.heap.push(Reverse(HeapEntry {
                        u,
                        first_seen: Instant::now(),
                        src,
                        payload,
                    })),
                }
            }
        }
    }

    fn classify_top(&self, now: Instant, ignore_holdback: bool) -> Top {
        match self.heap.peek() {
            None => Top::Empty,
            Some(Reverse(top)) => {
                if top.u <= self.last_emitted_u {
                    Top::Stale
                } else if !ignore_holdback
                    && now.duration_since(top.first_seen) < self.cfg.holdback
                {
                    Top::NotRipe
                } else {
                    Top::Ripe
                }
            }
        }
    }

    /// Pops ripe entries in `u` order into one vectored write, then returns
    /// the written buffers to their source rings. Stops at the first entry
    /// still inside the hold-back window, or at the batch bound.
    fn flush(&mut self, ignore_holdback: bool) -> io::Result<()> {
        let now = Instant::now();

        while self.batch.len() < self.cfg.max_batch {
            match self.classify_top(now, ignore_holdback) {
                Top::Empty | Top::NotRipe => break,
                Top::Stale => {
                    if let Some(Reverse(entry)) = self.heap.pop() {
                        self.stats.late_dropped += 1;
                        self.inputs[entry.src].release(entry.payload);
                    }
                }
                Top::Ripe => {
                    if let Some(Reverse(entry)) = self.heap.pop() {
                        self.last_emitted_u = entry.u;
                        self.batch.push(entry);
                    }
                }
            }
        }

        if self.batch.is_empty() {
            return Ok(());
        }

        let mut iov: ArrayVec<IoSlice, MAX_BATCH_IOVECS> = ArrayVec::new();
        for entry in &self.batch {
            iov.push(IoSlice::new(&entry.payload));
            iov.push(IoSlice::new(b"\n"));
        }
        vio::write_vectored_all(&mut self.out, &mut iov)?;
        drop(iov);

        self.stats.emitted += self.batch.len() as u64;
        for entry in self.batch.drain(..) {
            self.inputs[entry.src].release(entry.payload);
        }
        Ok(())
    }

    /// Shutdown drain: keeps ingesting and flushing with the hold-back
    /// window ignored until the rings and the heap are empty. Emission stays
    /// in pure heap order with the same dedup rule.
    fn drain(&mut self) -> io::Result<()> {
        loop {
            self.ingest();
            if self.heap.is_empty() && self.all_inputs_empty() {
                break;
            }
            self.flush(true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(u: u64) -> Reverse<HeapEntry> {
        Reverse(HeapEntry {
            u,
            first_seen: Instant::now(),
            src: 0,
            payload: Vec::new(),
        })
    }

    #[test]
    fn heap_pops_smallest_u_first() {
        let mut heap = BinaryHeap::new();
        for u in [5u64, 1, 3, 2, 4] {
            heap.push(entry(u));
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|Reverse(e)| e.u)).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
    }
}
