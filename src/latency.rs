//! Per-connection receive-latency logging.
//!
//! Sessions push `(arrival_ms, event_ms)` pairs onto their own SPSC ring;
//! one background thread round-robins over all K rings, formats
//! `|arrival - event|` as decimal ASCII with no allocation, and appends the
//! lines to per-session `.lat` files with one vectored write per batch.
//! Round-robin keeps a slow session from starving fast ones; batching
//! amortizes the syscall.

use std::fs::File;
use std::io::{self, IoSlice};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arrayvec::ArrayVec;
use tracing::debug;

use crate::ring::RingConsumer;
use crate::vio;

/// Events drained from one ring before moving to the next.
pub const DRAIN_BATCH: usize = 128;

// 20 digits of u64::MAX plus the newline.
const LINE_CAP: usize = 21;

/// One receive observation. `event_ms` is 0 when the payload carried
/// neither `T` nor `E`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyEvent {
    pub arrival_ms: i64,
    pub event_ms: i64,
}

impl LatencyEvent {
    /// The persisted value: absolute arrival-to-event delta, so clock skew
    /// in either direction still yields a non-negative line.
    #[inline]
    pub fn delta_ms(self) -> u64 {
        (self.arrival_ms - self.event_ms).unsigned_abs()
    }
}

/// One session's latency channel: its ring and its output file.
pub struct LatencySink {
    pub ring: RingConsumer<LatencyEvent>,
    pub file: File,
}

pub struct LatencyLogger {
    sinks: Vec<LatencySink>,
    running: Arc<AtomicBool>,
}

impl LatencyLogger {
    pub fn new(sinks: Vec<LatencySink>) -> Self {
        Self {
            sinks,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag observed by the run loop; clear it to stop the logger after one
    /// final drain pass.
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Round-robin drain loop. Never blocks on the rings; yields when a
    /// full pass finds nothing.
    pub fn run(mut self) -> io::Result<()> {
        let mut current = 0usize;
        let mut drained_this_pass = 0usize;
        while self.running.load(Ordering::Relaxed) {
            if self.sinks.is_empty() {
                std::thread::yield_now();
                continue;
            }
            if current >= self.sinks.len() {
                if drained_this_pass == 0 {
                    std::thread::yield_now();
                }
                current = 0;
                drained_this_pass = 0;
            }
            drained_this_pass += self.drain_one(current)?;
            current += 1;
        }

        // Final pass: producers are quiesced by the shutdown order, so one
        // sweep empties everything.
        for i in 0..self.sinks.len() {
            while self.drain_one(i)? == DRAIN_BATCH {}
        }
        debug!(sessions = self.sinks.len(), "latency logger finished");
        Ok(())
    }

    /// Drains up to [`DRAIN_BATCH`] events from ring `i` into one vectored
    /// write. Returns the number of events written.
    fn drain_one(&mut self, i: usize) -> io::Result<usize> {
        let sink = &mut self.sinks[i];

        let mut lines = [[0u8; LINE_CAP]; DRAIN_BATCH];
        let mut lens = [0usize; DRAIN_BATCH];
        let mut n = 0usize;

        while n < DRAIN_BATCH {
            let Some(ev) = sink.ring.consume() else { break };
            let mut digits = itoa::Buffer::new();
            let s = digits.format(ev.delta_ms());
            lines[n][..s.len()].copy_from_slice(s.as_bytes());
            lines[n][s.len()] = b'\n';
            lens[n] = s.len() + 1;
            sink.ring.release(ev);
            n += 1;
        }

        if n > 0 {
            let mut iov: ArrayVec<IoSlice, DRAIN_BATCH> = (0..n)
                .map(|k| IoSlice::new(&lines[k][..lens[k]]))
                .collect();
            vio::write_vectored_all(&mut sink.file, &mut iov)?;
        }
        Ok(n)
    }
}
