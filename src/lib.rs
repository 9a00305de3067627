//! tickfan: multi-connection market-data stream recorder.
//!
//! Opens K parallel TLS WebSocket connections to one exchange endpoint,
//! merges the replicated update stream into a single NDJSON file ordered by
//! update id, and records per-connection receive latency for offline
//! analysis.
//!
//! Pipeline:
//! `session read -> SPSC ring -> merger (reorder heap) -> vectored write`.
//! Latency pairs take a parallel path through per-session rings into the
//! [`latency::LatencyLogger`].

pub mod affinity;
pub mod backoff;
pub mod clock;
pub mod latency;
pub mod merger;
pub mod reactor;
pub mod ring;
pub mod runner;
pub mod session;
pub mod stop;
pub mod url;
pub mod vio;
pub mod wire;
