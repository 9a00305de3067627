//! Wires rings, sessions, merger and logger together, waits for the
//! deadline, then drives the ordered shutdown:
//!
//! 1. stop the reactor / request-stop and join all sessions
//! 2. set the merger's stop flag; it drains once its rings are empty
//! 3. clear the logger's running flag; it makes one final drain pass
//!
//! That order guarantees no live producer touches a ring after its consumer
//! has been joined.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tracing::info;

use crate::affinity;
use crate::latency::{LatencyEvent, LatencyLogger, LatencySink};
use crate::merger::{MergerConfig, StreamMerger};
use crate::reactor::Reactor;
use crate::ring::{spsc_ring_with, LATENCY_RING_CAPACITY, RAW_RING_CAPACITY};
use crate::session::async_session::AsyncSession;
use crate::session::sync_session::SyncSession;
use crate::session::{SessionChannels, SessionConfig, RAW_SLOT_BYTES};
use crate::stop::StopSignal;
use crate::url::WsUrl;
use crate::{backoff::Backoff, clock};

const LATENCY_DIR: &str = "latencies";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Async,
    Sync,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Async => "async",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RunOptions {
    pub url: WsUrl,
    pub connections: usize,
    pub out_file: PathBuf,
    pub mode: Mode,
    pub seconds: u64,
    pub pin_cpus: Option<Vec<usize>>,
}

/// Fatal runner failures, split so `main` can map exit codes: an unopenable
/// output file exits 1, everything else fatal exits above 1.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("cannot open output file {path}: {source}")]
    OpenOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::OpenOutput { .. } => 1,
            Self::Fatal(_) => 2,
        }
    }
}

pub fn run(opts: RunOptions) -> Result<(), RunError> {
    affinity::reset();

    let out = File::create(&opts.out_file).map_err(|source| RunError::OpenOutput {
        path: opts.out_file.clone(),
        source,
    })?;

    std::fs::create_dir_all(LATENCY_DIR)
        .with_context(|| format!("cannot create {LATENCY_DIR}/"))
        .map_err(RunError::Fatal)?;

    let connections = opts.connections.max(1);
    let stamp = clock::file_stamp();
    let stop = StopSignal::new();

    let mut raw_consumers = Vec::with_capacity(connections);
    let mut sinks = Vec::with_capacity(connections);
    let mut channels = Vec::with_capacity(connections);

    for index in 0..connections {
        let (raw_tx, raw_rx) =
            spsc_ring_with(RAW_RING_CAPACITY, || Vec::with_capacity(RAW_SLOT_BYTES));
        let (lat_tx, lat_rx) = spsc_ring_with(LATENCY_RING_CAPACITY, LatencyEvent::default);

        let path = format!("{LATENCY_DIR}/{}_conn_{index}_{stamp}.lat", opts.mode);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("cannot open latency file {path}"))
            .map_err(RunError::Fatal)?;

        raw_consumers.push(raw_rx);
        sinks.push(LatencySink { ring: lat_rx, file });
        channels.push(SessionChannels::new(raw_tx, lat_tx));
    }

    // Logger first so latency pairs flow from the very first read.
    let logger = LatencyLogger::new(sinks);
    let logger_running = logger.running_handle();
    let logger_pins = opts.pin_cpus.clone();
    let logger_thread = thread::Builder::new()
        .name("tickfan-logger".into())
        .spawn(move || {
            pin_worker("file_logger", &logger_pins);
            logger.run()
        })
        .context("cannot spawn logger thread")
        .map_err(RunError::Fatal)?;

    let merger = StreamMerger::new(raw_consumers, out, MergerConfig::default());
    let merger_stop = merger.stop_handle();
    let merger_pins = opts.pin_cpus.clone();
    let merger_thread = thread::Builder::new()
        .name("tickfan-merger".into())
        .spawn(move || {
            pin_worker("stream_merger", &merger_pins);
            merger.run()
        })
        .context("cannot spawn merger thread")
        .map_err(RunError::Fatal)?;

    let session_configs: Vec<SessionConfig> = (0..connections)
        .map(|index| SessionConfig {
            index,
            host: opts.url.host.clone(),
            port: opts.url.port,
            target: opts.url.target.clone(),
        })
        .collect();

    // Run sessions to the deadline, then stop them (shutdown steps 1 and 2).
    match opts.mode {
        Mode::Async => {
            let mut reactor =
                Reactor::start(1, opts.pin_cpus.clone(), stop.clone()).map_err(RunError::Fatal)?;
            for (cfg, chan) in session_configs.into_iter().zip(channels) {
                reactor.spawn(AsyncSession::new(cfg, chan, stop.clone()).run());
            }
            wait_deadline(opts.seconds);
            reactor.stop(Backoff::max());
        }
        Mode::Sync => {
            let mut handles = Vec::with_capacity(connections);
            for (index, (cfg, chan)) in session_configs.into_iter().zip(channels).enumerate() {
                let session = SyncSession::new(cfg, chan, stop.clone());
                let handle = thread::Builder::new()
                    .name(format!("tickfan-session-{index}"))
                    .spawn(move || session.run())
                    .context("cannot spawn session thread")
                    .map_err(RunError::Fatal)?;
                handles.push(handle);
            }
            wait_deadline(opts.seconds);
            stop.request_stop();
            for handle in handles {
                let _ = handle.join();
            }
        }
    }

    // Step 3: all producers are gone; let the merger drain and exit.
    merger_stop.store(true, std::sync::atomic::Ordering::Release);
    join_worker(merger_thread, "merger")?;

    // Step 4: logger final pass.
    logger_running.store(false, std::sync::atomic::Ordering::Release);
    join_worker(logger_thread, "latency logger")?;

    info!("run complete");
    Ok(())
}

fn pin_worker(who: &str, pin_cpus: &Option<Vec<usize>>) {
    match pin_cpus {
        Some(cpus) => {
            affinity::pin_from_list(who, cpus);
        }
        None => {
            affinity::pick_and_pin(who);
        }
    }
}

fn join_worker(
    handle: thread::JoinHandle<io::Result<()>>,
    who: &str,
) -> Result<(), RunError> {
    match handle.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RunError::Fatal(
            anyhow::Error::new(e).context(format!("{who} failed")),
        )),
        Err(_) => Err(RunError::Fatal(anyhow!("{who} thread panicked"))),
    }
}

fn wait_deadline(seconds: u64) {
    if seconds > 0 {
        thread::sleep(Duration::from_secs(seconds));
    } else {
        loop {
            thread::park();
        }
    }
}
