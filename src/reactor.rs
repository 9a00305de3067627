//! Shared non-blocking executor for the async session variant.
//!
//! One tokio runtime with a fixed worker count (default 1) hosts every
//! async session as a cooperative task; no session gets its own OS thread.
//! `stop` trips the stop signal, waits for the tasks to unwind, then tears
//! the runtime down so any still-pending I/O is cancelled.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use crate::affinity;
use crate::stop::StopSignal;

pub struct Reactor {
    runtime: tokio::runtime::Runtime,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    stop: StopSignal,
}

impl Reactor {
    /// Builds the executor with `workers` threads (min 1), each optionally
    /// pinned: from `pin_cpus` when given, else to the least-busy core.
    pub fn start(
        workers: usize,
        pin_cpus: Option<Vec<usize>>,
        stop: StopSignal,
    ) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .enable_all()
            .thread_name("tickfan-reactor")
            .on_thread_start(move || match &pin_cpus {
                Some(cpus) => {
                    affinity::pin_from_list("reactor", cpus);
                }
                None => {
                    affinity::pick_and_pin("reactor");
                }
            })
            .build()
            .context("failed to build reactor runtime")?;

        Ok(Self {
            runtime,
            tasks: Vec::new(),
            stop,
        })
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(self.runtime.spawn(task));
    }

    /// Cancels pending I/O and drains the executor. Tasks observe the stop
    /// signal at their next suspension point; anything still running after
    /// `grace` is aborted with the runtime.
    pub fn stop(self, grace: Duration) {
        self.stop.request_stop();
        let Self { runtime, tasks, .. } = self;
        runtime.block_on(async {
            for task in tasks {
                if tokio::time::timeout(grace, task).await.is_err() {
                    warn!("session task did not stop within grace period");
                }
            }
        });
        runtime.shutdown_timeout(grace);
    }
}
