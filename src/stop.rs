//! Process-wide stop signal: an atomic flag for blocking threads plus a
//! cancellation token for async tasks. Both trip together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

struct Inner {
    stopped: AtomicBool,
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                stopped: AtomicBool::new(false),
                token: CancellationToken::new(),
            }),
        }
    }

    pub fn request_stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.token.cancel();
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Resolves once stop has been requested.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_both_sides() {
        let stop = StopSignal::new();
        assert!(!stop.is_stopped());

        let observer = stop.clone();
        stop.request_stop();
        assert!(observer.is_stopped());

        // The token side must already be tripped, without polling delay.
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(observer.cancelled());
    }
}
