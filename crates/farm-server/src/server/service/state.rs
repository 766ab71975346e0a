use crate::server::telemetry::{
    decrement_streams_inflight, increment_stream_errors, increment_streams_inflight,
};
use core::time::Duration;
use farm_core::Error;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Shutdown and in-flight accounting shared by every clone of a service.
#[derive(Debug, Default)]
pub struct ServiceState {
    shutting_down: AtomicBool,
    inflight: AtomicUsize,
    failed: AtomicUsize,
    shutdown_token: CancellationToken,
}

impl ServiceState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Rejects new calls once shutdown has begun.
    pub fn ensure_serving(&self) -> Result<(), Error> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ServiceShutdown);
        }
        Ok(())
    }

    /// Registers a streaming call. The call counts as in flight until the
    /// returned guard is dropped.
    pub fn track(self: &Arc<Self>) -> InflightGuard {
        self.inflight.fetch_add(1, Ordering::AcqRel);
        increment_streams_inflight();
        InflightGuard {
            state: Arc::clone(self),
        }
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Counts a streaming call that ended with an error.
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
        increment_stream_errors();
    }

    pub fn failures(&self) -> usize {
        self.failed.load(Ordering::Acquire)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Gracefully stops the service.
    ///
    /// New calls are refused immediately, in-flight streams get up to
    /// `drain_timeout` to finish on their own, and whatever is left is then
    /// cancelled through the shutdown token.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        // === Phase 0: Stop accepting new requests ===
        tracing::info!("Refusing new requests");
        self.shutting_down.store(true, Ordering::Release);

        // === Phase 1: Wait for in-flight streams to drain ===
        tracing::info!("Draining in-flight streams ({} active)", self.inflight());
        let drained = timeout(drain_timeout, async {
            while self.inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("All in-flight streams drained successfully"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} streams still active)",
                self.inflight()
            ),
        }

        // === Phase 2: Cancel any remaining work ===
        tracing::debug!("Cancelling remaining work via shutdown token");
        self.shutdown_token.cancel();
    }
}

/// Marks one streaming call as in flight for as long as it lives.
#[derive(Debug)]
pub struct InflightGuard {
    state: Arc<ServiceState>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.state.inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
    }
}
