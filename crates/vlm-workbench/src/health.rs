//! Periodic backend health probe.
//!
//! The latest result is published on a `watch` channel: `Some(status)` when
//! the probe answered, `None` while the backend is unreachable or before the
//! first probe completes.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};
use vlm_session::{Backend, HealthStatus, SharedBackend};

pub struct HealthMonitor {
    rx: watch::Receiver<Option<HealthStatus>>,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Start polling. The first probe fires immediately. Must be called
    /// inside a tokio runtime.
    pub fn spawn(backend: SharedBackend, every: Duration) -> Self {
        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let latest = probe(backend.as_ref()).await;
                tx.send_if_modified(|current| {
                    if *current == latest {
                        return false;
                    }
                    log_change(current.as_ref(), latest.as_ref());
                    *current = latest;
                    true
                });
            }
        });
        Self { rx, handle }
    }

    pub fn latest(&self) -> Option<HealthStatus> {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<HealthStatus>> {
        self.rx.clone()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One health probe. Failures are logged and reported as `None`.
pub async fn probe(backend: &dyn Backend) -> Option<HealthStatus> {
    match backend.health().await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(kind = e.kind(), error = %e, "Backend not reachable");
            None
        }
    }
}

fn log_change(previous: Option<&HealthStatus>, latest: Option<&HealthStatus>) {
    match (previous, latest) {
        (_, Some(status)) if status.is_ready() => {
            info!(status = %status.status, mode = ?status.mode, "Backend ready")
        }
        (_, Some(status)) => {
            warn!(status = %status.status, model_loaded = status.model_loaded, "Backend up but not ready")
        }
        (Some(_), None) => warn!("Backend went away"),
        (None, None) => {}
    }
}
