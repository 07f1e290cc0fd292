// Health monitor
// Periodic connectivity probe. Going from offline to online triggers one
// reconciliation pass (library validation, then adoption of backend tasks).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use super::{relock, Coordinator};
use crate::backend::BackendError;
use crate::error::{CourierError, Result};

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthProbe {
    pub connected: bool,
    /// Offline (or never checked) before, online now.
    pub reconnected: bool,
}

impl Coordinator {
    /// Call `health` and record the result. Never fails.
    pub(crate) async fn probe_health(&self) -> HealthProbe {
        let backend = self.backend();
        let result = backend.health().await;
        let connected = result.is_ok();

        let was_connected = {
            let mut state = self.lock();
            let previous = state.connected;
            state.connected = connected;
            state.last_health_check = Some(Utc::now());
            previous
        };

        match (&result, was_connected) {
            (Ok(_), false) => log::info!("Backend {} is reachable", backend.base_url()),
            (Err(e), true) => log::warn!("Backend {} went offline: {}", backend.base_url(), e),
            (Err(e), false) => log::debug!("Backend {} still unreachable: {}", backend.base_url(), e),
            (Ok(_), true) => {}
        }

        if connected != was_connected {
            self.broadcast_state();
        }

        HealthProbe {
            connected,
            reconnected: connected && !was_connected,
        }
    }

    /// Probe and, on reconnection, start a reconciliation pass in the background.
    pub async fn check_health(self: &Arc<Self>) -> bool {
        let probe = self.probe_health().await;
        if probe.reconnected {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.reconnect_pass().await });
        }
        probe.connected
    }

    /// Gate for operations that need a reachable backend.
    pub async fn ensure_backend(self: &Arc<Self>) -> Result<()> {
        if self.check_health().await {
            Ok(())
        } else {
            Err(CourierError::BackendUnreachable)
        }
    }

    /// Inventory refresh followed by task adoption. Overlapping passes collapse
    /// into the one already running.
    pub(crate) async fn reconnect_pass(self: &Arc<Self>) {
        if self.reconciling.swap(true, Ordering::AcqRel) {
            log::debug!("Reconciliation already running");
            return;
        }

        if let Err(e) = self.refresh_libraries().await {
            log::warn!("Library reconciliation failed: {}", e);
        }
        if let Err(e) = self.sync_existing().await {
            log::warn!("Task adoption failed: {}", e);
        }

        self.reconciling.store(false, Ordering::Release);
        self.broadcast_state();
    }

    /// Record a failed backend call. Transport failures mean offline.
    pub(crate) fn note_backend_error(&self, err: BackendError) -> CourierError {
        if matches!(err, BackendError::Transport(_)) {
            self.mark_offline(&err);
        }
        err.into()
    }

    fn mark_offline(&self, err: &BackendError) {
        let was_connected = {
            let mut state = self.lock();
            std::mem::replace(&mut state.connected, false)
        };
        if was_connected {
            log::warn!("Backend went offline: {}", err);
            self.broadcast_state();
        }
    }

    /// Spawn the interval timer. It holds only a weak reference, so dropping the
    /// coordinator ends it.
    pub(crate) fn start_health_monitor(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.config.health_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; startup already probed
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else { break };
                this.check_health().await;
            }
        })
        .abort_handle();

        if let Some(previous) = relock(&self.health_task).replace(handle) {
            previous.abort();
        }
    }
}
