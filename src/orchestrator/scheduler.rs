//! Periodic sweep driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::orchestrator::Orchestrator;

/// Shortest period the scheduler will tick at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Runs `Orchestrator::sweep` immediately and then once per interval until
/// shut down.
pub struct SweepScheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SweepScheduler {
    pub fn spawn(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        let interval = if interval < MIN_SWEEP_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "Sweep interval too short, using minimum"
            );
            MIN_SWEEP_INTERVAL
        } else {
            interval
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "Sweep scheduler started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // Not raced against cancellation: a started sweep runs to the end
                        orchestrator.sweep().await;
                    }
                }
            }
            info!("Sweep scheduler stopped");
        });

        Self { cancel, handle }
    }

    /// A token cancelled when this scheduler shuts down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop ticking and wait for any in-progress sweep to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Sweep scheduler task panicked");
        }
    }
}
