//! Periodic detect-and-recover loop over the [`StateTracker`].

use super::tracker::{RecoveryReport, StateTracker};
use crate::log_state;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug)]
pub struct Reconciler {
    tracker: Arc<StateTracker>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(tracker: Arc<StateTracker>) -> Self {
        let interval = tracker.config().reconcile_interval();
        Self { tracker, interval }
    }

    pub fn with_interval(tracker: Arc<StateTracker>, interval: Duration) -> Self {
        Self { tracker, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One reconciliation pass; a failed scan yields an empty report
    pub async fn run_once(&self) -> RecoveryReport {
        match self.tracker.recover_all().await {
            Ok(report) => {
                if report.detected > 0 {
                    log_state!(info, "Reconciliation pass complete",
                        detected: report.detected,
                        recovered: report.recovered,
                        skipped: report.skipped,
                        failed: report.failed.len()
                    );
                }
                report
            }
            Err(error) => {
                log_state!(error, "Reconciliation scan failed", error: error.to_string());
                RecoveryReport::default()
            }
        }
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        info!(
            interval_seconds = self.interval.as_secs(),
            "Starting state reconciler loop"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("State reconciler loop stopped");
        })
    }
}
