//! Periodic sync scheduling for watch mode
//!
//! Runs delta syncs on a jittered interval until shut down. Each run is
//! bounded by a timeout so a wedged fetch cannot stall the loop forever.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::SchedulerSettings;
use crate::error::AppError;
use crate::models::SyncReport;

/// Anything the scheduler can drive periodically
#[async_trait]
pub trait Syncable: Send + Sync {
    async fn run_sync(&self) -> Result<SyncReport, AppError>;
}

pub struct Scheduler {
    settings: SchedulerSettings,
    target: Arc<dyn Syncable>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings, target: Arc<dyn Syncable>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            settings,
            target,
            shutdown_tx,
        }
    }

    /// Handle for requesting shutdown from another task
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Drive the sync loop until a shutdown signal arrives.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();

        info!(
            interval_secs = self.settings.interval_secs,
            initial_delay_secs = self.settings.initial_delay_secs,
            "scheduler starting"
        );

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(self.settings.initial_delay_secs)) => {}
            _ = shutdown.recv() => {
                info!("scheduler shut down before first run");
                return;
            }
        }

        loop {
            let run = tokio::time::timeout(
                Duration::from_secs(self.settings.sync_timeout_secs),
                self.target.run_sync(),
            );

            tokio::select! {
                result = run => match result {
                    Ok(Ok(report)) => {
                        if let Some(failure) = &report.failure {
                            warn!(
                                committed = report.windows_committed,
                                planned = report.windows_planned,
                                records = report.records_ingested,
                                error = %failure,
                                "scheduled sync stopped early"
                            );
                        } else {
                            info!(
                                committed = report.windows_committed,
                                planned = report.windows_planned,
                                records = report.records_ingested,
                                "scheduled sync finished"
                            );
                        }
                    }
                    Ok(Err(err)) => {
                        error!(error = %err, "scheduled sync failed");
                    }
                    Err(_) => {
                        warn!(
                            timeout_secs = self.settings.sync_timeout_secs,
                            "scheduled sync timed out"
                        );
                    }
                },
                _ = shutdown.recv() => {
                    info!("scheduler shutting down");
                    return;
                }
            }

            let delay = Duration::from_secs(self.settings.interval_secs) + self.jitter();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    info!("scheduler shutting down");
                    return;
                }
            }
        }
    }

    /// Random per-cycle offset to spread load across mirror deployments
    fn jitter(&self) -> Duration {
        if self.settings.jitter_secs == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs(rand::thread_rng().gen_range(0..=self.settings.jitter_secs))
    }
}
