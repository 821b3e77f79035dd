//! Escrow auto-release worker
//!
//! Periodically sweeps funded escrow accounts whose release deadline has
//! passed and releases them on behalf of the system. Failures within a
//! sweep are logged and alerted without stopping the worker.

use crate::config::EscrowConfig;
use crate::services::escrow_service::EscrowManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct AutoReleaseConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl AutoReleaseConfig {
    pub fn from_escrow_config(config: &EscrowConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.sweep_interval_secs),
            batch_size: config.sweep_batch_size,
        }
    }
}

pub struct AutoReleaseWorker {
    escrow: Arc<EscrowManager>,
    config: AutoReleaseConfig,
}

impl AutoReleaseWorker {
    pub fn new(escrow: Arc<EscrowManager>, config: AutoReleaseConfig) -> Self {
        Self { escrow, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "auto-release worker started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.escrow.process_auto_release(self.config.batch_size).await {
                        Ok(outcome) if outcome.released > 0 || outcome.failed > 0 => {
                            info!(
                                released = outcome.released,
                                failed = outcome.failed,
                                "auto-release cycle complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "auto-release cycle failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("auto-release worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_derives_from_escrow_settings() {
        let escrow = EscrowConfig {
            auto_release_days: 14,
            sweep_interval_secs: 120,
            sweep_batch_size: 50,
        };
        let config = AutoReleaseConfig::from_escrow_config(&escrow);
        assert_eq!(config.poll_interval, Duration::from_secs(120));
        assert_eq!(config.batch_size, 50);
    }
}
