//! Periodic job that closes payments past their expiry.

use std::time::Duration;

use tokio::sync::watch;

use crate::{PaymentService, Result};

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub limit: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            limit: 100,
        }
    }
}

pub struct ExpiredPaymentSweeper {
    payments: PaymentService,
    config: SweeperConfig,
}

impl ExpiredPaymentSweeper {
    pub fn new(payments: PaymentService, config: SweeperConfig) -> Self {
        Self { payments, config }
    }

    /// Ticks until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            "expired payment sweeper started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::warn!(error = %e, "payment sweep failed");
                    }
                }
            }
        }

        tracing::info!("expired payment sweeper stopped");
    }

    pub async fn sweep_once(&self) -> Result<usize> {
        self.payments.close_expired(self.config.limit).await
    }
}
