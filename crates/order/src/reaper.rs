//! Periodic backstop that closes unpaid orders past their pay window.

use std::time::Duration;

use tokio::sync::watch;

use crate::{OrderService, Result};

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub scanned: usize,
    pub closed: usize,
    /// Orders that were paid or cancelled before the reaper got to them.
    pub skipped: usize,
    pub failed: usize,
}

pub struct TimeoutReaper {
    orders: OrderService,
    config: ReaperConfig,
}

impl TimeoutReaper {
    pub fn new(orders: OrderService, config: ReaperConfig) -> Self {
        Self { orders, config }
    }

    /// Ticks until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            "timeout reaper started"
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
                    if let Err(e) = self.reap_once().await {
                        tracing::warn!(error = %e, "reaper pass failed");
                    }
                }
            }
        }

        tracing::info!("timeout reaper stopped");
    }

    /// One pass: close every expired order in the batch.
    #[tracing::instrument(skip(self))]
    pub async fn reap_once(&self) -> Result<ReapReport> {
        let expired = self.orders.expired_pending(self.config.batch_size).await?;
        let mut report = ReapReport {
            scanned: expired.len(),
            ..ReapReport::default()
        };

        for order in &expired {
            match self.orders.close_expired_order(&order.order_no).await {
                Ok(true) => report.closed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(order_no = %order.order_no, error = %e, "failed to close expired order");
                }
            }
        }

        if report.closed > 0 {
            metrics::counter!("orders_reaped_total").increment(report.closed as u64);
            tracing::info!(closed = report.closed, skipped = report.skipped, "expired orders closed");
        }
        Ok(report)
    }
}
