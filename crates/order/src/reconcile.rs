//! Reconciliation of inventory reservations against persisted orders.
//!
//! A reservation whose net StockLog delta is still negative must belong to
//! a live order. Two things break that: a crash between deduct and insert
//! (orphan), and a failed rollback after cancel or close (leak).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::MAX_QUANTITY;
use inventory::{StockItem, StockLog};

use crate::service::chrono_duration;
use crate::{InventoryClient, OrderRepository, OrderStatus, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Order numbers with an outstanding reservation that were examined.
    pub checked: usize,
    /// Reservations with no order row.
    pub orphans: Vec<String>,
    /// Reservations held by cancelled or closed orders.
    pub leaked: Vec<String>,
    /// Order numbers whose logs show more stock returned than taken.
    pub over_returned: Vec<String>,
    pub repaired: usize,
    pub failed: usize,
}

pub struct Reconciler {
    inventory: Arc<dyn InventoryClient>,
    orders: Arc<dyn OrderRepository>,
    /// Reservations touched more recently than this are left alone; an
    /// order may still be in the middle of its create saga.
    grace: Duration,
}

impl Reconciler {
    pub fn new(inventory: Arc<dyn InventoryClient>, orders: Arc<dyn OrderRepository>) -> Self {
        Self {
            inventory,
            orders,
            grace: Duration::from_secs(300),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Checks every reservation with log activity since `since` and returns
    /// the stock of orphaned and leaked ones.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, since: DateTime<Utc>) -> Result<ReconcileReport> {
        let cutoff = Utc::now() - chrono_duration(self.grace);
        let nets = self.inventory.net_delta_by_ref(since).await?;
        let mut report = ReconcileReport::default();

        let mut refs: Vec<(&String, &i64)> = nets.iter().filter(|(_, net)| **net != 0).collect();
        refs.sort();

        for (order_no, net) in refs {
            if *net > 0 {
                raise("inventory_over_returned", order_no, *net);
                report.over_returned.push(order_no.clone());
                continue;
            }
            report.checked += 1;

            let logs = self.inventory.logs_for_ref(order_no).await?;
            if logs.iter().any(|l| l.created_at > cutoff) {
                continue;
            }

            let alert = match self.orders.get(order_no).await? {
                None => {
                    report.orphans.push(order_no.clone());
                    "orphan_reservation"
                }
                Some(order)
                    if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Closed)
                        && order.closed_at.is_none_or(|at| at <= cutoff) =>
                {
                    report.leaked.push(order_no.clone());
                    "leaked_reservation"
                }
                Some(_) => continue,
            };
            raise(alert, order_no, *net);

            let items = outstanding(&logs);
            match self.inventory.rollback(order_no, &items).await {
                Ok(()) => report.repaired += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(order_no = %order_no, error = %e, "reconciliation rollback failed");
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            orphans = report.orphans.len(),
            leaked = report.leaked.len(),
            repaired = report.repaired,
            "reconciliation finished"
        );
        Ok(report)
    }
}

fn raise(alert: &'static str, order_no: &str, net: i64) {
    metrics::counter!("operational_alerts_total", "alert" => alert).increment(1);
    tracing::error!(alert, order_no, net, "inventory reservation out of step with orders");
}

/// Per-SKU quantities still reserved according to the logs.
fn outstanding(logs: &[StockLog]) -> Vec<StockItem> {
    let mut per_sku: BTreeMap<&str, i64> = BTreeMap::new();
    for log in logs {
        *per_sku.entry(log.sku_id.as_str()).or_default() += log.delta as i64;
    }
    per_sku
        .into_iter()
        .filter(|(_, net)| *net < 0)
        .map(|(sku, net)| {
            let quantity = u32::try_from(-net).map_or(MAX_QUANTITY, |q| q.min(MAX_QUANTITY));
            StockItem::new(sku, quantity)
        })
        .collect()
}
