//! In-process links between services that only know each other's traits.

use async_trait::async_trait;
use cart::CartService;
use common::ErrorKind;
use order::{OrderService, OrderStatus};
use payment::OrderSnapshot;

/// Lets the order saga drop purchased cart lines.
pub struct CartLink(pub CartService);

#[async_trait]
impl order::CartClient for CartLink {
    async fn remove_items(
        &self,
        user_id: &str,
        item_ids: &[String],
    ) -> Result<(), order::ClientError> {
        self.0
            .remove_items(user_id, item_ids)
            .await
            .map(|_| ())
            .map_err(|e| order::ClientError::Unavailable(e.to_string()))
    }
}

/// Lets the payment core read orders.
pub struct OrderLink(pub OrderService);

#[async_trait]
impl payment::OrderClient for OrderLink {
    async fn get_order(
        &self,
        order_no: &str,
    ) -> Result<Option<OrderSnapshot>, payment::ClientError> {
        match self.0.find_order(order_no).await {
            Ok(order) => Ok(Some(OrderSnapshot {
                order_no: order.order_no,
                user_id: order.user_id,
                is_pending_pay: order.status == OrderStatus::PendingPay,
                pay_amount: order.pay_amount,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(payment::ClientError::Unavailable(e.to_string())),
        }
    }
}
