//! Broker subscribers owned by the order service.

use async_trait::async_trait;
use common::ErrorKind;
use messaging::{HandlerError, Message, MessageHandler, OrderTimeout, PaymentSucceeded};

use crate::{MarkPaidOutcome, OrderError, OrderService};

fn to_handler_error(e: OrderError) -> HandlerError {
    match e.kind() {
        ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Conflict => {
            HandlerError::Rejected(e.to_string())
        }
        _ => HandlerError::Transient(e.to_string()),
    }
}

/// Applies `payment.succeeded` to the order.
pub struct PaymentEventConsumer {
    orders: OrderService,
}

impl PaymentEventConsumer {
    pub fn new(orders: OrderService) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl MessageHandler for PaymentEventConsumer {
    fn name(&self) -> &'static str {
        "order.payment_succeeded"
    }

    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let event: PaymentSucceeded = message.decode()?;
        let outcome = self
            .orders
            .mark_paid(
                &event.order_no,
                &event.channel,
                &event.trade_no,
                Some(event.paid_at),
            )
            .await
            .map_err(to_handler_error)?;

        if let MarkPaidOutcome::NotPayable(status) = outcome {
            // Alerted by the service; the payment stays successful.
            tracing::warn!(
                order_no = %event.order_no,
                payment_no = %event.payment_no,
                %status,
                "payment recorded against an order that cannot be paid"
            );
        }
        Ok(())
    }
}

/// Closes an order when its delayed timeout notification arrives.
pub struct OrderTimeoutConsumer {
    orders: OrderService,
}

impl OrderTimeoutConsumer {
    pub fn new(orders: OrderService) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl MessageHandler for OrderTimeoutConsumer {
    fn name(&self) -> &'static str {
        "order.timeout"
    }

    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let event: OrderTimeout = message.decode()?;
        let closed = self
            .orders
            .close_expired_order(&event.order_no)
            .await
            .map_err(to_handler_error)?;
        if closed {
            metrics::counter!("orders_reaped_total").increment(1);
        }
        tracing::debug!(order_no = %event.order_no, closed, "order timeout handled");
        Ok(())
    }
}
