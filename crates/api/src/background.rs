//! Long-running tasks that live next to the HTTP server.
//!
//! Every task watches the same shutdown channel and finishes its current
//! iteration before exiting. [`BackgroundTasks::shutdown`] signals them and
//! waits up to the grace window.

use std::sync::Arc;
use std::time::Duration;

use cart::CartProjector;
use messaging::{
    BrokerError, ConsumerConfig, MessageHandler, OrderTimeout, PaymentSucceeded, run_consumer,
    topics,
};
use order::{OrderTimeoutConsumer, PaymentEventConsumer, TimeoutReaper};
use outbox::{OutboxDispatcher, Route};
use payment::{ExpiredPaymentSweeper, SweeperConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::wiring::Stack;

pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    /// Subscribes the consumers and spawns every task.
    pub async fn spawn(stack: &Stack, config: &Config) -> Result<Self, BrokerError> {
        let (shutdown, rx) = watch::channel(false);
        let mut tasks = Self {
            shutdown,
            handles: Vec::new(),
        };

        let order_dispatcher = OutboxDispatcher::new(
            "order",
            stack.order_outbox.clone(),
            stack.broker.clone(),
            config.outbox.clone(),
        )
        .with_route(
            OrderTimeout::EVENT_TYPE,
            Route::delayed(topics::ORDER_TIMEOUT_DLQ, config.pay_timeout),
        );
        let shutdown_rx = rx.clone();
        tasks.push("order-dispatcher", async move {
            order_dispatcher.run(shutdown_rx).await
        });

        let payment_dispatcher = OutboxDispatcher::new(
            "payment",
            stack.payment_outbox.clone(),
            stack.broker.clone(),
            config.outbox.clone(),
        )
        .with_route(
            PaymentSucceeded::EVENT_TYPE,
            Route::topic(topics::PAYMENT_SUCCESS_NOTIFY),
        );
        let shutdown_rx = rx.clone();
        tasks.push("payment-dispatcher", async move {
            payment_dispatcher.run(shutdown_rx).await
        });

        let reaper = TimeoutReaper::new(stack.state.orders.clone(), config.reaper.clone());
        let shutdown_rx = rx.clone();
        tasks.push("timeout-reaper", async move { reaper.run(shutdown_rx).await });

        let sweeper = ExpiredPaymentSweeper::new(
            stack.state.payments.clone(),
            SweeperConfig {
                interval: config.payment_sweep_interval,
                ..SweeperConfig::default()
            },
        );
        let shutdown_rx = rx.clone();
        tasks.push("payment-sweeper", async move { sweeper.run(shutdown_rx).await });

        let consumers: [(&'static str, &str, &str, Arc<dyn MessageHandler>); 3] = [
            (
                "payment-event-consumer",
                topics::PAYMENT_SUCCESS_NOTIFY,
                "order-service",
                Arc::new(PaymentEventConsumer::new(stack.state.orders.clone())),
            ),
            (
                "order-timeout-consumer",
                topics::ORDER_TIMEOUT_DLQ,
                "order-service",
                Arc::new(OrderTimeoutConsumer::new(stack.state.orders.clone())),
            ),
            (
                "cart-projector",
                topics::CART_SYNC,
                "cart-persistence",
                Arc::new(CartProjector::new(stack.cart_store.clone())),
            ),
        ];
        for (name, topic, group, handler) in consumers {
            let subscription = stack.broker.subscribe(topic, group).await?;
            let shutdown_rx = rx.clone();
            tasks.push(name, async move {
                run_consumer(subscription, handler, ConsumerConfig::default(), shutdown_rx).await
            });
        }

        tracing::info!(tasks = tasks.handles.len(), "background tasks started");
        Ok(tasks)
    }

    fn push<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push((name, tokio::spawn(task)));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signals shutdown and waits for every task, sharing one deadline.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown.send(true);
        let deadline = tokio::time::Instant::now() + grace;

        for (name, handle) in self.handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => tracing::info!(task = name, "background task stopped"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "background task failed"),
                Err(_) => tracing::warn!(task = name, "background task did not stop within grace window"),
            }
        }
    }
}
