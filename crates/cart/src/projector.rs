//! Replays cart events into the durable store.

use std::sync::Arc;

use async_trait::async_trait;
use common::ErrorKind;
use messaging::{CartEvent, EventSchema, HandlerError, Message, MessageHandler};

use crate::{CartError, CartItem, CartStore};

/// Subscriber on the cart channel. Applying an event twice leaves the
/// durable store unchanged.
pub struct CartProjector {
    store: Arc<dyn CartStore>,
}

impl CartProjector {
    pub fn new(store: Arc<dyn CartStore>) -> Self {
        Self { store }
    }

    pub async fn apply(&self, event: &CartEvent) -> Result<(), CartError> {
        match event {
            CartEvent::ItemAdded { line } | CartEvent::ItemUpdated { line } => {
                self.store.upsert(&CartItem::from(line.clone())).await
            }
            CartEvent::ItemRemoved { user_id, item_id } => {
                self.store
                    .delete(user_id, &item_id.to_string())
                    .await
                    .map(|_| ())
            }
            CartEvent::Cleared { user_id } => self.store.clear(user_id).await.map(|_| ()),
        }
    }
}

#[async_trait]
impl MessageHandler for CartProjector {
    fn name(&self) -> &'static str {
        "cart.projector"
    }

    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let event: CartEvent = message.decode()?;
        self.apply(&event).await.map_err(|e| match e.kind() {
            ErrorKind::Validation | ErrorKind::NotFound => HandlerError::Rejected(e.to_string()),
            _ => HandlerError::Transient(e.to_string()),
        })?;
        metrics::counter!("cart_events_applied_total", "event_type" => event.event_type())
            .increment(1);
        tracing::debug!(
            user_id = event.user_id(),
            event_type = event.event_type(),
            "cart event applied"
        );
        Ok(())
    }
}
