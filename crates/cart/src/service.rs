use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use common::{EntityId, MAX_QUANTITY, Money, ProductCatalog, SkuSnapshot};
use kv::KeyValueStore;
use messaging::{CartEvent, EventSchema, Message, MessageBroker, topics};

use crate::{
    CartError, CartItem, CartStore, CartSummary, CheckoutPreview, InvalidReason,
    PrimaryCartStore, Result, StockReader,
};

/// Cart operations.
///
/// Writes go to the primary store first, then the matching event is
/// published on [`topics::CART_SYNC`]. A failed publish is logged and the
/// write still succeeds; the durable copy catches up on the next mutation of
/// the same line.
#[derive(Clone)]
pub struct CartService {
    primary: PrimaryCartStore,
    durable: Arc<dyn CartStore>,
    catalog: Arc<dyn ProductCatalog>,
    stock: Arc<dyn StockReader>,
    broker: Arc<dyn MessageBroker>,
}

impl CartService {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        durable: Arc<dyn CartStore>,
        catalog: Arc<dyn ProductCatalog>,
        stock: Arc<dyn StockReader>,
        broker: Arc<dyn MessageBroker>,
    ) -> Self {
        Self {
            primary: PrimaryCartStore::new(kv),
            durable,
            catalog,
            stock,
            broker,
        }
    }

    /// Adds `quantity` of a SKU, merging into an existing line for it.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(&self, user_id: &str, sku_id: &str, quantity: u32) -> Result<CartItem> {
        require_user(user_id)?;
        validate_quantity(quantity)?;
        let sku = self
            .catalog
            .get_sku(sku_id)
            .await?
            .ok_or_else(|| CartError::NotFound(format!("sku {sku_id}")))?;
        if !sku.on_sale {
            return Err(CartError::Validation(format!("sku {sku_id} is not on sale")));
        }
        let available = self.available_one(sku_id).await?;

        let existing = self
            .get_cart(user_id)
            .await?
            .into_iter()
            .find(|item| item.sku_id == sku_id);
        let requested = existing
            .as_ref()
            .map_or(quantity, |item| item.quantity.saturating_add(quantity));
        validate_quantity(requested)?;
        check_stock(sku_id, available, requested)?;

        let now = Utc::now();
        let (item, event) = match existing {
            Some(mut item) => {
                item.quantity = requested;
                apply_snapshot(&mut item, &sku);
                item.stock_hint = available;
                item.is_valid = true;
                item.invalid_reason = None;
                item.updated_at = now;
                let line = item.to_line();
                (item, CartEvent::ItemUpdated { line })
            }
            None => {
                let item = CartItem {
                    id: EntityId::new(),
                    user_id: user_id.to_string(),
                    product_id: sku.product_id.clone(),
                    sku_id: sku.sku_id.clone(),
                    product_title: sku.product_title.clone(),
                    product_image: sku.product_image.clone(),
                    sku_name: sku.sku_name.clone(),
                    unit_price: sku.price,
                    current_price: sku.price,
                    quantity,
                    stock_hint: available,
                    is_valid: true,
                    invalid_reason: None,
                    created_at: now,
                    updated_at: now,
                };
                let line = item.to_line();
                (item, CartEvent::ItemAdded { line })
            }
        };

        self.primary.put(&item).await?;
        self.publish(event).await;
        Ok(item)
    }

    /// Sets a line's quantity, bounded by current stock.
    #[tracing::instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: &str,
        item_id: &str,
        quantity: u32,
    ) -> Result<CartItem> {
        require_user(user_id)?;
        validate_quantity(quantity)?;
        let mut item = self.find_line(user_id, item_id).await?;
        let available = self.available_one(&item.sku_id).await?;
        check_stock(&item.sku_id, available, quantity)?;

        item.quantity = quantity;
        item.stock_hint = available;
        item.is_valid = true;
        item.invalid_reason = None;
        item.updated_at = Utc::now();

        self.primary.put(&item).await?;
        self.publish(CartEvent::ItemUpdated {
            line: item.to_line(),
        })
        .await;
        Ok(item)
    }

    pub async fn remove_item(&self, user_id: &str, item_id: &str) -> Result<()> {
        require_user(user_id)?;
        let item = self.find_line(user_id, item_id).await?;
        self.primary.remove(user_id, &[item_id.to_string()]).await?;
        self.publish(CartEvent::ItemRemoved {
            user_id: user_id.to_string(),
            item_id: item.id,
        })
        .await;
        Ok(())
    }

    /// Removes several lines in one round trip and returns the number of
    /// unique ids. Ids that are not line ids are ignored.
    #[tracing::instrument(skip(self, item_ids), fields(requested = item_ids.len()))]
    pub async fn remove_items(&self, user_id: &str, item_ids: &[String]) -> Result<usize> {
        require_user(user_id)?;
        let mut seen = HashSet::new();
        let mut unique: Vec<EntityId> = Vec::new();
        for raw in item_ids {
            match raw.trim().parse::<EntityId>() {
                Ok(id) if seen.insert(id) => unique.push(id),
                Ok(_) => {}
                Err(e) => tracing::warn!(user_id, item_id = %raw, error = %e, "ignoring malformed cart item id"),
            }
        }
        if unique.is_empty() {
            return Ok(0);
        }

        let fields: Vec<String> = unique.iter().map(ToString::to_string).collect();
        let removed = self.primary.remove(user_id, &fields).await?;
        tracing::debug!(user_id, unique = unique.len(), removed, "cart lines removed");

        for item_id in &unique {
            self.publish(CartEvent::ItemRemoved {
                user_id: user_id.to_string(),
                item_id: *item_id,
            })
            .await;
        }
        Ok(unique.len())
    }

    pub async fn clear(&self, user_id: &str) -> Result<()> {
        require_user(user_id)?;
        self.primary.clear(user_id).await?;
        self.publish(CartEvent::Cleared {
            user_id: user_id.to_string(),
        })
        .await;
        Ok(())
    }

    /// Lines of the user, oldest first.
    ///
    /// Reads the primary store; on a miss (or when it is down) reads the
    /// durable store and writes what it found back to the primary store.
    /// A cart the user emptied is not a miss: the durable copy may still
    /// hold lines whose removal has not been projected yet.
    pub async fn get_cart(&self, user_id: &str) -> Result<Vec<CartItem>> {
        require_user(user_id)?;
        match self.primary.list(user_id).await {
            Ok(items) if !items.is_empty() => return Ok(items),
            Ok(_) => match self.primary.is_live(user_id).await {
                Ok(true) => return Ok(Vec::new()),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "cart marker read failed, using durable store");
                }
            },
            Err(e) => {
                tracing::warn!(user_id, error = %e, "primary cart read failed, using durable store");
            }
        }

        let items = self.durable.list(user_id).await?;
        if !items.is_empty() {
            if let Err(e) = self.primary.put_all(user_id, &items).await {
                tracing::warn!(user_id, error = %e, "cart backfill failed");
            } else {
                tracing::debug!(user_id, lines = items.len(), "cart backfilled from durable store");
            }
        }
        Ok(items)
    }

    pub async fn summary(&self, user_id: &str) -> Result<CartSummary> {
        Ok(CartSummary::of(&self.get_cart(user_id).await?))
    }

    /// Re-prices every line from the catalog and re-checks stock.
    ///
    /// Lines that changed are written back and published as updates.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self, user_id: &str) -> Result<Vec<CartItem>> {
        let mut items = self.get_cart(user_id).await?;
        if items.is_empty() {
            return Ok(items);
        }

        let sku_ids: Vec<String> = items
            .iter()
            .map(|item| item.sku_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let skus = self.catalog.batch_get_skus(&sku_ids).await?;
        let stock = match self.stock.available(&sku_ids).await {
            Ok(stock) => Some(stock),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "stock lookup failed during cart refresh");
                None
            }
        };

        let now = Utc::now();
        let mut changed = Vec::new();
        for item in &mut items {
            let before = item.clone();
            revalidate(item, skus.get(&item.sku_id), stock.as_ref());
            if *item != before {
                item.updated_at = now;
                changed.push(item.clone());
            }
        }

        if !changed.is_empty() {
            self.primary.put_all(user_id, &changed).await?;
            for item in changed {
                self.publish(CartEvent::ItemUpdated {
                    line: item.to_line(),
                })
                .await;
            }
        }
        Ok(items)
    }

    /// Refreshes the cart and totals the selected lines.
    ///
    /// With no selection every line is considered. Invalid lines are
    /// returned but left out of the totals.
    pub async fn checkout_preview(
        &self,
        user_id: &str,
        item_ids: Option<&[String]>,
    ) -> Result<CheckoutPreview> {
        let items = self.refresh(user_id).await?;
        let selected: Vec<CartItem> = match item_ids {
            Some(ids) => {
                let wanted: HashSet<&str> = ids.iter().map(|id| id.trim()).collect();
                items
                    .into_iter()
                    .filter(|item| wanted.contains(item.id.to_string().as_str()))
                    .collect()
            }
            None => items,
        };
        if selected.is_empty() {
            return Err(CartError::Validation("no cart items selected".into()));
        }

        let product_total: Money = selected
            .iter()
            .filter(|item| item.is_valid)
            .map(CartItem::subtotal)
            .sum();
        let discount = Money::zero();
        let shipping_fee = Money::zero();
        Ok(CheckoutPreview {
            items: selected,
            product_total,
            discount,
            shipping_fee,
            final_amount: (product_total - discount + shipping_fee).non_negative(),
        })
    }

    async fn find_line(&self, user_id: &str, item_id: &str) -> Result<CartItem> {
        if let Ok(Some(item)) = self.primary.get(user_id, item_id).await {
            return Ok(item);
        }
        self.get_cart(user_id)
            .await?
            .into_iter()
            .find(|item| item.id.to_string() == item_id)
            .ok_or_else(|| CartError::NotFound(item_id.to_string()))
    }

    async fn available_one(&self, sku_id: &str) -> Result<u32> {
        let stock = self.stock.available(&[sku_id.to_string()]).await?;
        Ok(stock.get(sku_id).copied().unwrap_or(0))
    }

    async fn publish(&self, event: CartEvent) {
        let event_type = event.event_type();
        let result = match Message::from_event(&event) {
            Ok(message) => self.broker.publish(topics::CART_SYNC, message).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                metrics::counter!("cart_events_published_total", "event_type" => event_type)
                    .increment(1);
            }
            Err(e) => {
                tracing::warn!(
                    user_id = event.user_id(),
                    event_type,
                    error = %e,
                    "cart event not published"
                );
            }
        }
    }
}

fn require_user(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(CartError::Validation("user id is required".into()));
    }
    Ok(())
}

fn validate_quantity(quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(CartError::Validation("quantity must be at least 1".into()));
    }
    if quantity > MAX_QUANTITY {
        return Err(CartError::Validation(format!(
            "quantity must not exceed {MAX_QUANTITY}"
        )));
    }
    Ok(())
}

fn check_stock(sku_id: &str, available: u32, requested: u32) -> Result<()> {
    if available == 0 || requested > available {
        return Err(CartError::InsufficientStock {
            sku_id: sku_id.to_string(),
            available,
            requested,
        });
    }
    Ok(())
}

fn apply_snapshot(item: &mut CartItem, sku: &SkuSnapshot) {
    item.product_id = sku.product_id.clone();
    item.product_title = sku.product_title.clone();
    item.product_image = sku.product_image.clone();
    item.sku_name = sku.sku_name.clone();
    item.current_price = sku.price;
}

fn revalidate(
    item: &mut CartItem,
    sku: Option<&SkuSnapshot>,
    stock: Option<&HashMap<String, u32>>,
) {
    let Some(sku) = sku else {
        item.invalidate(InvalidReason::SkuMissing);
        return;
    };
    apply_snapshot(item, sku);
    if !sku.on_sale {
        item.invalidate(InvalidReason::ProductUnavailable);
        return;
    }
    let Some(stock) = stock else {
        item.invalidate(InvalidReason::StockUnknown);
        return;
    };
    let available = stock.get(&item.sku_id).copied().unwrap_or(0);
    item.stock_hint = available;
    if available == 0 {
        item.invalidate(InvalidReason::OutOfStock);
    } else if item.quantity > available {
        item.invalidate(InvalidReason::ExceedsStock { available });
    } else {
        item.is_valid = true;
        item.invalid_reason = None;
    }
}
