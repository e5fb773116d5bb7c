//! Placing and paying for orders.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::aggregates::{
    BillingInfo, Cart, CartItem, PaymentMethod, PaymentResult, PricingPolicy, Product, SubOrder, TotalOrder, User,
};
use crate::domain::value_objects::DEFAULT_CURRENCY;
use crate::error::{AppError, AppResult};
use crate::events::EventPublisher;
use crate::state::AppState;
use crate::store::{Store, StoreError, SubOrderFilter};

use super::MAX_ATTEMPTS;

#[derive(Clone, Debug)]
pub struct OrderLine {
    pub product_id: String,
    pub quantity: u32,
}

pub struct Checkout {
    store: Arc<dyn Store>,
    events: EventPublisher,
    pricing: PricingPolicy,
}

impl Checkout {
    pub fn new(state: &AppState) -> Self {
        Self { store: state.store.clone(), events: state.events.clone(), pricing: state.config.pricing.clone() }
    }

    /// Prices `lines` from the live catalog, reserves stock and writes the
    /// order with its sub-orders in one step. Stock races retry from a fresh read.
    #[instrument(skip(self, user, lines, billing), fields(user = %user.uid, lines = lines.len()))]
    pub async fn place(
        &self, user: &User, lines: &[OrderLine], billing: BillingInfo, method: PaymentMethod,
    ) -> AppResult<(TotalOrder, Vec<SubOrder>)> {
        let mut attempt = 1;
        loop {
            let (mut order, sub_orders, mut products) = self.prepare(user, lines, billing.clone(), method).await?;
            let mut events = order.take_events();
            for product in &mut products { events.extend(product.take_events()); }
            match self.store.place_order(&order, &sub_orders, &products).await {
                Ok(()) => {
                    info!(order = %order.id, total = %order.total_price, sub_orders = sub_orders.len(), "order placed");
                    self.events.publish(events).await;
                    return Ok((order, sub_orders));
                }
                Err(StoreError::Conflict(msg)) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, %msg, "stock changed during checkout, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn prepare(
        &self, user: &User, lines: &[OrderLine], billing: BillingInfo, method: PaymentMethod,
    ) -> AppResult<(TotalOrder, Vec<SubOrder>, Vec<Product>)> {
        let mut products: HashMap<String, Product> = HashMap::new();
        let mut order_of_first_seen = Vec::new();
        let mut cart = Cart::new(DEFAULT_CURRENCY);
        for line in lines {
            if !products.contains_key(&line.product_id) {
                let product = self.store.product(&line.product_id).await?
                    .ok_or_else(|| AppError::not_found("product", &line.product_id))?;
                order_of_first_seen.push(product.id.clone());
                products.insert(product.id.clone(), product);
            }
            if let Some(product) = products.get(&line.product_id) {
                cart.add_item(CartItem::from_product(product, line.quantity))?;
            }
        }

        let mut reserved = Vec::with_capacity(order_of_first_seen.len());
        for id in order_of_first_seen {
            if let Some(mut product) = products.remove(&id) {
                product.remove_stock(cart.quantity_of(&id))?;
                reserved.push(product);
            }
        }
        let (order, sub_orders) = TotalOrder::place(&user.uid, billing, cart, method, &self.pricing)?;
        Ok((order, sub_orders, reserved))
    }

    #[instrument(skip(self, user, result), fields(user = %user.uid))]
    pub async fn mark_paid(&self, user: &User, order_id: &str, result: PaymentResult) -> AppResult<TotalOrder> {
        let mut order = self.total_order(user, order_id).await?;
        if order.user_id != user.uid && !user.is_admin() {
            return Err(AppError::Forbidden("only the buyer can pay for an order".into()));
        }
        order.mark_paid(result)?;
        let events = order.take_events();
        self.store.update_total_order(&order).await?;
        info!(order = %order.id, method = order.payment_method.as_str(), "order paid");
        self.events.publish(events).await;
        order.version += 1;
        Ok(order)
    }

    /// Visible to the buyer, admins, and sellers with a share of the order.
    pub async fn total_order(&self, user: &User, order_id: &str) -> AppResult<TotalOrder> {
        let order = self.store.total_order(order_id).await?.ok_or_else(|| AppError::not_found("order", order_id))?;
        let sells_in_it = user.seller_id.as_ref().is_some_and(|s| order.seller_ids.contains(s));
        if order.user_id == user.uid || user.is_admin() || sells_in_it { return Ok(order); }
        Err(AppError::Forbidden("not your order".into()))
    }

    pub async fn list_for(&self, user: &User) -> AppResult<Vec<TotalOrder>> {
        Ok(self.store.total_orders(Some(&user.uid)).await?)
    }

    pub async fn list_all(&self) -> AppResult<Vec<TotalOrder>> { Ok(self.store.total_orders(None).await?) }

    /// Sub-orders of a total; sellers only see their own partition.
    pub async fn sub_orders(&self, user: &User, order_id: &str) -> AppResult<Vec<SubOrder>> {
        let order = self.total_order(user, order_id).await?;
        let subs = self.store.sub_orders(&SubOrderFilter::TotalOrder(order.id.clone())).await?;
        if order.user_id == user.uid || user.is_admin() { return Ok(subs); }
        Ok(subs.into_iter().filter(|s| Some(&s.seller_id) == user.seller_id.as_ref()).collect())
    }
}
