//! Order Aggregates
//!
//! A [`TotalOrder`] is what the customer paid for. It is split into one
//! [`SubOrder`] per seller; sub-orders are fulfilled, cancelled and refunded
//! independently and every settlement is deducted from the total through
//! [`TotalOrder::deduct`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::cart::{Cart, CartItem};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{Money, MoneyError};
use crate::domain::workflow::{
    Actor, Command, CommandKind, SettleReason, StateKind, SubOrderState, Transition, TransitionError,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingInfo {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub seller_id: String,
    pub name: String,
    pub image: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub total: Money,
}

impl From<CartItem> for LineItem {
    fn from(item: CartItem) -> Self {
        let total = item.line_total();
        Self {
            product_id: item.product_id, seller_id: item.seller_id, name: item.name, image: item.image,
            quantity: item.quantity, unit_price: item.unit_price, total,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub id: String,
    pub status: String,
    #[serde(alias = "update_time")]
    pub update_time: Option<String>,
    #[serde(alias = "email_address")]
    pub email_address: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod { Stripe, Paypal, Cash }

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Stripe => "stripe", Self::Paypal => "paypal", Self::Cash => "cash" }
    }
}

/// One deduction from a total, kept for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Adjustment {
    pub sub_order_id: String,
    pub reason: SettleReason,
    pub requested: Money,
    pub applied: Money,
    pub total_before: Money,
    pub total_after: Money,
    pub at: DateTime<Utc>,
}

/// Shipping and tax parameters applied at checkout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricingPolicy {
    pub shipping_flat_rate: Decimal,
    pub free_shipping_threshold: Decimal,
    pub tax_rate: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self { shipping_flat_rate: Decimal::new(50, 0), free_shipping_threshold: Decimal::new(1000, 0), tax_rate: Decimal::new(15, 2) }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalOrder {
    pub id: String,
    pub user_id: String,
    pub billing_info: BillingInfo,
    pub items: Vec<LineItem>,
    pub items_price: Money,
    pub shipping_price: Money,
    pub tax_price: Money,
    pub total_price: Money,
    pub seller_ids: Vec<String>,
    pub payment_method: PaymentMethod,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_result: Option<PaymentResult>,
    pub adjustments: Vec<Adjustment>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fulfillment { #[default] Processing, Shipped, Delivered }

impl Fulfillment {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "processing" => Some(Self::Processing),
            "shipped" => Some(Self::Shipped),
            "delivered" => Some(Self::Delivered),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self { Self::Processing => "processing", Self::Shipped => "shipped", Self::Delivered => "delivered" }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub from: StateKind,
    pub to: StateKind,
    pub command: CommandKind,
    pub actor: Actor,
    pub actor_id: String,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubOrder {
    pub id: String,
    pub total_order_id: String,
    pub seller_id: String,
    pub user_id: String,
    pub items: Vec<LineItem>,
    pub subtotal: Money,
    pub fulfillment: Fulfillment,
    pub state: SubOrderState,
    pub history: Vec<StateChange>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TotalOrder {
    /// Prices the cart and splits it by seller.
    pub fn place(
        user_id: impl Into<String>, billing_info: BillingInfo, cart: Cart, payment_method: PaymentMethod, pricing: &PricingPolicy,
    ) -> Result<(TotalOrder, Vec<SubOrder>), OrderError> {
        if cart.is_empty() { return Err(OrderError::NoItems); }
        let currency = cart.currency().to_string();
        let items_price = cart.subtotal().clone();
        let shipping_price = if items_price.amount() >= pricing.free_shipping_threshold {
            Money::zero(&currency)
        } else {
            Money::new(pricing.shipping_flat_rate, &currency)
        };
        let tax_price = items_price.percent(pricing.tax_rate);
        let total_price = items_price.add(&shipping_price)?.add(&tax_price)?;

        let id = Uuid::now_v7().to_string();
        let user_id = user_id.into();
        let now = Utc::now();
        let items: Vec<LineItem> = cart.into_items().into_iter().map(LineItem::from).collect();

        let mut by_seller: BTreeMap<String, Vec<LineItem>> = BTreeMap::new();
        for item in &items {
            by_seller.entry(item.seller_id.clone()).or_default().push(item.clone());
        }
        let mut sub_orders = Vec::with_capacity(by_seller.len());
        for (seller_id, items) in by_seller {
            let subtotal = items.iter().try_fold(Money::zero(&currency), |acc, i| acc.add(&i.total))?;
            sub_orders.push(SubOrder {
                id: Uuid::now_v7().to_string(), total_order_id: id.clone(), seller_id, user_id: user_id.clone(),
                items, subtotal, fulfillment: Fulfillment::Processing, state: SubOrderState::Active,
                history: vec![], version: 0, created_at: now, updated_at: now,
            });
        }

        let mut order = TotalOrder {
            id: id.clone(), user_id: user_id.clone(), billing_info, items, items_price, shipping_price, tax_price,
            total_price: total_price.clone(), seller_ids: sub_orders.iter().map(|s| s.seller_id.clone()).collect(),
            payment_method, is_paid: false, paid_at: None, payment_result: None, adjustments: vec![],
            version: 0, created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed {
            order_id: id, user_id, total: total_price.amount(), sub_orders: sub_orders.len(),
        }));
        Ok((order, sub_orders))
    }

    pub fn mark_paid(&mut self, result: PaymentResult) -> Result<(), OrderError> {
        if self.is_paid { return Err(OrderError::AlreadyPaid); }
        self.is_paid = true;
        self.paid_at = Some(Utc::now());
        self.payment_result = Some(result);
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Paid { order_id: self.id.clone(), method: self.payment_method.as_str().into() }));
        Ok(())
    }

    /// Removes a settled sub-order's amount from the total, once per sub-order.
    /// Returns the amount actually removed, which is capped at the remaining total.
    pub fn deduct(&mut self, sub_order: &SubOrder, reason: SettleReason) -> Result<Money, OrderError> {
        if sub_order.total_order_id != self.id { return Err(OrderError::ForeignSubOrder); }
        if self.is_adjusted(&sub_order.id) { return Err(OrderError::AlreadyAdjusted(sub_order.id.clone())); }
        let total_before = self.total_price.clone();
        let (total_after, applied) = total_before.saturating_sub(&sub_order.subtotal)?;
        self.adjustments.push(Adjustment {
            sub_order_id: sub_order.id.clone(), reason, requested: sub_order.subtotal.clone(),
            applied: applied.clone(), total_before, total_after: total_after.clone(), at: Utc::now(),
        });
        self.total_price = total_after;
        self.touch();
        Ok(applied)
    }

    pub fn is_adjusted(&self, sub_order_id: &str) -> bool { self.adjustments.iter().any(|a| a.sub_order_id == sub_order_id) }

    /// Sum of all recorded deductions.
    pub fn deducted(&self) -> Money {
        self.adjustments.iter().fold(Money::zero(self.total_price.currency()), |acc, a| acc.add(&a.applied).unwrap_or(acc))
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

impl SubOrder {
    pub fn status(&self) -> StateKind { self.state.kind() }

    /// Validates `command` against fulfillment and payment, then the transition table.
    pub fn plan(&self, command: &Command, actor: Actor, paid: bool, now: DateTime<Utc>) -> Result<Transition, OrderError> {
        match command.kind() {
            CommandKind::RequestCancel if self.fulfillment != Fulfillment::Processing => {
                return Err(OrderError::AlreadyShipped);
            }
            CommandKind::RequestReturn if self.fulfillment != Fulfillment::Delivered => {
                return Err(OrderError::NotDelivered);
            }
            CommandKind::RequestRefund | CommandKind::RequestReturn if !paid => {
                return Err(OrderError::NotPaid);
            }
            _ => {}
        }
        Ok(self.state.apply(command, actor, now)?)
    }

    /// Records a planned transition on this sub-order.
    pub fn commit(&mut self, transition: &Transition, actor_id: &str, note: Option<String>) {
        self.history.push(StateChange {
            from: transition.from.kind(), to: transition.to.kind(), command: transition.command,
            actor: transition.actor, actor_id: actor_id.to_string(), note, at: transition.at,
        });
        self.state = transition.to.clone();
        self.updated_at = transition.at;
    }

    /// Moves fulfillment forward; never backwards, never once settled.
    pub fn advance_fulfillment(&mut self, next: Fulfillment) -> Result<(), OrderError> {
        if self.state.is_settled() || matches!(self.state, SubOrderState::CancelRequested { .. }) {
            return Err(OrderError::FulfillmentLocked(self.status()));
        }
        if next <= self.fulfillment { return Err(OrderError::FulfillmentRegression { from: self.fulfillment, to: next }); }
        self.fulfillment = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("order is already paid")]
    AlreadyPaid,
    #[error("order is not paid")]
    NotPaid,
    #[error("order has already shipped")]
    AlreadyShipped,
    #[error("order has not been delivered")]
    NotDelivered,
    #[error("sub-order belongs to a different order")]
    ForeignSubOrder,
    #[error("sub-order {0} was already deducted from its order")]
    AlreadyAdjusted(String),
    #[error("fulfillment cannot move from {from:?} to {to:?}")]
    FulfillmentRegression { from: Fulfillment, to: Fulfillment },
    #[error("fulfillment is locked while sub-order is {0}")]
    FulfillmentLocked(StateKind),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Money(#[from] MoneyError),
}
