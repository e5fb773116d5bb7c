//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "domain", content = "event", rename_all = "camelCase")]
pub enum DomainEvent {
    Product(ProductEvent),
    Order(OrderEvent),
    Seller(SellerEvent),
}

impl DomainEvent {
    /// NATS subject suffix, e.g. `order.placed`.
    pub fn subject(&self) -> String {
        let (domain, name) = match self {
            Self::Product(e) => ("product", e.name()),
            Self::Order(e) => ("order", e.name()),
            Self::Seller(e) => ("seller", e.name()),
        };
        format!("{domain}.{name}")
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProductEvent {
    Created { product_id: String, seller_id: String },
    Deleted { product_id: String },
    Reviewed { product_id: String, review_id: String, rating: u8 },
    StockDepleted { product_id: String },
}

impl ProductEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Deleted { .. } => "deleted",
            Self::Reviewed { .. } => "reviewed",
            Self::StockDepleted { .. } => "stock_depleted",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OrderEvent {
    Placed { order_id: String, user_id: String, total: Decimal, sub_orders: usize },
    Paid { order_id: String, method: String },
    FulfillmentAdvanced { sub_order_id: String, status: String },
    Transitioned { sub_order_id: String, from: String, to: String, actor: String },
    Refunded { sub_order_id: String, amount: Decimal, gateway_reference: Option<String> },
}

impl OrderEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Placed { .. } => "placed",
            Self::Paid { .. } => "paid",
            Self::FulfillmentAdvanced { .. } => "fulfillment_advanced",
            Self::Transitioned { .. } => "transitioned",
            Self::Refunded { .. } => "refunded",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SellerEvent {
    Applied { seller_id: String, user_id: String },
    Approved { seller_id: String },
    Rejected { seller_id: String },
}

impl SellerEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Approved { .. } => "approved",
            Self::Rejected { .. } => "rejected",
        }
    }
}
