//! Business operations. Handlers authenticate and validate; services load
//! aggregates, apply domain rules, persist and publish.

pub mod catalog;
pub mod checkout;
pub mod fulfillment;
pub mod sellers;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::instrument;

use crate::domain::workflow::SettleReason;
use crate::error::AppResult;
use crate::store::{ProductFilter, Store};
use crate::domain::aggregates::SellerStatus;

/// How many times a read-modify-write is retried after a version conflict.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub users: usize,
    pub sellers: usize,
    pub pending_sellers: usize,
    pub products: usize,
    pub orders: usize,
    pub paid_orders: usize,
    pub paid_revenue: Decimal,
    pub refunded_total: Decimal,
    pub cancelled_total: Decimal,
}

/// Counts and money totals for the admin dashboard. Revenue is net of deductions.
#[instrument(skip(store))]
pub async fn dashboard_stats(store: &dyn Store) -> AppResult<DashboardStats> {
    let users = store.users().await?;
    let sellers = store.sellers(None).await?;
    let products = store.products(&ProductFilter::default()).await?;
    let orders = store.total_orders(None).await?;

    let mut stats = DashboardStats {
        users: users.len(),
        sellers: sellers.iter().filter(|s| s.is_approved()).count(),
        pending_sellers: sellers.iter().filter(|s| s.status == SellerStatus::Pending).count(),
        products: products.len(),
        orders: orders.len(),
        ..Default::default()
    };
    for order in orders.iter().filter(|o| o.is_paid) {
        stats.paid_orders += 1;
        stats.paid_revenue += order.total_price.amount();
        for adjustment in &order.adjustments {
            match adjustment.reason {
                SettleReason::Refunded => stats.refunded_total += adjustment.applied.amount(),
                SettleReason::Cancelled => stats.cancelled_total += adjustment.applied.amount(),
            }
        }
    }
    Ok(stats)
}
