//! Persistence boundary.
//!
//! Documents carry a `version`. Writers pass back the document they read; a
//! write succeeds only if the stored version still matches, and the stored
//! copy gets `version + 1`. Multi-document writes are all-or-nothing.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::aggregates::{Product, Seller, SellerStatus, SubOrder, TotalOrder, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub(crate) fn stale(kind: &str, id: &str) -> StoreError {
    StoreError::Conflict(format!("{kind} {id} was modified concurrently"))
}

#[derive(Clone, Debug, Default)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub seller_id: Option<String>,
    pub search: Option<String>,
}

impl ProductFilter {
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(category) = &self.category {
            if !product.category.eq_ignore_ascii_case(category) { return false; }
        }
        if let Some(seller_id) = &self.seller_id {
            if &product.seller_id != seller_id { return false; }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !product.product_name.to_lowercase().contains(&needle) && !product.description.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }
}

#[derive(Clone, Debug)]
pub enum SubOrderFilter {
    All,
    TotalOrder(String),
    Seller(String),
}

impl SubOrderFilter {
    pub fn matches(&self, sub: &SubOrder) -> bool {
        match self {
            Self::All => true,
            Self::TotalOrder(id) => &sub.total_order_id == id,
            Self::Seller(id) => &sub.seller_id == id,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with `Conflict` when the email is taken.
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn user(&self, uid: &str) -> StoreResult<Option<User>>;
    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn users(&self) -> StoreResult<Vec<User>>;
    async fn update_user(&self, user: &User) -> StoreResult<()>;
    async fn delete_user(&self, uid: &str) -> StoreResult<bool>;

    /// Fails with `Conflict` when the user already has a seller profile.
    async fn insert_seller(&self, seller: &Seller) -> StoreResult<()>;
    async fn seller(&self, seller_id: &str) -> StoreResult<Option<Seller>>;
    async fn seller_by_user(&self, user_id: &str) -> StoreResult<Option<Seller>>;
    async fn sellers(&self, status: Option<SellerStatus>) -> StoreResult<Vec<Seller>>;
    /// Saves a reviewed application together with the owning user.
    async fn update_seller(&self, seller: &Seller, owner: &User) -> StoreResult<()>;

    /// Newest first.
    async fn products(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>>;
    async fn product(&self, id: &str) -> StoreResult<Option<Product>>;
    async fn insert_product(&self, product: &Product) -> StoreResult<()>;
    async fn update_product(&self, product: &Product) -> StoreResult<()>;
    async fn delete_product(&self, id: &str) -> StoreResult<bool>;

    /// Inserts the order and its sub-orders and saves the decremented products.
    async fn place_order(&self, order: &TotalOrder, sub_orders: &[SubOrder], products: &[Product]) -> StoreResult<()>;
    async fn total_order(&self, id: &str) -> StoreResult<Option<TotalOrder>>;
    /// Newest first, optionally for one customer.
    async fn total_orders(&self, user_id: Option<&str>) -> StoreResult<Vec<TotalOrder>>;
    async fn update_total_order(&self, order: &TotalOrder) -> StoreResult<()>;
    async fn sub_order(&self, id: &str) -> StoreResult<Option<SubOrder>>;
    async fn sub_orders(&self, filter: &SubOrderFilter) -> StoreResult<Vec<SubOrder>>;
    async fn update_sub_order(&self, sub_order: &SubOrder) -> StoreResult<()>;
    /// Saves a sub-order state change and its total together, checking both versions.
    async fn commit_transition(&self, sub_order: &SubOrder, order: &TotalOrder) -> StoreResult<()>;
}
