//! Products and their embedded reviews.
//!
//! Every review change rewrites the product document. Writes go through
//! [`Catalog::mutate`], which re-reads and retries when another writer got
//! there first.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::aggregates::{Product, ProductDraft, Reply, Review, User};
use crate::domain::events::{DomainEvent, ProductEvent};
use crate::domain::value_objects::Rating;
use crate::error::{AppError, AppResult};
use crate::events::EventPublisher;
use crate::state::AppState;
use crate::store::{ProductFilter, Store, StoreError};

use super::MAX_ATTEMPTS;

/// Product as served to clients, with review aggregates.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    pub rating: Decimal,
    pub num_reviews: usize,
}

impl From<Product> for ProductView {
    fn from(product: Product) -> Self {
        Self { rating: product.average_rating(), num_reviews: product.reviews.len(), product }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    pub liked: bool,
    pub likes: usize,
}

pub struct Catalog {
    store: Arc<dyn Store>,
    events: EventPublisher,
}

impl Catalog {
    pub fn new(state: &AppState) -> Self { Self { store: state.store.clone(), events: state.events.clone() } }

    pub async fn list(&self, filter: &ProductFilter) -> AppResult<Vec<ProductView>> {
        Ok(self.store.products(filter).await?.into_iter().map(ProductView::from).collect())
    }

    pub async fn get(&self, id: &str) -> AppResult<ProductView> { Ok(self.load(id).await?.into()) }

    async fn load(&self, id: &str) -> AppResult<Product> {
        self.store.product(id).await?.ok_or_else(|| AppError::not_found("product", id))
    }

    /// Seller id the caller may list products under. Admins may name any existing seller.
    async fn listing_seller(&self, user: &User, requested: Option<String>) -> AppResult<String> {
        if let Some(seller) = self.store.seller_by_user(&user.uid).await? {
            if seller.is_approved() { return Ok(seller.seller_id); }
        }
        if !user.is_admin() { return Err(AppError::Forbidden("only approved sellers can list products".into())); }
        let seller_id = requested.ok_or_else(|| AppError::BadRequest("sellerId is required".into()))?;
        match self.store.seller(&seller_id).await? {
            Some(s) if s.is_approved() => Ok(s.seller_id),
            _ => Err(AppError::BadRequest(format!("seller {seller_id} is not an approved seller"))),
        }
    }

    fn ensure_owner(user: &User, product: &Product) -> AppResult<()> {
        if user.is_admin() || user.seller_id.as_deref() == Some(product.seller_id.as_str()) { return Ok(()); }
        Err(AppError::Forbidden("product belongs to another seller".into()))
    }

    #[instrument(skip(self, user, draft), fields(user = %user.uid))]
    pub async fn create(&self, user: &User, seller_id: Option<String>, draft: ProductDraft) -> AppResult<ProductView> {
        let seller_id = self.listing_seller(user, seller_id).await?;
        let mut product = Product::create(seller_id, draft);
        let events = product.take_events();
        self.store.insert_product(&product).await?;
        info!(product = %product.id, seller = %product.seller_id, "product created");
        self.events.publish(events).await;
        Ok(product.into())
    }

    #[instrument(skip(self, user, draft), fields(user = %user.uid))]
    pub async fn update(&self, user: &User, id: &str, draft: ProductDraft) -> AppResult<ProductView> {
        let product = self.mutate(id, |p| {
            Self::ensure_owner(user, p)?;
            p.apply_draft(draft.clone());
            Ok(p.clone())
        }).await?;
        Ok(bumped(product).into())
    }

    #[instrument(skip(self, user), fields(user = %user.uid))]
    pub async fn delete(&self, user: &User, id: &str) -> AppResult<()> {
        let product = self.load(id).await?;
        Self::ensure_owner(user, &product)?;
        if !self.store.delete_product(id).await? { return Err(AppError::not_found("product", id)); }
        info!(product = %id, "product deleted");
        self.events.publish(vec![DomainEvent::Product(ProductEvent::Deleted { product_id: id.to_string() })]).await;
        Ok(())
    }

    #[instrument(skip(self, user, message), fields(user = %user.uid))]
    pub async fn add_review(&self, user: &User, product_id: &str, message: String, rating: Rating) -> AppResult<Review> {
        self.mutate(product_id, |p| Ok(p.add_review(&user.uid, &user.display_name, message.clone(), rating)?.clone())).await
    }

    #[instrument(skip(self, user, message), fields(user = %user.uid))]
    pub async fn edit_review(
        &self, user: &User, product_id: &str, review_id: &str, message: Option<String>, rating: Option<Rating>,
    ) -> AppResult<Review> {
        self.mutate(product_id, |p| Ok(p.edit_review(review_id, &user.uid, message.clone(), rating)?.clone())).await
    }

    #[instrument(skip(self, user), fields(user = %user.uid))]
    pub async fn delete_review(&self, user: &User, product_id: &str, review_id: &str) -> AppResult<()> {
        self.mutate(product_id, |p| Ok(p.delete_review(review_id, &user.uid, user.is_admin())?)).await
    }

    #[instrument(skip(self, user), fields(user = %user.uid))]
    pub async fn toggle_like(&self, user: &User, product_id: &str, review_id: &str) -> AppResult<LikeOutcome> {
        let (liked, likes) = self.mutate(product_id, |p| Ok(p.toggle_like(review_id, &user.uid)?)).await?;
        Ok(LikeOutcome { liked, likes })
    }

    #[instrument(skip(self, user, message), fields(user = %user.uid))]
    pub async fn add_reply(&self, user: &User, product_id: &str, review_id: &str, message: String) -> AppResult<Reply> {
        self.mutate(product_id, |p| Ok(p.add_reply(review_id, &user.uid, &user.display_name, message.clone())?.clone())).await
    }

    /// Read, change, versioned write; retried on conflict up to [`MAX_ATTEMPTS`] times.
    async fn mutate<T, F>(&self, product_id: &str, mut change: F) -> AppResult<T>
    where
        T: Send,
        F: FnMut(&mut Product) -> AppResult<T> + Send,
    {
        let mut attempt = 1;
        loop {
            let mut product = self.load(product_id).await?;
            let outcome = change(&mut product)?;
            let events = product.take_events();
            match self.store.update_product(&product).await {
                Ok(()) => {
                    self.events.publish(events).await;
                    return Ok(outcome);
                }
                Err(StoreError::Conflict(msg)) if attempt < MAX_ATTEMPTS => {
                    warn!(product = %product_id, attempt, %msg, "product changed underneath us, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// The stored copy carries the next version after a successful write.
fn bumped(mut product: Product) -> Product {
    product.version += 1;
    product
}
