//! Product Aggregate
//!
//! Reviews are embedded in the product document. Every review edit rewrites
//! the whole product, so writers must go through a versioned update.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::events::{DomainEvent, ProductEvent};
use crate::domain::value_objects::{Money, Rating};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub product_name: String,
    pub description: String,
    pub price: Money,
    pub category: String,
    pub seller_id: String,
    pub count_in_stock: u32,
    pub images: Vec<String>,
    pub reviews: Vec<Review>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub message: String,
    pub rating: Rating,
    pub likes: Vec<String>,
    pub replies: Vec<Reply>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply { pub id: String, pub user_id: String, pub user_name: String, pub message: String, pub created_at: DateTime<Utc> }

/// Fields a seller may set on create/update.
#[derive(Clone, Debug)]
pub struct ProductDraft {
    pub product_name: String,
    pub description: String,
    pub price: Money,
    pub category: String,
    pub count_in_stock: u32,
    pub images: Vec<String>,
}

impl Product {
    pub fn create(seller_id: impl Into<String>, draft: ProductDraft) -> Self {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now();
        let seller_id = seller_id.into();
        let mut product = Self {
            id: id.clone(), product_name: draft.product_name, description: draft.description, price: draft.price,
            category: draft.category, seller_id: seller_id.clone(), count_in_stock: draft.count_in_stock,
            images: draft.images, reviews: vec![], version: 0, created_at: now, updated_at: now, events: vec![],
        };
        product.raise_event(DomainEvent::Product(ProductEvent::Created { product_id: id, seller_id }));
        product
    }

    pub fn apply_draft(&mut self, draft: ProductDraft) {
        self.product_name = draft.product_name;
        self.description = draft.description;
        self.price = draft.price;
        self.category = draft.category;
        self.count_in_stock = draft.count_in_stock;
        self.images = draft.images;
        self.touch();
    }

    pub fn is_in_stock(&self) -> bool { self.count_in_stock > 0 }

    pub fn remove_stock(&mut self, qty: u32) -> Result<(), ProductError> {
        if qty > self.count_in_stock {
            return Err(ProductError::InsufficientStock { product_id: self.id.clone(), available: self.count_in_stock });
        }
        self.count_in_stock -= qty;
        if self.count_in_stock == 0 {
            self.raise_event(DomainEvent::Product(ProductEvent::StockDepleted { product_id: self.id.clone() }));
        }
        self.touch();
        Ok(())
    }

    /// Mean review rating, zero when unreviewed.
    pub fn average_rating(&self) -> Decimal {
        if self.reviews.is_empty() { return Decimal::ZERO; }
        let sum: u32 = self.reviews.iter().map(|r| u32::from(r.rating.value())).sum();
        (Decimal::from(sum) / Decimal::from(self.reviews.len() as u32)).round_dp(1)
    }

    pub fn add_review(&mut self, user_id: &str, user_name: &str, message: String, rating: Rating) -> Result<&Review, ProductError> {
        if self.reviews.iter().any(|r| r.user_id == user_id) { return Err(ProductError::AlreadyReviewed); }
        let review = Review {
            id: Uuid::now_v7().to_string(), user_id: user_id.to_string(), user_name: user_name.to_string(),
            message, rating, likes: vec![], replies: vec![], created_at: Utc::now(), updated_at: None,
        };
        self.raise_event(DomainEvent::Product(ProductEvent::Reviewed {
            product_id: self.id.clone(), review_id: review.id.clone(), rating: rating.value(),
        }));
        let idx = self.reviews.len();
        self.reviews.push(review);
        self.touch();
        Ok(&self.reviews[idx])
    }

    pub fn edit_review(&mut self, review_id: &str, user_id: &str, message: Option<String>, rating: Option<Rating>) -> Result<&Review, ProductError> {
        let review = self.reviews.iter_mut().find(|r| r.id == review_id).ok_or(ProductError::ReviewNotFound)?;
        if review.user_id != user_id { return Err(ProductError::NotAuthor); }
        if let Some(m) = message { review.message = m; }
        if let Some(r) = rating { review.rating = r; }
        review.updated_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self.review(review_id)
    }

    /// Authors may delete their own review; moderators any review.
    pub fn delete_review(&mut self, review_id: &str, user_id: &str, moderator: bool) -> Result<(), ProductError> {
        let review = self.review(review_id)?;
        if !moderator && review.user_id != user_id { return Err(ProductError::NotAuthor); }
        self.reviews.retain(|r| r.id != review_id);
        self.touch();
        Ok(())
    }

    /// Adds `user_id` to the likes if absent, removes it otherwise. Returns whether it is now liked.
    pub fn toggle_like(&mut self, review_id: &str, user_id: &str) -> Result<(bool, usize), ProductError> {
        let review = self.reviews.iter_mut().find(|r| r.id == review_id).ok_or(ProductError::ReviewNotFound)?;
        let liked = match review.likes.iter().position(|u| u == user_id) {
            Some(idx) => { review.likes.remove(idx); false }
            None => { review.likes.push(user_id.to_string()); true }
        };
        let count = review.likes.len();
        self.touch();
        Ok((liked, count))
    }

    pub fn add_reply(&mut self, review_id: &str, user_id: &str, user_name: &str, message: String) -> Result<&Reply, ProductError> {
        let review = self.reviews.iter_mut().find(|r| r.id == review_id).ok_or(ProductError::ReviewNotFound)?;
        let idx = review.replies.len();
        review.replies.push(Reply {
            id: Uuid::now_v7().to_string(), user_id: user_id.to_string(), user_name: user_name.to_string(),
            message, created_at: Utc::now(),
        });
        self.updated_at = Utc::now();
        Ok(&review.replies[idx])
    }

    pub fn review(&self, review_id: &str) -> Result<&Review, ProductError> {
        self.reviews.iter().find(|r| r.id == review_id).ok_or(ProductError::ReviewNotFound)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("review not found")]
    ReviewNotFound,
    #[error("user has already reviewed this product")]
    AlreadyReviewed,
    #[error("only the author may change this review")]
    NotAuthor,
    #[error("insufficient stock for product {product_id}: {available} available")]
    InsufficientStock { product_id: String, available: u32 },
}
