use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

use super::JsonBody;
use crate::auth::AuthUser;
use crate::domain::aggregates::{ProductDraft, Reply, Review};
use crate::domain::value_objects::{Money, Rating, DEFAULT_CURRENCY};
use crate::error::{AppError, AppResult};
use crate::services::catalog::{Catalog, LikeOutcome, ProductView};
use crate::state::AppState;
use crate::store::ProductFilter;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/:id", get(get_product).put(update_product).delete(delete_product))
        .route("/:id/reviews", post(add_review))
        .route("/:id/reviews/:review_id", put(edit_review).delete(delete_review))
        .route("/:id/reviews/:review_id/like", post(toggle_like))
        .route("/:id/reviews/:review_id/replies", post(add_reply))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub category: Option<String>,
    pub seller_id: Option<String>,
    pub search: Option<String>,
}

impl From<ListParams> for ProductFilter {
    fn from(p: ListParams) -> Self {
        let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        ProductFilter { category: non_empty(p.category), seller_id: non_empty(p.seller_id), search: non_empty(p.search) }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub product_name: String,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    pub count_in_stock: u32,
    #[serde(default)]
    pub images: Vec<String>,
    /// Only honoured for admins listing on behalf of a seller.
    pub seller_id: Option<String>,
}

impl ProductRequest {
    fn into_draft(self) -> AppResult<(ProductDraft, Option<String>)> {
        self.validate()?;
        if self.price <= Decimal::ZERO { return Err(AppError::BadRequest("price must be positive".into())); }
        let draft = ProductDraft {
            product_name: self.product_name.trim().to_string(),
            description: self.description,
            price: Money::new(self.price, DEFAULT_CURRENCY),
            category: self.category.trim().to_string(),
            count_in_stock: self.count_in_stock,
            images: self.images,
        };
        Ok((draft, self.seller_id))
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewRequest {
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
    pub rating: u8,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewEdit {
    #[validate(length(min = 1, max = 2000))]
    pub message: Option<String>,
    pub rating: Option<u8>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReplyRequest {
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
}

async fn list_products(State(s): State<AppState>, Query(p): Query<ListParams>) -> AppResult<Json<Vec<ProductView>>> {
    Ok(Json(Catalog::new(&s).list(&p.into()).await?))
}

async fn get_product(State(s): State<AppState>, Path(id): Path<String>) -> AppResult<Json<ProductView>> {
    Ok(Json(Catalog::new(&s).get(&id).await?))
}

async fn create_product(
    State(s): State<AppState>, AuthUser(user): AuthUser, JsonBody(req): JsonBody<ProductRequest>,
) -> AppResult<(StatusCode, Json<ProductView>)> {
    let (draft, seller_id) = req.into_draft()?;
    Ok((StatusCode::CREATED, Json(Catalog::new(&s).create(&user, seller_id, draft).await?)))
}

async fn update_product(
    State(s): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<String>, JsonBody(req): JsonBody<ProductRequest>,
) -> AppResult<Json<ProductView>> {
    let (draft, _) = req.into_draft()?;
    Ok(Json(Catalog::new(&s).update(&user, &id, draft).await?))
}

async fn delete_product(State(s): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<String>) -> AppResult<StatusCode> {
    Catalog::new(&s).delete(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_review(
    State(s): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<String>, JsonBody(req): JsonBody<ReviewRequest>,
) -> AppResult<(StatusCode, Json<Review>)> {
    req.validate()?;
    let rating = Rating::new(req.rating)?;
    Ok((StatusCode::CREATED, Json(Catalog::new(&s).add_review(&user, &id, req.message, rating).await?)))
}

async fn edit_review(
    State(s): State<AppState>, AuthUser(user): AuthUser, Path((id, review_id)): Path<(String, String)>,
    JsonBody(req): JsonBody<ReviewEdit>,
) -> AppResult<Json<Review>> {
    req.validate()?;
    let rating = req.rating.map(Rating::new).transpose()?;
    Ok(Json(Catalog::new(&s).edit_review(&user, &id, &review_id, req.message, rating).await?))
}

async fn delete_review(
    State(s): State<AppState>, AuthUser(user): AuthUser, Path((id, review_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    Catalog::new(&s).delete_review(&user, &id, &review_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_like(
    State(s): State<AppState>, AuthUser(user): AuthUser, Path((id, review_id)): Path<(String, String)>,
) -> AppResult<Json<LikeOutcome>> {
    Ok(Json(Catalog::new(&s).toggle_like(&user, &id, &review_id).await?))
}

async fn add_reply(
    State(s): State<AppState>, AuthUser(user): AuthUser, Path((id, review_id)): Path<(String, String)>,
    JsonBody(req): JsonBody<ReplyRequest>,
) -> AppResult<(StatusCode, Json<Reply>)> {
    req.validate()?;
    Ok((StatusCode::CREATED, Json(Catalog::new(&s).add_reply(&user, &id, &review_id, req.message).await?)))
}
