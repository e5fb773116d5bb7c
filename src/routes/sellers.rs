use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use super::orders::RejectReason;
use super::JsonBody;
use crate::auth::AuthUser;
use crate::domain::aggregates::{Fulfillment, Seller};
use crate::domain::workflow::{Actor, Command};
use crate::error::{AppError, AppResult};
use crate::services::fulfillment::{Fulfillments, SubOrderView};
use crate::services::sellers::Sellers;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/apply", post(apply))
        .route("/me", get(my_profile))
        .route("/me/orders", get(my_orders))
        .route("/me/orders/:id/fulfillment", put(advance_fulfillment))
        .route("/me/orders/:id/cancel/approve", post(approve_cancel))
        .route("/me/orders/:id/cancel/reject", post(reject_cancel))
        .route("/me/orders/:id/refund/approve", post(approve_refund))
        .route("/me/orders/:id/refund/reject", post(reject_refund))
        .route("/me/orders/:id/return/confirm", post(confirm_return))
        .route("/me/orders/:id/return/receive", post(receive_return))
        .route("/:id", get(get_seller))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    #[validate(length(min = 2, max = 100))]
    pub store_name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FulfillmentRequest {
    pub status: String,
}

async fn apply(
    State(s): State<AppState>, AuthUser(user): AuthUser, JsonBody(req): JsonBody<ApplyRequest>,
) -> AppResult<(StatusCode, Json<Seller>)> {
    req.validate()?;
    Ok((StatusCode::CREATED, Json(Sellers::new(&s).apply(&user, req.store_name.trim(), req.description).await?)))
}

async fn my_profile(State(s): State<AppState>, AuthUser(user): AuthUser) -> AppResult<Json<Seller>> {
    Ok(Json(Sellers::new(&s).for_user(&user).await?))
}

async fn get_seller(State(s): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Seller>> {
    Ok(Json(Sellers::new(&s).get(&id).await?))
}

async fn my_orders(State(s): State<AppState>, AuthUser(user): AuthUser) -> AppResult<Json<Vec<SubOrderView>>> {
    let seller = Sellers::new(&s).approved_for(&user).await?;
    Ok(Json(Fulfillments::new(&s).list_for_seller(&seller.seller_id).await?))
}

async fn advance_fulfillment(
    State(s): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<String>, JsonBody(req): JsonBody<FulfillmentRequest>,
) -> AppResult<Json<SubOrderView>> {
    let next = Fulfillment::parse(&req.status)
        .ok_or_else(|| AppError::BadRequest(format!("unknown fulfillment status {}", req.status)))?;
    Ok(Json(Fulfillments::new(&s).advance(&user, &id, next).await?))
}

async fn seller(s: &AppState, user: &AuthUser, id: &str, command: Command) -> AppResult<Json<SubOrderView>> {
    Ok(Json(Fulfillments::new(s).transition(&user.0, id, Actor::Seller, command).await?))
}

async fn approve_cancel(State(s): State<AppState>, user: AuthUser, Path(id): Path<String>) -> AppResult<Json<SubOrderView>> {
    seller(&s, &user, &id, Command::ApproveCancel).await
}

async fn reject_cancel(
    State(s): State<AppState>, user: AuthUser, Path(id): Path<String>, RejectReason(reason): RejectReason,
) -> AppResult<Json<SubOrderView>> {
    seller(&s, &user, &id, Command::RejectCancel { reason }).await
}

async fn approve_refund(State(s): State<AppState>, user: AuthUser, Path(id): Path<String>) -> AppResult<Json<SubOrderView>> {
    seller(&s, &user, &id, Command::ApproveRefund).await
}

async fn reject_refund(
    State(s): State<AppState>, user: AuthUser, Path(id): Path<String>, RejectReason(reason): RejectReason,
) -> AppResult<Json<SubOrderView>> {
    seller(&s, &user, &id, Command::RejectRefund { reason }).await
}

async fn confirm_return(State(s): State<AppState>, user: AuthUser, Path(id): Path<String>) -> AppResult<Json<SubOrderView>> {
    seller(&s, &user, &id, Command::ConfirmReturn).await
}

async fn receive_return(State(s): State<AppState>, user: AuthUser, Path(id): Path<String>) -> AppResult<Json<SubOrderView>> {
    seller(&s, &user, &id, Command::ReceiveReturn).await
}
