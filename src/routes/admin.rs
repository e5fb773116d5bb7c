use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use super::orders::RejectReason;
use super::JsonBody;
use crate::auth::AdminUser;
use crate::domain::aggregates::{Seller, SellerStatus};
use crate::domain::workflow::{Actor, Command, Resolution};
use crate::error::{AppError, AppResult};
use crate::services::fulfillment::{Dispute, Fulfillments, SubOrderView};
use crate::services::sellers::Sellers;
use crate::services::{dashboard_stats, DashboardStats};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sellers", get(list_sellers))
        .route("/sellers/:id/approve", put(approve_seller))
        .route("/sellers/:id/reject", put(reject_seller))
        .route("/orders/:id/cancel/approve", post(approve_cancel))
        .route("/orders/:id/cancel/reject", post(reject_cancel))
        .route("/disputes", get(list_disputes))
        .route("/disputes/:id/resolve", post(resolve_dispute))
        .route("/stats", get(stats))
}

#[derive(Debug, Deserialize)]
pub struct SellerQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveRequest {
    pub decision: Resolution,
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub note: String,
}

async fn list_sellers(State(s): State<AppState>, _admin: AdminUser, Query(q): Query<SellerQuery>) -> AppResult<Json<Vec<Seller>>> {
    let status = match q.status.as_deref().filter(|v| !v.is_empty()) {
        None => None,
        Some(raw) => Some(SellerStatus::parse(raw).ok_or_else(|| AppError::BadRequest(format!("unknown seller status {raw}")))?),
    };
    Ok(Json(Sellers::new(&s).list(status).await?))
}

async fn approve_seller(State(s): State<AppState>, _admin: AdminUser, Path(id): Path<String>) -> AppResult<Json<Seller>> {
    Ok(Json(Sellers::new(&s).review(&id, true).await?))
}

async fn reject_seller(State(s): State<AppState>, _admin: AdminUser, Path(id): Path<String>) -> AppResult<Json<Seller>> {
    Ok(Json(Sellers::new(&s).review(&id, false).await?))
}

async fn approve_cancel(
    State(s): State<AppState>, AdminUser(admin): AdminUser, Path(id): Path<String>,
) -> AppResult<Json<SubOrderView>> {
    Ok(Json(Fulfillments::new(&s).transition(&admin, &id, Actor::Admin, Command::ApproveCancel).await?))
}

async fn reject_cancel(
    State(s): State<AppState>, AdminUser(admin): AdminUser, Path(id): Path<String>, RejectReason(reason): RejectReason,
) -> AppResult<Json<SubOrderView>> {
    Ok(Json(Fulfillments::new(&s).transition(&admin, &id, Actor::Admin, Command::RejectCancel { reason }).await?))
}

async fn list_disputes(State(s): State<AppState>, _admin: AdminUser) -> AppResult<Json<Vec<Dispute>>> {
    Ok(Json(Fulfillments::new(&s).disputes().await?))
}

async fn resolve_dispute(
    State(s): State<AppState>, AdminUser(admin): AdminUser, Path(id): Path<String>, JsonBody(req): JsonBody<ResolveRequest>,
) -> AppResult<Json<SubOrderView>> {
    req.validate()?;
    let command = Command::AdminResolve { decision: req.decision, note: req.note.trim().to_string() };
    Ok(Json(Fulfillments::new(&s).transition(&admin, &id, Actor::Admin, command).await?))
}

async fn stats(State(s): State<AppState>, _admin: AdminUser) -> AppResult<Json<DashboardStats>> {
    Ok(Json(dashboard_stats(s.store.as_ref()).await?))
}
