//! Customer side of a sub-order.

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{FromRequest, Path, Request, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use super::JsonBody;
use crate::auth::AuthUser;
use crate::domain::workflow::{Actor, Command};
use crate::error::{AppError, AppResult};
use crate::services::fulfillment::{Fulfillments, SubOrderView};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_sub_order))
        .route("/:id/cancel", post(request_cancel))
        .route("/:id/refund", post(request_refund))
        .route("/:id/return", post(request_return))
        .route("/:id/appeal", post(appeal))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReasonRequest {
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
}

impl ReasonRequest {
    pub(super) fn into_reason(self) -> AppResult<String> {
        self.validate()?;
        Ok(self.reason.trim().to_string())
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RejectRequest {
    #[validate(length(max = 1000))]
    #[serde(default)]
    pub reason: String,
}

/// Reason attached to a rejection. An absent body leaves it blank; a body that
/// is present must be a valid [`RejectRequest`].
pub(super) struct RejectReason(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequest<S> for RejectReason {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|e| AppError::BadRequest(e.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) { return Ok(Self(String::new())); }
        let Json(body) = Json::<RejectRequest>::from_bytes(&bytes)?;
        body.validate()?;
        Ok(Self(body.reason.trim().to_string()))
    }
}

async fn get_sub_order(State(s): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<String>) -> AppResult<Json<SubOrderView>> {
    let fulfillments = Fulfillments::new(&s);
    let sub = s.store.sub_order(&id).await?.ok_or_else(|| AppError::not_found("sub-order", &id))?;
    let visible = sub.user_id == user.uid || user.is_admin() || user.seller_id.as_deref() == Some(sub.seller_id.as_str());
    if !visible { return Err(AppError::Forbidden(format!("sub-order {id} is not accessible"))); }
    Ok(Json(fulfillments.view(sub)))
}

async fn customer(s: &AppState, user: &AuthUser, id: &str, command: Command) -> AppResult<Json<SubOrderView>> {
    Ok(Json(Fulfillments::new(s).transition(&user.0, id, Actor::Customer, command).await?))
}

async fn request_cancel(
    State(s): State<AppState>, user: AuthUser, Path(id): Path<String>, JsonBody(req): JsonBody<ReasonRequest>,
) -> AppResult<Json<SubOrderView>> {
    customer(&s, &user, &id, Command::RequestCancel { reason: req.into_reason()? }).await
}

async fn request_refund(
    State(s): State<AppState>, user: AuthUser, Path(id): Path<String>, JsonBody(req): JsonBody<ReasonRequest>,
) -> AppResult<Json<SubOrderView>> {
    customer(&s, &user, &id, Command::RequestRefund { reason: req.into_reason()? }).await
}

async fn request_return(
    State(s): State<AppState>, user: AuthUser, Path(id): Path<String>, JsonBody(req): JsonBody<ReasonRequest>,
) -> AppResult<Json<SubOrderView>> {
    customer(&s, &user, &id, Command::RequestReturn { reason: req.into_reason()? }).await
}

async fn appeal(
    State(s): State<AppState>, user: AuthUser, Path(id): Path<String>, JsonBody(req): JsonBody<ReasonRequest>,
) -> AppResult<Json<SubOrderView>> {
    customer(&s, &user, &id, Command::Appeal { reason: req.into_reason()? }).await
}
