use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::JsonBody;
use crate::auth::{AdminUser, AuthUser};
use crate::domain::aggregates::{BillingInfo, PaymentMethod, PaymentResult, TotalOrder};
use crate::error::AppResult;
use crate::services::checkout::{Checkout, OrderLine};
use crate::services::fulfillment::{Fulfillments, SubOrderView};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(place_order))
        .route("/mine", get(my_orders))
        .route("/:id", get(get_order))
        .route("/:id/pay", put(pay_order))
        .route("/:id/subOrders", get(sub_orders))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LineRequest {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BillingRequest {
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 500))]
    pub address: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[serde(default)]
    pub postal_code: String,
    #[validate(length(min = 1, max = 100))]
    pub country: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    #[validate]
    pub items: Vec<LineRequest>,
    #[validate]
    pub billing_info: BillingRequest,
    pub payment_method: PaymentMethod,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    #[serde(flatten)]
    pub order: TotalOrder,
    pub sub_orders: Vec<SubOrderView>,
}

impl From<BillingRequest> for BillingInfo {
    fn from(b: BillingRequest) -> Self {
        BillingInfo {
            full_name: b.full_name, email: b.email, phone: b.phone, address: b.address, city: b.city,
            postal_code: b.postal_code, country: b.country,
        }
    }
}

async fn place_order(
    State(s): State<AppState>, AuthUser(user): AuthUser, JsonBody(req): JsonBody<PlaceOrderRequest>,
) -> AppResult<(StatusCode, Json<PlacedOrder>)> {
    req.validate()?;
    let lines: Vec<OrderLine> = req.items.into_iter()
        .map(|l| OrderLine { product_id: l.product_id, quantity: l.quantity })
        .collect();
    let (order, subs) = Checkout::new(&s).place(&user, &lines, req.billing_info.into(), req.payment_method).await?;
    let fulfillments = Fulfillments::new(&s);
    let sub_orders = subs.into_iter().map(|sub| fulfillments.view(sub)).collect();
    Ok((StatusCode::CREATED, Json(PlacedOrder { order, sub_orders })))
}

async fn list_orders(State(s): State<AppState>, _admin: AdminUser) -> AppResult<Json<Vec<TotalOrder>>> {
    Ok(Json(Checkout::new(&s).list_all().await?))
}

async fn my_orders(State(s): State<AppState>, AuthUser(user): AuthUser) -> AppResult<Json<Vec<TotalOrder>>> {
    Ok(Json(Checkout::new(&s).list_for(&user).await?))
}

async fn get_order(State(s): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<String>) -> AppResult<Json<TotalOrder>> {
    Ok(Json(Checkout::new(&s).total_order(&user, &id).await?))
}

async fn pay_order(
    State(s): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<String>, JsonBody(result): JsonBody<PaymentResult>,
) -> AppResult<Json<TotalOrder>> {
    Ok(Json(Checkout::new(&s).mark_paid(&user, &id, result).await?))
}

async fn sub_orders(State(s): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<String>) -> AppResult<Json<Vec<SubOrderView>>> {
    let subs = Checkout::new(&s).sub_orders(&user, &id).await?;
    let fulfillments = Fulfillments::new(&s);
    Ok(Json(subs.into_iter().map(|sub| fulfillments.view(sub)).collect()))
}
