//! HTTP surface. One module per resource group, nested under `/api`.

mod admin;
mod auth;
mod orders;
mod products;
mod sellers;
mod total_orders;
mod upload;
mod users;

use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    routing::get,
    Json, Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::error::AppError;
use crate::state::AppState;

/// JSON request body whose rejections use the service's error shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self { AppError::BadRequest(rejection.body_text()) }
}

pub fn router(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.config.upload_dir);
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "furniture-marketplace"})) }))
        .nest("/api/auth", auth::routes())
        .nest("/api/users", users::routes())
        .nest("/api/products", products::routes())
        .nest("/api/totalOrders", total_orders::routes())
        .nest("/api/orders", orders::routes())
        .nest("/api/sellers", sellers::routes())
        .nest("/api/admin", admin::routes())
        .nest("/api/upload", upload::routes())
        .nest_service("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
