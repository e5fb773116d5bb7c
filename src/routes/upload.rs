use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::uploads::{self, MAX_UPLOAD_BYTES};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(upload))
        // room for multipart framing around a maximum-size file
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024))
}

async fn upload(State(s): State<AppState>, _user: AuthUser, mut multipart: Multipart) -> AppResult<(StatusCode, Json<Value>)> {
    let bad = |e: axum::extract::multipart::MultipartError| AppError::BadRequest(e.body_text());
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        if field.name() != Some("file") { continue; }
        let content_type = field.content_type().unwrap_or_default().to_string();
        uploads::extension_for(&content_type)?;
        let bytes = field.bytes().await.map_err(bad)?;
        let name = uploads::store(&s.config.upload_dir, &content_type, &bytes).await?;
        return Ok((StatusCode::CREATED, Json(json!({ "url": s.config.upload_url(&name) }))));
    }
    Err(AppError::BadRequest("multipart field `file` is required".into()))
}
