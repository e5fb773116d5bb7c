use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use super::JsonBody;
use crate::auth::{AdminUser, AuthUser};
use crate::domain::aggregates::User;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    #[validate(length(min = 1, max = 100))]
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    #[validate(url)]
    pub photo_url: Option<String>,
}

async fn list_users(State(s): State<AppState>, _admin: AdminUser) -> AppResult<Json<Vec<User>>> {
    Ok(Json(s.store.users().await?.iter().map(User::public).collect()))
}

async fn get_user(State(s): State<AppState>, AuthUser(caller): AuthUser, Path(id): Path<String>) -> AppResult<Json<User>> {
    if caller.uid != id && !caller.is_admin() { return Err(AppError::Forbidden("not your account".into())); }
    let user = s.store.user(&id).await?.ok_or_else(|| AppError::not_found("user", &id))?;
    Ok(Json(user.public()))
}

async fn update_user(
    State(s): State<AppState>, AuthUser(mut caller): AuthUser, Path(id): Path<String>, JsonBody(req): JsonBody<UpdateUser>,
) -> AppResult<Json<User>> {
    if caller.uid != id { return Err(AppError::Forbidden("users can only edit their own profile".into())); }
    req.validate()?;
    caller.update_profile(req.display_name, req.photo_url);
    s.store.update_user(&caller).await?;
    caller.version += 1;
    Ok(Json(caller.public()))
}

async fn delete_user(State(s): State<AppState>, AdminUser(admin): AdminUser, Path(id): Path<String>) -> AppResult<StatusCode> {
    if admin.uid == id { return Err(AppError::BadRequest("admins cannot delete themselves".into())); }
    if !s.store.delete_user(&id).await? { return Err(AppError::not_found("user", &id)); }
    info!(user = %id, by = %admin.uid, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
