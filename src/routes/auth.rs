use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use super::JsonBody;
use crate::auth::{clear_cookie, hash_password, session_cookie, verify_password, AuthUser};
use crate::domain::aggregates::{normalize_email, User};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100))]
    pub display_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Serialize)]
struct Session { user: User, token: String }

fn signed_in(state: &AppState, status: StatusCode, user: &User) -> AppResult<impl IntoResponse> {
    let token = state.tokens.issue(user)?;
    let cookie = session_cookie(&token, state.tokens.ttl(), state.config.cookie_secure);
    Ok((status, AppendHeaders([(header::SET_COOKIE, cookie)]), Json(Session { user: user.public(), token })))
}

async fn register(State(s): State<AppState>, JsonBody(req): JsonBody<RegisterRequest>) -> AppResult<impl IntoResponse> {
    req.validate()?;
    let user = User::register(req.display_name.trim(), &req.email, hash_password(&req.password)?);
    s.store.insert_user(&user).await?;
    info!(user = %user.uid, "user registered");
    signed_in(&s, StatusCode::CREATED, &user)
}

async fn login(State(s): State<AppState>, JsonBody(req): JsonBody<LoginRequest>) -> AppResult<impl IntoResponse> {
    req.validate()?;
    let user = s.store.user_by_email(&normalize_email(&req.email)).await?;
    let user = match user {
        Some(u) if verify_password(&req.password, &u.password_hash) => u,
        _ => {
            warn!("failed login attempt");
            return Err(AppError::Unauthorized("invalid email or password".into()));
        }
    };
    info!(user = %user.uid, "user signed in");
    signed_in(&s, StatusCode::OK, &user)
}

async fn logout(State(s): State<AppState>) -> impl IntoResponse {
    (AppendHeaders([(header::SET_COOKIE, clear_cookie(s.config.cookie_secure))]), Json(serde_json::json!({"message": "signed out"})))
}

async fn me(AuthUser(user): AuthUser) -> Json<User> { Json(user.public()) }
