//! Password hashing, session tokens and the authenticated-user extractor.
//!
//! A token is `hex(claims_json).hex(hmac_sha256(claims_json))`. It is read from
//! `Authorization: Bearer` first and the `token` cookie second.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::domain::aggregates::{User, UserRole};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const TOKEN_COOKIE: &str = "token";

type HmacSha256 = Hmac<Sha256>;

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: UserRole,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self { Self { secret: secret.as_bytes().to_vec(), ttl } }

    pub fn ttl(&self) -> Duration { self.ttl }

    fn mac(&self) -> AppResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| AppError::Internal(e.to_string()))
    }

    pub fn issue(&self, user: &User) -> AppResult<String> {
        let exp = Utc::now().checked_add_signed(self.ttl)
            .ok_or_else(|| AppError::Internal("token lifetime overflows the clock".into()))?;
        let claims = Claims { sub: user.uid.clone(), role: user.role, exp: exp.timestamp() };
        let payload = serde_json::to_vec(&claims).map_err(|e| AppError::Internal(e.to_string()))?;
        let mut mac = self.mac()?;
        mac.update(&payload);
        Ok(format!("{}.{}", hex::encode(&payload), hex::encode(mac.finalize().into_bytes())))
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        let invalid = || AppError::Unauthorized("invalid token".into());
        let (payload, signature) = token.split_once('.').ok_or_else(invalid)?;
        let payload = hex::decode(payload).map_err(|_| invalid())?;
        let signature = hex::decode(signature).map_err(|_| invalid())?;
        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&signature).map_err(|_| invalid())?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| invalid())?;
        if claims.exp < Utc::now().timestamp() {
            return Err(AppError::Unauthorized("token expired".into()));
        }
        Ok(claims)
    }
}

pub fn session_cookie(token: &str, ttl: Duration, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!("{TOKEN_COOKIE}={token}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}{secure}", ttl.num_seconds())
}

pub fn clear_cookie(secure: bool) -> String { session_cookie("", Duration::zero(), secure) }

fn token_from_parts(parts: &Parts) -> Option<String> {
    let bearer = parts.headers.get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    if bearer.is_some() { return bearer; }
    parts.headers.get_all(header::COOKIE).iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// The caller, loaded fresh from the store on every request.
#[derive(Clone, Debug)]
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts).ok_or_else(|| AppError::Unauthorized("authentication required".into()))?;
        let claims = state.tokens.verify(&token)?;
        let user = state.store.user(&claims.sub).await?
            .ok_or_else(|| AppError::Unauthorized("account no longer exists".into()))?;
        Ok(AuthUser(user))
    }
}

/// An authenticated admin; anyone else gets 403.
#[derive(Clone, Debug)]
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::Forbidden("admin only".into()));
        }
        Ok(AdminUser(user))
    }
}
