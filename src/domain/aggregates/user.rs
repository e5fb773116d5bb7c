//! User and Seller aggregates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole { #[default] User, Admin }

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub display_name: String,
    pub email: String,
    pub role: UserRole,
    pub seller_id: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

impl User {
    pub fn register(display_name: impl Into<String>, email: &str, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            uid: Uuid::now_v7().to_string(), display_name: display_name.into(), email: normalize_email(email),
            role: UserRole::User, seller_id: None, photo_url: None, password_hash, created_at: now, updated_at: now, version: 0,
        }
    }

    pub fn is_admin(&self) -> bool { self.role == UserRole::Admin }

    pub fn update_profile(&mut self, display_name: Option<String>, photo_url: Option<String>) {
        if let Some(name) = display_name { self.display_name = name; }
        if photo_url.is_some() { self.photo_url = photo_url; }
        self.updated_at = Utc::now();
    }

    /// Copy safe to hand to clients.
    pub fn public(&self) -> User { User { password_hash: String::new(), ..self.clone() } }
}

pub fn normalize_email(email: &str) -> String { email.trim().to_lowercase() }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SellerStatus { #[default] Pending, Approved, Rejected }

impl SellerStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seller {
    pub seller_id: String,
    pub user_id: String,
    pub store_name: String,
    pub description: Option<String>,
    pub status: SellerStatus,
    pub role: SellerRoleTag,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: i64,
}

/// Always serializes as `"seller"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SellerRoleTag { #[default] Seller }

impl Seller {
    pub fn apply(user_id: impl Into<String>, store_name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            seller_id: Uuid::now_v7().to_string(), user_id: user_id.into(), store_name: store_name.into(),
            description, status: SellerStatus::Pending, role: SellerRoleTag::Seller, created_at: Utc::now(), reviewed_at: None, version: 0,
        }
    }

    pub fn is_approved(&self) -> bool { self.status == SellerStatus::Approved }

    pub fn approve(&mut self) -> Result<(), SellerError> { self.review(SellerStatus::Approved) }
    pub fn reject(&mut self) -> Result<(), SellerError> { self.review(SellerStatus::Rejected) }

    fn review(&mut self, outcome: SellerStatus) -> Result<(), SellerError> {
        if self.status != SellerStatus::Pending { return Err(SellerError::AlreadyReviewed(self.status)); }
        self.status = outcome;
        self.reviewed_at = Some(Utc::now());
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum SellerError {
    #[error("seller application already {0:?}")]
    AlreadyReviewed(SellerStatus),
}
