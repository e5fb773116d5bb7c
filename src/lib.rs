//! Furniture Marketplace
//!
//! Multi-seller furniture store backend.
//!
//! ## Features
//! - Product catalog with embedded reviews, likes and replies
//! - Checkout that splits an order into one sub-order per seller
//! - Cancellation, refund and return workflow with admin disputes
//! - Seller onboarding and admin dashboard
//! - Image uploads

pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod payments;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod uploads;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::router;
pub use state::AppState;
