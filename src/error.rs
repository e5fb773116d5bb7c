use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::domain::aggregates::{CartError, OrderError, ProductError, SellerError};
use crate::domain::value_objects::{MoneyError, RatingError};
use crate::domain::workflow::TransitionError;
use crate::payments::PaymentError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    InvalidTransition(String),
    #[error(transparent)]
    Validation(#[from] validator::ValidationErrors),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PaymentGateway(String),
    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn not_found(what: &str, id: &str) -> Self { Self::NotFound(format!("{what} {id} not found")) }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidTransition(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::Validation(_) => "validation_failed",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::PaymentGateway(_) => "payment_gateway",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(detail) => {
                error!(%detail, "internal error");
                "internal server error".to_string()
            }
            other => {
                warn!(status = status.as_u16(), code = other.code(), "{other}");
                other.to_string()
            }
        };
        (status, Json(json!({ "message": message, "code": self.code() }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Backend(msg) => Self::Internal(msg),
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::NotPermitted { .. } => Self::Forbidden(e.to_string()),
            TransitionError::InvalidTransition { .. } | TransitionError::AppealClosed => Self::InvalidTransition(e.to_string()),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::Transition(t) => t.into(),
            OrderError::AlreadyAdjusted(_) | OrderError::AlreadyPaid => Self::Conflict(e.to_string()),
            _ => Self::BadRequest(e.to_string()),
        }
    }
}

impl From<ProductError> for AppError {
    fn from(e: ProductError) -> Self {
        match e {
            ProductError::ReviewNotFound => Self::NotFound(e.to_string()),
            ProductError::AlreadyReviewed => Self::Conflict(e.to_string()),
            ProductError::NotAuthor => Self::Forbidden(e.to_string()),
            ProductError::InsufficientStock { .. } => Self::BadRequest(e.to_string()),
        }
    }
}

impl From<CartError> for AppError {
    fn from(e: CartError) -> Self { Self::BadRequest(e.to_string()) }
}

impl From<SellerError> for AppError {
    fn from(e: SellerError) -> Self { Self::Conflict(e.to_string()) }
}

impl From<MoneyError> for AppError {
    fn from(e: MoneyError) -> Self { Self::BadRequest(e.to_string()) }
}

impl From<RatingError> for AppError {
    fn from(e: RatingError) -> Self { Self::BadRequest(e.to_string()) }
}

impl From<PaymentError> for AppError {
    fn from(e: PaymentError) -> Self { Self::PaymentGateway(e.to_string()) }
}
