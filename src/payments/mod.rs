//! Refunds through an external payment provider.

mod http;

pub use http::{HttpGateway, PaypalCredentials};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use thiserror::Error;

use crate::domain::aggregates::PaymentMethod;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub provider: PaymentMethod,
    /// Stripe payment intent or PayPal capture id.
    pub payment_reference: String,
    pub amount_minor: i64,
    pub currency: String,
    pub idempotency_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundReceipt {
    pub reference: String,
    pub status: String,
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0} refunds are not configured")]
    NotConfigured(&'static str),
    #[error("payment provider rejected the refund: {0}")]
    Rejected(String),
    #[error("payment provider unreachable: {0}")]
    Transport(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, PaymentError>;
}

/// Accepts every refund and keeps the requests. Repeated idempotency keys
/// return the first receipt without recording a second call.
#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<RefundRequest>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingGateway {
    pub fn new() -> Self { Self::default() }

    /// Makes subsequent refunds fail with `Rejected(message)`.
    pub fn fail_with(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.fail_with.lock() { *slot = Some(message.into()); }
    }

    pub fn calls(&self) -> Vec<RefundRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, PaymentError> {
        if let Some(message) = self.fail_with.lock().ok().and_then(|f| f.clone()) {
            return Err(PaymentError::Rejected(message));
        }
        let mut calls = self.calls.lock().map_err(|e| PaymentError::Transport(e.to_string()))?;
        if !calls.iter().any(|c| c.idempotency_key == request.idempotency_key) {
            calls.push(request.clone());
        }
        Ok(RefundReceipt { reference: format!("rec_{}", request.idempotency_key), status: "succeeded".into() })
    }
}
