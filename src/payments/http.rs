use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{PaymentError, PaymentGateway, RefundReceipt, RefundRequest};
use crate::domain::aggregates::PaymentMethod;

const STRIPE_API: &str = "https://api.stripe.com";
const DEFAULT_PAYPAL_API: &str = "https://api-m.sandbox.paypal.com";

#[derive(Clone, Debug)]
pub struct PaypalCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: Option<String>,
}

/// Stripe and PayPal refund client.
pub struct HttpGateway {
    client: Client,
    stripe_secret: Option<String>,
    paypal: Option<PaypalCredentials>,
}

#[derive(Deserialize)]
struct ProviderRefund { id: String, status: String }

#[derive(Deserialize)]
struct PaypalToken { access_token: String }

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self { PaymentError::Transport(e.to_string()) }
}

impl HttpGateway {
    pub fn new(stripe_secret: Option<String>, paypal: Option<PaypalCredentials>) -> Result<Self, PaymentError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self { client, stripe_secret, paypal })
    }

    fn stripe_refund_request(&self, secret: &str, request: &RefundRequest) -> RequestBuilder {
        self.client
            .post(format!("{STRIPE_API}/v1/refunds"))
            .bearer_auth(secret)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&[("payment_intent", request.payment_reference.clone()), ("amount", request.amount_minor.to_string())])
    }

    async fn stripe_refund(&self, request: &RefundRequest) -> Result<RefundReceipt, PaymentError> {
        let secret = self.stripe_secret.as_deref().ok_or(PaymentError::NotConfigured("stripe"))?;
        let response = self.stripe_refund_request(secret, request).send().await?;
        let refund: ProviderRefund = accepted(response).await?.json().await?;
        Ok(RefundReceipt { reference: refund.id, status: refund.status })
    }

    async fn paypal_refund(&self, request: &RefundRequest) -> Result<RefundReceipt, PaymentError> {
        let creds = self.paypal.as_ref().ok_or(PaymentError::NotConfigured("paypal"))?;
        let base = creds.base_url.as_deref().unwrap_or(DEFAULT_PAYPAL_API).trim_end_matches('/');

        let token = self.client
            .post(format!("{base}/v1/oauth2/token"))
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let token: PaypalToken = accepted(token).await?.json().await?;

        let amount = Decimal::new(request.amount_minor, 2);
        let response = self.client
            .post(format!("{base}/v2/payments/captures/{}/refund", request.payment_reference))
            .bearer_auth(&token.access_token)
            .header("PayPal-Request-Id", &request.idempotency_key)
            .json(&serde_json::json!({ "amount": { "value": amount.to_string(), "currency_code": request.currency } }))
            .send()
            .await?;
        let refund: ProviderRefund = accepted(response).await?.json().await?;
        Ok(RefundReceipt { reference: refund.id, status: refund.status })
    }
}

async fn accepted(response: Response) -> Result<Response, PaymentError> {
    let status = response.status();
    if status.is_success() { return Ok(response); }
    let body = response.text().await.unwrap_or_default();
    warn!(%status, "payment provider refused request");
    Err(PaymentError::Rejected(format!("{status}: {body}")))
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    #[instrument(skip(self, request), fields(provider = request.provider.as_str(), key = %request.idempotency_key))]
    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, PaymentError> {
        let receipt = match request.provider {
            PaymentMethod::Stripe => self.stripe_refund(request).await?,
            PaymentMethod::Paypal => self.paypal_refund(request).await?,
            PaymentMethod::Cash => return Err(PaymentError::NotConfigured("cash")),
        };
        info!(reference = %receipt.reference, status = %receipt.status, "refund issued");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stripe_refund_is_form_encoded() {
        let gateway = HttpGateway::new(Some("sk_test".into()), None).unwrap();
        let request = RefundRequest {
            provider: PaymentMethod::Stripe,
            payment_reference: "pi_1&amount=1".into(),
            amount_minor: 40_000,
            currency: "USD".into(),
            idempotency_key: "refund-s1".into(),
        };
        let built = gateway.stripe_refund_request("sk_test", &request).build().unwrap();
        assert_eq!(
            built.headers()[reqwest::header::CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
        assert_eq!(built.headers()["Idempotency-Key"], "refund-s1");
        let body = built.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, b"payment_intent=pi_1%26amount%3D1&amount=40000");
    }
}
