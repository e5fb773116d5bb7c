use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use std::{env, fmt::Display, ops::RangeInclusive, path::PathBuf, str::FromStr};
use tracing::{info, warn};

use crate::domain::aggregates::PricingPolicy;
use crate::domain::workflow::dispute::DisputePolicy;
use crate::payments::PaypalCredentials;

/// Upper bound for every hour-based setting: one year.
const MAX_HOURS: i64 = 24 * 365;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub token_secret: String,
    pub token_ttl: Duration,
    pub cookie_secure: bool,
    pub stripe_secret_key: Option<String>,
    pub paypal: Option<PaypalCredentials>,
    pub upload_dir: PathBuf,
    pub public_base_url: String,
    pub dispute: DisputePolicy,
    pub pricing: PricingPolicy,
    pub bootstrap_admin: Option<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8083,
            database_url: None,
            database_max_connections: 10,
            nats_url: None,
            token_secret: uuid::Uuid::new_v4().simple().to_string(),
            token_ttl: Duration::hours(24),
            cookie_secure: false,
            stripe_secret_key: None,
            paypal: None,
            upload_dir: PathBuf::from("uploads"),
            public_base_url: "http://localhost:8083".into(),
            dispute: DisputePolicy::default(),
            pricing: PricingPolicy::default(),
            bootstrap_admin: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let port: u16 = try_load("PORT", defaults.port)?;

        let token_secret = match optional("TOKEN_SECRET") {
            Some(secret) => secret,
            None => {
                warn!("TOKEN_SECRET not set, using a random secret; sessions will not survive a restart");
                defaults.token_secret
            }
        };

        let paypal = match (optional("PAYPAL_CLIENT_ID"), optional("PAYPAL_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => {
                Some(PaypalCredentials { client_id, client_secret, base_url: optional("PAYPAL_BASE_URL") })
            }
            (None, None) => None,
            _ => return Err(anyhow!("PAYPAL_CLIENT_ID and PAYPAL_CLIENT_SECRET must be set together")),
        };

        let bootstrap_admin = match (optional("BOOTSTRAP_ADMIN_EMAIL"), optional("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some((email, password)),
            (Some(_), None) => {
                warn!("BOOTSTRAP_ADMIN_EMAIL set without BOOTSTRAP_ADMIN_PASSWORD, skipping admin bootstrap");
                None
            }
            _ => None,
        };

        let config = Self {
            port,
            database_url: optional("DATABASE_URL"),
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", defaults.database_max_connections)?,
            nats_url: optional("NATS_URL"),
            token_secret,
            token_ttl: hours_within("TOKEN_TTL_HOURS", try_load("TOKEN_TTL_HOURS", 24i64)?, 1..=MAX_HOURS)?,
            cookie_secure: try_load("COOKIE_SECURE", false)?,
            stripe_secret_key: optional("STRIPE_SECRET_KEY"),
            paypal,
            upload_dir: PathBuf::from(try_load("UPLOAD_DIR", String::from("uploads"))?),
            public_base_url: try_load("PUBLIC_BASE_URL", format!("http://localhost:{port}"))?,
            dispute: DisputePolicy {
                seller_response: hours_within(
                    "DISPUTE_SELLER_RESPONSE_HOURS", try_load("DISPUTE_SELLER_RESPONSE_HOURS", 48i64)?, 24..=MAX_HOURS,
                )?,
                return_receipt: hours_within(
                    "DISPUTE_RETURN_RECEIPT_HOURS", try_load("DISPUTE_RETURN_RECEIPT_HOURS", 168i64)?, 1..=MAX_HOURS,
                )?,
            },
            pricing: PricingPolicy {
                shipping_flat_rate: try_load("SHIPPING_FLAT_RATE", defaults.pricing.shipping_flat_rate)?,
                free_shipping_threshold: try_load("FREE_SHIPPING_THRESHOLD", defaults.pricing.free_shipping_threshold)?,
                tax_rate: try_load::<Decimal>("TAX_RATE", defaults.pricing.tax_rate)?,
            },
            bootstrap_admin,
        };
        config.validate()?;
        Ok(config)
    }

    /// Pricing inputs must not be negative.
    pub fn validate(&self) -> Result<()> {
        let pricing = [
            ("SHIPPING_FLAT_RATE", self.pricing.shipping_flat_rate),
            ("FREE_SHIPPING_THRESHOLD", self.pricing.free_shipping_threshold),
            ("TAX_RATE", self.pricing.tax_rate),
        ];
        for (key, value) in pricing {
            if value < Decimal::ZERO {
                return Err(anyhow!("{key} must not be negative, got {value}"));
            }
        }
        Ok(())
    }

    /// Public URL for a stored upload.
    pub fn upload_url(&self, file_name: &str) -> String {
        format!("{}/uploads/{file_name}", self.public_base_url.trim_end_matches('/'))
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match optional(key) {
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
        Some(raw) => raw.trim().parse().map_err(|e| {
            warn!("Invalid {key} value: {e}");
            anyhow!("{e}")
        }).with_context(|| format!("{key} is misconfigured")),
    }
}

fn hours_within(key: &str, hours: i64, range: RangeInclusive<i64>) -> Result<Duration> {
    if !range.contains(&hours) {
        warn!("Invalid {key} value: {hours}");
        return Err(anyhow!("{key} must be between {} and {} hours, got {hours}", range.start(), range.end()));
    }
    Ok(Duration::hours(hours))
}
