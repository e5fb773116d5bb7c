//! Furniture Marketplace - HTTP service entry point

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use furniture_marketplace::{
    auth::hash_password,
    domain::aggregates::{normalize_email, User, UserRole},
    events::EventPublisher,
    payments::{HttpGateway, PaymentGateway, RecordingGateway},
    store::{MemoryStore, PgStore, Store},
    AppState, Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url, config.database_max_connections).await?;
            pg.migrate().await?;
            Arc::new(pg)
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let payments: Arc<dyn PaymentGateway> = if config.stripe_secret_key.is_some() || config.paypal.is_some() {
        Arc::new(HttpGateway::new(config.stripe_secret_key.clone(), config.paypal.clone())?)
    } else {
        warn!("no payment gateway credentials, refunds are recorded but not sent");
        Arc::new(RecordingGateway::new())
    };

    let events = match &config.nats_url {
        Some(url) => EventPublisher::connect(url).await,
        None => EventPublisher::disabled(),
    };

    if let Some((email, password)) = &config.bootstrap_admin {
        bootstrap_admin(store.as_ref(), email, password).await?;
    }

    let port = config.port;
    let app = furniture_marketplace::router(AppState::new(store, payments, events, config));

    info!("🚀 Furniture Marketplace listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}

/// Creates the configured admin account unless the email is already registered.
async fn bootstrap_admin(store: &dyn Store, email: &str, password: &str) -> Result<()> {
    if store.user_by_email(&normalize_email(email)).await?.is_some() {
        return Ok(());
    }
    let mut admin = User::register("Administrator", email, hash_password(password)?);
    admin.role = UserRole::Admin;
    store.insert_user(&admin).await?;
    info!(user = %admin.uid, "bootstrap admin created");
    Ok(())
}
