use std::sync::Arc;

use crate::auth::TokenSigner;
use crate::config::Config;
use crate::events::EventPublisher;
use crate::payments::PaymentGateway;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub payments: Arc<dyn PaymentGateway>,
    pub events: EventPublisher,
    pub config: Arc<Config>,
    pub tokens: TokenSigner,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, payments: Arc<dyn PaymentGateway>, events: EventPublisher, config: Config) -> Self {
        let tokens = TokenSigner::new(&config.token_secret, config.token_ttl);
        Self { store, payments, events, config: Arc::new(config), tokens }
    }
}
