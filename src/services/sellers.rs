//! Seller onboarding.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::domain::aggregates::{Seller, SellerStatus, User};
use crate::domain::events::{DomainEvent, SellerEvent};
use crate::error::{AppError, AppResult};
use crate::events::EventPublisher;
use crate::state::AppState;
use crate::store::Store;

pub struct Sellers {
    store: Arc<dyn Store>,
    events: EventPublisher,
}

impl Sellers {
    pub fn new(state: &AppState) -> Self { Self { store: state.store.clone(), events: state.events.clone() } }

    #[instrument(skip(self, user, description), fields(user = %user.uid))]
    pub async fn apply(&self, user: &User, store_name: &str, description: Option<String>) -> AppResult<Seller> {
        let seller = Seller::apply(&user.uid, store_name, description);
        self.store.insert_seller(&seller).await?;
        info!(seller = %seller.seller_id, "seller application received");
        self.events.publish(vec![DomainEvent::Seller(SellerEvent::Applied {
            seller_id: seller.seller_id.clone(), user_id: user.uid.clone(),
        })]).await;
        Ok(seller)
    }

    pub async fn get(&self, seller_id: &str) -> AppResult<Seller> {
        self.store.seller(seller_id).await?.ok_or_else(|| AppError::not_found("seller", seller_id))
    }

    pub async fn for_user(&self, user: &User) -> AppResult<Seller> {
        self.store.seller_by_user(&user.uid).await?
            .ok_or_else(|| AppError::NotFound("no seller profile for this account".into()))
    }

    /// Approved seller profile of the caller.
    pub async fn approved_for(&self, user: &User) -> AppResult<Seller> {
        let seller = self.for_user(user).await?;
        if !seller.is_approved() { return Err(AppError::Forbidden("seller account is not approved".into())); }
        Ok(seller)
    }

    pub async fn list(&self, status: Option<SellerStatus>) -> AppResult<Vec<Seller>> { Ok(self.store.sellers(status).await?) }

    /// Approving links the seller profile to its user account.
    #[instrument(skip(self))]
    pub async fn review(&self, seller_id: &str, approve: bool) -> AppResult<Seller> {
        let mut seller = self.get(seller_id).await?;
        let mut owner = self.store.user(&seller.user_id).await?
            .ok_or_else(|| AppError::not_found("user", &seller.user_id))?;
        let event = if approve {
            seller.approve()?;
            owner.seller_id = Some(seller.seller_id.clone());
            SellerEvent::Approved { seller_id: seller.seller_id.clone() }
        } else {
            seller.reject()?;
            SellerEvent::Rejected { seller_id: seller.seller_id.clone() }
        };
        self.store.update_seller(&seller, &owner).await?;
        seller.version += 1;
        info!(seller = %seller.seller_id, status = ?seller.status, "seller application reviewed");
        self.events.publish(vec![DomainEvent::Seller(event)]).await;
        Ok(seller)
    }
}
