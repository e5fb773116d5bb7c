//! Shipping progress and the cancel / refund / return workflow.
//!
//! A transition is planned against the stored sub-order, refunded through the
//! gateway when it settles a paid order, and then committed together with the
//! adjusted total. Before a refund is sent a stale version fails the request
//! with nothing written; once it is sent the settlement is re-applied until it
//! lands.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::domain::aggregates::{Fulfillment, PaymentMethod, SubOrder, TotalOrder, User};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::Money;
use crate::domain::workflow::dispute::{intervention_reason, DisputePolicy, DisputeReason};
use crate::domain::workflow::{Actor, Command, Effect, LegacyStatus, Transition};
use crate::error::{AppError, AppResult};
use crate::events::EventPublisher;
use crate::payments::{PaymentGateway, RefundReceipt, RefundRequest};
use crate::state::AppState;
use crate::store::{Store, StoreError, SubOrderFilter};

use super::MAX_ATTEMPTS;

/// Sub-order as served to clients: the document plus the legacy status flags
/// and, when it applies, why an admin should look at it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubOrderView {
    #[serde(flatten)]
    pub sub_order: SubOrder,
    #[serde(flatten)]
    pub legacy: LegacyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute: Option<DisputeReason>,
}

impl SubOrderView {
    pub fn new(sub_order: SubOrder, policy: &DisputePolicy) -> Self {
        let dispute = intervention_reason(&sub_order.state, policy, Utc::now());
        Self { legacy: sub_order.state.legacy_status(), sub_order, dispute }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispute {
    pub reason: DisputeReason,
    pub sub_order: SubOrderView,
}

pub fn refund_idempotency_key(sub_order_id: &str) -> String { format!("refund-{sub_order_id}") }

pub struct Fulfillments {
    store: Arc<dyn Store>,
    payments: Arc<dyn PaymentGateway>,
    events: EventPublisher,
    policy: DisputePolicy,
}

impl Fulfillments {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            payments: state.payments.clone(),
            events: state.events.clone(),
            policy: state.config.dispute,
        }
    }

    pub fn view(&self, sub_order: SubOrder) -> SubOrderView { SubOrderView::new(sub_order, &self.policy) }

    /// Loads a sub-order the caller may act on in the given role.
    pub async fn sub_order_for(&self, user: &User, id: &str, actor: Actor) -> AppResult<SubOrder> {
        let sub = self.store.sub_order(id).await?.ok_or_else(|| AppError::not_found("sub-order", id))?;
        let allowed = match actor {
            Actor::Customer => sub.user_id == user.uid,
            Actor::Seller => user.seller_id.as_deref() == Some(sub.seller_id.as_str()),
            Actor::Admin => user.is_admin(),
        };
        if !allowed {
            warn!(user = %user.uid, sub_order = %id, %actor, "sub-order access denied");
            return Err(AppError::Forbidden(format!("sub-order {id} is not accessible as {actor}")));
        }
        Ok(sub)
    }

    /// Newest first.
    pub async fn list_for_seller(&self, seller_id: &str) -> AppResult<Vec<SubOrderView>> {
        let subs = self.store.sub_orders(&SubOrderFilter::Seller(seller_id.to_string())).await?;
        Ok(subs.into_iter().map(|s| self.view(s)).collect())
    }

    #[instrument(skip(self, user), fields(user = %user.uid))]
    pub async fn advance(&self, user: &User, id: &str, next: Fulfillment) -> AppResult<SubOrderView> {
        let mut sub = self.sub_order_for(user, id, Actor::Seller).await?;
        sub.advance_fulfillment(next)?;
        self.store.update_sub_order(&sub).await?;
        info!(sub_order = %sub.id, fulfillment = next.as_str(), "fulfillment advanced");
        self.events.publish(vec![DomainEvent::Order(OrderEvent::FulfillmentAdvanced {
            sub_order_id: sub.id.clone(), status: next.as_str().into(),
        })]).await;
        sub.version += 1;
        Ok(self.view(sub))
    }

    #[instrument(skip(self, user, command), fields(user = %user.uid, command = %command.kind()))]
    pub async fn transition(&self, user: &User, id: &str, actor: Actor, command: Command) -> AppResult<SubOrderView> {
        let mut sub = self.sub_order_for(user, id, actor).await?;
        let mut order = self.total_order_of(&sub).await?;

        let transition = sub.plan(&command, actor, order.is_paid, Utc::now())?;
        let note = command.note().map(str::to_string);
        sub.commit(&transition, &user.uid, note.clone());

        let mut events = vec![DomainEvent::Order(OrderEvent::Transitioned {
            sub_order_id: sub.id.clone(),
            from: transition.from.kind().to_string(),
            to: transition.to.kind().to_string(),
            actor: actor.to_string(),
        })];

        let mut refunded = false;
        if let Effect::Settle(reason) = transition.effect {
            let applied = order.deduct(&sub, reason)?;
            let receipt = self.refund(&order, &sub, &applied).await?;
            refunded = receipt.is_some();
            if order.is_paid {
                events.push(DomainEvent::Order(OrderEvent::Refunded {
                    sub_order_id: sub.id.clone(), amount: applied.amount(), gateway_reference: receipt.map(|r| r.reference),
                }));
            }
        }

        if refunded {
            sub = self.land_settlement(sub, order, &transition, &user.uid, note).await?;
        } else {
            self.store.commit_transition(&sub, &order).await?;
        }
        info!(sub_order = %sub.id, from = %transition.from.kind(), to = %transition.to.kind(), %actor, "sub-order transitioned");
        self.events.publish(events).await;
        sub.version += 1;
        Ok(self.view(sub))
    }

    async fn total_order_of(&self, sub: &SubOrder) -> AppResult<TotalOrder> {
        self.store.total_order(&sub.total_order_id).await?
            .ok_or_else(|| AppError::not_found("order", &sub.total_order_id))
    }

    /// Fails with `Conflict` when either document moved on since it was read.
    async fn ensure_current(&self, sub: &SubOrder, order: &TotalOrder) -> AppResult<()> {
        let stored_sub = self.store.sub_order(&sub.id).await?.ok_or_else(|| AppError::not_found("sub-order", &sub.id))?;
        let stored_order = self.total_order_of(sub).await?;
        if stored_sub.version != sub.version || stored_order.version != order.version {
            warn!(sub_order = %sub.id, "sub-order changed before refund, aborting");
            return Err(AppError::Conflict(format!("sub-order {} was modified concurrently", sub.id)));
        }
        Ok(())
    }

    /// Records a settlement whose refund has already been sent. Money has moved,
    /// so a lost race re-applies the outcome on the latest documents instead of
    /// failing.
    async fn land_settlement(
        &self, mut sub: SubOrder, mut order: TotalOrder, transition: &Transition, actor_id: &str, note: Option<String>,
    ) -> AppResult<SubOrder> {
        let reason = match transition.effect {
            Effect::Settle(reason) => reason,
            Effect::None => return Err(AppError::Internal("settlement without a settle effect".into())),
        };
        let mut attempt = 1;
        loop {
            match self.store.commit_transition(&sub, &order).await {
                Ok(()) => return Ok(sub),
                Err(StoreError::Conflict(msg)) if attempt < MAX_ATTEMPTS => {
                    warn!(sub_order = %sub.id, attempt, %msg, "settlement lost a race after refund, re-applying");
                    attempt += 1;
                    sub = self.store.sub_order(&sub.id).await?.ok_or_else(|| AppError::not_found("sub-order", &sub.id))?;
                    order = self.total_order_of(&sub).await?;
                    if sub.state.is_settled() && order.is_adjusted(&sub.id) { return Ok(sub); }
                    if !sub.state.is_settled() { sub.commit(&transition.rebase(&sub.state), actor_id, note.clone()); }
                    if !order.is_adjusted(&sub.id) { order.deduct(&sub, reason)?; }
                }
                Err(e) => {
                    error!(sub_order = %sub.id, error = %e, "refund sent but settlement not recorded");
                    return Err(e.into());
                }
            }
        }
    }

    /// Returns the settled amount to the buyer. Unpaid, cash and zero-amount
    /// settlements have nothing to send to a gateway.
    async fn refund(&self, order: &TotalOrder, sub: &SubOrder, amount: &Money) -> AppResult<Option<RefundReceipt>> {
        if !order.is_paid || order.payment_method == PaymentMethod::Cash || amount.is_zero() { return Ok(None); }
        let payment_reference = order.payment_result.as_ref().map(|r| r.id.clone())
            .ok_or_else(|| AppError::BadRequest(format!("order {} has no payment reference to refund", order.id)))?;
        let request = RefundRequest {
            provider: order.payment_method,
            payment_reference,
            amount_minor: amount.to_minor_units()?,
            currency: amount.currency().to_string(),
            idempotency_key: refund_idempotency_key(&sub.id),
        };
        self.ensure_current(sub, order).await?;
        match self.payments.refund(&request).await {
            Ok(receipt) => Ok(Some(receipt)),
            Err(e) => {
                warn!(sub_order = %sub.id, error = %e, "refund failed, transition aborted");
                Err(e.into())
            }
        }
    }

    /// Every sub-order an admin should adjudicate, with the rule that flagged it.
    #[instrument(skip(self))]
    pub async fn disputes(&self) -> AppResult<Vec<Dispute>> {
        let now = Utc::now();
        let subs = self.store.sub_orders(&SubOrderFilter::All).await?;
        Ok(subs.into_iter()
            .filter_map(|s| {
                let reason = intervention_reason(&s.state, &self.policy, now)?;
                Some(Dispute { reason, sub_order: self.view(s) })
            })
            .collect())
    }
}
