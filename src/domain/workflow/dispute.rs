//! When a sub-order needs an admin.
//!
//! Rules are checked in order and the first match names the reason.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::SubOrderState;

/// SLA windows for seller action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisputePolicy {
    pub seller_response: Duration,
    pub return_receipt: Duration,
}

impl Default for DisputePolicy {
    fn default() -> Self {
        Self { seller_response: Duration::hours(48), return_receipt: Duration::days(7) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeReason {
    AppealPending,
    RefundUnanswered,
    ReturnUnanswered,
    ReturnReceiptOverdue,
}

struct SlaRule {
    reason: DisputeReason,
    applies: fn(&SubOrderState, &DisputePolicy, DateTime<Utc>) -> bool,
}

fn older_than(since: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool { now - since > window }

const RULES: &[SlaRule] = &[
    SlaRule {
        reason: DisputeReason::AppealPending,
        applies: |state, _, _| matches!(state, SubOrderState::Appealed { .. }),
    },
    SlaRule {
        reason: DisputeReason::RefundUnanswered,
        applies: |state, policy, now| match state {
            SubOrderState::RefundRequested { requested_at, .. } => older_than(*requested_at, policy.seller_response, now),
            _ => false,
        },
    },
    SlaRule {
        reason: DisputeReason::ReturnUnanswered,
        applies: |state, policy, now| match state {
            SubOrderState::ReturnRequested { requested_at, .. } => older_than(*requested_at, policy.seller_response, now),
            _ => false,
        },
    },
    SlaRule {
        reason: DisputeReason::ReturnReceiptOverdue,
        applies: |state, policy, now| match state {
            SubOrderState::ReturnConfirmed { confirmed_at, .. } => older_than(*confirmed_at, policy.return_receipt, now),
            _ => false,
        },
    },
];

/// First matching rule, if any.
pub fn intervention_reason(state: &SubOrderState, policy: &DisputePolicy, now: DateTime<Utc>) -> Option<DisputeReason> {
    RULES.iter().find(|rule| (rule.applies)(state, policy, now)).map(|rule| rule.reason)
}

pub fn should_admin_intervene(state: &SubOrderState, policy: &DisputePolicy, now: DateTime<Utc>) -> bool {
    intervention_reason(state, policy, now).is_some()
}
