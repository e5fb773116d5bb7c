//! Sub-order cancellation / refund / return workflow.
//!
//! One tagged state per sub-order replaces the independent cancel, refund and
//! appeal flags. Every legal move is a row in [`TRANSITIONS`]; anything else
//! is an error.

pub mod dispute;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor { Customer, Seller, Admin }

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Self::Customer => "customer", Self::Seller => "seller", Self::Admin => "admin" })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SubOrderState {
    Active,
    CancelRequested { requested_at: DateTime<Utc>, reason: String },
    Cancelled { at: DateTime<Utc> },
    RefundRequested { requested_at: DateTime<Utc>, reason: String },
    ReturnRequested { requested_at: DateTime<Utc>, reason: String },
    ReturnConfirmed { confirmed_at: DateTime<Utc>, reason: String },
    Refunded { at: DateTime<Utc> },
    /// `appealable` is false once an admin has ruled.
    Rejected { at: DateTime<Utc>, reason: String, appealable: bool },
    Appealed { appealed_at: DateTime<Utc>, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKind {
    Active,
    CancelRequested,
    Cancelled,
    RefundRequested,
    ReturnRequested,
    ReturnConfirmed,
    Refunded,
    Rejected,
    Appealed,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(self, f) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    RequestCancel,
    ApproveCancel,
    RejectCancel,
    RequestRefund,
    RequestReturn,
    ApproveRefund,
    RejectRefund,
    ConfirmReturn,
    ReceiveReturn,
    Appeal,
    AdminRefund,
    AdminReject,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(self, f) }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    RequestCancel { reason: String },
    ApproveCancel,
    RejectCancel { reason: String },
    RequestRefund { reason: String },
    RequestReturn { reason: String },
    ApproveRefund,
    RejectRefund { reason: String },
    ConfirmReturn,
    ReceiveReturn,
    Appeal { reason: String },
    AdminResolve { decision: Resolution, note: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution { Refund, Reject }

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::RequestCancel { .. } => CommandKind::RequestCancel,
            Self::ApproveCancel => CommandKind::ApproveCancel,
            Self::RejectCancel { .. } => CommandKind::RejectCancel,
            Self::RequestRefund { .. } => CommandKind::RequestRefund,
            Self::RequestReturn { .. } => CommandKind::RequestReturn,
            Self::ApproveRefund => CommandKind::ApproveRefund,
            Self::RejectRefund { .. } => CommandKind::RejectRefund,
            Self::ConfirmReturn => CommandKind::ConfirmReturn,
            Self::ReceiveReturn => CommandKind::ReceiveReturn,
            Self::Appeal { .. } => CommandKind::Appeal,
            Self::AdminResolve { decision: Resolution::Refund, .. } => CommandKind::AdminRefund,
            Self::AdminResolve { decision: Resolution::Reject, .. } => CommandKind::AdminReject,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match self {
            Self::RequestCancel { reason } | Self::RejectCancel { reason } | Self::RequestRefund { reason }
            | Self::RequestReturn { reason } | Self::RejectRefund { reason } | Self::Appeal { reason } => Some(reason),
            Self::AdminResolve { note, .. } => Some(note),
            _ => None,
        }
    }
}

/// What the caller must do besides persisting the new state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Effect {
    None,
    /// Deduct the sub-order from its total and return any captured payment.
    Settle(SettleReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettleReason { Cancelled, Refunded }

struct Rule {
    from: &'static [StateKind],
    command: CommandKind,
    actors: &'static [Actor],
    to: StateKind,
    effect: Effect,
}

use Actor::{Admin, Customer, Seller};
use StateKind as S;

const OPEN_DISPUTES: &[StateKind] = &[S::Appealed, S::RefundRequested, S::ReturnRequested, S::ReturnConfirmed];

const TRANSITIONS: &[Rule] = &[
    Rule { from: &[S::Active], command: CommandKind::RequestCancel, actors: &[Customer], to: S::CancelRequested, effect: Effect::None },
    Rule { from: &[S::CancelRequested], command: CommandKind::ApproveCancel, actors: &[Seller, Admin], to: S::Cancelled, effect: Effect::Settle(SettleReason::Cancelled) },
    Rule { from: &[S::CancelRequested], command: CommandKind::RejectCancel, actors: &[Seller, Admin], to: S::Active, effect: Effect::None },
    Rule { from: &[S::Active], command: CommandKind::RequestRefund, actors: &[Customer], to: S::RefundRequested, effect: Effect::None },
    Rule { from: &[S::Active], command: CommandKind::RequestReturn, actors: &[Customer], to: S::ReturnRequested, effect: Effect::None },
    Rule { from: &[S::RefundRequested], command: CommandKind::ApproveRefund, actors: &[Seller], to: S::Refunded, effect: Effect::Settle(SettleReason::Refunded) },
    Rule { from: &[S::RefundRequested, S::ReturnRequested], command: CommandKind::RejectRefund, actors: &[Seller], to: S::Rejected, effect: Effect::None },
    Rule { from: &[S::ReturnRequested], command: CommandKind::ConfirmReturn, actors: &[Seller], to: S::ReturnConfirmed, effect: Effect::None },
    Rule { from: &[S::ReturnConfirmed], command: CommandKind::ReceiveReturn, actors: &[Seller], to: S::Refunded, effect: Effect::Settle(SettleReason::Refunded) },
    Rule { from: &[S::Rejected], command: CommandKind::Appeal, actors: &[Customer], to: S::Appealed, effect: Effect::None },
    Rule { from: OPEN_DISPUTES, command: CommandKind::AdminRefund, actors: &[Admin], to: S::Refunded, effect: Effect::Settle(SettleReason::Refunded) },
    Rule { from: OPEN_DISPUTES, command: CommandKind::AdminReject, actors: &[Admin], to: S::Rejected, effect: Effect::None },
];

/// A validated, not yet persisted, state change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: SubOrderState,
    pub to: SubOrderState,
    pub command: CommandKind,
    pub actor: Actor,
    pub effect: Effect,
    pub at: DateTime<Utc>,
}

impl Transition {
    /// The same outcome recorded on top of a state written since this was planned.
    pub fn rebase(&self, current: &SubOrderState) -> Transition {
        Transition { from: current.clone(), ..self.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {command} while sub-order is {from}")]
    InvalidTransition { from: StateKind, command: CommandKind },
    #[error("{actor} may not {command}")]
    NotPermitted { actor: Actor, command: CommandKind },
    #[error("rejection is final and cannot be appealed")]
    AppealClosed,
}

impl Default for SubOrderState {
    fn default() -> Self { Self::Active }
}

impl SubOrderState {
    pub fn kind(&self) -> StateKind {
        match self {
            Self::Active => S::Active,
            Self::CancelRequested { .. } => S::CancelRequested,
            Self::Cancelled { .. } => S::Cancelled,
            Self::RefundRequested { .. } => S::RefundRequested,
            Self::ReturnRequested { .. } => S::ReturnRequested,
            Self::ReturnConfirmed { .. } => S::ReturnConfirmed,
            Self::Refunded { .. } => S::Refunded,
            Self::Rejected { .. } => S::Rejected,
            Self::Appealed { .. } => S::Appealed,
        }
    }

    pub fn is_settled(&self) -> bool { matches!(self, Self::Cancelled { .. } | Self::Refunded { .. }) }

    fn reason(&self) -> String {
        match self {
            Self::CancelRequested { reason, .. } | Self::RefundRequested { reason, .. }
            | Self::ReturnRequested { reason, .. } | Self::ReturnConfirmed { reason, .. }
            | Self::Rejected { reason, .. } | Self::Appealed { reason, .. } => reason.clone(),
            _ => String::new(),
        }
    }

    /// Looks `command` up in the transition table and builds the resulting state.
    pub fn apply(&self, command: &Command, actor: Actor, now: DateTime<Utc>) -> Result<Transition, TransitionError> {
        let from = self.kind();
        let kind = command.kind();
        let rule = TRANSITIONS
            .iter()
            .find(|r| r.command == kind && r.from.contains(&from))
            .ok_or(TransitionError::InvalidTransition { from, command: kind })?;
        if !rule.actors.contains(&actor) {
            return Err(TransitionError::NotPermitted { actor, command: kind });
        }
        if let Self::Rejected { appealable: false, .. } = self {
            if kind == CommandKind::Appeal { return Err(TransitionError::AppealClosed); }
        }

        let note = command.note().unwrap_or_default().to_string();
        let to = match rule.to {
            S::Active => Self::Active,
            S::CancelRequested => Self::CancelRequested { requested_at: now, reason: note },
            S::Cancelled => Self::Cancelled { at: now },
            S::RefundRequested => Self::RefundRequested { requested_at: now, reason: note },
            S::ReturnRequested => Self::ReturnRequested { requested_at: now, reason: note },
            S::ReturnConfirmed => Self::ReturnConfirmed { confirmed_at: now, reason: self.reason() },
            S::Refunded => Self::Refunded { at: now },
            S::Rejected => Self::Rejected { at: now, reason: note, appealable: kind != CommandKind::AdminReject },
            S::Appealed => Self::Appealed { appealed_at: now, reason: note },
        };
        Ok(Transition { from: self.clone(), to, command: kind, actor, effect: rule.effect, at: now })
    }

    /// The flag triple older clients read.
    pub fn legacy_status(&self) -> LegacyStatus {
        let (cancel_status, refund_status, appeal_requested) = match self {
            Self::Active => ("None", "None", false),
            Self::CancelRequested { .. } => ("Requested", "None", false),
            Self::Cancelled { .. } => ("Approved", "None", false),
            Self::RefundRequested { .. } => ("None", "Requested", false),
            Self::ReturnRequested { .. } => ("None", "Return Requested", false),
            Self::ReturnConfirmed { .. } => ("None", "Return Confirmed", false),
            Self::Refunded { .. } => ("None", "Refunded", false),
            Self::Rejected { .. } => ("None", "Rejected", false),
            Self::Appealed { .. } => ("None", "Rejected", true),
        };
        LegacyStatus { cancel_status, refund_status, appeal_requested }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyStatus {
    pub cancel_status: &'static str,
    pub refund_status: &'static str,
    pub appeal_requested: bool,
}
