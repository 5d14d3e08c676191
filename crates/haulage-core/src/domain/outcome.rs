//! Terminal outcomes of an active load.

use serde::{Deserialize, Serialize};

use super::events::AuditEventKind;
use super::posting::BoardStatus;
use crate::ledger::DepositStatus;
use crate::payout::PayoutResult;

/// Sink states of the lifecycle. Filled once per load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Delivered,
    Rejected,
    Stolen,
    Abandoned,
    Expired,
}

/// What caused the terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalTrigger {
    /// The owning actor asked for it.
    Actor,
    /// Administrative override.
    Admin,
    /// Owner absent beyond the grace period.
    Absence,
    /// Hard deadline passed.
    Deadline,
    /// Integrity fell below the rejection threshold at delivery.
    Integrity,
}

impl TerminalOutcome {
    pub fn audit_kind(self) -> AuditEventKind {
        match self {
            TerminalOutcome::Delivered => AuditEventKind::LoadDelivered,
            TerminalOutcome::Rejected => AuditEventKind::LoadRejected,
            TerminalOutcome::Stolen => AuditEventKind::LoadStolen,
            TerminalOutcome::Abandoned => AuditEventKind::LoadAbandoned,
            TerminalOutcome::Expired => AuditEventKind::LoadExpired,
        }
    }

    /// Outcomes an insurance claim may reference.
    pub fn is_claimable(self) -> bool {
        matches!(self, TerminalOutcome::Stolen | TerminalOutcome::Abandoned)
    }

    /// Board status the originating posting ends in.
    pub fn board_status(self, trigger: TerminalTrigger) -> BoardStatus {
        match (self, trigger) {
            (TerminalOutcome::Delivered | TerminalOutcome::Rejected, _) => BoardStatus::Completed,
            (TerminalOutcome::Abandoned, TerminalTrigger::Absence) => BoardStatus::Orphaned,
            _ => BoardStatus::Expired,
        }
    }

    /// Event kind handed to the reputation adjuster.
    pub fn reputation_event(self) -> &'static str {
        match self {
            TerminalOutcome::Delivered => "load_delivered",
            TerminalOutcome::Rejected => "load_rejected",
            TerminalOutcome::Stolen => "load_stolen",
            TerminalOutcome::Abandoned => "load_abandoned",
            TerminalOutcome::Expired => "load_expired",
        }
    }
}

/// The filled terminal slot of a load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalRecord {
    pub outcome: TerminalOutcome,
    pub trigger: TerminalTrigger,
    pub at: i64,
    pub payout: Option<PayoutResult>,
    pub deposit: DepositStatus,
}

impl TerminalRecord {
    pub fn amount_paid(&self) -> i64 {
        self.payout.as_ref().map(|p| p.amount).unwrap_or(0)
    }
}
