//! Persisted layout of the depot.

use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::domain::events::AuditEvent;
use crate::domain::load::ActiveLoad;
use crate::ledger::Ledger;
use crate::outbox::Outbox;
use crate::reservation::ReservationBook;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to bring a depot back after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepotSnapshot {
    pub version: u32,
    /// Server time when the snapshot was taken; the clock never restarts earlier.
    pub clock_reference: i64,
    pub economy_multiplier: f64,
    pub board: Board,
    pub reservations: ReservationBook,
    pub active_loads: Vec<ActiveLoad>,
    pub archived_loads: Vec<ActiveLoad>,
    pub ledger: Ledger,
    pub audit: Vec<AuditEvent>,
    pub outbox: Outbox,
}

impl DepotSnapshot {
    pub fn empty(clock_reference: i64) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            clock_reference,
            economy_multiplier: 1.0,
            board: Board::default(),
            reservations: ReservationBook::default(),
            active_loads: Vec::new(),
            archived_loads: Vec::new(),
            ledger: Ledger::default(),
            audit: Vec::new(),
            outbox: Outbox::default(),
        }
    }
}
