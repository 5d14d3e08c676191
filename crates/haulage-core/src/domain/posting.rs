//! Job posting: a board-generated offer, before anyone commits to it.

use serde::{Deserialize, Serialize};

use super::catalog::{CargoKind, Requirement, Tier};
use super::ids::{ActorId, JobId};

/// Board-side status of a posting.
///
/// State transitions:
/// - Available -> Reserved -> Accepted -> Completed
/// - Reserved -> Available (release / hold lapsed)
/// - Available -> Expired (board refresh)
/// - Accepted -> Expired | Orphaned (load ended without delivery)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardStatus {
    Available,
    Reserved,
    Accepted,
    Completed,
    Expired,
    Orphaned,
}

impl BoardStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BoardStatus::Completed | BoardStatus::Expired | BoardStatus::Orphaned
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub job_id: JobId,
    pub catalog_version: u32,
    pub cargo: CargoKind,
    pub tier: Tier,
    pub region: String,
    pub origin: String,
    pub destination: String,
    pub distance: f64,
    pub weight_kg: u32,
    /// Number of drops including the final destination.
    pub stops: u8,
    pub requirements: Vec<Requirement>,
    pub deposit: i64,
    pub window_secs: i64,
    /// 1.0 unless the posting came from a manual surge.
    pub surge_multiplier: f64,
    pub posted_at: i64,
    pub expires_at: i64,

    pub status: BoardStatus,
    pub reserved_by: Option<ActorId>,
    pub reserved_until: Option<i64>,
}

impl JobPosting {
    pub fn is_available(&self) -> bool {
        self.status == BoardStatus::Available
    }

    /// Live reservation held by `actor` at `now`.
    pub fn is_reserved_by(&self, actor: &ActorId, now: i64) -> bool {
        self.status == BoardStatus::Reserved
            && self.reserved_by.as_ref() == Some(actor)
            && self.reserved_until.is_some_and(|until| until >= now)
    }

    pub fn mark_reserved(&mut self, actor: ActorId, until: i64) {
        self.status = BoardStatus::Reserved;
        self.reserved_by = Some(actor);
        self.reserved_until = Some(until);
    }

    pub fn clear_reservation(&mut self) {
        self.status = BoardStatus::Available;
        self.reserved_by = None;
        self.reserved_until = None;
    }

    pub fn mark_accepted(&mut self) {
        self.status = BoardStatus::Accepted;
        self.reserved_until = None;
    }
}
