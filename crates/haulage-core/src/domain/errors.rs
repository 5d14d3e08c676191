//! Errors - エラー型と分類
//!
//! 呼び出し側は `ErrorKind` で扱いを決めます。
//! - Validation: 前提条件を満たしていない（状態は一切変わらない）
//! - RaceLost: 他のアクターが先に取った（「別の案件を探す」合図）
//! - Consistency: 呼び出し側の認識が古い（終端済みの積荷への報告など）
//! - Environmental: ストア障害など（次の tick で再試行）
//! - Invariant: 起きてはならない不整合（運用アラート）

use thiserror::Error;

use super::catalog::{Requirement, Tier};
use super::ids::{ActorId, ClaimId, JobId, LoadId, PolicyId};
use super::load::LoadStatus;
use super::posting::BoardStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    RaceLost,
    Consistency,
    Environmental,
    Invariant,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HaulError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {job_id} is not available (status={status:?})")]
    JobNotAvailable { job_id: JobId, status: BoardStatus },

    #[error("job {0} is already reserved by another actor")]
    AlreadyReserved(JobId),

    #[error("actor {actor} already holds a reservation on {job_id}")]
    ActorHasReservation { actor: ActorId, job_id: JobId },

    #[error("actor {actor} already has an active load {load_id}")]
    ActorHasActiveLoad { actor: ActorId, load_id: LoadId },

    #[error("actor {actor} is in release cooldown until {until} (tier {tier} blocked)")]
    ReleaseCooldown {
        actor: ActorId,
        until: i64,
        tier: Tier,
    },

    #[error("actor {actor} is suspended until {until}")]
    ActorSuspended { actor: ActorId, until: i64 },

    #[error("actor {actor} does not hold a live reservation on {job_id}")]
    NotReservationHolder { actor: ActorId, job_id: JobId },

    #[error("actor {actor} is missing requirements: {missing:?}")]
    MissingRequirements {
        actor: ActorId,
        missing: Vec<Requirement>,
    },

    #[error("insufficient funds for {actor}: needed={needed}, available={available}")]
    InsufficientFunds {
        actor: ActorId,
        needed: i64,
        available: i64,
    },

    #[error("load not found: {0}")]
    LoadNotFound(LoadId),

    #[error("actor {actor} does not own load {load_id}")]
    NotLoadOwner { actor: ActorId, load_id: LoadId },

    #[error("load {0} is already terminal")]
    LoadAlreadyTerminal(LoadId),

    #[error("load {load_id}: {operation} is not allowed from {status:?}")]
    InvalidTransition {
        load_id: LoadId,
        status: LoadStatus,
        operation: &'static str,
    },

    #[error("load {load_id}: {operation} does not apply to this cargo")]
    NotApplicable {
        load_id: LoadId,
        operation: &'static str,
    },

    #[error("load {load_id} has not passed its deadline ({deadline})")]
    DeadlineNotReached { load_id: LoadId, deadline: i64 },

    #[error("owner of load {load_id} has not been away past the grace period")]
    GraceNotElapsed { load_id: LoadId },

    #[error("invalid input for {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("policy not found: {0}")]
    PolicyNotFound(PolicyId),

    #[error("claim not found: {0}")]
    ClaimNotFound(ClaimId),

    #[error("load {0} already has a claim")]
    DuplicateClaim(LoadId),

    #[error("load {load_id} is not claimable: {reason}")]
    NotClaimable { load_id: LoadId, reason: String },

    #[error("store unavailable: {0}")]
    Store(String),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl HaulError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HaulError::AlreadyReserved(_) => ErrorKind::RaceLost,
            HaulError::LoadAlreadyTerminal(_) | HaulError::InvalidTransition { .. } => {
                ErrorKind::Consistency
            }
            HaulError::Store(_) => ErrorKind::Environmental,
            HaulError::Invariant(_) => ErrorKind::Invariant,
            _ => ErrorKind::Validation,
        }
    }

    pub fn is_race_lost(&self) -> bool {
        self.kind() == ErrorKind::RaceLost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn errors_are_classified() {
        let job = JobId::from_ulid(Ulid::new());
        let load = LoadId::from_ulid(Ulid::new());

        assert_eq!(HaulError::AlreadyReserved(job).kind(), ErrorKind::RaceLost);
        assert_eq!(
            HaulError::LoadAlreadyTerminal(load).kind(),
            ErrorKind::Consistency
        );
        assert_eq!(HaulError::JobNotFound(job).kind(), ErrorKind::Validation);
        assert_eq!(HaulError::Store("down".into()).kind(), ErrorKind::Environmental);
        assert_eq!(HaulError::Invariant("x".into()).kind(), ErrorKind::Invariant);
    }

    #[test]
    fn message_names_the_actor() {
        let err = HaulError::InsufficientFunds {
            actor: ActorId::from("a1"),
            needed: 500,
            available: 20,
        };
        assert!(err.to_string().contains("a1"));
    }
}
