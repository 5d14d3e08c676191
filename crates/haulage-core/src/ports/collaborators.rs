//! External collaborators the depot consumes but does not own.
//!
//! Session handling, licensing, reputation and notifications live in other
//! services. The depot only needs these narrow views of them.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::catalog::{Requirement, Tier};
use crate::domain::ids::ActorId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Session-layer view of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Presence {
    pub online: bool,
    /// Last time the session layer heard from the actor (Unix seconds).
    pub last_seen: Option<i64>,
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn presence(&self, actor: &ActorId) -> Presence;
}

#[async_trait]
pub trait RequirementChecker: Send + Sync {
    /// Requirements from `required` the actor does not hold.
    async fn missing(&self, actor: &ActorId, required: &[Requirement]) -> Vec<Requirement>;
}

/// Fire-and-forget; fed from the outbox.
#[async_trait]
pub trait ReputationAdjuster: Send + Sync {
    async fn adjust(&self, actor: &ActorId, event: &str, tier: Tier) -> Result<(), PortError>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, actor: &ActorId, message: &str) -> Result<(), PortError>;
}

/// Online population per region; drives the convoy bonus.
pub trait PopulationSignal: Send + Sync {
    fn online_in_region(&self, region: &str) -> u32;
}
