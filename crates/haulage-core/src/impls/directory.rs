//! In-process stand-ins for the session layer, licensing and population.
//!
//! Used by tests and the CLI simulation. Each keeps its data behind a lock so
//! a driver can change presence or grants while the depot runs.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::RwLock as AsyncRwLock;

use crate::domain::catalog::Requirement;
use crate::domain::ids::ActorId;
use crate::ports::{PopulationSignal, Presence, RequirementChecker, SessionProvider};

/// Presence table keyed by actor. Unknown actors are offline, never seen.
#[derive(Debug, Default)]
pub struct InMemorySessions {
    presence: AsyncRwLock<HashMap<ActorId, Presence>>,
}

impl InMemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, actor: &ActorId, now: i64) {
        self.presence.write().await.insert(
            actor.clone(),
            Presence {
                online: true,
                last_seen: Some(now),
            },
        );
    }

    pub async fn disconnect(&self, actor: &ActorId, last_seen: i64) {
        self.presence.write().await.insert(
            actor.clone(),
            Presence {
                online: false,
                last_seen: Some(last_seen),
            },
        );
    }
}

#[async_trait]
impl SessionProvider for InMemorySessions {
    async fn presence(&self, actor: &ActorId) -> Presence {
        self.presence
            .read()
            .await
            .get(actor)
            .copied()
            .unwrap_or_default()
    }
}

/// Grants per actor. `permissive()` waves everything through.
#[derive(Debug, Default)]
pub struct StaticRequirements {
    permissive: bool,
    grants: AsyncRwLock<HashMap<ActorId, HashSet<Requirement>>>,
}

impl StaticRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permissive() -> Self {
        Self {
            permissive: true,
            ..Self::default()
        }
    }

    pub async fn grant(&self, actor: &ActorId, requirements: &[Requirement]) {
        self.grants
            .write()
            .await
            .entry(actor.clone())
            .or_default()
            .extend(requirements.iter().copied());
    }
}

#[async_trait]
impl RequirementChecker for StaticRequirements {
    async fn missing(&self, actor: &ActorId, required: &[Requirement]) -> Vec<Requirement> {
        if self.permissive {
            return Vec::new();
        }
        let grants = self.grants.read().await;
        let held = grants.get(actor);
        required
            .iter()
            .filter(|r| !held.is_some_and(|h| h.contains(r)))
            .copied()
            .collect()
    }
}

/// Online counts per region, set by the driver.
#[derive(Debug, Default)]
pub struct RegionPopulation {
    online: RwLock<HashMap<String, u32>>,
}

impl RegionPopulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, region: &str, online: u32) {
        if let Ok(mut map) = self.online.write() {
            map.insert(region.to_string(), online);
        }
    }
}

impl PopulationSignal for RegionPopulation {
    fn online_in_region(&self, region: &str) -> u32 {
        self.online
            .read()
            .ok()
            .and_then(|m| m.get(region).copied())
            .unwrap_or(0)
    }
}
