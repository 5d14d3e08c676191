//! Reputation and notification sinks.
//!
//! - **TracingSink**: writes effects to the log; what the CLI wires in
//! - **RecordingSink**: keeps them in memory for assertions, can be told to fail

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::catalog::Tier;
use crate::domain::ids::ActorId;
use crate::ports::{NotificationSink, PortError, ReputationAdjuster};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl ReputationAdjuster for TracingSink {
    async fn adjust(&self, actor: &ActorId, event: &str, tier: Tier) -> Result<(), PortError> {
        tracing::info!(%actor, event, %tier, "reputation adjusted");
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, actor: &ActorId, message: &str) -> Result<(), PortError> {
        tracing::info!(%actor, message, "notification");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Reputation {
        actor: ActorId,
        event: String,
        tier: Tier,
    },
    Notification {
        actor: ActorId,
        message: String,
    },
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<Recorded>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn recorded(&self) -> Vec<Recorded> {
        self.seen.lock().await.clone()
    }

    async fn record(&self, entry: Recorded) -> Result<(), PortError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("recording sink set to fail".into()));
        }
        self.seen.lock().await.push(entry);
        Ok(())
    }
}

#[async_trait]
impl ReputationAdjuster for RecordingSink {
    async fn adjust(&self, actor: &ActorId, event: &str, tier: Tier) -> Result<(), PortError> {
        self.record(Recorded::Reputation {
            actor: actor.clone(),
            event: event.to_string(),
            tier,
        })
        .await
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, actor: &ActorId, message: &str) -> Result<(), PortError> {
        self.record(Recorded::Notification {
            actor: actor.clone(),
            message: message.to_string(),
        })
        .await
    }
}
