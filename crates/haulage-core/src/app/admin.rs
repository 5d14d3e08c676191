//! Admin - 運用者向けの操作
//!
//! 管理コマンドも通常のトラフィックと同じ遷移関数を呼びます。
//! 特別な裏口は作らず、監査ログにも同じ形で残ります。

use std::sync::Arc;

use serde::Serialize;

use crate::depot::Depot;
use crate::domain::catalog::Tier;
use crate::domain::errors::HaulError;
use crate::domain::events::AuditEvent;
use crate::domain::ids::{ActorId, JobId, LoadId};
use crate::domain::load::ActiveLoad;
use crate::domain::outcome::TerminalRecord;
use crate::ledger::InsuranceClaim;

/// Everything known about one load.
#[derive(Debug, Clone, Serialize)]
pub struct LoadView {
    pub load: ActiveLoad,
    pub events: Vec<AuditEvent>,
    pub claim: Option<InsuranceClaim>,
}

#[derive(Clone)]
pub struct Admin {
    depot: Arc<Depot>,
}

impl Admin {
    pub fn new(depot: Arc<Depot>) -> Self {
        Self { depot }
    }

    pub async fn lookup(&self, load_id: LoadId) -> Option<LoadView> {
        let load = self.depot.load(load_id).await?;
        let events = self.depot.audit_events_for_load(load_id, 0).await;
        let claim = self.depot.claim_for_load(load_id).await;
        Some(LoadView {
            load,
            events,
            claim,
        })
    }

    /// Everything audited within `[from, to)` across all loads.
    pub async fn activity(&self, from: i64, to: i64) -> Result<Vec<AuditEvent>, HaulError> {
        if to <= from {
            return Err(HaulError::InvalidInput {
                field: "to",
                reason: "time range is empty".into(),
            });
        }
        Ok(self.depot.audit_events_between(from, to).await)
    }

    /// Deliver regardless of where the load is. Integrity still decides
    /// between delivered and rejected.
    pub async fn force_complete(&self, load_id: LoadId) -> Result<TerminalRecord, HaulError> {
        tracing::warn!(%load_id, "admin force complete");
        self.depot.force_deliver(load_id).await
    }

    pub async fn force_abandon(&self, load_id: LoadId) -> Result<TerminalRecord, HaulError> {
        tracing::warn!(%load_id, "admin force abandon");
        self.depot.force_abandon(load_id).await
    }

    pub async fn set_economy_multiplier(&self, multiplier: f64) -> Result<(), HaulError> {
        self.depot.set_economy_multiplier(multiplier).await
    }

    pub async fn create_surge(
        &self,
        region: &str,
        tier: Tier,
        count: usize,
        multiplier: f64,
    ) -> Result<Vec<JobId>, HaulError> {
        self.depot.create_surge(region, tier, count, multiplier).await
    }

    pub async fn suspend_actor(&self, actor: &ActorId, until: i64) -> Result<(), HaulError> {
        self.depot.suspend(actor, until).await
    }

    pub async fn penalize_window(
        &self,
        load_id: LoadId,
        secs: i64,
        reason: &str,
    ) -> Result<i64, HaulError> {
        self.depot.penalize_window(load_id, secs, reason).await
    }
}
