//! Insurance - 保険の購入と請求
//!
//! 請求できるのは盗難・放棄で終わった積荷だけです。
//! 補償は積荷の受諾時点で有効だった保険で判定し、
//! 没収された保証金の額を、待機期間の経過後に sweep が支払います。

use serde_json::json;

use super::Depot;
use super::log_failure;
use crate::domain::catalog::Tier;
use crate::domain::errors::HaulError;
use crate::domain::events::{AuditEventKind, LoadEvent};
use crate::domain::ids::{ActorId, LoadId, PolicyId};
use crate::ledger::{ClaimStatus, DepositStatus, InsuranceClaim, InsurancePolicy, PolicyStatus};

const DAY_SECS: i64 = 86_400;

impl Depot {
    /// Premium for covering up to `max_tier` during `[starts_at, ends_at)`.
    pub fn premium_for(&self, max_tier: Tier, starts_at: i64, ends_at: i64) -> i64 {
        let days = ((ends_at - starts_at).max(0) + DAY_SECS - 1) / DAY_SECS;
        self.config.insurance.daily_premium[max_tier.index()] * days
    }

    pub async fn purchase_policy(
        &self,
        actor: &ActorId,
        max_tier: Tier,
        starts_at: i64,
        ends_at: i64,
    ) -> Result<InsurancePolicy, HaulError> {
        let now = self.now();
        let policy = InsurancePolicy {
            policy_id: self.collab.ids.policy_id(),
            actor: actor.clone(),
            starts_at,
            ends_at,
            max_tier,
            premium: self.premium_for(max_tier, starts_at, ends_at),
            status: PolicyStatus::Active,
            purchased_at: now,
        };
        self.ledger
            .lock()
            .await
            .purchase_policy(policy.clone(), now)
            .inspect_err(|e| log_failure("purchase_policy", e))?;
        tracing::info!(%actor, policy_id = %policy.policy_id, premium = policy.premium, "policy purchased");
        self.checkpoint().await;
        Ok(policy)
    }

    pub async fn policy(&self, policy_id: PolicyId) -> Option<InsurancePolicy> {
        self.ledger.lock().await.policy(policy_id).cloned()
    }

    pub async fn claim_for_load(&self, load_id: LoadId) -> Option<InsuranceClaim> {
        self.ledger.lock().await.claim_for_load(load_id).cloned()
    }

    /// File a claim for a stolen or abandoned load. The decision is made on
    /// the spot; an approved claim is paid by a later sweep.
    pub async fn file_claim(
        &self,
        load_id: LoadId,
        actor: &ActorId,
    ) -> Result<InsuranceClaim, HaulError> {
        let claim = self
            .file_claim_inner(load_id, actor)
            .await
            .inspect_err(|e| log_failure("file_claim", e))?;
        tracing::info!(
            %load_id,
            claim_id = %claim.claim_id,
            status = ?claim.status,
            amount = claim.amount,
            "claim filed"
        );
        self.checkpoint().await;
        Ok(claim)
    }

    async fn file_claim_inner(
        &self,
        load_id: LoadId,
        actor: &ActorId,
    ) -> Result<InsuranceClaim, HaulError> {
        let load = {
            let loads = self.loads.read().await;
            match loads.archived.get(&load_id) {
                Some(load) => load.clone(),
                None if loads.active.contains_key(&load_id) => {
                    return Err(HaulError::NotClaimable {
                        load_id,
                        reason: "load is still active".into(),
                    });
                }
                None => return Err(HaulError::LoadNotFound(load_id)),
            }
        };
        load.ensure_owner(actor)?;
        let terminal = load.terminal.as_ref().ok_or_else(|| {
            HaulError::Invariant(format!("archived load {load_id} has no terminal record"))
        })?;
        if !terminal.outcome.is_claimable() {
            return Err(HaulError::NotClaimable {
                load_id,
                reason: format!("outcome {:?} is not insurable", terminal.outcome),
            });
        }

        let now = self.now();
        let mut ledger = self.ledger.lock().await;
        let amount = match ledger.deposit(load_id) {
            Some(d) if d.status == DepositStatus::Forfeited => d.amount,
            Some(_) => 0,
            None => {
                return Err(HaulError::Invariant(format!("no deposit recorded for {load_id}")));
            }
        };
        let policy_id = ledger
            .covering_policy(actor, load.posting.tier, load.accepted_at)
            .map(|p| p.policy_id);
        let status = if policy_id.is_some() && amount > 0 {
            ClaimStatus::Approved
        } else {
            ClaimStatus::Denied
        };
        let claim = ledger
            .file_claim(InsuranceClaim {
                claim_id: self.collab.ids.claim_id(),
                job_id: load.job_id,
                load_id,
                actor: actor.clone(),
                policy_id,
                amount: if status == ClaimStatus::Approved { amount } else { 0 },
                status,
                filed_at: now,
                payable_at: now + self.config.insurance.claim_delay_secs,
                paid_at: None,
            })?
            .clone();

        let kind = match status {
            ClaimStatus::Approved => AuditEventKind::ClaimApproved,
            _ => AuditEventKind::ClaimDenied,
        };
        self.audit.lock().await.append(
            load.job_id,
            Some(load_id),
            actor,
            LoadEvent::new(
                kind,
                json!({
                    "claim_id": claim.claim_id.to_string(),
                    "policy_id": policy_id.map(|p| p.to_string()),
                    "amount": claim.amount,
                    "payable_at": claim.payable_at,
                }),
            ),
            now,
        );
        Ok(claim)
    }
}
