//! Ledger - 口座・保証金・保険
//!
//! 金額はすべて最小通貨単位の `i64` です。
//! 残高を動かす操作は必ず journal に 1 行残します。
//!
//! # 保証金の保存則
//! `held == returned + forfeited + outstanding` が常に成り立ちます。
//! 保証金は積荷の生成と同時に拘束され、ちょうど 1 回だけ解決されます。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::catalog::Tier;
use crate::domain::errors::HaulError;
use crate::domain::ids::{ActorId, ClaimId, JobId, LoadId, PolicyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Held,
    Returned,
    Forfeited,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositEntry {
    pub load_id: LoadId,
    pub actor: ActorId,
    pub amount: i64,
    pub status: DepositStatus,
    pub held_at: i64,
    pub resolved_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Active,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsurancePolicy {
    pub policy_id: PolicyId,
    pub actor: ActorId,
    /// Coverage window `[starts_at, ends_at)`.
    pub starts_at: i64,
    pub ends_at: i64,
    pub max_tier: Tier,
    pub premium: i64,
    pub status: PolicyStatus,
    #[serde(default)]
    pub purchased_at: i64,
}

impl InsurancePolicy {
    /// Coverage for a load of `tier` accepted at `at`. A policy never covers
    /// anything accepted before it was bought.
    pub fn covers(&self, tier: Tier, at: i64) -> bool {
        tier <= self.max_tier
            && self.purchased_at <= at
            && self.starts_at <= at
            && at < self.ends_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Approved,
    Denied,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsuranceClaim {
    pub claim_id: ClaimId,
    pub job_id: JobId,
    pub load_id: LoadId,
    pub actor: ActorId,
    pub policy_id: Option<PolicyId>,
    pub amount: i64,
    pub status: ClaimStatus,
    pub filed_at: i64,
    pub payable_at: i64,
    pub paid_at: Option<i64>,
}

/// What moved a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Funding,
    DepositHeld,
    DepositReturned,
    DepositForfeited,
    Payout,
    Premium,
    ClaimPaid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub actor: ActorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_id: Option<LoadId>,
    pub kind: EntryKind,
    /// Signed balance change; 0 for forfeits (the money already left the account).
    pub delta: i64,
    pub at: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DepositTotals {
    pub held: i64,
    pub returned: i64,
    pub forfeited: i64,
    pub outstanding: i64,
}

impl DepositTotals {
    pub fn is_conserved(&self) -> bool {
        self.held == self.returned + self.forfeited + self.outstanding
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    accounts: BTreeMap<ActorId, i64>,
    deposits: BTreeMap<LoadId, DepositEntry>,
    policies: BTreeMap<PolicyId, InsurancePolicy>,
    claims: BTreeMap<ClaimId, InsuranceClaim>,
    journal: Vec<JournalEntry>,
    next_seq: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, actor: &ActorId) -> i64 {
        self.accounts.get(actor).copied().unwrap_or(0)
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn deposit(&self, load_id: LoadId) -> Option<&DepositEntry> {
        self.deposits.get(&load_id)
    }

    pub fn policy(&self, policy_id: PolicyId) -> Option<&InsurancePolicy> {
        self.policies.get(&policy_id)
    }

    pub fn claim(&self, claim_id: ClaimId) -> Option<&InsuranceClaim> {
        self.claims.get(&claim_id)
    }

    pub fn claim_for_load(&self, load_id: LoadId) -> Option<&InsuranceClaim> {
        self.claims.values().find(|c| c.load_id == load_id)
    }

    fn record(
        &mut self,
        actor: &ActorId,
        load_id: Option<LoadId>,
        kind: EntryKind,
        delta: i64,
        at: i64,
    ) {
        *self.accounts.entry(actor.clone()).or_insert(0) += delta;
        self.next_seq += 1;
        self.journal.push(JournalEntry {
            seq: self.next_seq,
            actor: actor.clone(),
            load_id,
            kind,
            delta,
            at,
        });
    }

    /// Top up an account from outside the system.
    pub fn fund(&mut self, actor: &ActorId, amount: i64, at: i64) -> Result<(), HaulError> {
        if amount <= 0 {
            return Err(HaulError::InvalidInput {
                field: "amount",
                reason: "funding must be positive".into(),
            });
        }
        self.record(actor, None, EntryKind::Funding, amount, at);
        Ok(())
    }

    pub fn ensure_funds(&self, actor: &ActorId, needed: i64) -> Result<(), HaulError> {
        let available = self.balance(actor);
        if available < needed {
            return Err(HaulError::InsufficientFunds {
                actor: actor.clone(),
                needed,
                available,
            });
        }
        Ok(())
    }

    pub fn hold_deposit(
        &mut self,
        load_id: LoadId,
        actor: &ActorId,
        amount: i64,
        at: i64,
    ) -> Result<(), HaulError> {
        if self.deposits.contains_key(&load_id) {
            return Err(HaulError::Invariant(format!(
                "deposit for {load_id} already exists"
            )));
        }
        self.ensure_funds(actor, amount)?;
        self.record(actor, Some(load_id), EntryKind::DepositHeld, -amount, at);
        self.deposits.insert(
            load_id,
            DepositEntry {
                load_id,
                actor: actor.clone(),
                amount,
                status: DepositStatus::Held,
                held_at: at,
                resolved_at: None,
            },
        );
        Ok(())
    }

    /// Settle a held deposit. Resolving twice is an invariant break.
    pub fn resolve_deposit(
        &mut self,
        load_id: LoadId,
        to: DepositStatus,
        at: i64,
    ) -> Result<i64, HaulError> {
        let entry = self
            .deposits
            .get_mut(&load_id)
            .ok_or_else(|| HaulError::Invariant(format!("no deposit held for {load_id}")))?;
        if entry.status != DepositStatus::Held {
            return Err(HaulError::Invariant(format!(
                "deposit for {load_id} already {:?}",
                entry.status
            )));
        }
        if to == DepositStatus::Held {
            return Err(HaulError::Invariant("deposit cannot resolve to held".into()));
        }
        entry.status = to;
        entry.resolved_at = Some(at);
        let (actor, amount) = (entry.actor.clone(), entry.amount);
        match to {
            DepositStatus::Returned => {
                self.record(&actor, Some(load_id), EntryKind::DepositReturned, amount, at)
            }
            _ => self.record(&actor, Some(load_id), EntryKind::DepositForfeited, 0, at),
        }
        Ok(amount)
    }

    pub fn credit_payout(&mut self, actor: &ActorId, load_id: LoadId, amount: i64, at: i64) {
        if amount > 0 {
            self.record(actor, Some(load_id), EntryKind::Payout, amount, at);
        }
    }

    pub fn deposit_totals(&self) -> DepositTotals {
        self.deposits
            .values()
            .fold(DepositTotals::default(), |mut t, d| {
                t.held += d.amount;
                match d.status {
                    DepositStatus::Held => t.outstanding += d.amount,
                    DepositStatus::Returned => t.returned += d.amount,
                    DepositStatus::Forfeited => t.forfeited += d.amount,
                }
                t
            })
    }

    /// Debit the premium and record an active policy.
    pub fn purchase_policy(&mut self, mut policy: InsurancePolicy, at: i64) -> Result<(), HaulError> {
        if policy.starts_at < at {
            return Err(HaulError::InvalidInput {
                field: "starts_at",
                reason: "coverage cannot start before the purchase".into(),
            });
        }
        if policy.ends_at <= policy.starts_at {
            return Err(HaulError::InvalidInput {
                field: "ends_at",
                reason: "coverage window is empty".into(),
            });
        }
        if policy.premium < 0 {
            return Err(HaulError::InvalidInput {
                field: "premium",
                reason: "premium cannot be negative".into(),
            });
        }
        self.ensure_funds(&policy.actor, policy.premium)?;
        self.record(&policy.actor, None, EntryKind::Premium, -policy.premium, at);
        policy.purchased_at = at;
        self.policies.insert(policy.policy_id, policy);
        Ok(())
    }

    /// Policy of `actor` covering `tier` at `at`, if any. Status is ignored:
    /// coverage is judged by the window, not by whether the sweep has run.
    pub fn covering_policy(&self, actor: &ActorId, tier: Tier, at: i64) -> Option<&InsurancePolicy> {
        self.policies
            .values()
            .find(|p| &p.actor == actor && p.covers(tier, at))
    }

    pub fn expire_policies(&mut self, now: i64) -> Vec<PolicyId> {
        self.policies
            .values_mut()
            .filter(|p| p.status == PolicyStatus::Active && p.ends_at <= now)
            .map(|p| {
                p.status = PolicyStatus::Expired;
                p.policy_id
            })
            .collect()
    }

    /// Record a claim decided by the caller. One claim per load.
    pub fn file_claim(&mut self, claim: InsuranceClaim) -> Result<&InsuranceClaim, HaulError> {
        if self.claim_for_load(claim.load_id).is_some() {
            return Err(HaulError::DuplicateClaim(claim.load_id));
        }
        let id = claim.claim_id;
        Ok(self.claims.entry(id).or_insert(claim))
    }

    /// Pay every approved claim whose delay has elapsed.
    pub fn pay_due_claims(&mut self, now: i64) -> Vec<InsuranceClaim> {
        let due: Vec<ClaimId> = self
            .claims
            .values()
            .filter(|c| c.status == ClaimStatus::Approved && c.payable_at <= now)
            .map(|c| c.claim_id)
            .collect();

        let mut paid = Vec::with_capacity(due.len());
        for id in due {
            let Some(claim) = self.claims.get_mut(&id) else {
                continue;
            };
            claim.status = ClaimStatus::Paid;
            claim.paid_at = Some(now);
            let claim = claim.clone();
            self.record(&claim.actor, Some(claim.load_id), EntryKind::ClaimPaid, claim.amount, now);
            paid.push(claim);
        }
        paid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn actor() -> ActorId {
        ActorId::from("driver-7")
    }

    fn load_id() -> LoadId {
        LoadId::from_ulid(Ulid::new())
    }

    fn funded(amount: i64) -> Ledger {
        let mut ledger = Ledger::new();
        ledger.fund(&actor(), amount, 0).unwrap();
        ledger
    }

    fn policy(max_tier: u8, starts_at: i64, ends_at: i64) -> InsurancePolicy {
        InsurancePolicy {
            policy_id: PolicyId::from_ulid(Ulid::new()),
            actor: actor(),
            starts_at,
            ends_at,
            max_tier: Tier::new(max_tier).unwrap(),
            premium: 200,
            status: PolicyStatus::Active,
            purchased_at: starts_at,
        }
    }

    #[test]
    fn backdated_policy_is_refused() {
        let mut ledger = funded(1_000);
        let err = ledger.purchase_policy(policy(3, 50, 500), 100).unwrap_err();
        assert!(matches!(err, HaulError::InvalidInput { field: "starts_at", .. }));
        assert_eq!(ledger.balance(&actor()), 1_000);
    }

    #[test]
    fn policy_does_not_cover_loads_accepted_before_purchase() {
        let mut p = policy(3, 100, 500);
        p.purchased_at = 200;
        assert!(!p.covers(Tier::new(1).unwrap(), 150));
        assert!(p.covers(Tier::new(1).unwrap(), 200));
    }

    #[test]
    fn hold_moves_money_out_of_the_account() {
        let mut ledger = funded(5_000);
        ledger.hold_deposit(load_id(), &actor(), 3_000, 10).unwrap();
        assert_eq!(ledger.balance(&actor()), 2_000);
        assert_eq!(ledger.deposit_totals().outstanding, 3_000);
    }

    #[test]
    fn hold_without_funds_changes_nothing() {
        let mut ledger = funded(100);
        let err = ledger.hold_deposit(load_id(), &actor(), 3_000, 10).unwrap_err();
        assert!(matches!(err, HaulError::InsufficientFunds { needed: 3_000, available: 100, .. }));
        assert_eq!(ledger.balance(&actor()), 100);
        assert_eq!(ledger.journal().len(), 1);
    }

    #[test]
    fn returned_deposit_is_credited_back() {
        let mut ledger = funded(5_000);
        let id = load_id();
        ledger.hold_deposit(id, &actor(), 3_000, 10).unwrap();
        ledger.resolve_deposit(id, DepositStatus::Returned, 20).unwrap();
        assert_eq!(ledger.balance(&actor()), 5_000);
    }

    #[test]
    fn deposit_resolves_exactly_once() {
        let mut ledger = funded(5_000);
        let id = load_id();
        ledger.hold_deposit(id, &actor(), 3_000, 10).unwrap();
        ledger.resolve_deposit(id, DepositStatus::Forfeited, 20).unwrap();
        let err = ledger.resolve_deposit(id, DepositStatus::Returned, 30).unwrap_err();
        assert!(matches!(err, HaulError::Invariant(_)));
        assert_eq!(ledger.balance(&actor()), 2_000);
    }

    #[test]
    fn deposits_are_conserved_across_outcomes() {
        let mut ledger = funded(20_000);
        let ids: Vec<LoadId> = (0..4).map(|_| load_id()).collect();
        for id in &ids {
            ledger.hold_deposit(*id, &actor(), 1_000, 0).unwrap();
        }
        ledger.resolve_deposit(ids[0], DepositStatus::Returned, 1).unwrap();
        ledger.resolve_deposit(ids[1], DepositStatus::Forfeited, 1).unwrap();
        ledger.resolve_deposit(ids[2], DepositStatus::Forfeited, 1).unwrap();

        let totals = ledger.deposit_totals();
        assert!(totals.is_conserved());
        assert_eq!(totals.held, 4_000);
        assert_eq!(totals.returned, 1_000);
        assert_eq!(totals.forfeited, 2_000);
        assert_eq!(totals.outstanding, 1_000);
    }

    #[test]
    fn policy_coverage_uses_window_and_tier() {
        let p = policy(2, 100, 200);
        assert!(p.covers(Tier::new(2).unwrap(), 100));
        assert!(!p.covers(Tier::new(3).unwrap(), 150));
        assert!(!p.covers(Tier::new(1).unwrap(), 200));
        assert!(!p.covers(Tier::new(1).unwrap(), 99));
    }

    #[test]
    fn premium_is_debited_and_policy_expires() {
        let mut ledger = funded(1_000);
        let p = policy(3, 0, 500);
        let id = p.policy_id;
        ledger.purchase_policy(p, 0).unwrap();
        assert_eq!(ledger.balance(&actor()), 800);

        assert!(ledger.expire_policies(499).is_empty());
        assert_eq!(ledger.expire_policies(500), vec![id]);
        assert!(ledger.expire_policies(600).is_empty());
        assert_eq!(ledger.policy(id).unwrap().status, PolicyStatus::Expired);
    }

    #[test]
    fn claims_pay_after_delay_once() {
        let mut ledger = funded(1_000);
        let load = load_id();
        let claim = InsuranceClaim {
            claim_id: ClaimId::from_ulid(Ulid::new()),
            job_id: JobId::from_ulid(Ulid::new()),
            load_id: load,
            actor: actor(),
            policy_id: None,
            amount: 3_000,
            status: ClaimStatus::Approved,
            filed_at: 0,
            payable_at: 86_400,
            paid_at: None,
        };
        ledger.file_claim(claim.clone()).unwrap();
        let dup = ClaimId::from_ulid(Ulid::new());
        assert_eq!(
            ledger.file_claim(InsuranceClaim { claim_id: dup, ..claim }),
            Err(HaulError::DuplicateClaim(load))
        );

        assert!(ledger.pay_due_claims(86_399).is_empty());
        assert_eq!(ledger.pay_due_claims(86_400).len(), 1);
        assert!(ledger.pay_due_claims(90_000).is_empty());
        assert_eq!(ledger.balance(&actor()), 4_000);
    }
}
