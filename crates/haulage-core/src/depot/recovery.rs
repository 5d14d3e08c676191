//! Recovery sweep and reconnect handling.
//!
//! Every step is idempotent and re-checks its condition under the lock it
//! mutates, so overlapping sweeps (interval tick plus a reconnect) are harmless.

use serde::Serialize;
use serde_json::json;

use super::{Depot, Dispatch};
use crate::domain::errors::{ErrorKind, HaulError};
use crate::domain::events::{AuditEventKind, LoadEvent};
use crate::domain::ids::{ActorId, LoadId};
use crate::outbox::Effect;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub reservations_expired: usize,
    pub postings_expired: usize,
    pub postings_posted: usize,
    pub postings_pruned: usize,
    pub suspensions_lifted: usize,
    pub policies_expired: usize,
    pub claims_paid: usize,
    pub loads_abandoned: usize,
    pub loads_expired: usize,
    /// Loads that could not be resolved this tick; retried on the next one.
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconnectReport {
    /// New window end when the gap was credited.
    pub window_expires_at: Option<i64>,
    pub sweep: SweepReport,
}

impl Depot {
    pub async fn sweep(&self) -> SweepReport {
        let now = self.now();
        let mut report = SweepReport::default();

        {
            let mut dispatch = self.dispatch.lock().await;
            let Dispatch { board, book } = &mut *dispatch;

            let lapsed = book.expire(board, now);
            report.reservations_expired = lapsed.len();
            report.postings_expired = board.expire_stale(now).len();
            let refreshed =
                board.refresh_due(&self.config.board, &self.catalog, self.collab.ids.as_ref(), now);
            report.postings_expired += refreshed.expired.len();
            report.postings_posted = refreshed.posted.len();
            report.postings_pruned = board.prune(now, self.config.board.retention_secs);
            report.suspensions_lifted = book.lift_expired(now).len();

            if !lapsed.is_empty() {
                let mut audit = self.audit.lock().await;
                for hold in lapsed {
                    audit.append(
                        hold.job_id,
                        None,
                        &hold.actor,
                        LoadEvent::new(AuditEventKind::ReservationExpired, json!({ "swept": true })),
                        now,
                    );
                }
            }
        }

        {
            let mut ledger = self.ledger.lock().await;
            report.policies_expired = ledger.expire_policies(now).len();
            let paid = ledger.pay_due_claims(now);
            report.claims_paid = paid.len();
            if !paid.is_empty() {
                let mut audit = self.audit.lock().await;
                let mut outbox = self.outbox.lock().await;
                for claim in paid {
                    audit.append(
                        claim.job_id,
                        Some(claim.load_id),
                        &claim.actor,
                        LoadEvent::new(
                            AuditEventKind::ClaimPaid,
                            json!({ "claim_id": claim.claim_id.to_string(), "amount": claim.amount }),
                        ),
                        now,
                    );
                    outbox.push(
                        Effect::Notification {
                            actor: claim.actor.clone(),
                            message: format!("claim {} paid: {}", claim.claim_id, claim.amount),
                        },
                        now,
                    );
                }
            }
        }

        let owners: Vec<(ActorId, LoadId)> = {
            let loads = self.loads.read().await;
            loads
                .by_actor
                .iter()
                .map(|(actor, load_id)| (actor.clone(), *load_id))
                .collect()
        };
        for (actor, load_id) in owners {
            let presence = self.collab.sessions.presence(&actor).await;
            // offline owners are only ever abandoned, never expired
            let result = if presence.online {
                self.mark_expired(load_id).await
            } else {
                let since = presence.last_seen.unwrap_or(now).min(now);
                self.note_offline(load_id, since).await;
                self.abandon_absent(load_id, presence.last_seen).await
            };
            match result {
                Ok(_) if presence.online => report.loads_expired += 1,
                Ok(_) => report.loads_abandoned += 1,
                Err(e) if skippable(&e) => {}
                Err(_) => report.failures += 1,
            }
        }

        if report != SweepReport::default() {
            tracing::info!(?report, "sweep finished");
        } else {
            tracing::debug!("sweep found nothing to do");
        }
        self.checkpoint().await;
        report
    }

    /// Session-layer hook: the owner's connection dropped just now.
    pub async fn disconnect(&self, actor: &ActorId) {
        let Some(load_id) = self.loads.read().await.by_actor.get(actor).copied() else {
            return;
        };
        self.note_offline(load_id, self.now()).await;
        self.checkpoint().await;
    }

    /// Credit the absence the server recorded for this owner, then sweep.
    /// Nothing is credited while the session layer still reports the owner
    /// offline, or when no absence was recorded.
    pub async fn reconnect(&self, actor: &ActorId) -> Result<ReconnectReport, HaulError> {
        let window_expires_at = self
            .credit_absence(actor)
            .await
            .inspect_err(|e| super::log_failure("reconnect", e))?;
        if let Some(expires_at) = window_expires_at {
            tracing::info!(%actor, expires_at, "window extended on reconnect");
        }
        let sweep = self.sweep().await;
        Ok(ReconnectReport {
            window_expires_at,
            sweep,
        })
    }

    async fn note_offline(&self, load_id: LoadId, since: i64) {
        let Ok(handle) = self.loads.read().await.handle(load_id) else {
            return;
        };
        if handle.lock().await.mark_offline(since) {
            tracing::debug!(%load_id, since, "owner offline");
        }
    }

    async fn credit_absence(&self, actor: &ActorId) -> Result<Option<i64>, HaulError> {
        if !self.collab.sessions.presence(actor).await.online {
            tracing::debug!(%actor, "reconnect before the session layer saw the owner back");
            return Ok(None);
        }
        let now = self.now();
        let handle = {
            let loads = self.loads.read().await;
            let Some(load_id) = loads.by_actor.get(actor) else {
                return Ok(None);
            };
            loads.handle(*load_id)?
        };
        let mut load = handle.lock().await;
        let Some(event) = load.credit_absence(now) else {
            return Ok(None);
        };
        self.audit
            .lock()
            .await
            .append(load.job_id, Some(load.load_id), actor, event, now);
        Ok(Some(load.window_expires_at))
    }
}

/// Conditions that simply no longer hold, or a load someone else finished.
fn skippable(err: &HaulError) -> bool {
    matches!(
        err,
        HaulError::GraceNotElapsed { .. }
            | HaulError::DeadlineNotReached { .. }
            | HaulError::LoadNotFound(_)
    ) || err.kind() == ErrorKind::Consistency
}
