//! Reservation, acceptance and the load lifecycle.
//!
//! Terminal transitions all funnel through [`Depot::terminate`]: the per-load
//! lock is taken first, so whichever path gets there first fills the terminal
//! slot and every later one sees `LoadAlreadyTerminal`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use super::{Depot, log_failure};
use crate::domain::errors::HaulError;
use crate::domain::events::{AuditEventKind, LoadEvent};
use crate::domain::ids::{ActorId, JobId, LoadId};
use crate::domain::load::{ActiveLoad, LoadCommand, LoadStatus, OwnershipMode, ShipperTier};
use crate::domain::outcome::{TerminalOutcome, TerminalRecord, TerminalTrigger};
use crate::ledger::DepositStatus;
use crate::outbox::Effect;
use crate::payout::{self, PayoutOutcome, PayoutSnapshot, Settlement};
use crate::reservation::{Released, Reservation};

/// Facts about the actor supplied at acceptance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptContext {
    pub ownership: OwnershipMode,
    pub shipper_tier: ShipperTier,
}

/// How a terminal transition settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finish {
    /// Pay through the pipeline; integrity may still turn it into a rejection.
    Deliver,
    /// Pro-rated settlement of completed stops.
    Reject,
    Abandon,
    Steal,
    Expire,
}

impl Finish {
    fn outcome(self) -> TerminalOutcome {
        match self {
            Finish::Deliver => TerminalOutcome::Delivered,
            Finish::Reject => TerminalOutcome::Rejected,
            Finish::Abandon => TerminalOutcome::Abandoned,
            Finish::Steal => TerminalOutcome::Stolen,
            Finish::Expire => TerminalOutcome::Expired,
        }
    }
}

impl Depot {
    // ---- reservations ----

    pub async fn reserve(&self, job_id: JobId, actor: &ActorId) -> Result<Reservation, HaulError> {
        let reservation = self
            .reserve_inner(job_id, actor)
            .await
            .inspect_err(|e| log_failure("reserve", e))?;
        tracing::info!(%job_id, %actor, expires_at = reservation.expires_at, "job reserved");
        self.checkpoint().await;
        Ok(reservation)
    }

    async fn reserve_inner(&self, job_id: JobId, actor: &ActorId) -> Result<Reservation, HaulError> {
        let now = self.now();
        let mut dispatch = self.dispatch.lock().await;
        let active_load = self.loads.read().await.by_actor.get(actor).copied();

        let super::Dispatch { board, book } = &mut *dispatch;
        let reserved = book.reserve(
            board,
            &self.config.reservation,
            job_id,
            actor,
            active_load,
            now,
        )?;

        let mut audit = self.audit.lock().await;
        for lapsed in &reserved.reclaimed {
            audit.append(
                lapsed.job_id,
                None,
                &lapsed.actor,
                LoadEvent::new(AuditEventKind::ReservationExpired, json!({ "reclaimed": true })),
                now,
            );
        }
        audit.append(
            job_id,
            None,
            actor,
            LoadEvent::new(
                AuditEventKind::JobReserved,
                json!({ "expires_at": reserved.reservation.expires_at }),
            ),
            now,
        );
        Ok(reserved.reservation)
    }

    pub async fn release(&self, job_id: JobId, actor: &ActorId) -> Result<Released, HaulError> {
        let now = self.now();
        let released = {
            let mut dispatch = self.dispatch.lock().await;
            let super::Dispatch { board, book } = &mut *dispatch;
            let released = book
                .release(board, &self.config.reservation, job_id, actor, now)
                .inspect_err(|e| log_failure("release", e))?;
            self.audit.lock().await.append(
                job_id,
                None,
                actor,
                LoadEvent::new(
                    AuditEventKind::ReservationReleased,
                    json!({
                        "consecutive_releases": released.consecutive_releases,
                        "cooldown_until": released.cooldown_until,
                    }),
                ),
                now,
            );
            released
        };
        if let Some(until) = released.cooldown_until {
            tracing::info!(%actor, until, "release cooldown started");
        }
        tracing::info!(%job_id, %actor, "reservation released");
        self.checkpoint().await;
        Ok(released)
    }

    // ---- acceptance ----

    /// Turn a live reservation into an active load. The only way a load is created.
    pub async fn accept(
        &self,
        job_id: JobId,
        actor: &ActorId,
        context: AcceptContext,
    ) -> Result<LoadId, HaulError> {
        let load_id = self
            .accept_inner(job_id, actor, context)
            .await
            .inspect_err(|e| log_failure("accept", e))?;
        tracing::info!(%job_id, %load_id, %actor, "load accepted");
        self.checkpoint().await;
        Ok(load_id)
    }

    async fn accept_inner(
        &self,
        job_id: JobId,
        actor: &ActorId,
        context: AcceptContext,
    ) -> Result<LoadId, HaulError> {
        // requirement lookup is remote; do it before taking any lock
        let requirements = {
            let dispatch = self.dispatch.lock().await;
            let posting = dispatch.book.ensure_holder(&dispatch.board, job_id, actor, self.now())?;
            posting.requirements.clone()
        };
        let missing = self.collab.requirements.missing(actor, &requirements).await;
        if !missing.is_empty() {
            return Err(HaulError::MissingRequirements {
                actor: actor.clone(),
                missing,
            });
        }

        let now = self.now();
        let mut dispatch = self.dispatch.lock().await;
        let posting = dispatch
            .book
            .ensure_holder(&dispatch.board, job_id, actor, now)?
            .clone();
        let cargo = self.cargo(&posting)?;

        let mut loads = self.loads.write().await;
        if let Some(load_id) = loads.by_actor.get(actor) {
            return Err(HaulError::ActorHasActiveLoad {
                actor: actor.clone(),
                load_id: *load_id,
            });
        }
        let mut ledger = self.ledger.lock().await;
        ledger.ensure_funds(actor, posting.deposit)?;

        // checks done; writes start here
        let load_id = self.collab.ids.load_id();
        ledger.hold_deposit(load_id, actor, posting.deposit, now)?;

        let super::Dispatch { board, book } = &mut *dispatch;
        book.complete_acceptance(board, job_id, actor);
        let accepted = board.get(job_id).cloned().unwrap_or(posting);

        let load = ActiveLoad::new(
            load_id,
            accepted,
            cargo,
            actor.clone(),
            context.ownership,
            context.shipper_tier,
            now,
        );
        let event = LoadEvent::new(
            AuditEventKind::LoadAccepted,
            json!({
                "deposit": load.deposit,
                "window_expires_at": load.window_expires_at,
                "ownership": load.ownership,
                "shipper_tier": load.shipper_tier,
            }),
        );
        loads.by_actor.insert(actor.clone(), load_id);
        loads.active.insert(load_id, Arc::new(Mutex::new(load)));

        self.audit
            .lock()
            .await
            .append(job_id, Some(load_id), actor, event, now);
        Ok(load_id)
    }

    // ---- sub-events ----

    /// Apply one reported sub-event. Returns the audit sequence number, or
    /// `None` when the report was a replay and changed nothing.
    pub async fn report(
        &self,
        load_id: LoadId,
        actor: &ActorId,
        command: LoadCommand,
    ) -> Result<Option<u64>, HaulError> {
        let operation = command.name();
        let seq = self
            .report_inner(load_id, actor, command)
            .await
            .inspect_err(|e| log_failure(operation, e))?;
        match seq {
            Some(seq) => {
                tracing::info!(%load_id, operation, seq, "load updated");
                self.checkpoint().await;
            }
            None => tracing::debug!(%load_id, operation, "replayed report ignored"),
        }
        Ok(seq)
    }

    async fn report_inner(
        &self,
        load_id: LoadId,
        actor: &ActorId,
        command: LoadCommand,
    ) -> Result<Option<u64>, HaulError> {
        let handle = self.loads.read().await.handle(load_id)?;
        let mut load = handle.lock().await;
        load.ensure_open()?;
        load.ensure_owner(actor)?;

        let cargo = self.cargo(&load.posting)?;
        let now = self.now();
        let Some(event) = load.apply(command, cargo, now)? else {
            return Ok(None);
        };
        let seq = self
            .audit
            .lock()
            .await
            .append(load.job_id, Some(load_id), actor, event, now);
        Ok(Some(seq))
    }

    /// Abuse penalty; shortens the window.
    pub async fn penalize_window(
        &self,
        load_id: LoadId,
        secs: i64,
        reason: &str,
    ) -> Result<i64, HaulError> {
        let expires_at = async {
            let handle = self.loads.read().await.handle(load_id)?;
            let mut load = handle.lock().await;
            let event = load.penalize_window(secs, reason)?;
            let now = self.now();
            self.audit
                .lock()
                .await
                .append(load.job_id, Some(load_id), &load.actor, event, now);
            Ok::<_, HaulError>(load.window_expires_at)
        }
        .await
        .inspect_err(|e| log_failure("penalize_window", e))?;
        tracing::info!(%load_id, secs, reason, "window penalized");
        self.checkpoint().await;
        Ok(expires_at)
    }

    // ---- terminal transitions ----

    /// Deliver from `at_destination`. Integrity below the threshold turns it
    /// into a rejection.
    pub async fn deliver(&self, load_id: LoadId, actor: &ActorId) -> Result<TerminalRecord, HaulError> {
        self.terminate(load_id, "deliver", Some(actor), |load, _| {
            require_status(load, "deliver", &[LoadStatus::AtDestination])?;
            Ok((Finish::Deliver, TerminalTrigger::Actor))
        })
        .await
    }

    /// Refuse the rest of the route at a stop or at the destination.
    pub async fn reject(&self, load_id: LoadId, actor: &ActorId) -> Result<TerminalRecord, HaulError> {
        self.terminate(load_id, "reject", Some(actor), |load, _| {
            require_status(load, "reject", &[LoadStatus::AtStop, LoadStatus::AtDestination])?;
            Ok((Finish::Reject, TerminalTrigger::Actor))
        })
        .await
    }

    pub async fn abandon(&self, load_id: LoadId, actor: &ActorId) -> Result<TerminalRecord, HaulError> {
        self.terminate(load_id, "abandon", Some(actor), |_, _| {
            Ok((Finish::Abandon, TerminalTrigger::Actor))
        })
        .await
    }

    pub async fn mark_stolen(
        &self,
        load_id: LoadId,
        actor: &ActorId,
    ) -> Result<TerminalRecord, HaulError> {
        self.terminate(load_id, "mark_stolen", Some(actor), |load, _| {
            require_status(
                load,
                "mark_stolen",
                &[
                    LoadStatus::InTransit,
                    LoadStatus::AtStop,
                    LoadStatus::DistressActive,
                ],
            )?;
            Ok((Finish::Steal, TerminalTrigger::Actor))
        })
        .await
    }

    /// Expire a load whose hard deadline has passed.
    pub async fn mark_expired(&self, load_id: LoadId) -> Result<TerminalRecord, HaulError> {
        let ratio = self.config.lifecycle.expiry_ratio;
        self.terminate(load_id, "mark_expired", None, move |load, now| {
            let deadline = load.hard_deadline(ratio);
            if now <= deadline {
                return Err(HaulError::DeadlineNotReached { load_id, deadline });
            }
            Ok((Finish::Expire, TerminalTrigger::Deadline))
        })
        .await
    }

    /// Abandon on behalf of an owner who has been away too long. The absence
    /// is measured again under the load lock.
    pub(crate) async fn abandon_absent(
        &self,
        load_id: LoadId,
        last_seen: Option<i64>,
    ) -> Result<TerminalRecord, HaulError> {
        let grace = self.config.recovery.grace_secs;
        self.terminate(load_id, "abandon_absent", None, move |load, now| {
            let since = last_seen
                .unwrap_or(load.accepted_at)
                .max(load.extended_through);
            if now - since <= grace {
                return Err(HaulError::GraceNotElapsed { load_id });
            }
            Ok((Finish::Abandon, TerminalTrigger::Absence))
        })
        .await
    }

    /// Administrative delivery from any open status. Payout rules still apply.
    pub(crate) async fn force_deliver(&self, load_id: LoadId) -> Result<TerminalRecord, HaulError> {
        self.terminate(load_id, "force_deliver", None, |_, _| {
            Ok((Finish::Deliver, TerminalTrigger::Admin))
        })
        .await
    }

    pub(crate) async fn force_abandon(&self, load_id: LoadId) -> Result<TerminalRecord, HaulError> {
        self.terminate(load_id, "force_abandon", None, |_, _| {
            Ok((Finish::Abandon, TerminalTrigger::Admin))
        })
        .await
    }

    async fn terminate<F>(
        &self,
        load_id: LoadId,
        operation: &'static str,
        by: Option<&ActorId>,
        plan: F,
    ) -> Result<TerminalRecord, HaulError>
    where
        F: FnOnce(&ActiveLoad, i64) -> Result<(Finish, TerminalTrigger), HaulError>,
    {
        let record = self
            .terminate_inner(load_id, by, plan)
            .await
            .inspect_err(|e| log_failure(operation, e))?;
        tracing::info!(
            %load_id,
            operation,
            outcome = ?record.outcome,
            trigger = ?record.trigger,
            paid = record.amount_paid(),
            deposit = ?record.deposit,
            "load finished"
        );
        self.checkpoint().await;
        Ok(record)
    }

    async fn terminate_inner<F>(
        &self,
        load_id: LoadId,
        by: Option<&ActorId>,
        plan: F,
    ) -> Result<TerminalRecord, HaulError>
    where
        F: FnOnce(&ActiveLoad, i64) -> Result<(Finish, TerminalTrigger), HaulError>,
    {
        let handle = self.loads.read().await.handle(load_id)?;
        let mut load = handle.lock().await;
        load.ensure_open()?;
        if let Some(actor) = by {
            load.ensure_owner(actor)?;
        }
        let now = self.now();
        let (finish, trigger) = plan(&load, now)?;
        let cargo = self.cargo(&load.posting)?;

        let settlement = match finish {
            Finish::Deliver => Some(Settlement::Delivery),
            Finish::Reject => Some(Settlement::PartialRejection),
            _ => None,
        };
        let payout = match settlement {
            Some(settlement) => {
                let convoy = self
                    .collab
                    .population
                    .online_in_region(&load.posting.region);
                let config = self.payout_config().await;
                let snapshot = PayoutSnapshot::from_load(&load, cargo, now, convoy);
                Some(payout::compute(&config, &snapshot, settlement))
            }
            None => None,
        };

        let mut outcome = finish.outcome();
        let mut trigger = trigger;
        if finish == Finish::Deliver
            && payout
                .as_ref()
                .is_some_and(|p| p.outcome == PayoutOutcome::Rejected)
        {
            outcome = TerminalOutcome::Rejected;
            trigger = TerminalTrigger::Integrity;
        }
        let paid = payout.as_ref().map(|p| p.amount).unwrap_or(0);
        let deposit = match outcome {
            TerminalOutcome::Delivered => DepositStatus::Returned,
            TerminalOutcome::Rejected if paid > 0 => DepositStatus::Returned,
            _ => DepositStatus::Forfeited,
        };
        let record = TerminalRecord {
            outcome,
            trigger,
            at: now,
            payout,
            deposit,
        };

        let mut dispatch = self.dispatch.lock().await;
        let mut loads = self.loads.write().await;
        let mut ledger = self.ledger.lock().await;
        let mut audit = self.audit.lock().await;
        let mut outbox = self.outbox.lock().await;

        // the deposit is the only step that can refuse; nothing is written before it
        ledger.resolve_deposit(load_id, deposit, now)?;
        ledger.credit_payout(&load.actor, load_id, paid, now);

        let board_status = outcome.board_status(trigger);
        if let Err(e) = dispatch.board.set_status(load.job_id, board_status) {
            tracing::warn!(%load_id, error = %e, "posting missing while finishing load");
        }

        audit.append(
            load.job_id,
            Some(load_id),
            &load.actor,
            LoadEvent::new(
                outcome.audit_kind(),
                json!({
                    "trigger": trigger,
                    "amount": paid,
                    "deposit": deposit,
                    "payout": record.payout,
                }),
            ),
            now,
        );

        load.terminal = Some(record.clone());
        loads.active.remove(&load_id);
        if loads.by_actor.get(&load.actor) == Some(&load_id) {
            loads.by_actor.remove(&load.actor);
        }
        loads.archived.insert(load_id, load.clone());

        outbox.push(
            Effect::Reputation {
                actor: load.actor.clone(),
                event: outcome.reputation_event().to_string(),
                tier: load.posting.tier,
            },
            now,
        );
        outbox.push(
            Effect::Notification {
                actor: load.actor.clone(),
                message: format!("load {load_id} {}: paid {paid}", outcome.reputation_event()),
            },
            now,
        );

        Ok(record)
    }
}

fn require_status(
    load: &ActiveLoad,
    operation: &'static str,
    allowed: &[LoadStatus],
) -> Result<(), HaulError> {
    if allowed.contains(&load.status) {
        return Ok(());
    }
    Err(HaulError::InvalidTransition {
        load_id: load.load_id,
        status: load.status,
        operation,
    })
}
