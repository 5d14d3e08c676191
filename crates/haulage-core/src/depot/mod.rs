//! Depot - 配車の正本
//!
//! 掲示板・予約・積荷・台帳・監査ログ・outbox をまとめて保持し、
//! 複数レコードにまたがる遷移を 1 つのトランザクションとして実行します。
//!
//! # ロック順序
//! 積荷 (per-load) → 掲示板+予約 → 積荷レジストリ → 台帳 → 監査ログ → outbox
//!
//! どの操作もこの順でしか取らないので、デッドロックしません。
//! 書き込みは前提条件をすべて確認してから始めます（拒否された呼び出しは痕跡を残さない）。

mod insurance;
mod lifecycle;
mod recovery;
mod snapshot;

#[cfg(test)]
mod tests;

pub use self::lifecycle::AcceptContext;
pub use self::recovery::{ReconnectReport, SweepReport};
pub use self::snapshot::{DepotSnapshot, SNAPSHOT_VERSION};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock};

use crate::audit::AuditLog;
use crate::board::Board;
use crate::config::HaulageConfig;
use crate::domain::catalog::{CargoDefinition, Catalog, Tier};
use crate::domain::errors::{ErrorKind, HaulError};
use crate::domain::events::AuditEvent;
use crate::domain::ids::{ActorId, JobId, LoadId};
use crate::domain::load::ActiveLoad;
use crate::domain::posting::{BoardStatus, JobPosting};
use crate::ledger::{DepositTotals, Ledger};
use crate::outbox::{Outbox, OutboxRecord};
use crate::payout::{self, PayoutConfig, PayoutResult, PayoutSnapshot, Settlement};
use crate::ports::{
    Clock, IdGenerator, PopulationSignal, RequirementChecker, SessionProvider, StateStore,
};
use crate::reservation::{ReservationBook, Standing};

/// Ports the depot calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub sessions: Arc<dyn SessionProvider>,
    pub requirements: Arc<dyn RequirementChecker>,
    pub population: Arc<dyn PopulationSignal>,
    pub store: Option<Arc<dyn StateStore>>,
}

/// Board and reservations share one lock.
struct Dispatch {
    board: Board,
    book: ReservationBook,
}

#[derive(Default)]
struct LoadRegistry {
    active: HashMap<LoadId, Arc<Mutex<ActiveLoad>>>,
    by_actor: HashMap<ActorId, LoadId>,
    archived: BTreeMap<LoadId, ActiveLoad>,
}

impl LoadRegistry {
    /// Active handle, or the right error for an unknown or finished load.
    fn handle(&self, load_id: LoadId) -> Result<Arc<Mutex<ActiveLoad>>, HaulError> {
        if let Some(handle) = self.active.get(&load_id) {
            return Ok(Arc::clone(handle));
        }
        if self.archived.contains_key(&load_id) {
            return Err(HaulError::LoadAlreadyTerminal(load_id));
        }
        Err(HaulError::LoadNotFound(load_id))
    }
}

pub struct Depot {
    config: HaulageConfig,
    payout: RwLock<PayoutConfig>,
    catalog: Arc<Catalog>,
    collab: Collaborators,

    dispatch: Mutex<Dispatch>,
    loads: RwLock<LoadRegistry>,
    ledger: Mutex<Ledger>,
    audit: Mutex<AuditLog>,
    outbox: Mutex<Outbox>,

    checkpoint_gate: Mutex<()>,
    /// Set by every change; the checkpoint holder keeps saving until it clears.
    checkpoint_dirty: AtomicBool,
}

/// Log a failed operation at the level its kind calls for.
fn log_failure(operation: &'static str, err: &HaulError) {
    match err.kind() {
        ErrorKind::Invariant => tracing::error!(operation, error = %err, "invariant violated"),
        ErrorKind::Consistency => tracing::warn!(operation, error = %err, "stale request"),
        ErrorKind::Environmental => tracing::warn!(operation, error = %err, "environment failure"),
        ErrorKind::Validation | ErrorKind::RaceLost => {
            tracing::debug!(operation, error = %err, "request denied")
        }
    }
}

impl Depot {
    /// Fresh depot with a freshly generated board.
    pub fn new(config: HaulageConfig, catalog: Catalog, collab: Collaborators) -> Self {
        let now = collab.clock.unix();
        let mut board = Board::new(&config.board, now);
        let report = board.refresh_due(&config.board, &catalog, collab.ids.as_ref(), now);
        tracing::info!(postings = report.posted.len(), "board generated");

        Self {
            payout: RwLock::new(config.payout.clone()),
            config,
            catalog: Arc::new(catalog),
            collab,
            dispatch: Mutex::new(Dispatch {
                board,
                book: ReservationBook::new(),
            }),
            loads: RwLock::new(LoadRegistry::default()),
            ledger: Mutex::new(Ledger::new()),
            audit: Mutex::new(AuditLog::new()),
            outbox: Mutex::new(Outbox::new()),
            checkpoint_gate: Mutex::new(()),
            checkpoint_dirty: AtomicBool::new(false),
        }
    }

    /// Rebuild a depot from a persisted snapshot.
    pub fn restore(
        config: HaulageConfig,
        catalog: Catalog,
        collab: Collaborators,
        snapshot: DepotSnapshot,
    ) -> Result<Self, HaulError> {
        let mut registry = LoadRegistry::default();
        for load in snapshot.active_loads {
            if load.is_terminal() {
                return Err(HaulError::Invariant(format!(
                    "terminal load {} stored as active",
                    load.load_id
                )));
            }
            if let Some(other) = registry.by_actor.insert(load.actor.clone(), load.load_id) {
                return Err(HaulError::Invariant(format!(
                    "actor {} owns both {other} and {}",
                    load.actor, load.load_id
                )));
            }
            registry
                .active
                .insert(load.load_id, Arc::new(Mutex::new(load)));
        }
        for load in snapshot.archived_loads {
            registry.archived.insert(load.load_id, load);
        }

        let totals = snapshot.ledger.deposit_totals();
        if !totals.is_conserved() {
            return Err(HaulError::Invariant(format!(
                "deposit totals do not balance: {totals:?}"
            )));
        }

        let mut outbox = snapshot.outbox;
        outbox.requeue_in_flight();

        let mut payout = config.payout.clone();
        payout.economy_multiplier = snapshot.economy_multiplier;

        tracing::info!(
            active = registry.active.len(),
            archived = registry.archived.len(),
            audit_events = snapshot.audit.len(),
            "depot restored"
        );

        Ok(Self {
            payout: RwLock::new(payout),
            config,
            catalog: Arc::new(catalog),
            collab,
            dispatch: Mutex::new(Dispatch {
                board: snapshot.board,
                book: snapshot.reservations,
            }),
            loads: RwLock::new(registry),
            ledger: Mutex::new(snapshot.ledger),
            audit: Mutex::new(AuditLog::from_events(snapshot.audit)),
            outbox: Mutex::new(outbox),
            checkpoint_gate: Mutex::new(()),
            checkpoint_dirty: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &HaulageConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn now(&self) -> i64 {
        self.collab.clock.unix()
    }

    fn cargo(&self, posting: &JobPosting) -> Result<&CargoDefinition, HaulError> {
        self.catalog.cargo(posting.cargo).ok_or_else(|| {
            HaulError::Invariant(format!("cargo {:?} missing from catalog", posting.cargo))
        })
    }

    async fn payout_config(&self) -> PayoutConfig {
        self.payout.read().await.clone()
    }

    // ---- queries ----

    pub async fn posting(&self, job_id: JobId) -> Option<JobPosting> {
        self.dispatch.lock().await.board.get(job_id).cloned()
    }

    /// Available postings, oldest first.
    pub async fn listing(&self, region: Option<&str>, tier: Option<Tier>) -> Vec<JobPosting> {
        let dispatch = self.dispatch.lock().await;
        dispatch
            .board
            .available(region, tier)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn board_counts(&self) -> BTreeMap<BoardStatus, usize> {
        self.dispatch.lock().await.board.counts()
    }

    pub async fn standing(&self, actor: &ActorId) -> Standing {
        self.dispatch.lock().await.book.standing(actor)
    }

    pub async fn active_load_for(&self, actor: &ActorId) -> Option<ActiveLoad> {
        let handle = {
            let loads = self.loads.read().await;
            let load_id = loads.by_actor.get(actor)?;
            Arc::clone(loads.active.get(load_id)?)
        };
        let load = handle.lock().await;
        Some(load.clone())
    }

    /// Active or archived.
    pub async fn load(&self, load_id: LoadId) -> Option<ActiveLoad> {
        let handle = {
            let loads = self.loads.read().await;
            if let Some(archived) = loads.archived.get(&load_id) {
                return Some(archived.clone());
            }
            Arc::clone(loads.active.get(&load_id)?)
        };
        let load = handle.lock().await;
        Some(load.clone())
    }

    /// `(active, archived)`
    pub async fn load_counts(&self) -> (usize, usize) {
        let loads = self.loads.read().await;
        (loads.active.len(), loads.archived.len())
    }

    pub async fn audit_events_for_load(&self, load_id: LoadId, after_seq: u64) -> Vec<AuditEvent> {
        self.audit.lock().await.for_load(load_id, after_seq)
    }

    pub async fn audit_events_for_job(&self, job_id: JobId) -> Vec<AuditEvent> {
        self.audit.lock().await.for_job(job_id)
    }

    /// Events stamped within `[from, to)`, oldest first.
    pub async fn audit_events_between(&self, from: i64, to: i64) -> Vec<AuditEvent> {
        self.audit.lock().await.between(from, to)
    }

    pub async fn audit_len(&self) -> usize {
        self.audit.lock().await.len()
    }

    pub async fn balance(&self, actor: &ActorId) -> i64 {
        self.ledger.lock().await.balance(actor)
    }

    pub async fn deposit_totals(&self) -> DepositTotals {
        self.ledger.lock().await.deposit_totals()
    }

    pub async fn ledger(&self) -> Ledger {
        self.ledger.lock().await.clone()
    }

    /// Top up an actor's account.
    pub async fn fund(&self, actor: &ActorId, amount: i64) -> Result<i64, HaulError> {
        let now = self.now();
        let balance = {
            let mut ledger = self.ledger.lock().await;
            ledger.fund(actor, amount, now)?;
            ledger.balance(actor)
        };
        self.checkpoint().await;
        Ok(balance)
    }

    /// Estimated payout for an on-time, intact delivery of `job_id`.
    pub async fn preview(
        &self,
        job_id: JobId,
        context: AcceptContext,
    ) -> Result<PayoutResult, HaulError> {
        let posting = self
            .posting(job_id)
            .await
            .ok_or(HaulError::JobNotFound(job_id))?;
        let cargo = self.cargo(&posting)?;
        let config = self.payout_config().await;
        let snapshot = PayoutSnapshot::preview(
            &posting,
            cargo,
            context.ownership,
            context.shipper_tier,
            self.now(),
        );
        Ok(payout::compute(&config, &snapshot, Settlement::Delivery))
    }

    // ---- outbox ----

    pub async fn pull_effects(&self, limit: usize) -> Vec<OutboxRecord> {
        self.outbox.lock().await.pull(limit)
    }

    pub async fn ack_effect(&self, seq: u64) -> bool {
        self.outbox.lock().await.ack(seq)
    }

    pub async fn fail_effect(&self, seq: u64) -> bool {
        self.outbox.lock().await.fail(seq)
    }

    /// `(pending, in_flight, delivered)`
    pub async fn outbox_stats(&self) -> (usize, usize, u64) {
        let outbox = self.outbox.lock().await;
        (outbox.pending_len(), outbox.in_flight_len(), outbox.delivered())
    }

    pub async fn economy_multiplier(&self) -> f64 {
        self.payout.read().await.economy_multiplier
    }

    // ---- admin ----

    pub(crate) async fn set_economy_multiplier(&self, multiplier: f64) -> Result<(), HaulError> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(HaulError::InvalidInput {
                field: "multiplier",
                reason: format!("{multiplier} is not a positive multiplier"),
            });
        }
        self.payout.write().await.economy_multiplier = multiplier;
        tracing::info!(multiplier, "economy multiplier changed");
        self.checkpoint().await;
        Ok(())
    }

    pub(crate) async fn create_surge(
        &self,
        region: &str,
        tier: Tier,
        count: usize,
        multiplier: f64,
    ) -> Result<Vec<JobId>, HaulError> {
        let now = self.now();
        let posted = {
            let mut dispatch = self.dispatch.lock().await;
            dispatch.board.create_surge(
                &self.catalog,
                self.collab.ids.as_ref(),
                region,
                tier,
                count,
                multiplier,
                self.config.board.posting_ttl_secs,
                now,
            )?
        };
        tracing::info!(region, %tier, count, multiplier, "surge posted");
        self.checkpoint().await;
        Ok(posted)
    }

    pub(crate) async fn suspend(&self, actor: &ActorId, until: i64) -> Result<(), HaulError> {
        if until <= self.now() {
            return Err(HaulError::InvalidInput {
                field: "until",
                reason: "suspension must end in the future".into(),
            });
        }
        self.dispatch.lock().await.book.suspend(actor, until);
        tracing::info!(%actor, until, "actor suspended");
        self.checkpoint().await;
        Ok(())
    }

    // ---- persistence ----

    /// Consistent copy of the whole depot. Locks are taken one at a time.
    pub async fn snapshot(&self) -> DepotSnapshot {
        let (handles, archived_loads) = {
            let loads = self.loads.read().await;
            let handles: Vec<_> = loads.active.values().cloned().collect();
            (handles, loads.archived.values().cloned().collect::<Vec<_>>())
        };
        let mut active_loads = Vec::with_capacity(handles.len());
        for handle in handles {
            let load = handle.lock().await;
            // finished between the registry read and now; already archived or about to be
            if !load.is_terminal() {
                active_loads.push(load.clone());
            }
        }
        active_loads.sort_by_key(|l| l.load_id);

        let (board, reservations) = {
            let dispatch = self.dispatch.lock().await;
            (dispatch.board.clone(), dispatch.book.clone())
        };
        let ledger = self.ledger.lock().await.clone();
        let audit = self.audit.lock().await.events().to_vec();
        let outbox = self.outbox.lock().await.clone();
        let economy_multiplier = self.payout.read().await.economy_multiplier;

        DepotSnapshot {
            version: SNAPSHOT_VERSION,
            clock_reference: self.now(),
            economy_multiplier,
            board,
            reservations,
            active_loads,
            archived_loads,
            ledger,
            audit,
            outbox,
        }
    }

    /// Write-through checkpoint. Failures are logged; the next change retries.
    ///
    /// Checkpoints coalesce: a caller that finds a save in flight only marks
    /// the depot dirty and returns, and the saver takes one more snapshot
    /// covering every change made meanwhile.
    pub async fn checkpoint(&self) {
        if !self.config.persistence.write_through {
            return;
        }
        let Some(store) = self.collab.store.clone() else {
            return;
        };
        self.checkpoint_dirty.store(true, Ordering::Release);
        loop {
            let Ok(gate) = self.checkpoint_gate.try_lock() else {
                return;
            };
            let mut saves = 0usize;
            while self.checkpoint_dirty.swap(false, Ordering::AcqRel) {
                let snapshot = self.snapshot().await;
                if let Err(e) = store.save(&snapshot).await {
                    tracing::warn!(error = %e, "checkpoint failed");
                }
                saves += 1;
            }
            drop(gate);
            if saves > 1 {
                tracing::debug!(saves, "checkpoints coalesced");
            }
            // marked after the last swap but turned away by the gate
            if !self.checkpoint_dirty.load(Ordering::Acquire) {
                return;
            }
        }
    }
}
