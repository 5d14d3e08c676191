use std::sync::Arc;

use super::*;
use crate::domain::catalog::CargoKind;
use crate::domain::load::{IntegrityChange, LoadCommand, OwnershipMode, ShipperTier};
use crate::domain::events::AuditEventKind;
use crate::domain::outcome::{TerminalOutcome, TerminalTrigger};
use crate::impls::{InMemorySessions, InMemoryStateStore, RegionPopulation, StaticRequirements};
use crate::ledger::{ClaimStatus, DepositStatus};
use crate::ports::{FixedClock, StoreError, UlidGenerator};

/// 2023-11-15 12:00:00 UTC, outside the night window.
const T0: i64 = 1_700_049_600;
const FUNDS: i64 = 10_000;
const DEPOSIT: i64 = 3_000;
const WINDOW: i64 = 1_000;

struct Harness {
    depot: Arc<Depot>,
    clock: FixedClock,
    sessions: Arc<InMemorySessions>,
    store: Arc<InMemoryStateStore>,
    collab: Collaborators,
}

impl Harness {
    fn new() -> Self {
        let clock = FixedClock::at_unix(T0);
        let sessions = Arc::new(InMemorySessions::new());
        let store = Arc::new(InMemoryStateStore::new());
        let collab = Collaborators {
            clock: Arc::new(clock.clone()),
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            sessions: sessions.clone(),
            requirements: Arc::new(StaticRequirements::permissive()),
            population: Arc::new(RegionPopulation::new()),
            store: Some(store.clone()),
        };
        let depot = Depot::new(HaulageConfig::default(), Catalog::standard(), collab.clone());
        Self {
            depot: Arc::new(depot),
            clock,
            sessions,
            store,
            collab,
        }
    }

    /// A known posting in a region the board never refreshes.
    async fn post(&self, stops: u8) -> JobId {
        let job_id = self.collab.ids.job_id();
        let now = self.clock.unix();
        self.depot.dispatch.lock().await.board.insert(JobPosting {
            job_id,
            catalog_version: 1,
            cargo: CargoKind::DryVan,
            tier: Tier::new(2).unwrap(),
            region: "test-yard".into(),
            origin: "test-yard/a".into(),
            destination: "test-yard/b".into(),
            distance: 12.5,
            weight_kg: 12_000,
            stops,
            requirements: vec![],
            deposit: DEPOSIT,
            window_secs: WINDOW,
            surge_multiplier: 1.0,
            posted_at: now,
            expires_at: now + 1_000_000,
            status: BoardStatus::Available,
            reserved_by: None,
            reserved_until: None,
        });
        job_id
    }

    /// Funded actor holding an accepted load on a fresh posting.
    async fn accepted(&self, name: &str, stops: u8) -> (ActorId, LoadId) {
        let actor = ActorId::from(name);
        self.depot.fund(&actor, FUNDS).await.unwrap();
        let job = self.post(stops).await;
        self.depot.reserve(job, &actor).await.unwrap();
        let load = self
            .depot
            .accept(job, &actor, AcceptContext::default())
            .await
            .unwrap();
        (actor, load)
    }

    async fn drive(&self, load: LoadId, actor: &ActorId, commands: Vec<LoadCommand>) {
        for command in commands {
            self.depot.report(load, actor, command).await.unwrap();
        }
    }

    async fn terminal_events(&self, load: LoadId) -> usize {
        self.depot
            .audit_events_for_load(load, 0)
            .await
            .iter()
            .filter(|e| e.kind.is_terminal())
            .count()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_have_exactly_one_winner() {
    let h = Harness::new();
    let job = h.post(1).await;

    let mut tasks = Vec::new();
    for n in 0..16 {
        let depot = h.depot.clone();
        tasks.push(tokio::spawn(async move {
            depot.reserve(job, &ActorId::new(format!("racer-{n}"))).await
        }));
    }
    let mut won = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert!(e.is_race_lost(), "unexpected error: {e}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(h.depot.posting(job).await.unwrap().status, BoardStatus::Reserved);
}

#[tokio::test]
async fn actor_with_active_load_cannot_take_another() {
    let h = Harness::new();
    let (actor, load) = h.accepted("solo", 1).await;
    let other = h.post(1).await;

    let err = h.depot.reserve(other, &actor).await.unwrap_err();
    assert_eq!(err, HaulError::ActorHasActiveLoad { actor: actor.clone(), load_id: load });
    assert_eq!(h.depot.posting(other).await.unwrap().status, BoardStatus::Available);
}

#[tokio::test]
async fn acceptance_holds_the_deposit_and_starts_at_origin() {
    let h = Harness::new();
    let (actor, load_id) = h.accepted("driver", 1).await;

    let load = h.depot.active_load_for(&actor).await.unwrap();
    assert_eq!(load.load_id, load_id);
    assert_eq!(load.window_expires_at, T0 + WINDOW);
    assert_eq!(h.depot.balance(&actor).await, FUNDS - DEPOSIT);
    assert_eq!(h.depot.posting(load.job_id).await.unwrap().status, BoardStatus::Accepted);

    let kinds: Vec<_> = h
        .depot
        .audit_events_for_job(load.job_id)
        .await
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![AuditEventKind::JobReserved, AuditEventKind::LoadAccepted]);
    assert!(h.store.saves() > 0);
}

#[tokio::test]
async fn acceptance_without_funds_leaves_no_trace() {
    let h = Harness::new();
    let actor = ActorId::from("broke");
    h.depot.fund(&actor, 100).await.unwrap();
    let job = h.post(1).await;
    h.depot.reserve(job, &actor).await.unwrap();
    let audit_before = h.depot.audit_len().await;

    let err = h
        .depot
        .accept(job, &actor, AcceptContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HaulError::InsufficientFunds { needed: DEPOSIT, available: 100, .. }));
    assert_eq!(h.depot.audit_len().await, audit_before);
    assert_eq!(h.depot.balance(&actor).await, 100);
    assert_eq!(h.depot.load_counts().await, (0, 0));
    // still held, so the actor can top up and retry
    assert_eq!(h.depot.posting(job).await.unwrap().status, BoardStatus::Reserved);
}

#[tokio::test]
async fn missing_requirements_block_acceptance() {
    let clock = FixedClock::at_unix(T0);
    let collab = Collaborators {
        clock: Arc::new(clock.clone()),
        ids: Arc::new(UlidGenerator::new(clock.clone())),
        sessions: Arc::new(InMemorySessions::new()),
        requirements: Arc::new(StaticRequirements::new()),
        population: Arc::new(RegionPopulation::new()),
        store: None,
    };
    let depot = Depot::new(HaulageConfig::default(), Catalog::standard(), collab);
    let job = depot
        .listing(None, None)
        .await
        .into_iter()
        .find(|p| !p.requirements.is_empty())
        .map(|p| p.job_id)
        .unwrap();
    let actor = ActorId::from("unlicensed");
    depot.fund(&actor, 100_000).await.unwrap();
    depot.reserve(job, &actor).await.unwrap();

    let err = depot
        .accept(job, &actor, AcceptContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HaulError::MissingRequirements { .. }));
    assert!(depot.active_load_for(&actor).await.is_none());
}

#[tokio::test]
async fn happy_delivery_pays_and_returns_the_deposit() {
    let h = Harness::new();
    let (actor, load) = h.accepted("driver", 1).await;
    h.drive(
        load,
        &actor,
        vec![
            LoadCommand::ApplySeal,
            LoadCommand::CompletePreTrip,
            LoadCommand::Depart,
            LoadCommand::ArriveAtDestination,
        ],
    )
    .await;
    h.clock.advance_secs(750);

    let record = h.depot.deliver(load, &actor).await.unwrap();
    assert_eq!(record.outcome, TerminalOutcome::Delivered);
    assert_eq!(record.deposit, DepositStatus::Returned);
    let paid = record.amount_paid();
    assert!(paid > 0);
    assert_eq!(h.depot.balance(&actor).await, FUNDS + paid);

    let archived = h.depot.load(load).await.unwrap();
    assert_eq!(archived.terminal, Some(record));
    assert!(h.depot.active_load_for(&actor).await.is_none());
    assert_eq!(
        h.depot.posting(archived.job_id).await.unwrap().status,
        BoardStatus::Completed
    );
    assert_eq!(h.terminal_events(load).await, 1);
    // reputation and notification
    assert_eq!(h.depot.outbox_stats().await, (2, 0, 0));
}

#[tokio::test]
async fn low_integrity_forces_rejection_before_payout() {
    let h = Harness::new();
    let (actor, load) = h.accepted("clumsy", 1).await;
    h.drive(
        load,
        &actor,
        vec![
            LoadCommand::Depart,
            LoadCommand::Integrity {
                report_id: "crash".into(),
                change: IntegrityChange::Damage(70),
            },
            LoadCommand::ArriveAtDestination,
        ],
    )
    .await;

    let record = h.depot.deliver(load, &actor).await.unwrap();
    assert_eq!(record.outcome, TerminalOutcome::Rejected);
    assert_eq!(record.trigger, TerminalTrigger::Integrity);
    assert_eq!(record.amount_paid(), 0);
    assert_eq!(record.deposit, DepositStatus::Forfeited);
    assert_eq!(h.depot.balance(&actor).await, FUNDS - DEPOSIT);
    let events = h.depot.audit_events_for_load(load, 0).await;
    assert_eq!(events.last().map(|e| e.kind), Some(AuditEventKind::LoadRejected));
}

#[tokio::test]
async fn rejection_at_a_stop_pays_completed_share() {
    let h = Harness::new();
    let (actor, load) = h.accepted("partial", 3).await;
    h.drive(load, &actor, vec![LoadCommand::Depart, LoadCommand::ArriveAtStop]).await;

    let record = h.depot.reject(load, &actor).await.unwrap();
    assert_eq!(record.outcome, TerminalOutcome::Rejected);
    assert_eq!(record.deposit, DepositStatus::Returned);
    assert!(record.amount_paid() > 0);
    assert_eq!(h.depot.balance(&actor).await, FUNDS + record.amount_paid());
}

#[tokio::test]
async fn denied_transition_changes_nothing() {
    let h = Harness::new();
    let (actor, load) = h.accepted("early", 1).await;
    let before = h.depot.audit_len().await;

    let err = h.depot.deliver(load, &actor).await.unwrap_err();
    assert!(matches!(err, HaulError::InvalidTransition { operation: "deliver", .. }));
    let err = h.depot.deliver(load, &ActorId::from("stranger")).await.unwrap_err();
    assert!(matches!(err, HaulError::NotLoadOwner { .. }));

    assert_eq!(h.depot.audit_len().await, before);
    assert_eq!(h.depot.deposit_totals().await.outstanding, DEPOSIT);
}

#[tokio::test]
async fn replayed_report_is_a_no_op() {
    let h = Harness::new();
    let (actor, load) = h.accepted("retry", 1).await;
    let damage = LoadCommand::Integrity {
        report_id: "r-1".into(),
        change: IntegrityChange::Damage(10),
    };
    assert!(h.depot.report(load, &actor, damage.clone()).await.unwrap().is_some());
    assert_eq!(h.depot.report(load, &actor, damage).await.unwrap(), None);
    assert_eq!(h.depot.load(load).await.unwrap().integrity, 90);
}

#[tokio::test]
async fn finished_load_refuses_further_reports() {
    let h = Harness::new();
    let (actor, load) = h.accepted("quitter", 1).await;
    h.depot.abandon(load, &actor).await.unwrap();

    let err = h.depot.report(load, &actor, LoadCommand::Depart).await.unwrap_err();
    assert_eq!(err, HaulError::LoadAlreadyTerminal(load));
    let err = h.depot.abandon(load, &actor).await.unwrap_err();
    assert_eq!(err, HaulError::LoadAlreadyTerminal(load));
    assert_eq!(h.terminal_events(load).await, 1);
}

#[tokio::test]
async fn lapsed_reservation_is_reclaimed_by_the_sweep() {
    let h = Harness::new();
    let job = h.post(1).await;
    let first = ActorId::from("slow");
    h.depot.reserve(job, &first).await.unwrap();

    h.clock.advance_secs(121);
    let report = h.depot.sweep().await;
    assert_eq!(report.reservations_expired, 1);
    assert_eq!(h.depot.posting(job).await.unwrap().status, BoardStatus::Available);

    h.depot.reserve(job, &ActorId::from("fast")).await.unwrap();
    let kinds: Vec<_> = h
        .depot
        .audit_events_for_job(job)
        .await
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            AuditEventKind::JobReserved,
            AuditEventKind::ReservationExpired,
            AuditEventKind::JobReserved,
        ]
    );
}

#[tokio::test]
async fn lapsed_reservation_is_reclaimed_without_waiting_for_a_sweep() {
    let h = Harness::new();
    let job = h.post(1).await;
    h.depot.reserve(job, &ActorId::from("slow")).await.unwrap();
    h.clock.advance_secs(121);

    let won = h.depot.reserve(job, &ActorId::from("fast")).await.unwrap();
    assert_eq!(won.actor, ActorId::from("fast"));
    assert_eq!(h.depot.sweep().await.reservations_expired, 0);
}

#[tokio::test]
async fn twelve_minute_absence_abandons_exactly_once() {
    let h = Harness::new();
    let (actor, load) = h.accepted("vanished", 1).await;
    h.sessions.disconnect(&actor, T0).await;

    h.clock.advance_secs(5 * 60);
    assert_eq!(h.depot.sweep().await.loads_abandoned, 0);

    h.clock.advance_secs(7 * 60);
    let first = h.depot.sweep().await;
    let second = h.depot.sweep().await;
    assert_eq!(first.loads_abandoned, 1);
    assert_eq!(second.loads_abandoned, 0);
    assert_eq!(second.failures, 0);

    let archived = h.depot.load(load).await.unwrap();
    let terminal = archived.terminal.unwrap();
    assert_eq!(terminal.outcome, TerminalOutcome::Abandoned);
    assert_eq!(terminal.trigger, TerminalTrigger::Absence);
    assert_eq!(terminal.deposit, DepositStatus::Forfeited);
    assert_eq!(h.terminal_events(load).await, 1);
    assert_eq!(
        h.depot.posting(archived.job_id).await.unwrap().status,
        BoardStatus::Orphaned
    );
}

#[tokio::test]
async fn reconnect_credits_the_gap_once() {
    let h = Harness::new();
    let (actor, load) = h.accepted("flaky", 1).await;
    h.clock.advance_secs(60);
    h.sessions.disconnect(&actor, T0 + 60).await;
    h.depot.disconnect(&actor).await;

    h.clock.advance_secs(240);
    h.sessions.connect(&actor, T0 + 300).await;
    let report = h.depot.reconnect(&actor).await.unwrap();
    assert_eq!(report.window_expires_at, Some(T0 + WINDOW + 240));
    let again = h.depot.reconnect(&actor).await.unwrap();
    assert_eq!(again.window_expires_at, None);
    assert_eq!(
        h.depot.load(load).await.unwrap().window_expires_at,
        T0 + WINDOW + 240
    );
}

#[tokio::test]
async fn staying_online_never_extends_the_window() {
    let h = Harness::new();
    let (actor, load) = h.accepted("steady", 1).await;
    h.sessions.connect(&actor, T0).await;

    for _ in 0..3 {
        h.clock.advance_secs(300);
        h.sessions.connect(&actor, h.clock.unix()).await;
        let report = h.depot.reconnect(&actor).await.unwrap();
        assert_eq!(report.window_expires_at, None);
    }
    let active = h.depot.load(load).await.unwrap();
    assert_eq!(active.window_expires_at, T0 + WINDOW);
    assert_eq!(active.extension_secs, 0);
}

#[tokio::test]
async fn absence_seen_by_the_sweep_is_credited_on_reconnect() {
    let h = Harness::new();
    let (actor, load) = h.accepted("tunnel", 1).await;
    h.sessions.disconnect(&actor, T0 + 100).await;
    h.clock.advance_secs(200);
    assert_eq!(h.depot.sweep().await.loads_abandoned, 0);

    // still offline: nothing credited yet
    assert_eq!(h.depot.reconnect(&actor).await.unwrap().window_expires_at, None);

    h.clock.advance_secs(100);
    h.sessions.connect(&actor, T0 + 300).await;
    let report = h.depot.reconnect(&actor).await.unwrap();
    assert_eq!(report.window_expires_at, Some(T0 + WINDOW + 200));
    assert_eq!(h.depot.load(load).await.unwrap().offline_since, None);
}

#[tokio::test]
async fn online_owner_past_hard_deadline_expires() {
    let h = Harness::new();
    let (actor, load) = h.accepted("late", 1).await;
    h.sessions.connect(&actor, T0).await;

    h.clock.advance_secs(2 * WINDOW);
    assert_eq!(h.depot.sweep().await.loads_expired, 0);

    h.clock.advance_secs(1);
    h.sessions.connect(&actor, T0 + 2 * WINDOW + 1).await;
    assert_eq!(h.depot.sweep().await.loads_expired, 1);
    let terminal = h.depot.load(load).await.unwrap().terminal.unwrap();
    assert_eq!(terminal.outcome, TerminalOutcome::Expired);
    assert_eq!(terminal.trigger, TerminalTrigger::Deadline);
}

#[tokio::test]
async fn deposits_balance_across_mixed_outcomes() {
    let h = Harness::new();
    let (a, la) = h.accepted("a", 1).await;
    let (b, lb) = h.accepted("b", 1).await;
    let (_c, _lc) = h.accepted("c", 1).await;

    h.drive(la, &a, vec![LoadCommand::Depart, LoadCommand::ArriveAtDestination]).await;
    h.depot.deliver(la, &a).await.unwrap();
    h.drive(lb, &b, vec![LoadCommand::Depart]).await;
    h.depot.mark_stolen(lb, &b).await.unwrap();

    let totals = h.depot.deposit_totals().await;
    assert!(totals.is_conserved());
    assert_eq!(totals.held, 3 * DEPOSIT);
    assert_eq!(totals.returned, DEPOSIT);
    assert_eq!(totals.forfeited, DEPOSIT);
    assert_eq!(totals.outstanding, DEPOSIT);
}

#[tokio::test]
async fn insured_theft_is_paid_after_the_delay() {
    let h = Harness::new();
    let actor = ActorId::from("insured");
    h.depot.fund(&actor, FUNDS).await.unwrap();
    let policy = h
        .depot
        .purchase_policy(&actor, Tier::new(3).unwrap(), T0, T0 + 2 * 86_400)
        .await
        .unwrap();
    assert_eq!(policy.premium, 2 * 1_000);

    let job = h.post(1).await;
    h.depot.reserve(job, &actor).await.unwrap();
    let load = h.depot.accept(job, &actor, AcceptContext::default()).await.unwrap();
    h.drive(load, &actor, vec![LoadCommand::Depart]).await;
    h.depot.mark_stolen(load, &actor).await.unwrap();
    let after_theft = FUNDS - policy.premium - DEPOSIT;
    assert_eq!(h.depot.balance(&actor).await, after_theft);

    let claim = h.depot.file_claim(load, &actor).await.unwrap();
    assert_eq!(claim.status, ClaimStatus::Approved);
    assert_eq!(claim.amount, DEPOSIT);
    assert_eq!(claim.policy_id, Some(policy.policy_id));
    assert_eq!(
        h.depot.file_claim(load, &actor).await.unwrap_err(),
        HaulError::DuplicateClaim(load)
    );

    assert_eq!(h.depot.sweep().await.claims_paid, 0);
    h.clock.advance_secs(86_400);
    assert_eq!(h.depot.sweep().await.claims_paid, 1);
    assert_eq!(h.depot.balance(&actor).await, after_theft + DEPOSIT);
    assert_eq!(
        h.depot.claim_for_load(load).await.map(|c| c.status),
        Some(ClaimStatus::Paid)
    );
}

#[tokio::test]
async fn insurance_bought_after_the_loss_is_denied() {
    let h = Harness::new();
    let (actor, load) = h.accepted("late-buyer", 1).await;
    h.drive(load, &actor, vec![LoadCommand::Depart]).await;
    h.clock.advance_secs(100);
    h.depot.mark_stolen(load, &actor).await.unwrap();

    let backdated = h
        .depot
        .purchase_policy(&actor, Tier::new(3).unwrap(), T0 - 10, T0 + 86_400)
        .await;
    assert!(matches!(
        backdated,
        Err(HaulError::InvalidInput { field: "starts_at", .. })
    ));
    assert_eq!(h.depot.balance(&actor).await, FUNDS - DEPOSIT);

    let now = T0 + 100;
    h.depot
        .purchase_policy(&actor, Tier::new(3).unwrap(), now, now + 86_400)
        .await
        .unwrap();
    let claim = h.depot.file_claim(load, &actor).await.unwrap();
    assert_eq!(claim.status, ClaimStatus::Denied);
    assert_eq!(claim.amount, 0);
    assert_eq!(claim.policy_id, None);
}

#[tokio::test]
async fn uninsured_or_delivered_loads_are_not_paid() {
    let h = Harness::new();
    let (actor, load) = h.accepted("bare", 1).await;
    h.depot.abandon(load, &actor).await.unwrap();
    let claim = h.depot.file_claim(load, &actor).await.unwrap();
    assert_eq!(claim.status, ClaimStatus::Denied);
    assert_eq!(claim.amount, 0);

    let (other, delivered) = h.accepted("done", 1).await;
    h.drive(delivered, &other, vec![LoadCommand::Depart, LoadCommand::ArriveAtDestination])
        .await;
    h.depot.deliver(delivered, &other).await.unwrap();
    assert!(matches!(
        h.depot.file_claim(delivered, &other).await,
        Err(HaulError::NotClaimable { .. })
    ));
}

#[tokio::test]
async fn penalty_shortens_the_window() {
    let h = Harness::new();
    let (_actor, load) = h.accepted("cheat", 1).await;
    let expires = h.depot.penalize_window(load, 200, "speed hack").await.unwrap();
    assert_eq!(expires, T0 + WINDOW - 200);
    let events = h.depot.audit_events_for_load(load, 0).await;
    assert_eq!(events.last().map(|e| e.kind), Some(AuditEventKind::WindowPenalized));
}

#[tokio::test]
async fn restored_depot_continues_where_it_stopped() {
    let h = Harness::new();
    let (actor, load) = h.accepted("persistent", 1).await;
    h.drive(load, &actor, vec![LoadCommand::Depart]).await;
    let snapshot = h.depot.snapshot().await;
    let audit_len = snapshot.audit.len();

    let restored =
        Depot::restore(HaulageConfig::default(), Catalog::standard(), h.collab.clone(), snapshot)
            .unwrap();
    assert_eq!(restored.active_load_for(&actor).await.map(|l| l.load_id), Some(load));
    assert_eq!(restored.balance(&actor).await, FUNDS - DEPOSIT);
    assert_eq!(restored.audit_len().await, audit_len);

    restored.report(load, &actor, LoadCommand::ArriveAtDestination).await.unwrap();
    let record = restored.deliver(load, &actor).await.unwrap();
    assert_eq!(record.outcome, TerminalOutcome::Delivered);
    // sequence numbers keep counting from the restored log
    let events = restored.audit_events_for_load(load, 0).await;
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn restore_refuses_two_loads_for_one_actor() {
    let h = Harness::new();
    h.accepted("greedy", 1).await;
    let mut snapshot = h.depot.snapshot().await;
    let copy = ActiveLoad {
        load_id: h.collab.ids.load_id(),
        ..snapshot.active_loads[0].clone()
    };
    snapshot.active_loads.push(copy);

    let result = Depot::restore(
        HaulageConfig::default(),
        Catalog::standard(),
        h.collab.clone(),
        snapshot,
    );
    assert!(matches!(result, Err(HaulError::Invariant(_))));
}

#[tokio::test]
async fn preview_matches_a_clean_on_time_delivery() {
    let h = Harness::new();
    let job = h.post(1).await;
    let context = AcceptContext {
        ownership: OwnershipMode::Owned,
        shipper_tier: ShipperTier::Familiar,
    };
    let first = h.depot.preview(job, context).await.unwrap();
    let second = h.depot.preview(job, context).await.unwrap();
    assert_eq!(first, second);
    assert!(first.amount > 0);
    assert_eq!(h.depot.posting(job).await.unwrap().status, BoardStatus::Available);
}

#[tokio::test]
async fn surge_and_economy_are_admin_only_knobs() {
    let h = Harness::new();
    let posted = h
        .depot
        .create_surge("north", Tier::new(1).unwrap(), 3, 1.5)
        .await
        .unwrap();
    assert_eq!(posted.len(), 3);
    for job in &posted {
        assert_eq!(h.depot.posting(*job).await.unwrap().surge_multiplier, 1.5);
    }
    assert!(h.depot.set_economy_multiplier(0.0).await.is_err());
    h.depot.set_economy_multiplier(1.3).await.unwrap();
    assert_eq!(h.depot.snapshot().await.economy_multiplier, 1.3);
}

#[tokio::test]
async fn suspended_actor_cannot_reserve_until_lifted() {
    let h = Harness::new();
    let actor = ActorId::from("banned");
    let job = h.post(1).await;
    h.depot.suspend(&actor, T0 + 600).await.unwrap();
    assert!(matches!(
        h.depot.reserve(job, &actor).await,
        Err(HaulError::ActorSuspended { .. })
    ));

    h.clock.advance_secs(600);
    assert_eq!(h.depot.sweep().await.suspensions_lifted, 1);
    h.depot.reserve(job, &actor).await.unwrap();
}

#[tokio::test]
async fn failing_store_does_not_fail_the_operation() {
    let h = Harness::new();
    h.store.set_failing(true);
    let (actor, load) = h.accepted("offline-disk", 1).await;
    assert_eq!(h.depot.active_load_for(&actor).await.map(|l| l.load_id), Some(load));
    assert_eq!(h.store.saves(), 0);
}

/// Store whose saves wait for the test to let them through.
struct HeldStore {
    inner: InMemoryStateStore,
    entered: tokio::sync::Notify,
    release: tokio::sync::Semaphore,
}

impl Default for HeldStore {
    fn default() -> Self {
        Self {
            inner: InMemoryStateStore::default(),
            entered: tokio::sync::Notify::default(),
            release: tokio::sync::Semaphore::new(0),
        }
    }
}

#[async_trait::async_trait]
impl StateStore for HeldStore {
    async fn load(&self) -> Result<Option<DepotSnapshot>, StoreError> {
        self.inner.load().await
    }

    async fn save(&self, snapshot: &DepotSnapshot) -> Result<(), StoreError> {
        self.entered.notify_one();
        self.release
            .acquire()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
            .forget();
        self.inner.save(snapshot).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn checkpoints_during_a_slow_save_coalesce_into_one() {
    let h = Harness::new();
    let store = Arc::new(HeldStore::default());
    let mut collab = h.collab.clone();
    collab.store = Some(store.clone());
    let depot = Arc::new(Depot::new(HaulageConfig::default(), Catalog::standard(), collab));

    let first = tokio::spawn({
        let depot = depot.clone();
        async move { depot.fund(&ActorId::from("first"), 100).await }
    });
    store.entered.notified().await;

    // the save is parked; these return without waiting for it
    for n in 1..=5 {
        depot.fund(&ActorId::from("busy"), n * 10).await.unwrap();
    }
    assert_eq!(store.inner.saves(), 0);

    store.release.add_permits(16);
    first.await.unwrap().unwrap();
    assert_eq!(store.inner.saves(), 2);

    let saved = store.inner.load().await.unwrap().unwrap();
    assert_eq!(saved.ledger.balance(&ActorId::from("first")), 100);
    assert_eq!(saved.ledger.balance(&ActorId::from("busy")), 150);
}
