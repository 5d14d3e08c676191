//! Active load aggregate.
//!
//! Design: following the TaskRecord pattern.
//! - Single source of truth for an accepted job
//! - State transitions via one method per command kind (not direct field writes)
//! - Every method returns the event to audit, or `None` when the command was a
//!   replay of something already applied

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::catalog::CargoDefinition;
use super::errors::HaulError;
use super::events::{AuditEventKind, LoadEvent};
use super::ids::{ActorId, JobId, LoadId};
use super::outcome::TerminalRecord;
use super::posting::JobPosting;

/// Lifecycle status of a non-terminal load.
///
/// State transitions:
/// - AtOrigin -> InTransit -> AtStop -> InTransit -> ... -> AtDestination
/// - any -> DistressActive -> (previous status)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    AtOrigin,
    InTransit,
    AtStop,
    AtDestination,
    DistressActive,
}

/// Vehicle ownership; anything but `Rented` earns the ownership bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipMode {
    Owned,
    Leased,
    #[default]
    Rented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipperTier {
    #[default]
    New,
    Familiar,
    Trusted,
    Partner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealState {
    NotApplied,
    Sealed,
    Broken,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureState {
    pub monitored: bool,
    pub reading_c: Option<f64>,
    pub excursion_started_at: Option<i64>,
    /// Closed excursions only.
    pub excursion_secs: i64,
}

impl TemperatureState {
    /// Total excursion time at `now`, counting a still-open excursion.
    pub fn excursion_secs_at(&self, now: i64) -> i64 {
        let open = self
            .excursion_started_at
            .map(|start| (now - start).max(0))
            .unwrap_or(0);
        self.excursion_secs + open
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub off_since: Option<i64>,
    pub stationary_secs: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFlags {
    pub pre_trip_done: bool,
    pub manifest_verified: bool,
    pub weigh_station_stamped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "amount", rename_all = "snake_case")]
pub enum IntegrityChange {
    Damage(u8),
    /// Explicit resolution (roadside repair, cleared incident).
    Restored(u8),
}

/// The closed set of sub-events a reporting client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LoadCommand {
    Depart,
    ArriveAtStop,
    DepartStop,
    ArriveAtDestination,
    DeclareDistress { reason: String },
    ResolveDistress,
    ApplySeal,
    BreakSeal,
    ExcursionStart { reading_c: f64 },
    ExcursionEnd { reading_c: f64 },
    RecordTemperature { reading_c: f64 },
    Integrity { report_id: String, change: IntegrityChange },
    Welfare { report_id: String, delta: i8 },
    WeighStation { report_id: String, passed: bool },
    CompletePreTrip,
    VerifyManifest,
    EngineOff,
    EngineOn,
}

impl LoadCommand {
    pub fn name(&self) -> &'static str {
        match self {
            LoadCommand::Depart => "depart",
            LoadCommand::ArriveAtStop => "arrive_at_stop",
            LoadCommand::DepartStop => "depart_stop",
            LoadCommand::ArriveAtDestination => "arrive_at_destination",
            LoadCommand::DeclareDistress { .. } => "declare_distress",
            LoadCommand::ResolveDistress => "resolve_distress",
            LoadCommand::ApplySeal => "apply_seal",
            LoadCommand::BreakSeal => "break_seal",
            LoadCommand::ExcursionStart { .. } => "excursion_start",
            LoadCommand::ExcursionEnd { .. } => "excursion_end",
            LoadCommand::RecordTemperature { .. } => "record_temperature",
            LoadCommand::Integrity { .. } => "integrity",
            LoadCommand::Welfare { .. } => "welfare",
            LoadCommand::WeighStation { .. } => "weigh_station",
            LoadCommand::CompletePreTrip => "complete_pre_trip",
            LoadCommand::VerifyManifest => "verify_manifest",
            LoadCommand::EngineOff => "engine_off",
            LoadCommand::EngineOn => "engine_on",
        }
    }
}

pub const MAX_INTEGRITY: u8 = 100;
pub const MIN_WELFARE: u8 = 1;
pub const MAX_WELFARE: u8 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveLoad {
    pub load_id: LoadId,
    pub job_id: JobId,
    pub posting: JobPosting,
    pub actor: ActorId,
    pub ownership: OwnershipMode,
    pub shipper_tier: ShipperTier,

    pub status: LoadStatus,
    /// Status interrupted by distress.
    pub resume_status: Option<LoadStatus>,
    pub stops_completed: u8,

    pub integrity: u8,
    pub seal: SealState,
    pub temperature: TemperatureState,
    /// Present only for welfare-rated cargo.
    pub welfare: Option<u8>,
    pub compliance: ComplianceFlags,
    pub engine: EngineState,
    pub distress_count: u32,

    pub accepted_at: i64,
    pub window_expires_at: i64,
    /// Point up to which absence has already been credited to the window.
    pub extended_through: i64,
    /// When the server first saw the owner go offline; cleared on reconnect.
    #[serde(default)]
    pub offline_since: Option<i64>,
    pub extension_secs: i64,
    pub deposit: i64,

    /// Client report ids already applied.
    pub seen_reports: BTreeSet<String>,

    pub terminal: Option<TerminalRecord>,
}

impl ActiveLoad {
    pub fn new(
        load_id: LoadId,
        posting: JobPosting,
        cargo: &CargoDefinition,
        actor: ActorId,
        ownership: OwnershipMode,
        shipper_tier: ShipperTier,
        accepted_at: i64,
    ) -> Self {
        let window_expires_at = accepted_at + posting.window_secs;
        Self {
            load_id,
            job_id: posting.job_id,
            deposit: posting.deposit,
            posting,
            actor,
            ownership,
            shipper_tier,
            status: LoadStatus::AtOrigin,
            resume_status: None,
            stops_completed: 0,
            integrity: MAX_INTEGRITY,
            seal: SealState::NotApplied,
            temperature: TemperatureState {
                monitored: cargo.temperature_monitored,
                ..TemperatureState::default()
            },
            welfare: cargo.welfare_rated.then_some(MAX_WELFARE),
            compliance: ComplianceFlags::default(),
            engine: EngineState::default(),
            distress_count: 0,
            accepted_at,
            window_expires_at,
            extended_through: accepted_at,
            offline_since: None,
            extension_secs: 0,
            seen_reports: BTreeSet::new(),
            terminal: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn is_welfare_rated(&self) -> bool {
        self.welfare.is_some()
    }

    /// Window length currently allotted, including extensions.
    pub fn allotted_secs(&self) -> i64 {
        (self.window_expires_at - self.accepted_at).max(1)
    }

    /// Point after which the sweep expires the load.
    pub fn hard_deadline(&self, expiry_ratio: f64) -> i64 {
        self.accepted_at + (self.allotted_secs() as f64 * expiry_ratio).ceil() as i64
    }

    pub fn ensure_owner(&self, actor: &ActorId) -> Result<(), HaulError> {
        if &self.actor != actor {
            return Err(HaulError::NotLoadOwner {
                actor: actor.clone(),
                load_id: self.load_id,
            });
        }
        Ok(())
    }

    pub fn ensure_open(&self) -> Result<(), HaulError> {
        if self.is_terminal() {
            return Err(HaulError::LoadAlreadyTerminal(self.load_id));
        }
        Ok(())
    }

    fn invalid(&self, operation: &'static str) -> HaulError {
        HaulError::InvalidTransition {
            load_id: self.load_id,
            status: self.status,
            operation,
        }
    }

    fn not_applicable(&self, operation: &'static str) -> HaulError {
        HaulError::NotApplicable {
            load_id: self.load_id,
            operation,
        }
    }

    /// Remembers a report id; `false` when it was seen before.
    fn first_sighting(&mut self, report_id: &str) -> bool {
        self.seen_reports.insert(report_id.to_string())
    }

    /// Apply one sub-event at server time `now`.
    pub fn apply(
        &mut self,
        command: LoadCommand,
        cargo: &CargoDefinition,
        now: i64,
    ) -> Result<Option<LoadEvent>, HaulError> {
        self.ensure_open()?;
        let op = command.name();
        match command {
            LoadCommand::Depart => self.move_to(
                op,
                LoadStatus::AtOrigin,
                LoadStatus::InTransit,
                AuditEventKind::Departed,
            ),
            LoadCommand::ArriveAtStop => self.arrive_at_stop(op),
            LoadCommand::DepartStop => self.move_to(
                op,
                LoadStatus::AtStop,
                LoadStatus::InTransit,
                AuditEventKind::DepartedStop,
            ),
            LoadCommand::ArriveAtDestination => self.arrive_at_destination(op),
            LoadCommand::DeclareDistress { reason } => Ok(self.declare_distress(reason)),
            LoadCommand::ResolveDistress => Ok(self.resolve_distress()),
            LoadCommand::ApplySeal => self.apply_seal(op, cargo),
            LoadCommand::BreakSeal => self.break_seal(op, now),
            LoadCommand::ExcursionStart { reading_c } => self.excursion_start(op, reading_c, now),
            LoadCommand::ExcursionEnd { reading_c } => self.excursion_end(op, reading_c, now),
            LoadCommand::RecordTemperature { reading_c } => self.record_temperature(op, reading_c),
            LoadCommand::Integrity { report_id, change } => self.integrity(op, &report_id, change),
            LoadCommand::Welfare { report_id, delta } => self.welfare_change(op, &report_id, delta),
            LoadCommand::WeighStation { report_id, passed } => {
                Ok(self.weigh_station(&report_id, passed))
            }
            LoadCommand::CompletePreTrip => self.complete_pre_trip(op),
            LoadCommand::VerifyManifest => self.verify_manifest(op),
            LoadCommand::EngineOff => Ok(self.engine_off(now)),
            LoadCommand::EngineOn => Ok(self.engine_on(now)),
        }
    }

    fn move_to(
        &mut self,
        op: &'static str,
        from: LoadStatus,
        to: LoadStatus,
        kind: AuditEventKind,
    ) -> Result<Option<LoadEvent>, HaulError> {
        if self.status == to {
            return Ok(None);
        }
        if self.status != from {
            return Err(self.invalid(op));
        }
        self.status = to;
        Ok(Some(LoadEvent::new(kind, json!({ "from": from, "to": to }))))
    }

    fn arrive_at_stop(&mut self, op: &'static str) -> Result<Option<LoadEvent>, HaulError> {
        if self.status == LoadStatus::AtStop {
            return Ok(None);
        }
        if self.status != LoadStatus::InTransit {
            return Err(self.invalid(op));
        }
        // intermediate drops only; the last stop is the destination
        let intermediate = self.posting.stops.saturating_sub(1);
        if self.stops_completed >= intermediate {
            return Err(self.invalid(op));
        }
        self.status = LoadStatus::AtStop;
        self.stops_completed += 1;
        Ok(Some(LoadEvent::new(
            AuditEventKind::ArrivedAtStop,
            json!({ "stop": self.stops_completed, "of": self.posting.stops }),
        )))
    }

    fn arrive_at_destination(&mut self, op: &'static str) -> Result<Option<LoadEvent>, HaulError> {
        if self.status == LoadStatus::AtDestination {
            return Ok(None);
        }
        if self.status != LoadStatus::InTransit {
            return Err(self.invalid(op));
        }
        self.status = LoadStatus::AtDestination;
        Ok(Some(LoadEvent::new(
            AuditEventKind::ArrivedAtDestination,
            json!({ "stops_completed": self.stops_completed }),
        )))
    }

    fn declare_distress(&mut self, reason: String) -> Option<LoadEvent> {
        if self.status == LoadStatus::DistressActive {
            return None;
        }
        self.resume_status = Some(self.status);
        self.status = LoadStatus::DistressActive;
        self.distress_count += 1;
        Some(LoadEvent::new(
            AuditEventKind::DistressDeclared,
            json!({ "reason": reason, "interrupted": self.resume_status }),
        ))
    }

    fn resolve_distress(&mut self) -> Option<LoadEvent> {
        if self.status != LoadStatus::DistressActive {
            return None;
        }
        self.status = self.resume_status.take().unwrap_or(LoadStatus::InTransit);
        Some(LoadEvent::new(
            AuditEventKind::DistressResolved,
            json!({ "resumed": self.status }),
        ))
    }

    fn apply_seal(
        &mut self,
        op: &'static str,
        cargo: &CargoDefinition,
    ) -> Result<Option<LoadEvent>, HaulError> {
        if !cargo.sealable {
            return Err(self.not_applicable(op));
        }
        match self.seal {
            SealState::Sealed => Ok(None),
            SealState::Broken => Err(self.invalid(op)),
            SealState::NotApplied if self.status != LoadStatus::AtOrigin => Err(self.invalid(op)),
            SealState::NotApplied => {
                self.seal = SealState::Sealed;
                Ok(Some(LoadEvent::bare(AuditEventKind::SealApplied)))
            }
        }
    }

    fn break_seal(&mut self, op: &'static str, now: i64) -> Result<Option<LoadEvent>, HaulError> {
        match self.seal {
            SealState::Broken => Ok(None),
            SealState::NotApplied => Err(self.not_applicable(op)),
            SealState::Sealed => {
                self.seal = SealState::Broken;
                Ok(Some(LoadEvent::new(
                    AuditEventKind::SealBroken,
                    json!({ "status": self.status, "at": now }),
                )))
            }
        }
    }

    fn excursion_start(
        &mut self,
        op: &'static str,
        reading_c: f64,
        now: i64,
    ) -> Result<Option<LoadEvent>, HaulError> {
        if !self.temperature.monitored {
            return Err(self.not_applicable(op));
        }
        let reading_c = finite_reading(reading_c)?;
        if self.temperature.excursion_started_at.is_some() {
            return Ok(None);
        }
        self.temperature.excursion_started_at = Some(now);
        self.temperature.reading_c = Some(reading_c);
        Ok(Some(LoadEvent::new(
            AuditEventKind::ExcursionStarted,
            json!({ "reading_c": reading_c }),
        )))
    }

    fn excursion_end(
        &mut self,
        op: &'static str,
        reading_c: f64,
        now: i64,
    ) -> Result<Option<LoadEvent>, HaulError> {
        if !self.temperature.monitored {
            return Err(self.not_applicable(op));
        }
        let reading_c = finite_reading(reading_c)?;
        let Some(start) = self.temperature.excursion_started_at.take() else {
            return Ok(None);
        };
        let secs = (now - start).max(0);
        self.temperature.excursion_secs += secs;
        self.temperature.reading_c = Some(reading_c);
        Ok(Some(LoadEvent::new(
            AuditEventKind::ExcursionEnded,
            json!({
                "reading_c": reading_c,
                "duration_secs": secs,
                "total_secs": self.temperature.excursion_secs,
            }),
        )))
    }

    fn record_temperature(
        &mut self,
        op: &'static str,
        reading_c: f64,
    ) -> Result<Option<LoadEvent>, HaulError> {
        if !self.temperature.monitored {
            return Err(self.not_applicable(op));
        }
        let reading_c = finite_reading(reading_c)?;
        self.temperature.reading_c = Some(reading_c);
        Ok(Some(LoadEvent::new(
            AuditEventKind::TemperatureRecorded,
            json!({ "reading_c": reading_c }),
        )))
    }

    fn integrity(
        &mut self,
        op: &'static str,
        report_id: &str,
        change: IntegrityChange,
    ) -> Result<Option<LoadEvent>, HaulError> {
        if self.is_welfare_rated() {
            return Err(self.not_applicable(op));
        }
        if !self.first_sighting(report_id) {
            return Ok(None);
        }
        let before = self.integrity;
        let (kind, after) = match change {
            IntegrityChange::Damage(amount) => {
                (AuditEventKind::IntegrityDamaged, before.saturating_sub(amount))
            }
            IntegrityChange::Restored(amount) => (
                AuditEventKind::IntegrityRestored,
                before.saturating_add(amount).min(MAX_INTEGRITY),
            ),
        };
        self.integrity = after;
        Ok(Some(LoadEvent::new(
            kind,
            json!({ "report_id": report_id, "before": before, "after": after }),
        )))
    }

    fn welfare_change(
        &mut self,
        op: &'static str,
        report_id: &str,
        delta: i8,
    ) -> Result<Option<LoadEvent>, HaulError> {
        let Some(before) = self.welfare else {
            return Err(self.not_applicable(op));
        };
        if !self.first_sighting(report_id) {
            return Ok(None);
        }
        let after = (i16::from(before) + i16::from(delta))
            .clamp(i16::from(MIN_WELFARE), i16::from(MAX_WELFARE)) as u8;
        self.welfare = Some(after);
        Ok(Some(LoadEvent::new(
            AuditEventKind::WelfareChanged,
            json!({ "report_id": report_id, "before": before, "after": after }),
        )))
    }

    fn weigh_station(&mut self, report_id: &str, passed: bool) -> Option<LoadEvent> {
        if !self.first_sighting(report_id) {
            return None;
        }
        let kind = if passed {
            self.compliance.weigh_station_stamped = true;
            AuditEventKind::WeighStationPassed
        } else {
            AuditEventKind::WeighStationFailed
        };
        Some(LoadEvent::new(kind, json!({ "report_id": report_id })))
    }

    fn complete_pre_trip(&mut self, op: &'static str) -> Result<Option<LoadEvent>, HaulError> {
        if self.compliance.pre_trip_done {
            return Ok(None);
        }
        if self.status != LoadStatus::AtOrigin {
            return Err(self.invalid(op));
        }
        self.compliance.pre_trip_done = true;
        Ok(Some(LoadEvent::bare(AuditEventKind::PreTripCompleted)))
    }

    fn verify_manifest(&mut self, op: &'static str) -> Result<Option<LoadEvent>, HaulError> {
        if self.compliance.manifest_verified {
            return Ok(None);
        }
        if !matches!(self.status, LoadStatus::AtOrigin | LoadStatus::AtStop) {
            return Err(self.invalid(op));
        }
        self.compliance.manifest_verified = true;
        Ok(Some(LoadEvent::bare(AuditEventKind::ManifestVerified)))
    }

    fn engine_off(&mut self, now: i64) -> Option<LoadEvent> {
        if self.engine.off_since.is_some() {
            return None;
        }
        self.engine.off_since = Some(now);
        Some(LoadEvent::bare(AuditEventKind::EngineOff))
    }

    fn engine_on(&mut self, now: i64) -> Option<LoadEvent> {
        let start = self.engine.off_since.take()?;
        let secs = (now - start).max(0);
        self.engine.stationary_secs += secs;
        Some(LoadEvent::new(
            AuditEventKind::EngineOn,
            json!({ "stationary_secs": secs, "total_secs": self.engine.stationary_secs }),
        ))
    }

    /// Remember that the owner went offline at `since`. The first sighting
    /// wins until a reconnect clears it.
    pub fn mark_offline(&mut self, since: i64) -> bool {
        if self.is_terminal() || self.offline_since.is_some() {
            return false;
        }
        self.offline_since = Some(since.max(self.extended_through));
        true
    }

    /// Credit the recorded absence ending at `now` to the window. Without a
    /// recorded absence nothing moves.
    pub fn credit_absence(&mut self, now: i64) -> Option<LoadEvent> {
        if self.is_terminal() {
            return None;
        }
        let since = self.offline_since.take()?;
        let from = since.max(self.extended_through);
        let gap = now - from;
        if gap <= 0 {
            return None;
        }
        self.extended_through = now;
        self.extension_secs += gap;
        self.window_expires_at += gap;
        Some(LoadEvent::new(
            AuditEventKind::WindowExtended,
            json!({
                "offline_since": since,
                "gap_secs": gap,
                "window_expires_at": self.window_expires_at,
                "total_extension_secs": self.extension_secs,
            }),
        ))
    }

    /// Abuse penalty: the one path allowed to shorten the window.
    pub fn penalize_window(&mut self, secs: i64, reason: &str) -> Result<LoadEvent, HaulError> {
        self.ensure_open()?;
        if secs <= 0 {
            return Err(HaulError::InvalidInput {
                field: "secs",
                reason: "penalty must be positive".into(),
            });
        }
        // never before acceptance
        let shortened = (self.window_expires_at - secs).max(self.accepted_at + 1);
        let applied = self.window_expires_at - shortened;
        self.window_expires_at = shortened;
        Ok(LoadEvent::new(
            AuditEventKind::WindowPenalized,
            json!({
                "penalty_secs": applied,
                "reason": reason,
                "window_expires_at": self.window_expires_at,
            }),
        ))
    }
}

fn finite_reading(reading_c: f64) -> Result<f64, HaulError> {
    if !reading_c.is_finite() {
        return Err(HaulError::InvalidInput {
            field: "reading_c",
            reason: "not a finite number".into(),
        });
    }
    Ok(reading_c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{CargoKind, Catalog, Tier};
    use crate::domain::posting::BoardStatus;
    use rstest::rstest;
    use ulid::Ulid;

    fn posting(kind: CargoKind, stops: u8) -> JobPosting {
        JobPosting {
            job_id: JobId::from_ulid(Ulid::new()),
            catalog_version: 1,
            cargo: kind,
            tier: Tier::new(2).unwrap(),
            region: "north".into(),
            origin: "north/yard-1".into(),
            destination: "north/yard-4".into(),
            distance: 12.5,
            weight_kg: 12_000,
            stops,
            requirements: vec![],
            deposit: 3_000,
            window_secs: 1_000,
            surge_multiplier: 1.0,
            posted_at: 0,
            expires_at: 10_000,
            status: BoardStatus::Accepted,
            reserved_by: None,
            reserved_until: None,
        }
    }

    fn load(kind: CargoKind, stops: u8) -> (ActiveLoad, CargoDefinition) {
        let cargo = Catalog::standard().cargo(kind).unwrap().clone();
        let load = ActiveLoad::new(
            LoadId::from_ulid(Ulid::new()),
            posting(kind, stops),
            &cargo,
            ActorId::from("driver"),
            OwnershipMode::Owned,
            ShipperTier::Familiar,
            100,
        );
        (load, cargo)
    }

    #[test]
    fn new_load_starts_at_origin_with_full_window() {
        let (load, _) = load(CargoKind::DryVan, 1);
        assert_eq!(load.status, LoadStatus::AtOrigin);
        assert_eq!(load.integrity, 100);
        assert_eq!(load.window_expires_at, 1_100);
        assert_eq!(load.welfare, None);
    }

    #[test]
    fn welfare_replaces_integrity_for_livestock() {
        let (mut load, cargo) = load(CargoKind::Livestock, 1);
        assert_eq!(load.welfare, Some(5));
        let err = load
            .apply(
                LoadCommand::Integrity {
                    report_id: "r1".into(),
                    change: IntegrityChange::Damage(10),
                },
                &cargo,
                200,
            )
            .unwrap_err();
        assert!(matches!(err, HaulError::NotApplicable { .. }));
    }

    #[test]
    fn multi_stop_route_walks_through_stops() {
        let (mut load, cargo) = load(CargoKind::DryVan, 3);
        load.apply(LoadCommand::Depart, &cargo, 110).unwrap();
        load.apply(LoadCommand::ArriveAtStop, &cargo, 120).unwrap();
        load.apply(LoadCommand::DepartStop, &cargo, 130).unwrap();
        load.apply(LoadCommand::ArriveAtStop, &cargo, 140).unwrap();
        load.apply(LoadCommand::DepartStop, &cargo, 150).unwrap();
        // both intermediate stops done
        assert!(load.apply(LoadCommand::ArriveAtStop, &cargo, 160).is_err());
        load.apply(LoadCommand::ArriveAtDestination, &cargo, 170).unwrap();
        assert_eq!(load.stops_completed, 2);
        assert_eq!(load.status, LoadStatus::AtDestination);
    }

    #[test]
    fn duplicate_arrival_does_not_double_count_stops() {
        let (mut load, cargo) = load(CargoKind::DryVan, 3);
        load.apply(LoadCommand::Depart, &cargo, 110).unwrap();
        assert!(load.apply(LoadCommand::ArriveAtStop, &cargo, 120).unwrap().is_some());
        assert!(load.apply(LoadCommand::ArriveAtStop, &cargo, 121).unwrap().is_none());
        assert_eq!(load.stops_completed, 1);
    }

    #[test]
    fn cannot_skip_transit() {
        let (mut load, cargo) = load(CargoKind::DryVan, 1);
        let err = load
            .apply(LoadCommand::ArriveAtDestination, &cargo, 110)
            .unwrap_err();
        assert!(matches!(
            err,
            HaulError::InvalidTransition {
                status: LoadStatus::AtOrigin,
                ..
            }
        ));
    }

    #[test]
    fn distress_resumes_interrupted_status() {
        let (mut load, cargo) = load(CargoKind::DryVan, 1);
        load.apply(LoadCommand::Depart, &cargo, 110).unwrap();
        load.apply(LoadCommand::DeclareDistress { reason: "flat".into() }, &cargo, 120)
            .unwrap();
        assert!(load
            .apply(LoadCommand::DeclareDistress { reason: "flat".into() }, &cargo, 121)
            .unwrap()
            .is_none());
        assert_eq!(load.distress_count, 1);
        assert!(load.apply(LoadCommand::ArriveAtDestination, &cargo, 122).is_err());
        load.apply(LoadCommand::ResolveDistress, &cargo, 130).unwrap();
        assert_eq!(load.status, LoadStatus::InTransit);
    }

    #[test]
    fn excursion_duration_is_server_computed() {
        let (mut load, cargo) = load(CargoKind::Refrigerated, 1);
        load.apply(LoadCommand::ExcursionStart { reading_c: 9.0 }, &cargo, 200)
            .unwrap();
        // replayed start keeps the original start time
        assert!(load
            .apply(LoadCommand::ExcursionStart { reading_c: 9.5 }, &cargo, 250)
            .unwrap()
            .is_none());
        assert_eq!(load.temperature.excursion_secs_at(260), 60);
        load.apply(LoadCommand::ExcursionEnd { reading_c: 3.0 }, &cargo, 290)
            .unwrap();
        assert!(load
            .apply(LoadCommand::ExcursionEnd { reading_c: 3.0 }, &cargo, 400)
            .unwrap()
            .is_none());
        assert_eq!(load.temperature.excursion_secs, 90);
    }

    #[rstest]
    #[case::start_nan(LoadCommand::ExcursionStart { reading_c: f64::NAN })]
    #[case::start_infinite(LoadCommand::ExcursionStart { reading_c: f64::INFINITY })]
    #[case::end_nan(LoadCommand::ExcursionEnd { reading_c: f64::NAN })]
    #[case::reading_nan(LoadCommand::RecordTemperature { reading_c: f64::NAN })]
    fn non_finite_readings_are_refused(#[case] command: LoadCommand) {
        let (mut load, cargo) = load(CargoKind::Refrigerated, 1);
        load.apply(LoadCommand::ExcursionStart { reading_c: 9.0 }, &cargo, 200)
            .unwrap();
        let before = load.clone();
        let err = load.apply(command, &cargo, 260).unwrap_err();
        assert!(matches!(err, HaulError::InvalidInput { field: "reading_c", .. }));
        assert_eq!(load.temperature.reading_c, Some(9.0));
        assert_eq!(load.temperature.excursion_started_at, before.temperature.excursion_started_at);
    }

    #[test]
    fn excursion_rejected_for_unmonitored_cargo() {
        let (mut load, cargo) = load(CargoKind::DryVan, 1);
        assert!(load
            .apply(LoadCommand::ExcursionStart { reading_c: 9.0 }, &cargo, 200)
            .is_err());
    }

    #[rstest]
    #[case::damage(IntegrityChange::Damage(30), 70)]
    #[case::damage_floors_at_zero(IntegrityChange::Damage(250), 0)]
    #[case::restore_caps_at_full(IntegrityChange::Restored(50), 100)]
    fn integrity_is_clamped(#[case] change: IntegrityChange, #[case] expected: u8) {
        let (mut load, cargo) = load(CargoKind::DryVan, 1);
        load.apply(
            LoadCommand::Integrity {
                report_id: "r1".into(),
                change,
            },
            &cargo,
            200,
        )
        .unwrap();
        assert_eq!(load.integrity, expected);
    }

    #[test]
    fn replayed_damage_report_is_ignored() {
        let (mut load, cargo) = load(CargoKind::DryVan, 1);
        let cmd = LoadCommand::Integrity {
            report_id: "crash-1".into(),
            change: IntegrityChange::Damage(20),
        };
        load.apply(cmd.clone(), &cargo, 200).unwrap();
        assert!(load.apply(cmd, &cargo, 201).unwrap().is_none());
        assert_eq!(load.integrity, 80);
    }

    #[rstest]
    #[case(-2, 3)]
    #[case(-9, 1)]
    #[case(4, 5)]
    fn welfare_is_clamped(#[case] delta: i8, #[case] expected: u8) {
        let (mut load, cargo) = load(CargoKind::Livestock, 1);
        load.apply(
            LoadCommand::Welfare {
                report_id: "w".into(),
                delta,
            },
            &cargo,
            200,
        )
        .unwrap();
        assert_eq!(load.welfare, Some(expected));
    }

    #[test]
    fn seal_lifecycle() {
        let (mut load, cargo) = load(CargoKind::DryVan, 1);
        assert!(matches!(
            load.apply(LoadCommand::BreakSeal, &cargo, 105),
            Err(HaulError::NotApplicable { .. })
        ));
        load.apply(LoadCommand::ApplySeal, &cargo, 110).unwrap();
        assert!(load.apply(LoadCommand::ApplySeal, &cargo, 111).unwrap().is_none());
        load.apply(LoadCommand::BreakSeal, &cargo, 120).unwrap();
        assert!(load.apply(LoadCommand::BreakSeal, &cargo, 121).unwrap().is_none());
        assert_eq!(load.seal, SealState::Broken);
        assert!(load.apply(LoadCommand::ApplySeal, &cargo, 122).is_err());
    }

    #[test]
    fn engine_off_on_accumulates_stationary_time() {
        let (mut load, cargo) = load(CargoKind::DryVan, 1);
        load.apply(LoadCommand::EngineOff, &cargo, 200).unwrap();
        assert!(load.apply(LoadCommand::EngineOff, &cargo, 230).unwrap().is_none());
        load.apply(LoadCommand::EngineOn, &cargo, 260).unwrap();
        assert!(load.apply(LoadCommand::EngineOn, &cargo, 300).unwrap().is_none());
        assert_eq!(load.engine.stationary_secs, 60);
    }

    #[test]
    fn absence_credit_is_monotonic_and_not_double_counted() {
        let (mut load, _) = load(CargoKind::DryVan, 1);
        let start = load.window_expires_at;

        assert!(load.mark_offline(300));
        // later sightings of the same absence do not move its start
        assert!(!load.mark_offline(360));
        assert!(load.credit_absence(420).is_some());
        assert_eq!(load.window_expires_at, start + 120);

        // same reconnect reported twice
        assert!(load.credit_absence(420).is_none());
        assert_eq!(load.window_expires_at, start + 120);

        // an absence reported as starting before the previous credit only counts the new part
        load.mark_offline(350);
        load.credit_absence(500).unwrap();
        assert_eq!(load.window_expires_at, start + 200);
        assert_eq!(load.extension_secs, 200);
    }

    #[test]
    fn no_recorded_absence_means_no_credit() {
        let (mut load, _) = load(CargoKind::DryVan, 1);
        let start = load.window_expires_at;
        for now in [300, 600, 900] {
            assert!(load.credit_absence(now).is_none());
        }
        assert_eq!(load.window_expires_at, start);
        assert_eq!(load.extension_secs, 0);
    }

    #[test]
    fn penalty_never_moves_window_before_acceptance() {
        let (mut load, _) = load(CargoKind::DryVan, 1);
        load.penalize_window(50_000, "tamper").unwrap();
        assert_eq!(load.window_expires_at, load.accepted_at + 1);
    }
}
