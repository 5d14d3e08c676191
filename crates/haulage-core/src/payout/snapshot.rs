//! Immutable payout input.

use serde::{Deserialize, Serialize};

use crate::domain::catalog::{CargoDefinition, CargoKind, Tier};
use crate::domain::load::{ActiveLoad, ComplianceFlags, OwnershipMode, SealState, ShipperTier};
use crate::domain::posting::JobPosting;

/// Everything the payout pipeline reads, frozen at the terminal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutSnapshot {
    pub tier: Tier,
    pub cargo: CargoKind,
    pub cargo_modifier: f64,
    pub surge_multiplier: f64,
    pub distance: f64,
    pub stops: u8,
    pub stops_completed: u8,
    pub weight_kg: u32,
    pub ownership: OwnershipMode,
    pub allotted_secs: i64,
    pub elapsed_secs: i64,
    pub integrity: u8,
    pub temperature_monitored: bool,
    pub excursion_secs: i64,
    /// `Some` for welfare-rated cargo; such loads skip the integrity stage.
    pub welfare: Option<u8>,
    pub seal: SealState,
    pub compliance: ComplianceFlags,
    pub shipper_tier: ShipperTier,
    pub convoy_size: u32,
    /// Terminal event timestamp (Unix seconds).
    pub completed_at: i64,
}

impl PayoutSnapshot {
    /// Freeze a load at `completed_at`. Open excursions count up to that point.
    pub fn from_load(
        load: &ActiveLoad,
        cargo: &CargoDefinition,
        completed_at: i64,
        convoy_size: u32,
    ) -> Self {
        Self {
            tier: load.posting.tier,
            cargo: load.posting.cargo,
            cargo_modifier: cargo.rate_modifier,
            surge_multiplier: load.posting.surge_multiplier,
            distance: load.posting.distance,
            stops: load.posting.stops,
            stops_completed: load.stops_completed,
            weight_kg: load.posting.weight_kg,
            ownership: load.ownership,
            allotted_secs: load.allotted_secs(),
            elapsed_secs: (completed_at - load.accepted_at).max(0),
            integrity: load.integrity,
            temperature_monitored: load.temperature.monitored,
            excursion_secs: load.temperature.excursion_secs_at(completed_at),
            welfare: load.welfare,
            seal: load.seal,
            compliance: load.compliance,
            shipper_tier: load.shipper_tier,
            convoy_size,
            completed_at,
        }
    }

    /// Nominal estimate for a posting nobody has accepted yet: on time, intact,
    /// sealed when the cargo supports it, no optional compliance steps.
    pub fn preview(
        posting: &JobPosting,
        cargo: &CargoDefinition,
        ownership: OwnershipMode,
        shipper_tier: ShipperTier,
        at: i64,
    ) -> Self {
        Self {
            tier: posting.tier,
            cargo: posting.cargo,
            cargo_modifier: cargo.rate_modifier,
            surge_multiplier: posting.surge_multiplier,
            distance: posting.distance,
            stops: posting.stops,
            stops_completed: posting.stops.saturating_sub(1),
            weight_kg: posting.weight_kg,
            ownership,
            allotted_secs: posting.window_secs.max(1),
            elapsed_secs: posting.window_secs.max(1),
            integrity: 100,
            temperature_monitored: cargo.temperature_monitored,
            excursion_secs: 0,
            welfare: cargo.welfare_rated.then_some(4),
            seal: if cargo.sealable {
                SealState::Sealed
            } else {
                SealState::NotApplied
            },
            compliance: ComplianceFlags::default(),
            shipper_tier,
            convoy_size: 0,
            completed_at: at,
        }
    }

    pub fn time_ratio(&self) -> f64 {
        self.elapsed_secs as f64 / self.allotted_secs.max(1) as f64
    }
}
