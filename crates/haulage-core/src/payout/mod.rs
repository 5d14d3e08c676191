//! Payout engine.
//!
//! A pure function over a [`PayoutSnapshot`]: no clock, no ledger, no audit
//! log. The depot feeds it the frozen load at a terminal transition and books
//! the result itself; previews call the same function on a nominal snapshot.
//!
//! Stage order is fixed. Each stage scales the running total, so reordering
//! changes the result.
//!
//! 1. base (tier rate × cargo modifier × distance, × surge)
//! 2. multi-stop premium
//! 3. weight bracket
//! 4. ownership bonus
//! 5. time performance
//! 6. integrity (integrity-tracked cargo)
//! 7. temperature compliance (monitored cargo)
//! 8. welfare (welfare-rated cargo)
//! 9. compliance bonuses, summed then capped
//! 10. night premium
//! 11. economy multiplier
//! 12. floor

mod config;
mod snapshot;

pub use config::{ComplianceTable, PayoutConfig, Step, SteppedTable};
pub use snapshot::PayoutSnapshot;

use chrono::{DateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::domain::load::{OwnershipMode, SealState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Rejection,
    Base,
    MultiStop,
    Weight,
    Ownership,
    TimePerformance,
    Integrity,
    Temperature,
    Welfare,
    Compliance,
    NightPremium,
    Economy,
    PartialCompletion,
    Floor,
}

/// How the terminal event settles the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    Delivery,
    /// Consignee refused the load part-way through a multi-stop route.
    PartialRejection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutOutcome {
    Delivered,
    Rejected,
}

/// One receipt line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownLine {
    pub stage: Stage,
    /// Multiplier applied to the running total.
    pub factor: f64,
    /// Flat amount added after the multiplier.
    pub flat: f64,
    pub total_after: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutResult {
    pub amount: i64,
    pub outcome: PayoutOutcome,
    pub floor_applied: bool,
    pub breakdown: Vec<BreakdownLine>,
}

impl PayoutResult {
    fn zero(outcome: PayoutOutcome, line: BreakdownLine) -> Self {
        Self {
            amount: 0,
            outcome,
            floor_applied: false,
            breakdown: vec![line],
        }
    }
}

/// Running total plus the lines that moved it.
struct Pipeline {
    total: f64,
    lines: Vec<BreakdownLine>,
}

impl Pipeline {
    fn start(base: f64, details: Vec<String>) -> Self {
        Self {
            total: base,
            lines: vec![BreakdownLine {
                stage: Stage::Base,
                factor: 1.0,
                flat: base,
                total_after: base,
                details,
            }],
        }
    }

    fn apply(&mut self, stage: Stage, factor: f64, flat: f64, details: Vec<String>) {
        if factor == 1.0 && flat == 0.0 {
            return;
        }
        self.total = self.total * factor + flat;
        self.lines.push(BreakdownLine {
            stage,
            factor,
            flat,
            total_after: self.total,
            details,
        });
    }

    fn scale(&mut self, stage: Stage, factor: f64) {
        self.apply(stage, factor, 0.0, Vec::new());
    }
}

/// Score a frozen load.
pub fn compute(
    config: &PayoutConfig,
    snap: &PayoutSnapshot,
    settlement: Settlement,
) -> PayoutResult {
    // before any other math
    if snap.integrity < config.rejection_threshold {
        return PayoutResult::zero(
            PayoutOutcome::Rejected,
            BreakdownLine {
                stage: Stage::Rejection,
                factor: 0.0,
                flat: 0.0,
                total_after: 0.0,
                details: vec![format!(
                    "integrity {} below threshold {}",
                    snap.integrity, config.rejection_threshold
                )],
            },
        );
    }
    if settlement == Settlement::PartialRejection && snap.stops_completed == 0 {
        return PayoutResult::zero(
            PayoutOutcome::Rejected,
            BreakdownLine {
                stage: Stage::PartialCompletion,
                factor: 0.0,
                flat: 0.0,
                total_after: 0.0,
                details: vec!["no stops completed".into()],
            },
        );
    }

    let mut base_details = vec![format!(
        "rate {} x cargo {} x distance {}",
        config.rate(snap.tier),
        snap.cargo_modifier,
        snap.distance
    )];
    let mut base = config.rate(snap.tier) * snap.cargo_modifier * snap.distance;
    if snap.surge_multiplier != 1.0 {
        base *= snap.surge_multiplier;
        base_details.push(format!("surge x{}", snap.surge_multiplier));
    }
    let mut run = Pipeline::start(base, base_details);

    if snap.stops > 1 {
        run.apply(
            Stage::MultiStop,
            1.0 + config.multi_stop_pct(snap.stops),
            config.multi_stop_flat * f64::from(snap.stops),
            vec![format!("{} stops", snap.stops)],
        );
    }

    run.scale(Stage::Weight, config.weight_brackets.below(f64::from(snap.weight_kg)));

    if snap.ownership != OwnershipMode::Rented {
        run.scale(Stage::Ownership, 1.0 + config.ownership_bonus);
    }

    run.apply(
        Stage::TimePerformance,
        config.time_performance.at_most(snap.time_ratio()),
        0.0,
        vec![format!("{:.2} of window used", snap.time_ratio())],
    );

    match snap.welfare {
        Some(rating) => {
            let idx = usize::from(rating.clamp(1, 5) - 1);
            run.scale(Stage::Welfare, config.welfare[idx]);
        }
        None => run.scale(
            Stage::Integrity,
            config.integrity.at_least(f64::from(snap.integrity)),
        ),
    }

    if snap.temperature_monitored {
        run.apply(
            Stage::Temperature,
            config.temperature.at_most(snap.excursion_secs as f64),
            0.0,
            vec![format!("{}s out of range", snap.excursion_secs)],
        );
    }

    let (bonus, details) = compliance_bonus(config, snap);
    run.apply(Stage::Compliance, 1.0 + bonus, 0.0, details);

    let hour = DateTime::from_timestamp(snap.completed_at, 0).map(|t| t.hour());
    if hour.is_some_and(|h| config.is_night(h)) {
        run.scale(Stage::NightPremium, 1.0 + config.night_premium);
    }

    run.scale(Stage::Economy, config.economy_multiplier);

    let outcome = match settlement {
        Settlement::Delivery => PayoutOutcome::Delivered,
        Settlement::PartialRejection => {
            let share = f64::from(snap.stops_completed) / f64::from(snap.stops.max(1));
            run.apply(
                Stage::PartialCompletion,
                share,
                0.0,
                vec![format!("{}/{} stops", snap.stops_completed, snap.stops)],
            );
            PayoutOutcome::Rejected
        }
    };

    let rounded = run.total.max(0.0).floor() as i64;
    let minimum = config.minimum(snap.tier);
    let floor_applied = rounded < minimum;
    let amount = rounded.max(minimum);
    if floor_applied {
        run.lines.push(BreakdownLine {
            stage: Stage::Floor,
            factor: 1.0,
            flat: (minimum - rounded) as f64,
            total_after: minimum as f64,
            details: vec![format!("tier minimum {minimum}")],
        });
    }

    PayoutResult {
        amount,
        outcome,
        floor_applied,
        breakdown: run.lines,
    }
}

/// Summed compliance bonus after the cap, with the contributing signals.
fn compliance_bonus(config: &PayoutConfig, snap: &PayoutSnapshot) -> (f64, Vec<String>) {
    let table = &config.compliance;
    let convoy = table.convoy.at_least(f64::from(snap.convoy_size));
    let signals = [
        ("seal_intact", snap.seal == SealState::Sealed, table.seal_intact),
        (
            "weigh_station",
            snap.compliance.weigh_station_stamped,
            table.weigh_station,
        ),
        ("pre_trip", snap.compliance.pre_trip_done, table.pre_trip),
        ("manifest", snap.compliance.manifest_verified, table.manifest),
        ("shipper", true, table.shipper_bonus(snap.shipper_tier)),
        ("convoy", true, convoy),
        (
            "clean_cold_chain",
            snap.temperature_monitored && snap.excursion_secs == 0,
            table.clean_cold_chain,
        ),
        (
            "excellent_welfare",
            snap.welfare == Some(5),
            table.excellent_welfare,
        ),
        (
            "all_stops",
            snap.stops > 1 && snap.stops_completed + 1 >= snap.stops,
            table.all_stops,
        ),
    ];

    let mut sum = 0.0;
    let mut details = Vec::new();
    for (name, earned, pct) in signals {
        if earned && pct > 0.0 {
            sum += pct;
            details.push(format!("{name} +{:.0}%", pct * 100.0));
        }
    }
    let capped = sum.min(table.cap);
    if capped < sum {
        details.push(format!(
            "capped {:.0}% -> {:.0}%",
            sum * 100.0,
            capped * 100.0
        ));
    }
    (capped, details)
}
