//! Payout tables.
//!
//! Percentages are fractions (`0.05` == 5 %). Every table has a default that
//! matches the published rate card; operators override through the TOML config.

use serde::{Deserialize, Serialize};

use crate::domain::catalog::Tier;
use crate::domain::load::ShipperTier;

/// One row of a stepped table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub bound: f64,
    pub factor: f64,
}

/// Stepped function: rows are scanned in order, `otherwise` covers the tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteppedTable {
    pub steps: Vec<Step>,
    pub otherwise: f64,
}

impl SteppedTable {
    fn new(steps: &[(f64, f64)], otherwise: f64) -> Self {
        Self {
            steps: steps
                .iter()
                .map(|&(bound, factor)| Step { bound, factor })
                .collect(),
            otherwise,
        }
    }

    /// First row with `value <= bound` (ascending bounds).
    pub fn at_most(&self, value: f64) -> f64 {
        self.steps
            .iter()
            .find(|s| value <= s.bound)
            .map_or(self.otherwise, |s| s.factor)
    }

    /// First row with `value < bound` (ascending bounds).
    pub fn below(&self, value: f64) -> f64 {
        self.steps
            .iter()
            .find(|s| value < s.bound)
            .map_or(self.otherwise, |s| s.factor)
    }

    /// First row with `value >= bound` (descending bounds).
    pub fn at_least(&self, value: f64) -> f64 {
        self.steps
            .iter()
            .find(|s| value >= s.bound)
            .map_or(self.otherwise, |s| s.factor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceTable {
    pub seal_intact: f64,
    pub weigh_station: f64,
    pub pre_trip: f64,
    pub manifest: f64,
    /// Indexed by `ShipperTier` (new, familiar, trusted, partner).
    pub shipper: [f64; 4],
    /// Convoy size (actors online in the region) → bonus, descending bounds.
    pub convoy: SteppedTable,
    pub clean_cold_chain: f64,
    pub excellent_welfare: f64,
    pub all_stops: f64,
    /// Ceiling applied to the summed bonuses.
    pub cap: f64,
}

impl ComplianceTable {
    pub fn shipper_bonus(&self, tier: ShipperTier) -> f64 {
        let idx = match tier {
            ShipperTier::New => 0,
            ShipperTier::Familiar => 1,
            ShipperTier::Trusted => 2,
            ShipperTier::Partner => 3,
        };
        self.shipper[idx]
    }
}

impl Default for ComplianceTable {
    fn default() -> Self {
        Self {
            seal_intact: 0.05,
            weigh_station: 0.05,
            pre_trip: 0.03,
            manifest: 0.03,
            shipper: [0.0, 0.05, 0.08, 0.10],
            convoy: SteppedTable::new(&[(4.0, 0.05), (2.0, 0.03)], 0.0),
            clean_cold_chain: 0.10,
            excellent_welfare: 0.05,
            all_stops: 0.04,
            cap: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutConfig {
    /// Per distance unit, indexed by tier.
    pub tier_rates: [f64; 4],
    /// Per-tier minimum payout.
    pub tier_minimums: [i64; 4],
    /// Premium for 2, 3, 4+ stops.
    pub multi_stop_pct: Vec<f64>,
    pub multi_stop_flat: f64,
    /// Absolute weight (kg), strict upper bounds.
    pub weight_brackets: SteppedTable,
    pub ownership_bonus: f64,
    /// Elapsed / allotted window.
    pub time_performance: SteppedTable,
    /// Integrity percent, descending bounds.
    pub integrity: SteppedTable,
    /// Below this integrity the load is rejected with payout 0.
    pub rejection_threshold: u8,
    /// Accumulated excursion seconds.
    pub temperature: SteppedTable,
    /// Indexed by welfare rating - 1.
    pub welfare: [f64; 5],
    pub compliance: ComplianceTable,
    pub night_premium: f64,
    /// UTC hour the night window opens (inclusive).
    pub night_start_hour: u32,
    /// UTC hour the night window closes (exclusive).
    pub night_end_hour: u32,
    pub economy_multiplier: f64,
}

impl PayoutConfig {
    pub fn rate(&self, tier: Tier) -> f64 {
        self.tier_rates[tier.index()]
    }

    pub fn minimum(&self, tier: Tier) -> i64 {
        self.tier_minimums[tier.index()]
    }

    pub fn multi_stop_pct(&self, stops: u8) -> f64 {
        if stops < 2 || self.multi_stop_pct.is_empty() {
            return 0.0;
        }
        let idx = usize::from(stops - 2).min(self.multi_stop_pct.len() - 1);
        self.multi_stop_pct[idx]
    }

    pub fn is_night(&self, hour: u32) -> bool {
        if self.night_start_hour <= self.night_end_hour {
            (self.night_start_hour..self.night_end_hour).contains(&hour)
        } else {
            hour >= self.night_start_hour || hour < self.night_end_hour
        }
    }
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            tier_rates: [800.0, 1_200.0, 1_800.0, 2_600.0],
            tier_minimums: [2_000, 4_000, 8_000, 15_000],
            multi_stop_pct: vec![0.10, 0.15, 0.20],
            multi_stop_flat: 500.0,
            weight_brackets: SteppedTable::new(
                &[(10_000.0, 1.0), (20_000.0, 1.1), (30_000.0, 1.2)],
                1.35,
            ),
            ownership_bonus: 0.10,
            time_performance: SteppedTable::new(
                &[(0.8, 1.10), (1.0, 1.0), (1.25, 0.85), (1.5, 0.70)],
                0.50,
            ),
            integrity: SteppedTable::new(&[(95.0, 1.0), (80.0, 0.9), (60.0, 0.75)], 0.5),
            rejection_threshold: 40,
            temperature: SteppedTable::new(
                &[(0.0, 1.0), (120.0, 0.95), (600.0, 0.8), (1_800.0, 0.6)],
                0.4,
            ),
            welfare: [0.4, 0.65, 0.85, 1.0, 1.1],
            compliance: ComplianceTable::default(),
            night_premium: 0.10,
            night_start_hour: 22,
            night_end_hour: 5,
            economy_multiplier: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(9_999.0, 1.0)]
    #[case(10_000.0, 1.1)]
    #[case(19_999.0, 1.1)]
    #[case(29_999.0, 1.2)]
    #[case(30_000.0, 1.35)]
    fn weight_brackets_are_strict(#[case] kg: f64, #[case] expected: f64) {
        assert_eq!(PayoutConfig::default().weight_brackets.below(kg), expected);
    }

    #[rstest]
    #[case(0.5, 1.10)]
    #[case(0.8, 1.10)]
    #[case(0.95, 1.0)]
    #[case(1.2, 0.85)]
    #[case(1.5, 0.70)]
    #[case(3.0, 0.50)]
    fn time_performance_steps(#[case] ratio: f64, #[case] expected: f64) {
        assert_eq!(PayoutConfig::default().time_performance.at_most(ratio), expected);
    }

    #[rstest]
    #[case(100.0, 1.0)]
    #[case(95.0, 1.0)]
    #[case(94.0, 0.9)]
    #[case(60.0, 0.75)]
    #[case(45.0, 0.5)]
    fn integrity_steps(#[case] integrity: f64, #[case] expected: f64) {
        assert_eq!(PayoutConfig::default().integrity.at_least(integrity), expected);
    }

    #[rstest]
    #[case(1, 0.0)]
    #[case(2, 0.10)]
    #[case(3, 0.15)]
    #[case(4, 0.20)]
    #[case(9, 0.20)]
    fn multi_stop_percentage(#[case] stops: u8, #[case] expected: f64) {
        assert_eq!(PayoutConfig::default().multi_stop_pct(stops), expected);
    }

    #[rstest]
    #[case(22, true)]
    #[case(3, true)]
    #[case(5, false)]
    #[case(12, false)]
    fn night_window_wraps_midnight(#[case] hour: u32, #[case] expected: bool) {
        assert_eq!(PayoutConfig::default().is_night(hour), expected);
    }

    #[test]
    fn config_parses_with_partial_overrides() {
        let cfg: PayoutConfig = toml::from_str("economy_multiplier = 1.5\nrejection_threshold = 30\n").unwrap();
        assert_eq!(cfg.economy_multiplier, 1.5);
        assert_eq!(cfg.rejection_threshold, 30);
        assert_eq!(cfg.tier_minimums, PayoutConfig::default().tier_minimums);
    }
}
