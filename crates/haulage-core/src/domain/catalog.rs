//! Job catalog: versioned, read-only reference data.
//!
//! Cargo kinds are a closed set. Everything tunable about a cargo kind
//! (rate modifier, weight range, which quality signal it carries, what an
//! actor needs to haul it) lives here as data, not code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Job tier, 0 (local) through 3 (specialist).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Tier(u8);

impl Tier {
    pub const MAX: u8 = 3;
    pub const ALL: [Tier; 4] = [Tier(0), Tier(1), Tier(2), Tier(3)];

    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Tier::new(value).ok_or_else(|| format!("tier out of range: {value}"))
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.0
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CargoKind {
    DryVan,
    /// Cold-chain freight; temperature monitored.
    Refrigerated,
    /// Welfare-rated instead of integrity-tracked.
    Livestock,
    Hazmat,
    Oversize,
    HighValue,
}

impl CargoKind {
    pub const ALL: [CargoKind; 6] = [
        CargoKind::DryVan,
        CargoKind::Refrigerated,
        CargoKind::Livestock,
        CargoKind::Hazmat,
        CargoKind::Oversize,
        CargoKind::HighValue,
    ];
}

/// Something an actor must hold before accepting a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Requirement {
    License(LicenseClass),
    Endorsement(Endorsement),
    Certification(Certification),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseClass {
    ClassB,
    ClassA,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endorsement {
    Hazmat,
    Livestock,
    Oversize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Certification {
    ColdChain,
    HighValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CargoDefinition {
    pub kind: CargoKind,
    pub display_name: String,
    /// Stage-1 payout modifier.
    pub rate_modifier: f64,
    pub min_weight_kg: u32,
    pub max_weight_kg: u32,
    pub min_tier: Tier,
    pub max_stops: u8,
    pub temperature_monitored: bool,
    pub welfare_rated: bool,
    pub sealable: bool,
    /// Window multiplier on top of the tier's per-distance allowance.
    pub window_factor: f64,
    pub deposit_surcharge: i64,
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierDefinition {
    pub tier: Tier,
    pub license: LicenseClass,
    pub deposit_base: i64,
    pub min_distance: f64,
    pub max_distance: f64,
    pub window_secs_per_unit: i64,
    pub min_window_secs: i64,
}

/// Static catalog consumed read-only by the board, the depot and previews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub version: u32,
    pub cargo: Vec<CargoDefinition>,
    pub tiers: Vec<TierDefinition>,
}

impl Catalog {
    pub fn cargo(&self, kind: CargoKind) -> Option<&CargoDefinition> {
        self.cargo.iter().find(|c| c.kind == kind)
    }

    pub fn tier(&self, tier: Tier) -> Option<&TierDefinition> {
        self.tiers.iter().find(|t| t.tier == tier)
    }

    /// Cargo kinds postable at `tier`.
    pub fn cargo_for_tier(&self, tier: Tier) -> Vec<&CargoDefinition> {
        self.cargo.iter().filter(|c| c.min_tier <= tier).collect()
    }

    /// Full requirement set for a cargo kind at a tier (license + cargo extras).
    pub fn requirements(&self, kind: CargoKind, tier: Tier) -> Vec<Requirement> {
        let mut reqs = Vec::new();
        if let Some(t) = self.tier(tier) {
            reqs.push(Requirement::License(t.license));
        }
        if let Some(c) = self.cargo(kind) {
            reqs.extend(c.requirements.iter().copied());
        }
        reqs.sort();
        reqs.dedup();
        reqs
    }

    pub fn deposit_for(&self, kind: CargoKind, tier: Tier) -> i64 {
        let base = self.tier(tier).map(|t| t.deposit_base).unwrap_or(0);
        let surcharge = self.cargo(kind).map(|c| c.deposit_surcharge).unwrap_or(0);
        base + surcharge
    }

    /// Allotted delivery window for a job.
    pub fn window_secs(&self, kind: CargoKind, tier: Tier, distance: f64, stops: u8) -> i64 {
        let Some(t) = self.tier(tier) else {
            return 0;
        };
        let factor = self.cargo(kind).map(|c| c.window_factor).unwrap_or(1.0);
        let travel = (distance * t.window_secs_per_unit as f64 * factor) as i64;
        // each intermediate stop gets a fixed dwell allowance
        let dwell = i64::from(stops.saturating_sub(1)) * 600;
        (travel + dwell).max(t.min_window_secs)
    }

    /// Catalog version 1.
    pub fn standard() -> Self {
        use Requirement::{Certification as C, Endorsement as E};

        let tier = |n: u8| Tier(n);
        Self {
            version: 1,
            tiers: vec![
                TierDefinition {
                    tier: tier(0),
                    license: LicenseClass::ClassB,
                    deposit_base: 500,
                    min_distance: 2.0,
                    max_distance: 8.0,
                    window_secs_per_unit: 150,
                    min_window_secs: 900,
                },
                TierDefinition {
                    tier: tier(1),
                    license: LicenseClass::ClassB,
                    deposit_base: 1_000,
                    min_distance: 5.0,
                    max_distance: 15.0,
                    window_secs_per_unit: 140,
                    min_window_secs: 1_200,
                },
                TierDefinition {
                    tier: tier(2),
                    license: LicenseClass::ClassA,
                    deposit_base: 2_500,
                    min_distance: 8.0,
                    max_distance: 25.0,
                    window_secs_per_unit: 130,
                    min_window_secs: 1_800,
                },
                TierDefinition {
                    tier: tier(3),
                    license: LicenseClass::ClassA,
                    deposit_base: 5_000,
                    min_distance: 15.0,
                    max_distance: 40.0,
                    window_secs_per_unit: 120,
                    min_window_secs: 2_400,
                },
            ],
            cargo: vec![
                CargoDefinition {
                    kind: CargoKind::DryVan,
                    display_name: "General freight".into(),
                    rate_modifier: 1.0,
                    min_weight_kg: 2_000,
                    max_weight_kg: 24_000,
                    min_tier: tier(0),
                    max_stops: 3,
                    temperature_monitored: false,
                    welfare_rated: false,
                    sealable: true,
                    window_factor: 1.0,
                    deposit_surcharge: 0,
                    requirements: vec![],
                },
                CargoDefinition {
                    kind: CargoKind::Refrigerated,
                    display_name: "Cold-chain produce".into(),
                    rate_modifier: 1.25,
                    min_weight_kg: 4_000,
                    max_weight_kg: 22_000,
                    min_tier: tier(1),
                    max_stops: 2,
                    temperature_monitored: true,
                    welfare_rated: false,
                    sealable: true,
                    window_factor: 0.9,
                    deposit_surcharge: 500,
                    requirements: vec![C(Certification::ColdChain)],
                },
                CargoDefinition {
                    kind: CargoKind::Livestock,
                    display_name: "Livestock".into(),
                    rate_modifier: 1.3,
                    min_weight_kg: 6_000,
                    max_weight_kg: 20_000,
                    min_tier: tier(1),
                    max_stops: 1,
                    temperature_monitored: false,
                    welfare_rated: true,
                    sealable: false,
                    window_factor: 0.85,
                    deposit_surcharge: 750,
                    requirements: vec![E(Endorsement::Livestock)],
                },
                CargoDefinition {
                    kind: CargoKind::Hazmat,
                    display_name: "Hazardous materials".into(),
                    rate_modifier: 1.6,
                    min_weight_kg: 8_000,
                    max_weight_kg: 30_000,
                    min_tier: tier(2),
                    max_stops: 1,
                    temperature_monitored: false,
                    welfare_rated: false,
                    sealable: true,
                    window_factor: 1.1,
                    deposit_surcharge: 2_000,
                    requirements: vec![E(Endorsement::Hazmat)],
                },
                CargoDefinition {
                    kind: CargoKind::Oversize,
                    display_name: "Oversize machinery".into(),
                    rate_modifier: 1.45,
                    min_weight_kg: 18_000,
                    max_weight_kg: 45_000,
                    min_tier: tier(2),
                    max_stops: 1,
                    temperature_monitored: false,
                    welfare_rated: false,
                    sealable: false,
                    window_factor: 1.3,
                    deposit_surcharge: 1_500,
                    requirements: vec![E(Endorsement::Oversize)],
                },
                CargoDefinition {
                    kind: CargoKind::HighValue,
                    display_name: "High-value electronics".into(),
                    rate_modifier: 1.8,
                    min_weight_kg: 1_000,
                    max_weight_kg: 12_000,
                    min_tier: tier(3),
                    max_stops: 2,
                    temperature_monitored: false,
                    welfare_rated: false,
                    sealable: true,
                    window_factor: 1.0,
                    deposit_surcharge: 4_000,
                    requirements: vec![C(Certification::HighValue)],
                },
            ],
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_rejects_out_of_range() {
        assert!(Tier::new(3).is_some());
        assert!(Tier::new(4).is_none());
        assert!(serde_json::from_str::<Tier>("7").is_err());
    }

    #[test]
    fn standard_catalog_covers_every_kind_and_tier() {
        let catalog = Catalog::standard();
        for kind in CargoKind::ALL {
            assert!(catalog.cargo(kind).is_some(), "{kind:?}");
        }
        for tier in Tier::ALL {
            assert!(catalog.tier(tier).is_some());
            assert!(!catalog.cargo_for_tier(tier).is_empty());
        }
    }

    #[test]
    fn welfare_and_temperature_tracking_are_exclusive() {
        for cargo in Catalog::standard().cargo {
            assert!(!(cargo.welfare_rated && cargo.temperature_monitored));
        }
    }

    #[test]
    fn requirements_combine_license_and_cargo_extras() {
        let catalog = Catalog::standard();
        let reqs = catalog.requirements(CargoKind::Hazmat, Tier::new(2).unwrap());
        assert!(reqs.contains(&Requirement::License(LicenseClass::ClassA)));
        assert!(reqs.contains(&Requirement::Endorsement(Endorsement::Hazmat)));
        assert_eq!(reqs.len(), 2);
    }

    #[test]
    fn window_respects_tier_minimum() {
        let catalog = Catalog::standard();
        let t0 = Tier::new(0).unwrap();
        assert_eq!(catalog.window_secs(CargoKind::DryVan, t0, 1.0, 1), 900);
        assert_eq!(catalog.window_secs(CargoKind::DryVan, t0, 8.0, 1), 1_200);
        assert_eq!(catalog.window_secs(CargoKind::DryVan, t0, 8.0, 3), 2_400);
    }
}
