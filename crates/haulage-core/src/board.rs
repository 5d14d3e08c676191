//! Job board.
//!
//! One authoritative set of postings, refreshed per `(region, tier)` slot.
//! Slots refresh on staggered schedules so the whole board never turns over
//! at once. Generation is seeded per slot and refresh round, which keeps a
//! restarted board producing the same kind of mix.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::catalog::{Catalog, CargoDefinition, Tier};
use crate::domain::errors::HaulError;
use crate::domain::ids::JobId;
use crate::domain::posting::{BoardStatus, JobPosting};
use crate::ports::IdGenerator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub regions: Vec<String>,
    /// Live postings kept per slot.
    pub postings_per_slot: usize,
    pub posting_ttl_secs: i64,
    pub refresh_interval_secs: i64,
    /// Offset between consecutive slots' refresh times.
    pub stagger_secs: i64,
    /// Terminal postings older than this are dropped from the board.
    pub retention_secs: i64,
    pub seed: u64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            regions: vec!["north".into(), "south".into(), "east".into(), "west".into()],
            postings_per_slot: 4,
            posting_ttl_secs: 1_800,
            refresh_interval_secs: 900,
            stagger_secs: 45,
            retention_secs: 86_400,
            seed: 0x5eed_f00d,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub region: String,
    pub tier: Tier,
    pub next_refresh_at: i64,
    pub generation: u64,
}

impl Slot {
    fn holds(&self, posting: &JobPosting) -> bool {
        posting.region == self.region && posting.tier == self.tier && posting.surge_multiplier == 1.0
    }

    fn rng(&self, seed: u64) -> StdRng {
        // FNV-1a over the region name
        let key = self
            .region
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
                (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
            });
        let round = self.generation.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        StdRng::seed_from_u64(seed ^ key ^ round ^ u64::from(self.tier.value()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub expired: Vec<JobId>,
    pub posted: Vec<JobId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Board {
    postings: BTreeMap<JobId, JobPosting>,
    slots: Vec<Slot>,
}

impl Board {
    /// Empty board with every slot due at `now`.
    pub fn new(config: &BoardConfig, now: i64) -> Self {
        let slots = config
            .regions
            .iter()
            .flat_map(|region| {
                Tier::ALL.into_iter().map(move |tier| Slot {
                    region: region.clone(),
                    tier,
                    next_refresh_at: now,
                    generation: 0,
                })
            })
            .collect();
        Self {
            postings: BTreeMap::new(),
            slots,
        }
    }

    pub fn get(&self, job_id: JobId) -> Option<&JobPosting> {
        self.postings.get(&job_id)
    }

    pub fn get_mut(&mut self, job_id: JobId) -> Option<&mut JobPosting> {
        self.postings.get_mut(&job_id)
    }

    pub fn insert(&mut self, posting: JobPosting) {
        self.postings.insert(posting.job_id, posting);
    }

    pub fn postings(&self) -> impl Iterator<Item = &JobPosting> {
        self.postings.values()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Available postings, oldest first.
    pub fn available(&self, region: Option<&str>, tier: Option<Tier>) -> Vec<&JobPosting> {
        let mut out: Vec<&JobPosting> = self
            .postings
            .values()
            .filter(|p| p.is_available())
            .filter(|p| region.is_none_or(|r| p.region == r))
            .filter(|p| tier.is_none_or(|t| p.tier == t))
            .collect();
        out.sort_by_key(|p| (p.posted_at, p.job_id));
        out
    }

    pub fn set_status(&mut self, job_id: JobId, status: BoardStatus) -> Result<(), HaulError> {
        let posting = self
            .postings
            .get_mut(&job_id)
            .ok_or(HaulError::JobNotFound(job_id))?;
        posting.status = status;
        Ok(())
    }

    /// Unreserved postings whose TTL ran out.
    pub fn expire_stale(&mut self, now: i64) -> Vec<JobId> {
        self.postings
            .values_mut()
            .filter(|p| p.is_available() && p.expires_at <= now)
            .map(|p| {
                p.status = BoardStatus::Expired;
                p.job_id
            })
            .collect()
    }

    /// Drop terminal postings past retention.
    pub fn prune(&mut self, now: i64, retention_secs: i64) -> usize {
        let before = self.postings.len();
        self.postings
            .retain(|_, p| !(p.status.is_terminal() && p.expires_at + retention_secs <= now));
        before - self.postings.len()
    }

    /// Refresh every slot whose turn has come.
    pub fn refresh_due(
        &mut self,
        config: &BoardConfig,
        catalog: &Catalog,
        ids: &dyn IdGenerator,
        now: i64,
    ) -> RefreshReport {
        let mut report = RefreshReport::default();
        for idx in 0..self.slots.len() {
            if self.slots[idx].next_refresh_at > now {
                continue;
            }
            let slot = self.slots[idx].clone();

            for posting in self.postings.values_mut() {
                if slot.holds(posting) && posting.is_available() {
                    posting.status = BoardStatus::Expired;
                    report.expired.push(posting.job_id);
                }
            }

            let live = self
                .postings
                .values()
                .filter(|p| slot.holds(p) && !p.status.is_terminal())
                .count();
            let mut rng = slot.rng(config.seed);
            for _ in live..config.postings_per_slot {
                let Some(posting) = generate(
                    catalog,
                    ids,
                    &mut rng,
                    &slot.region,
                    slot.tier,
                    1.0,
                    now,
                    config.posting_ttl_secs,
                ) else {
                    break;
                };
                report.posted.push(posting.job_id);
                self.insert(posting);
            }

            let interval = config.refresh_interval_secs.max(1);
            let next = &mut self.slots[idx];
            next.next_refresh_at = if next.generation == 0 {
                now + interval + idx as i64 * config.stagger_secs
            } else {
                // keep the slot's offset; skip rounds missed while down
                let due = next.next_refresh_at + interval;
                if due > now {
                    due
                } else {
                    due + ((now - due) / interval + 1) * interval
                }
            };
            next.generation += 1;
        }
        report
    }

    /// Post `count` extra jobs with a payout multiplier.
    #[allow(clippy::too_many_arguments)]
    pub fn create_surge(
        &mut self,
        catalog: &Catalog,
        ids: &dyn IdGenerator,
        region: &str,
        tier: Tier,
        count: usize,
        multiplier: f64,
        ttl_secs: i64,
        now: i64,
    ) -> Result<Vec<JobId>, HaulError> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(HaulError::InvalidInput {
                field: "multiplier",
                reason: format!("{multiplier} is not a positive multiplier"),
            });
        }
        if count == 0 {
            return Err(HaulError::InvalidInput {
                field: "count",
                reason: "surge must post at least one job".into(),
            });
        }
        let mut rng = StdRng::seed_from_u64(now as u64 ^ count as u64);
        let mut posted = Vec::with_capacity(count);
        for _ in 0..count {
            let posting = generate(catalog, ids, &mut rng, region, tier, multiplier, now, ttl_secs)
                .ok_or_else(|| HaulError::InvalidInput {
                    field: "tier",
                    reason: format!("no cargo is postable at {tier}"),
                })?;
            posted.push(posting.job_id);
            self.insert(posting);
        }
        Ok(posted)
    }

    pub fn counts(&self) -> BTreeMap<BoardStatus, usize> {
        let mut counts = BTreeMap::new();
        for p in self.postings.values() {
            *counts.entry(p.status).or_insert(0) += 1;
        }
        counts
    }
}

#[allow(clippy::too_many_arguments)]
fn generate(
    catalog: &Catalog,
    ids: &dyn IdGenerator,
    rng: &mut StdRng,
    region: &str,
    tier: Tier,
    surge_multiplier: f64,
    now: i64,
    ttl_secs: i64,
) -> Option<JobPosting> {
    let tier_def = catalog.tier(tier)?;
    let choices: Vec<&CargoDefinition> = catalog.cargo_for_tier(tier);
    let cargo = *choices.choose(rng)?;

    let distance = (rng.gen_range(tier_def.min_distance..=tier_def.max_distance) * 10.0).round() / 10.0;
    let weight_kg = rng.gen_range(cargo.min_weight_kg..=cargo.max_weight_kg) / 100 * 100;
    let stops = if tier.value() == 0 {
        1
    } else {
        rng.gen_range(1..=cargo.max_stops.max(1))
    };
    let origin = rng.gen_range(1..=12_u32);
    let destination = (origin + rng.gen_range(0..11_u32)) % 12 + 1;

    Some(JobPosting {
        job_id: ids.job_id(),
        catalog_version: catalog.version,
        cargo: cargo.kind,
        tier,
        region: region.to_string(),
        origin: format!("{region}/yard-{origin}"),
        destination: format!("{region}/yard-{destination}"),
        distance,
        weight_kg,
        stops,
        requirements: catalog.requirements(cargo.kind, tier),
        deposit: catalog.deposit_for(cargo.kind, tier),
        window_secs: catalog.window_secs(cargo.kind, tier, distance, stops),
        surge_multiplier,
        posted_at: now,
        expires_at: now + ttl_secs,
        status: BoardStatus::Available,
        reserved_by: None,
        reserved_until: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::ActorId;
    use crate::ports::{SystemClock, UlidGenerator};

    fn setup() -> (Board, BoardConfig, Catalog, UlidGenerator<SystemClock>) {
        let config = BoardConfig {
            regions: vec!["north".into(), "south".into()],
            ..BoardConfig::default()
        };
        (Board::new(&config, 0), config, Catalog::standard(), UlidGenerator::new(SystemClock))
    }

    #[test]
    fn first_refresh_fills_every_slot() {
        let (mut board, config, catalog, ids) = setup();
        let report = board.refresh_due(&config, &catalog, &ids, 0);
        assert_eq!(report.posted.len(), 2 * 4 * config.postings_per_slot);
        assert!(report.expired.is_empty());
        assert_eq!(board.available(Some("south"), Some(Tier::new(3).unwrap())).len(), 4);
    }

    #[test]
    fn generated_postings_respect_catalog_bounds() {
        let (mut board, config, catalog, ids) = setup();
        board.refresh_due(&config, &catalog, &ids, 0);
        for p in board.postings() {
            let tier = catalog.tier(p.tier).unwrap();
            let cargo = catalog.cargo(p.cargo).unwrap();
            assert!(cargo.min_tier <= p.tier);
            assert!(p.distance >= tier.min_distance && p.distance <= tier.max_distance);
            assert!(p.weight_kg <= cargo.max_weight_kg);
            assert!(p.stops >= 1 && p.stops <= cargo.max_stops);
            assert!(p.window_secs >= tier.min_window_secs);
            assert_eq!(p.deposit, catalog.deposit_for(p.cargo, p.tier));
        }
    }

    #[test]
    fn refreshes_are_staggered() {
        let (mut board, config, catalog, ids) = setup();
        board.refresh_due(&config, &catalog, &ids, 0);
        let times: Vec<i64> = board.slots().iter().map(|s| s.next_refresh_at).collect();
        assert_eq!(times[0], config.refresh_interval_secs);
        assert_eq!(times[1], config.refresh_interval_secs + config.stagger_secs);

        let report = board.refresh_due(&config, &catalog, &ids, config.refresh_interval_secs);
        assert_eq!(report.expired.len(), config.postings_per_slot);
        assert_eq!(report.posted.len(), config.postings_per_slot);
    }

    #[test]
    fn refresh_keeps_reserved_postings() {
        let (mut board, config, catalog, ids) = setup();
        board.refresh_due(&config, &catalog, &ids, 0);
        let job = board.available(Some("north"), Some(Tier::new(0).unwrap()))[0].job_id;
        board.get_mut(job).unwrap().mark_reserved(ActorId::from("a"), 100);

        let report = board.refresh_due(&config, &catalog, &ids, config.refresh_interval_secs);
        assert!(!report.expired.contains(&job));
        assert_eq!(board.get(job).unwrap().status, BoardStatus::Reserved);
        // reserved one still counts toward the slot
        assert_eq!(report.posted.len(), config.postings_per_slot - 1);
    }

    #[test]
    fn stale_postings_expire() {
        let (mut board, config, catalog, ids) = setup();
        board.refresh_due(&config, &catalog, &ids, 0);
        assert!(board.expire_stale(config.posting_ttl_secs - 1).is_empty());
        let expired = board.expire_stale(config.posting_ttl_secs);
        assert_eq!(expired.len(), board.postings().count());
        assert_eq!(board.prune(config.posting_ttl_secs + config.retention_secs, config.retention_secs), expired.len());
    }

    #[test]
    fn surge_postings_carry_multiplier() {
        let (mut board, _, catalog, ids) = setup();
        let tier = Tier::new(2).unwrap();
        let posted = board
            .create_surge(&catalog, &ids, "north", tier, 3, 1.5, 600, 10)
            .unwrap();
        assert_eq!(posted.len(), 3);
        for id in posted {
            let p = board.get(id).unwrap();
            assert_eq!(p.surge_multiplier, 1.5);
            assert_eq!(p.expires_at, 610);
        }
        assert!(board
            .create_surge(&catalog, &ids, "north", tier, 1, 0.0, 600, 10)
            .is_err());
    }
}
