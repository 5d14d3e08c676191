//! Reservation manager.
//!
//! Holds live next to the board and are only touched under the board lock.
//! Every check runs before the first write, so a denied call changes nothing.
//!
//! A hold whose `reserved_until` has passed is not live. It stops blocking its
//! actor and its job right away; the posting itself is reverted either by the
//! sweep or by the next reservation that reclaims it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::domain::catalog::Tier;
use crate::domain::errors::HaulError;
use crate::domain::ids::{ActorId, JobId, LoadId};
use crate::domain::posting::{BoardStatus, JobPosting};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    pub hold_secs: i64,
    /// Consecutive releases that trigger a cooldown.
    pub release_limit: u32,
    pub cooldown_secs: i64,
    /// Lowest tier blocked during a cooldown.
    pub cooldown_min_tier: Tier,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            hold_secs: 120,
            release_limit: 5,
            cooldown_secs: 600,
            cooldown_min_tier: Tier::ALL[2],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub job_id: JobId,
    pub actor: ActorId,
    pub expires_at: i64,
}

/// A hold that lapsed and was taken back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LapsedHold {
    pub job_id: JobId,
    pub actor: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reserved {
    pub reservation: Reservation,
    pub reclaimed: Vec<LapsedHold>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    pub consecutive_releases: u32,
    /// Set when this release tripped the cooldown.
    pub cooldown_until: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub consecutive_releases: u32,
    pub cooldown_until: Option<i64>,
    pub suspended_until: Option<i64>,
}

impl Standing {
    fn is_idle(&self) -> bool {
        self.consecutive_releases == 0
            && self.cooldown_until.is_none()
            && self.suspended_until.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservationBook {
    holds: BTreeMap<ActorId, JobId>,
    standing: BTreeMap<ActorId, Standing>,
}

fn is_live(posting: &JobPosting, now: i64) -> bool {
    posting.status == BoardStatus::Reserved && posting.reserved_until.is_some_and(|u| u >= now)
}

impl ReservationBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standing(&self, actor: &ActorId) -> Standing {
        self.standing.get(actor).cloned().unwrap_or_default()
    }

    pub fn hold_of(&self, actor: &ActorId) -> Option<JobId> {
        self.holds.get(actor).copied()
    }

    /// The actor's hold, if it is still live.
    pub fn live_hold(&self, board: &Board, actor: &ActorId, now: i64) -> Option<JobId> {
        let job_id = self.hold_of(actor)?;
        board
            .get(job_id)
            .filter(|p| p.is_reserved_by(actor, now))
            .map(|p| p.job_id)
    }

    pub fn reserve(
        &mut self,
        board: &mut Board,
        config: &ReservationConfig,
        job_id: JobId,
        actor: &ActorId,
        active_load: Option<LoadId>,
        now: i64,
    ) -> Result<Reserved, HaulError> {
        let standing = self.standing(actor);
        if let Some(until) = standing.suspended_until.filter(|u| *u > now) {
            return Err(HaulError::ActorSuspended {
                actor: actor.clone(),
                until,
            });
        }
        if let Some(load_id) = active_load {
            return Err(HaulError::ActorHasActiveLoad {
                actor: actor.clone(),
                load_id,
            });
        }
        if let Some(held) = self.live_hold(board, actor, now) {
            return Err(HaulError::ActorHasReservation {
                actor: actor.clone(),
                job_id: held,
            });
        }

        let posting = board.get(job_id).ok_or(HaulError::JobNotFound(job_id))?;
        let lapsed_holder = match posting.status {
            BoardStatus::Available => None,
            BoardStatus::Reserved if is_live(posting, now) => {
                return Err(HaulError::AlreadyReserved(job_id));
            }
            BoardStatus::Reserved => posting.reserved_by.clone(),
            status => return Err(HaulError::JobNotAvailable { job_id, status }),
        };
        if let Some(until) = standing.cooldown_until.filter(|u| *u > now)
            && posting.tier >= config.cooldown_min_tier
        {
            return Err(HaulError::ReleaseCooldown {
                actor: actor.clone(),
                until,
                tier: posting.tier,
            });
        }

        // checks done; writes start here
        let mut reclaimed = Vec::new();
        if let Some(prev) = self.holds.remove(actor) {
            if let Some(p) = board.get_mut(prev)
                && p.reserved_by.as_ref() == Some(actor)
                && p.status == BoardStatus::Reserved
            {
                p.clear_reservation();
            }
            reclaimed.push(LapsedHold {
                job_id: prev,
                actor: actor.clone(),
            });
        }
        if let Some(prev_actor) = lapsed_holder.filter(|a| a != actor) {
            self.holds.remove(&prev_actor);
            reclaimed.push(LapsedHold {
                job_id,
                actor: prev_actor,
            });
        }

        let expires_at = now + config.hold_secs;
        if let Some(p) = board.get_mut(job_id) {
            p.mark_reserved(actor.clone(), expires_at);
        }
        self.holds.insert(actor.clone(), job_id);

        Ok(Reserved {
            reservation: Reservation {
                job_id,
                actor: actor.clone(),
                expires_at,
            },
            reclaimed,
        })
    }

    pub fn release(
        &mut self,
        board: &mut Board,
        config: &ReservationConfig,
        job_id: JobId,
        actor: &ActorId,
        now: i64,
    ) -> Result<Released, HaulError> {
        let posting = board.get(job_id).ok_or(HaulError::JobNotFound(job_id))?;
        if posting.status != BoardStatus::Reserved || posting.reserved_by.as_ref() != Some(actor) {
            return Err(HaulError::NotReservationHolder {
                actor: actor.clone(),
                job_id,
            });
        }

        if let Some(p) = board.get_mut(job_id) {
            p.clear_reservation();
        }
        self.holds.remove(actor);

        let standing = self.standing.entry(actor.clone()).or_default();
        standing.consecutive_releases += 1;
        let count = standing.consecutive_releases;
        let mut cooldown_until = None;
        if standing.consecutive_releases >= config.release_limit {
            let until = now + config.cooldown_secs;
            standing.cooldown_until = Some(until);
            standing.consecutive_releases = 0;
            cooldown_until = Some(until);
        }
        Ok(Released {
            consecutive_releases: count,
            cooldown_until,
        })
    }

    /// Revert every hold that lapsed before `now`.
    pub fn expire(&mut self, board: &mut Board, now: i64) -> Vec<LapsedHold> {
        let lapsed: Vec<(JobId, ActorId)> = board
            .postings()
            .filter(|p| p.status == BoardStatus::Reserved)
            .filter(|p| p.reserved_until.is_some_and(|u| u < now))
            .filter_map(|p| p.reserved_by.clone().map(|a| (p.job_id, a)))
            .collect();

        let mut out = Vec::with_capacity(lapsed.len());
        for (job_id, actor) in lapsed {
            if let Some(p) = board.get_mut(job_id) {
                p.clear_reservation();
            }
            if self.holds.get(&actor) == Some(&job_id) {
                self.holds.remove(&actor);
            }
            out.push(LapsedHold { job_id, actor });
        }
        out
    }

    /// Check that `actor` holds a live reservation on `job_id`.
    pub fn ensure_holder<'b>(
        &self,
        board: &'b Board,
        job_id: JobId,
        actor: &ActorId,
        now: i64,
    ) -> Result<&'b JobPosting, HaulError> {
        let posting = board.get(job_id).ok_or(HaulError::JobNotFound(job_id))?;
        if !posting.is_reserved_by(actor, now) {
            return Err(HaulError::NotReservationHolder {
                actor: actor.clone(),
                job_id,
            });
        }
        Ok(posting)
    }

    /// Turn a live hold into an accepted job and reset the release streak.
    pub fn complete_acceptance(&mut self, board: &mut Board, job_id: JobId, actor: &ActorId) {
        if let Some(p) = board.get_mut(job_id) {
            p.mark_accepted();
        }
        self.holds.remove(actor);
        if let Some(standing) = self.standing.get_mut(actor) {
            standing.consecutive_releases = 0;
        }
    }

    pub fn suspend(&mut self, actor: &ActorId, until: i64) {
        self.standing.entry(actor.clone()).or_default().suspended_until = Some(until);
    }

    /// Clear suspensions and cooldowns that ended; returns lifted suspensions.
    pub fn lift_expired(&mut self, now: i64) -> Vec<ActorId> {
        let mut lifted = Vec::new();
        for (actor, standing) in self.standing.iter_mut() {
            if standing.suspended_until.is_some_and(|u| u <= now) {
                standing.suspended_until = None;
                lifted.push(actor.clone());
            }
            if standing.cooldown_until.is_some_and(|u| u <= now) {
                standing.cooldown_until = None;
            }
        }
        self.standing.retain(|_, s| !s.is_idle());
        lifted
    }
}
