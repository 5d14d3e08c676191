//! Append-only audit log.
//!
//! Events are never edited or removed. `seq` is strictly increasing and is
//! the cursor clients use to page through a load's history.

use std::collections::HashMap;

use crate::domain::events::{AuditEvent, LoadEvent};
use crate::domain::ids::{ActorId, JobId, LoadId};

#[derive(Debug, Default)]
pub struct AuditLog {
    events: Vec<AuditEvent>,
    by_job: HashMap<JobId, Vec<usize>>,
    by_load: HashMap<LoadId, Vec<usize>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the indexes from a persisted event list.
    pub fn from_events(events: Vec<AuditEvent>) -> Self {
        let mut log = Self::new();
        for event in events {
            log.push(event);
        }
        log
    }

    fn push(&mut self, event: AuditEvent) {
        let idx = self.events.len();
        self.by_job.entry(event.job_id).or_default().push(idx);
        if let Some(load_id) = event.load_id {
            self.by_load.entry(load_id).or_default().push(idx);
        }
        self.events.push(event);
    }

    pub fn last_seq(&self) -> u64 {
        self.events.last().map(|e| e.seq).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn append(
        &mut self,
        job_id: JobId,
        load_id: Option<LoadId>,
        actor: &ActorId,
        event: LoadEvent,
        at: i64,
    ) -> u64 {
        let seq = self.last_seq() + 1;
        self.push(AuditEvent {
            seq,
            job_id,
            load_id,
            actor: actor.clone(),
            kind: event.kind,
            payload: event.payload,
            at,
        });
        seq
    }

    /// Events for `load_id` with `seq > after_seq`, oldest first.
    pub fn for_load(&self, load_id: LoadId, after_seq: u64) -> Vec<AuditEvent> {
        self.by_load
            .get(&load_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.events[i])
            .filter(|e| e.seq > after_seq)
            .cloned()
            .collect()
    }

    pub fn for_job(&self, job_id: JobId) -> Vec<AuditEvent> {
        self.by_job
            .get(&job_id)
            .into_iter()
            .flatten()
            .map(|&i| self.events[i].clone())
            .collect()
    }

    /// Events stamped within `[from, to)`.
    pub fn between(&self, from: i64, to: i64) -> Vec<AuditEvent> {
        self.events
            .iter()
            .filter(|e| e.at >= from && e.at < to)
            .cloned()
            .collect()
    }
}
