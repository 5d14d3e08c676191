//! Outbox - 副作用の配送待ち行列
//!
//! 状態遷移と同じトランザクションで effect を積み、
//! PublisherLoop が非同期に取り出して外部へ届けます。
//!
//! # フロー
//! 1. `push()` で pending に追加（遷移のコミットと同時）
//! 2. `pull()` で in-flight に移して取り出す
//! 3. 成功したら `ack()`、失敗したら `fail()` で pending に戻す

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::domain::catalog::Tier;
use crate::domain::ids::ActorId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Reputation {
        actor: ActorId,
        event: String,
        tier: Tier,
    },
    Notification {
        actor: ActorId,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub seq: u64,
    pub effect: Effect,
    pub created_at: i64,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outbox {
    next_seq: u64,
    pending: VecDeque<OutboxRecord>,
    in_flight: BTreeMap<u64, OutboxRecord>,
    delivered: u64,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Effect, at: i64) -> u64 {
        self.next_seq += 1;
        self.pending.push_back(OutboxRecord {
            seq: self.next_seq,
            effect,
            created_at: at,
            attempts: 0,
        });
        self.next_seq
    }

    /// Take up to `limit` records for delivery.
    pub fn pull(&mut self, limit: usize) -> Vec<OutboxRecord> {
        let n = limit.min(self.pending.len());
        let batch: Vec<OutboxRecord> = self.pending.drain(..n).collect();
        for record in &batch {
            self.in_flight.insert(record.seq, record.clone());
        }
        batch
    }

    pub fn ack(&mut self, seq: u64) -> bool {
        let acked = self.in_flight.remove(&seq).is_some();
        if acked {
            self.delivered += 1;
        }
        acked
    }

    /// Put a failed record back at the front of the queue.
    pub fn fail(&mut self, seq: u64) -> bool {
        let Some(mut record) = self.in_flight.remove(&seq) else {
            return false;
        };
        record.attempts += 1;
        self.pending.push_front(record);
        true
    }

    /// Return in-flight records to pending (after a restart).
    pub fn requeue_in_flight(&mut self) {
        let stranded = std::mem::take(&mut self.in_flight);
        for (_, record) in stranded.into_iter().rev() {
            self.pending.push_front(record);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn pending(&self) -> impl Iterator<Item = &OutboxRecord> {
        self.pending.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(msg: &str) -> Effect {
        Effect::Notification {
            actor: ActorId::from("a"),
            message: msg.into(),
        }
    }

    #[test]
    fn pull_ack_drains_in_order() {
        let mut outbox = Outbox::new();
        outbox.push(note("one"), 1);
        outbox.push(note("two"), 2);

        let batch = outbox.pull(10);
        assert_eq!(batch.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(outbox.pending_len(), 0);
        assert!(outbox.ack(1));
        assert!(outbox.ack(2));
        assert!(!outbox.ack(2));
        assert_eq!(outbox.delivered(), 2);
    }

    #[test]
    fn failed_record_is_retried_first() {
        let mut outbox = Outbox::new();
        outbox.push(note("one"), 1);
        outbox.push(note("two"), 2);
        let first = outbox.pull(1).remove(0);
        assert!(outbox.fail(first.seq));

        let retry = outbox.pull(1).remove(0);
        assert_eq!(retry.seq, first.seq);
        assert_eq!(retry.attempts, 1);
    }

    #[test]
    fn restart_requeues_in_flight() {
        let mut outbox = Outbox::new();
        for i in 0..3 {
            outbox.push(note("x"), i);
        }
        outbox.pull(2);
        outbox.requeue_in_flight();
        assert_eq!(outbox.in_flight_len(), 0);
        let seqs: Vec<u64> = outbox.pending().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
