//! Clock port - 時刻の抽象化
//!
//! スコアに使う時間（遅延・逸脱・停車）はすべてここから取ります。
//! クライアントの時計は一切信用しません。
//!
//! # 実装
//! - **SystemClock**: OS の壁時計
//! - **ReconciledClock**: 本番用。永続化された基準時刻より前には戻らない
//! - **FixedClock**: テスト用。手で進める

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};

/// Clock は現在時刻を提供
///
/// # テスト容易性
/// - trait により時刻を差し替え可能
/// - テストでは FixedClock を使用
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Unix seconds.
    fn unix(&self) -> i64 {
        self.now().timestamp()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Monotonic server clock.
///
/// Starts from the later of the wall clock and the last persisted reference,
/// then advances by `Instant` elapsed time. A wall clock stepped backwards
/// across a restart cannot rewind windows or durations.
#[derive(Debug, Clone)]
pub struct ReconciledClock {
    base: DateTime<Utc>,
    started: Instant,
}

impl ReconciledClock {
    pub fn new(reference: Option<i64>) -> Self {
        let wall = Utc::now();
        let base = reference
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map_or(wall, |r| r.max(wall));
        Self {
            base,
            started: Instant::now(),
        }
    }

    /// Value to persist so the next process never starts earlier.
    pub fn reference(&self) -> i64 {
        self.unix()
    }
}

impl Clock for ReconciledClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.started.elapsed()).unwrap_or(TimeDelta::zero());
        self.base + elapsed
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Debug, Clone)]
pub struct FixedClock {
    millis: Arc<AtomicI64>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(at.timestamp_millis())),
        }
    }

    pub fn at_unix(secs: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(secs * 1_000)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.millis.fetch_add(secs * 1_000, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_advances_for_every_clone() {
        let clock = FixedClock::at_unix(1_000);
        let shared = clock.clone();
        clock.advance_secs(60);
        assert_eq!(shared.unix(), 1_060);
    }

    #[test]
    fn fixed_clock_set() {
        let clock = FixedClock::at_unix(0);
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        clock.set(t);
        assert_eq!(clock.now(), t);
    }

    #[test]
    fn reconciled_clock_never_starts_before_reference() {
        let future = Utc::now().timestamp() + 3_600;
        let clock = ReconciledClock::new(Some(future));
        assert!(clock.unix() >= future);
        assert!(clock.reference() >= future);
    }

    #[test]
    fn reconciled_clock_follows_wall_clock_without_reference() {
        let before = Utc::now().timestamp();
        let clock = ReconciledClock::new(None);
        assert!(clock.unix() >= before);
    }

    #[test]
    fn arc_dyn_clock_delegates() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_unix(42));
        assert_eq!(clock.unix(), 42);
    }
}
