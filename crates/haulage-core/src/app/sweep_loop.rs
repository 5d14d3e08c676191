//! SweepLoop - 定期的な回収処理
//!
//! # フロー
//! 1. interval ごとに `Depot::sweep()` を実行
//! 2. 失敗は sweep 内でログに残り、次の tick で再試行
//! 3. shutdown を受けたら抜ける

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::handle::next_tick;
use crate::depot::{Depot, SweepReport};

pub struct SweepLoop {
    depot: Arc<Depot>,
    interval: Duration,
}

impl SweepLoop {
    pub fn new(depot: Arc<Depot>, interval: Duration) -> Self {
        Self { depot, interval }
    }

    pub fn from_config(depot: Arc<Depot>) -> Self {
        let secs = depot.config().recovery.sweep_interval_secs;
        Self::new(depot, Duration::from_secs(secs))
    }

    pub async fn tick(&self) -> SweepReport {
        self.depot.sweep().await
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        // a slow sweep pushes the next one back instead of bunching ticks
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "sweep loop started");
        while next_tick(&mut ticker, &mut shutdown_rx).await {
            self.tick().await;
        }
        tracing::info!("sweep loop stopped");
    }
}
