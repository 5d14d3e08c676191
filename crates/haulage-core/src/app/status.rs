//! Status - デポ全体の状態ビュー
//!
//! 運用者が「いま何が詰まっているか」を一目で見るための集計です。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::depot::Depot;
use crate::domain::posting::BoardStatus;
use crate::ledger::DepositTotals;

#[derive(Debug, Clone, Serialize)]
pub struct DepotStatus {
    pub at: i64,
    pub board: BTreeMap<BoardStatus, usize>,
    pub active_loads: usize,
    pub archived_loads: usize,
    pub deposits: DepositTotals,
    pub audit_events: usize,
    pub outbox_pending: usize,
    pub outbox_in_flight: usize,
    pub outbox_delivered: u64,
    pub economy_multiplier: f64,
}

impl DepotStatus {
    pub async fn collect(depot: &Depot) -> Self {
        let (active_loads, archived_loads) = depot.load_counts().await;
        let (outbox_pending, outbox_in_flight, outbox_delivered) = depot.outbox_stats().await;
        Self {
            at: depot.now(),
            board: depot.board_counts().await,
            active_loads,
            archived_loads,
            deposits: depot.deposit_totals().await,
            audit_events: depot.audit_len().await,
            outbox_pending,
            outbox_in_flight,
            outbox_delivered,
            economy_multiplier: depot.economy_multiplier().await,
        }
    }

    /// Deposits balance and nothing is stuck in flight.
    pub fn is_healthy(&self) -> bool {
        self.deposits.is_conserved() && self.outbox_in_flight == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::app::DepotBuilder;
    use crate::config::HaulageConfig;
    use crate::impls::{InMemorySessions, StaticRequirements};
    use crate::ports::FixedClock;

    #[tokio::test]
    async fn fresh_depot_is_healthy() {
        let app = DepotBuilder::new(HaulageConfig::default())
            .clock(Arc::new(FixedClock::at_unix(1_700_049_600)))
            .sessions(Arc::new(InMemorySessions::new()))
            .requirements(Arc::new(StaticRequirements::permissive()))
            .build()
            .await
            .unwrap();
        let status = DepotStatus::collect(&app.depot).await;
        assert_eq!(status.at, 1_700_049_600);
        assert_eq!(status.active_loads, 0);
        assert!(status.board.get(&BoardStatus::Available).copied().unwrap_or(0) > 0);
        assert_eq!(status.economy_multiplier, 1.0);
        assert!(status.is_healthy());
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["outbox_pending"], 0);
    }
}
