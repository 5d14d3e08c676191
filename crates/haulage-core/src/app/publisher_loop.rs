//! PublisherLoop - Outbox の配送
//!
//! # フロー
//! 1. `Depot::pull_effects()` で pending な effect を取り出す
//! 2. ReputationAdjuster / NotificationSink に届ける
//! 3. 成功したら ack、失敗したら残りを順序どおり pending に戻す

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::handle::next_tick;
use crate::depot::Depot;
use crate::outbox::Effect;
use crate::ports::{NotificationSink, PortError, ReputationAdjuster};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub requeued: usize,
}

pub struct PublisherLoop {
    depot: Arc<Depot>,
    reputation: Arc<dyn ReputationAdjuster>,
    notifications: Arc<dyn NotificationSink>,
    batch_size: usize,
    interval: Duration,
}

impl PublisherLoop {
    pub fn new(
        depot: Arc<Depot>,
        reputation: Arc<dyn ReputationAdjuster>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        let publisher = &depot.config().publisher;
        let batch_size = publisher.batch_size;
        let interval = Duration::from_millis(publisher.interval_ms);
        Self {
            depot,
            reputation,
            notifications,
            batch_size,
            interval,
        }
    }

    async fn deliver(&self, effect: &Effect) -> Result<(), PortError> {
        match effect {
            Effect::Reputation { actor, event, tier } => {
                self.reputation.adjust(actor, event, *tier).await
            }
            Effect::Notification { actor, message } => self.notifications.notify(actor, message).await,
        }
    }

    /// Deliver one batch. Stops at the first failure so effects keep their order.
    pub async fn publish_once(&self) -> PublishReport {
        let mut report = PublishReport::default();
        let mut batch = self.depot.pull_effects(self.batch_size).await.into_iter();
        while let Some(record) = batch.next() {
            match self.deliver(&record.effect).await {
                Ok(()) => {
                    self.depot.ack_effect(record.seq).await;
                    report.delivered += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        seq = record.seq,
                        attempts = record.attempts + 1,
                        error = %e,
                        "effect delivery failed"
                    );
                    let rest: Vec<_> = batch.by_ref().collect();
                    // pushed to the front one by one, so go back to front
                    for later in rest.iter().rev() {
                        self.depot.fail_effect(later.seq).await;
                    }
                    self.depot.fail_effect(record.seq).await;
                    report.requeued = rest.len() + 1;
                    break;
                }
            }
        }
        if report.delivered > 0 {
            tracing::debug!(delivered = report.delivered, "effects published");
        }
        report
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while next_tick(&mut ticker, &mut shutdown_rx).await {
            self.publish_once().await;
        }
        // last drain so nothing committed before shutdown waits for a restart
        self.publish_once().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{App, DepotBuilder};
    use crate::config::HaulageConfig;
    use crate::depot::AcceptContext;
    use crate::domain::ids::ActorId;
    use crate::impls::{InMemorySessions, Recorded, RecordingSink, StaticRequirements};
    use crate::ports::FixedClock;

    async fn finished_load(sink: Arc<RecordingSink>) -> App {
        let app = DepotBuilder::new(HaulageConfig::default())
            .clock(Arc::new(FixedClock::at_unix(1_700_049_600)))
            .sessions(Arc::new(InMemorySessions::new()))
            .requirements(Arc::new(StaticRequirements::permissive()))
            .reputation(sink.clone())
            .notifications(sink)
            .build()
            .await
            .unwrap();
        let actor = ActorId::from("hauler");
        app.depot.fund(&actor, 1_000_000).await.unwrap();
        let job = app.depot.listing(None, None).await[0].job_id;
        app.depot.reserve(job, &actor).await.unwrap();
        let load = app
            .depot
            .accept(job, &actor, AcceptContext::default())
            .await
            .unwrap();
        app.admin.force_abandon(load).await.unwrap();
        app
    }

    #[tokio::test]
    async fn delivered_effects_are_acked_in_order() {
        let sink = Arc::new(RecordingSink::new());
        let app = finished_load(sink.clone()).await;

        let report = app.publisher_loop().publish_once().await;

        assert_eq!(report, PublishReport { delivered: 2, requeued: 0 });
        let seen = sink.recorded().await;
        assert!(matches!(seen[0], Recorded::Reputation { ref event, .. } if event == "load_abandoned"));
        assert!(matches!(seen[1], Recorded::Notification { .. }));
        assert_eq!(app.depot.outbox_stats().await, (0, 0, 2));
    }

    #[tokio::test]
    async fn failed_delivery_keeps_order_for_the_retry() {
        let sink = Arc::new(RecordingSink::new());
        let app = finished_load(sink.clone()).await;
        let publisher = app.publisher_loop();

        sink.set_failing(true);
        let report = publisher.publish_once().await;
        assert_eq!(report, PublishReport { delivered: 0, requeued: 2 });
        assert_eq!(app.depot.outbox_stats().await, (2, 0, 0));

        let seqs: Vec<u64> = app.depot.pull_effects(10).await.iter().map(|r| r.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        for seq in seqs.iter().rev() {
            app.depot.fail_effect(*seq).await;
        }

        sink.set_failing(false);
        let report = publisher.publish_once().await;
        assert_eq!(report.delivered, 2);
        assert!(matches!(sink.recorded().await[0], Recorded::Reputation { .. }));
    }
}
