//! LoopGroup - バックグラウンドループの管理
//!
//! 全ループが 1 本の watch チャネルを共有します。
//! - `request_shutdown()` で停止を通知（実行中の tick は最後まで走る）
//! - `shutdown_and_join()` で全ループの終了を待つ

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct LoopGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl LoopGroup {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    /// Spawn a loop that receives the shared shutdown signal.
    pub fn spawn<F, Fut>(&mut self, run: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rx = self.shutdown_tx.subscribe();
        self.joins.push(tokio::spawn(run(rx)));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "background loop panicked");
            }
        }
    }
}

impl Default for LoopGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for the next tick or for shutdown. `false` means stop.
pub(crate) async fn next_tick(
    ticker: &mut tokio::time::Interval,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        if *shutdown_rx.borrow() {
            return false;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped counts as shutdown
                if changed.is_err() {
                    return false;
                }
            }
            _ = ticker.tick() => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn loops_stop_on_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut group = LoopGroup::new();
        for _ in 0..2 {
            let ticks = ticks.clone();
            group.spawn(move |mut rx| async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(5));
                while next_tick(&mut ticker, &mut rx).await {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        assert_eq!(group.len(), 2);
        tokio::time::sleep(Duration::from_millis(30)).await;
        group.shutdown_and_join().await;

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}
