//! Shutdown coordination for the proxy.

use std::time::Duration;
use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// The HTTP server, the config reload task and the cache sweeper each hold
/// a receiver and stop once `trigger` is called.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Wait until every subscriber has dropped its receiver, up to `deadline`.
    /// Returns false if tasks were still running when the deadline passed.
    pub async fn drained(&self, deadline: Duration) -> bool {
        let wait = async {
            while self.receiver_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(deadline, wait).await.is_ok()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
