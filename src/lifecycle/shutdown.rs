//! Shutdown coordination for the agent's background tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant};

/// Coordinator for graceful shutdown.
///
/// The harvest loop and the task queue worker subscribe; triggering wakes
/// all of them. Triggering more than once is harmless.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Number of subscribers still alive (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Wait until every subscriber has gone away. Returns false if the
    /// deadline passed first.
    pub async fn wait_for_receivers(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.receiver_count() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_subscribers_once() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        let task = tokio::spawn(async move {
            let _ = rx.recv().await;
        });

        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        task.await.unwrap();
        assert!(shutdown.wait_for_receivers(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_wait_for_receivers_times_out() {
        let shutdown = Shutdown::new();
        let _rx = shutdown.subscribe();
        assert!(!shutdown.wait_for_receivers(Duration::from_millis(30)).await);
    }
}
