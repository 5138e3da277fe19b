//! Process-wide shutdown signal
//!
//! Every monitor loop selects on a [`Shutdown`] receiver next to its intake
//! channel, so loops exit at the next wake-up and never mid-operation.

use std::sync::Arc;
use tokio::sync::watch;

/// Create a linked controller/signal pair.
pub fn channel() -> (ShutdownController, Shutdown) {
    let (tx, rx) = watch::channel(false);
    let controller = ShutdownController { tx: Arc::new(tx) };
    (controller, Shutdown { rx })
}

/// Triggers the process-wide shutdown. Held by the binary's main.
#[derive(Clone)]
pub struct ShutdownController {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownController {
    /// Signal shutdown to every subscribed loop. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Obtain a new signal receiver.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiver side of the shutdown signal. Cheap to clone.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// True once shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when shutdown is requested. Also resolves if the controller
    /// is dropped, which only happens when the process is tearing down.
    pub async fn triggered(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let (controller, mut signal) = channel();
        assert!(!signal.is_requested());

        let waiter = tokio::spawn(async move {
            signal.triggered().await;
        });

        controller.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_triggered_resolves_immediately_after_trigger() {
        let (controller, mut signal) = channel();
        controller.trigger();
        assert!(signal.is_requested());
        // Must not hang even though the trigger happened before the wait.
        tokio::time::timeout(Duration::from_millis(100), signal.triggered())
            .await
            .unwrap();
    }
}
