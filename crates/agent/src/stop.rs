//! Cooperative stop signal for the control loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Cloneable handle that asks the worker to stop.
///
/// Stopping is idempotent. The loop checks the flag once per iteration and
/// wakes from its idle sleeps early; work already in flight runs to the end.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration` unless a stop arrives first.
    ///
    /// Returns `true` if the sleep was cut short by a stop.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        if *rx.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = rx.wait_for(|stopped| *stopped) => true,
        }
    }
}
