//! One-shot timers that deliver a value to the driver's channel.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A scheduled delivery; dropping the handle cancels it
#[derive(Debug)]
pub(crate) struct TimerHandle(JoinHandle<()>);

impl TimerHandle {
    /// Send `value` on `tx` after `delay`
    pub(crate) fn schedule<T>(delay: Duration, tx: mpsc::UnboundedSender<T>, value: T) -> Self
    where
        T: Send + 'static,
    {
        Self(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the driver is shutting down
            let _ = tx.send(value);
        }))
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}
