//! Per-connection close signal and I/O deadlines shared by both shims.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::error::{SimnetError, SimnetResult};

/// One-shot, idempotent close flag observed by every blocking queue operation.
#[derive(Debug, Clone)]
pub(crate) struct CloseSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raises the flag. Returns `true` only for the call that actually raised it.
    pub(crate) fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is raised (immediately if it already is).
    pub(crate) async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so waiting cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Pushes `item` onto a bounded queue, giving up if the flag is raised first.
    ///
    /// Returns `false` when the item was discarded because of closure.
    pub(crate) async fn send<T>(&self, queue: &mpsc::Sender<T>, item: T) -> bool {
        tokio::select! {
            sent = queue.send(item) => sent.is_ok(),
            () = self.closed() => false,
        }
    }

    /// Sleeps for `delay`, returning `false` if the flag is raised first.
    pub(crate) async fn sleep(&self, delay: std::time::Duration) -> bool {
        if delay.is_zero() {
            return !self.is_closed();
        }
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = self.closed() => false,
        }
    }
}

/// Read and write deadlines (`None` = no deadline).
#[derive(Debug, Default)]
pub(crate) struct Deadlines {
    read: Mutex<Option<Instant>>,
    write: Mutex<Option<Instant>>,
}

impl Deadlines {
    pub(crate) fn set_both(&self, at: Option<Instant>) {
        *self.read.lock() = at;
        *self.write.lock() = at;
    }

    pub(crate) fn set_read(&self, at: Option<Instant>) {
        *self.read.lock() = at;
    }

    pub(crate) fn set_write(&self, at: Option<Instant>) {
        *self.write.lock() = at;
    }

    pub(crate) fn read(&self) -> Option<Instant> {
        *self.read.lock()
    }

    pub(crate) fn write(&self) -> Option<Instant> {
        *self.write.lock()
    }
}

/// Runs `op`, failing with [`SimnetError::TimedOut`] if `deadline` passes first.
pub(crate) async fn with_deadline<T, F>(deadline: Option<Instant>, op: F) -> SimnetResult<T>
where
    F: Future<Output = SimnetResult<T>>,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, op)
            .await
            .map_err(|_elapsed| SimnetError::TimedOut)?,
        None => op.await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let signal = CloseSignal::new();
        assert!(!signal.is_closed());
        assert!(signal.close());
        assert!(!signal.close());
        assert!(signal.is_closed());
        // Already raised, so this resolves at once
        signal.closed().await;
    }

    #[tokio::test]
    async fn test_close_releases_blocked_sender() {
        let signal = CloseSignal::new();
        let (tx, _rx) = mpsc::channel::<u8>(1);
        tx.send(0).await.unwrap();

        let waiter = {
            let signal = signal.clone();
            let tx = tx.clone();
            tokio::spawn(async move { signal.send(&tx, 1).await })
        };

        tokio::task::yield_now().await;
        signal.close();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let at = Instant::now() + Duration::from_millis(10);
        let result: SimnetResult<()> = with_deadline(Some(at), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(SimnetError::TimedOut)));

        let result = with_deadline(None, async { Ok(5) }).await;
        assert_eq!(result.unwrap(), 5);
    }

    #[test]
    fn test_deadlines_set_independently() {
        let deadlines = Deadlines::default();
        let at = Instant::now();
        deadlines.set_read(Some(at));
        assert_eq!(deadlines.read(), Some(at));
        assert_eq!(deadlines.write(), None);
        deadlines.set_both(None);
        assert_eq!(deadlines.read(), None);
        deadlines.set_write(Some(at));
        assert_eq!(deadlines.write(), Some(at));
    }
}
