//! # `notify` channel
//!
//! A simple notification channel wrapping [`tokio::sync::mpsc`] with the
//! additional property that if multiple notifications are sent before the
//! receiver calls [`Receiver::recv`], the receiver is only woken once,
//! preventing duplicate work (e.g. the scheduler re-running a resync it
//! already picked up).
//!
//! - `tx.send()` instead of `let _ = tx.try_send(())`.
//! - `rx.recv()` instead of matching on `Option<()>` to guard against the
//!   sender having been dropped. If all senders are dropped, this future
//!   never resolves.
//! - `rx.clear()` instead of draining with a loop.

use tokio::sync::mpsc;

/// Create a new `notify` channel, returning a [`Sender`] (cloneable) and
/// [`Receiver`] (not cloneable), analogous to `mpsc::channel(1)`.
pub fn channel() -> (Sender, Receiver) {
    let (tx, rx) = mpsc::channel(1);
    (Sender(tx), Receiver(rx))
}

/// `notify` sender, analogous to `mpsc::Sender<()>`.
#[derive(Clone)]
pub struct Sender(mpsc::Sender<()>);

/// `notify` receiver, analogous to `mpsc::Receiver<()>`.
pub struct Receiver(mpsc::Receiver<()>);

impl Sender {
    /// Sends a notification to the [`Receiver`], e.g. to wake a sleeping
    /// scheduler loop early when a new block or mempool transaction arrives.
    pub fn send(&self) {
        let _ = self.0.try_send(());
    }
}

impl Receiver {
    /// Waits until a notification is received. Completes immediately if one
    /// was already sent. Never completes if all [`Sender`]s were dropped.
    pub async fn recv(&mut self) {
        match self.0.recv().await {
            Some(()) => (),
            None => std::future::pending().await,
        }
    }

    /// Immediately returns whether a notification has been sent.
    #[must_use]
    pub fn try_recv(&mut self) -> bool {
        self.0.try_recv().is_ok()
    }

    /// Clears out any pending notification.
    pub fn clear(&mut self) {
        while self.0.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn duplicate_sends_wake_once() {
        let (tx, mut rx) = channel();
        tx.send();
        tx.send();
        tx.send();
        rx.recv().await;
        assert!(!rx.try_recv());
    }

    #[tokio::test]
    async fn clear_drains_pending() {
        let (tx, mut rx) = channel();
        tx.send();
        rx.clear();
        assert!(!rx.try_recv());
    }

    #[tokio::test]
    async fn recv_never_resolves_after_senders_dropped() {
        let (tx, mut rx) = channel();
        drop(tx);
        let result =
            tokio::time::timeout(std::time::Duration::from_millis(10), rx.recv())
                .await;
        assert!(result.is_err());
    }
}
