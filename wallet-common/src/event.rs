//! A generic test/diagnostic event channel.
//!
//! Engine components emit events (account imported, transaction broadcast,
//! scan progress, ...) so white-box tests can wait for a specific thing to
//! have happened instead of sleeping, which is slow and flaky. This module is
//! generic over the event type `E` so `wallet-common` stays free of
//! wallet-domain knowledge; `wallet-core` instantiates it with its own
//! `WalletEvent` enum.

use std::mem::{self, Discriminant};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const EVENT_CHANNEL_SIZE: usize = 16;

/// Creates an event channel, returning a `(tx, rx)` pair.
pub fn channel<E: Send + 'static>() -> (EventSender<E>, EventReceiver<E>) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    (EventSender(tx), EventReceiver(rx))
}

/// Sends events of type `E` to an [`EventReceiver`].
#[derive(Clone)]
pub struct EventSender<E>(mpsc::Sender<E>);

/// Receives events of type `E`, with helpers for waiting on a particular one.
pub struct EventReceiver<E>(mpsc::Receiver<E>);

impl<E: Send + 'static> EventSender<E> {
    /// Sends an event. Panics if the channel is full — callers should size
    /// [`EVENT_CHANNEL_SIZE`] generously rather than silently drop events.
    pub fn send(&self, event: E) {
        self.0.try_send(event).expect("event channel was full")
    }
}

impl<E: Copy + Send + 'static> EventReceiver<E> {
    /// Clears the channel of all pending events.
    pub fn clear(&mut self) {
        while self.0.try_recv().is_ok() {}
    }

    /// Waits to receive the given event, ignoring and discarding all others,
    /// up to the default timeout.
    pub async fn wait(&mut self, event: E) -> Result<(), &'static str> {
        self.wait_timeout(event, DEFAULT_TIMEOUT).await
    }

    /// Waits until the given event has been seen `n` times, ignoring and
    /// discarding all others, up to the default timeout.
    pub async fn wait_n(&mut self, event: E, n: usize) -> Result<(), &'static str> {
        self.wait_n_timeout(event, n, DEFAULT_TIMEOUT).await
    }

    /// Like [`wait`](Self::wait) with a caller-supplied timeout.
    pub async fn wait_timeout(
        &mut self,
        event: E,
        timeout: Duration,
    ) -> Result<(), &'static str> {
        self.wait_n_timeout(event, 1, timeout).await
    }

    /// Like [`wait_n`](Self::wait_n) with a caller-supplied timeout.
    pub async fn wait_n_timeout(
        &mut self,
        event: E,
        n: usize,
        timeout: Duration,
    ) -> Result<(), &'static str>
    where
        E: 'static,
    {
        let target = discriminant_of(&event);
        let mut seen = 0;
        time::timeout(timeout, async {
            loop {
                let received = self
                    .0
                    .recv()
                    .await
                    .expect("event sender was dropped while waiting");
                if discriminant_of(&received) == target {
                    seen += 1;
                    if seen >= n {
                        return;
                    }
                }
            }
        })
        .await
        .map_err(|_| "timed out waiting for event")
    }
}

fn discriminant_of<E>(event: &E) -> Discriminant<E> {
    mem::discriminant(event)
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Dummy {
        Foo,
        Bar,
    }

    #[tokio::test]
    async fn wait_ignores_other_events() {
        let (tx, mut rx) = channel::<Dummy>();
        tx.send(Dummy::Bar);
        tx.send(Dummy::Foo);
        rx.wait(Dummy::Foo).await.unwrap();
    }

    #[tokio::test]
    async fn wait_n_counts_occurrences() {
        let (tx, mut rx) = channel::<Dummy>();
        tx.send(Dummy::Foo);
        tx.send(Dummy::Foo);
        tx.send(Dummy::Foo);
        rx.wait_n(Dummy::Foo, 3).await.unwrap();
    }

    #[tokio::test]
    async fn wait_times_out() {
        let (_tx, mut rx) = channel::<Dummy>();
        let result = rx.wait_timeout(Dummy::Foo, Duration::from_millis(10)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn clear_drains_pending() {
        let (tx, mut rx) = channel::<Dummy>();
        tx.send(Dummy::Foo);
        tx.send(Dummy::Bar);
        rx.clear();
        let result = rx.wait_timeout(Dummy::Foo, Duration::from_millis(10)).await;
        assert!(result.is_err());
    }
}
