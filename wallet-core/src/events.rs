//! The events a host application subscribes to (spec §6's "Events
//! emitted"): account lifecycle, transactions this wallet created and
//! broadcast, and foreground-rescan progress.
//!
//! Grounded on `lexe-tokio`'s `EventsBus`: a `tokio::sync::broadcast`
//! channel, since notifying with no subscribers is the common case and
//! there's nothing to garbage-collect when a subscriber stops listening.

use tokio::sync::broadcast;

use crate::types::TxHash;

const DEFAULT_CHANNEL_SIZE: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletEvent {
    AccountImported { account_id: String },
    AccountRemoved { account_id: String },
    TransactionCreated { account_id: String, tx_hash: TxHash },
    BroadcastTransaction { account_id: String, tx_hash: TxHash },
    /// Foreground-rescan progress, spec §4.5's `scan.onTransaction`.
    ScanProgress { sequence: u32, end_sequence: u32 },
}

#[derive(Clone)]
pub struct EventsBus {
    tx: broadcast::Sender<WalletEvent>,
}

impl EventsBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CHANNEL_SIZE);
        Self { tx }
    }

    /// Publishes an event. A no-op if nobody is currently subscribed.
    pub fn notify(&self, event: WalletEvent) {
        let _ = self.tx.send(event);
    }

    /// Starts listening to events published after this call. Events
    /// published before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventsBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn a_subscriber_receives_events_published_after_it_subscribes() {
        let bus = EventsBus::new();
        let mut rx = bus.subscribe();

        bus.notify(WalletEvent::AccountImported { account_id: "alice".into() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event, WalletEvent::AccountImported { account_id: "alice".into() });
    }

    #[test]
    fn notifying_with_no_subscribers_does_not_panic() {
        let bus = EventsBus::new();
        bus.notify(WalletEvent::AccountRemoved { account_id: "alice".into() });
    }

    #[tokio::test]
    async fn subscribing_late_does_not_replay_earlier_events() {
        let bus = EventsBus::new();
        bus.notify(WalletEvent::AccountImported { account_id: "alice".into() });

        let mut rx = bus.subscribe();
        bus.notify(WalletEvent::AccountRemoved { account_id: "alice".into() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event, WalletEvent::AccountRemoved { account_id: "alice".into() });
    }

    #[tokio::test]
    async fn independent_subscribers_each_get_their_own_copy() {
        let bus = EventsBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.notify(WalletEvent::ScanProgress { sequence: 5, end_sequence: 10 });

        assert_eq!(rx1.recv().await.unwrap(), WalletEvent::ScanProgress { sequence: 5, end_sequence: 10 });
        assert_eq!(rx2.recv().await.unwrap(), WalletEvent::ScanProgress { sequence: 5, end_sequence: 10 });
    }
}
