//! The background event loop, spec §4.5: a single spawned task that polls
//! the chain, expires and rebroadcasts pending transactions, and drains
//! tombstoned-account cleanup, plus the foreground rescan entry point a host
//! application calls after importing an account.
//!
//! Grounded on `lexe-ln/src/background_processor.rs`'s
//! `LexeBackgroundProcessor::start`: one named task, `tokio::select!` over
//! named interval timers and a `ShutdownChannel::recv()` branch that breaks
//! the loop, plus a `notify` channel a caller can use to wake the loop early
//! instead of waiting out the tick interval.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use wallet_common::notify;
use wallet_common::shutdown::ShutdownChannel;
use wallet_common::task::Task;

use crate::account::{self, Account};
use crate::builder::TransactionBuilder;
use crate::config::WalletConfig;
use crate::errors::WalletError;
use crate::events::{EventsBus, WalletEvent};
use crate::indexer::Indexer;
use crate::store::WalletDb;
use crate::traits::{WalletChain, WalletMempool, WalletPeerNetwork, WalletWorkerPool};

struct SchedulerState<C, W> {
    indexer: Indexer<C, W>,
    accounts: Vec<Account>,
}

/// Owns the indexer and the per-account list it walks each tick. Cheaply
/// cloneable: every clone shares the same locked state and the same
/// [`TransactionBuilder`], so [`start`](Scheduler::start) can spawn the loop
/// off a clone while the caller keeps a handle to call
/// [`scan_transactions`](Scheduler::scan_transactions) and
/// [`add_account`](Scheduler::add_account) from outside it.
#[derive(Clone)]
pub struct Scheduler<C, W, M, P> {
    db: WalletDb,
    state: Arc<tokio::sync::Mutex<SchedulerState<C, W>>>,
    builder: Arc<TransactionBuilder<C, W, M, P>>,
    config: WalletConfig,
    events: EventsBus,
}

impl<C: WalletChain, W: WalletWorkerPool, M: WalletMempool, P: WalletPeerNetwork>
    Scheduler<C, W, M, P>
{
    pub fn new(
        db: WalletDb,
        chain: C,
        workers: W,
        builder: Arc<TransactionBuilder<C, W, M, P>>,
        config: WalletConfig,
        events: EventsBus,
        accounts: Vec<Account>,
    ) -> Self {
        let indexer = Indexer::new(db.clone(), chain, workers, config.clone());
        Self {
            db,
            state: Arc::new(tokio::sync::Mutex::new(SchedulerState { indexer, accounts })),
            builder,
            config,
            events,
        }
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.state.lock().await.accounts.clone()
    }

    pub async fn add_account(&self, account: Account) {
        let mut guard = self.state.lock().await;
        guard.accounts.retain(|a| a.id != account.id);
        guard.accounts.push(account);
    }

    pub async fn forget_account(&self, account_id: &str) {
        let mut guard = self.state.lock().await;
        guard.accounts.retain(|a| a.id != account_id);
    }

    /// Spawns the background loop on a clone of `self`, returning a joinable
    /// [`Task`] and the [`notify::Sender`] a caller (e.g. a chain-tip
    /// subscription) uses to wake the loop early instead of waiting for the
    /// next tick.
    pub fn start(&self, shutdown: ShutdownChannel) -> (Task<()>, notify::Sender) {
        let (resync_tx, mut resync_rx) = notify::channel();
        let this = self.clone();
        let task = Task::spawn("wallet scheduler", async move {
            let mut tick_timer = tokio::time::interval(this.config.tick_interval);

            loop {
                tokio::select! {
                    biased;

                    _ = tick_timer.tick() => {
                        if let Err(e) = this.run_tick(&shutdown).await {
                            warn!(error = %e, "scheduler tick failed");
                        }
                    }
                    () = resync_rx.recv() => {
                        debug!("scheduler woken early");
                        if let Err(e) = this.run_tick(&shutdown).await {
                            warn!(error = %e, "scheduler resync tick failed");
                        }
                    }

                    () = shutdown.recv() => {
                        info!("wallet scheduler shutting down");
                        break;
                    }
                }
            }
        });
        (task, resync_tx)
    }

    /// One tick, spec §4.5's "each tick performs, in order": advance the
    /// indexer to the chain's head across every tracked account (expiring and
    /// rebroadcasting each account's pending transactions against the new
    /// head along the way, per the same section's "on each connect-block
    /// tick"), then drain a batch of tombstoned-account cleanup.
    #[instrument(skip_all, name = "scheduler_tick")]
    async fn run_tick(&self, abort: &ShutdownChannel) -> anyhow::Result<()> {
        let head_sequence = {
            let mut guard = self.state.lock().await;
            guard.indexer.update(&mut guard.accounts, abort).await?;
            guard.indexer.cursor().map(|c| c.sequence).unwrap_or(0)
        };
        let accounts = self.accounts().await;

        for account in &accounts {
            if let Err(e) = self.builder.expire_pending(account, head_sequence).await {
                warn!(account = %account.id, error = %e, "expire_pending failed");
            }
            if let Err(e) = self.builder.rebroadcast_pending(account, head_sequence).await {
                warn!(account = %account.id, error = %e, "rebroadcast_pending failed");
            }
        }

        match crate::cleanup::tick(&self.db, self.config.cleanup_batch_size) {
            Ok(0) => {}
            Ok(rows) => debug!(rows, "drained tombstoned account rows"),
            Err(e) => warn!(error = %e, "cleanup tick failed"),
        }
        Ok(())
    }

    /// Foreground rescan, spec §4.5: catches one account up to
    /// `end_sequence` (the indexer's current cursor if unset), replaying
    /// already-canonical blocks the indexer has long since processed for
    /// every other account. Shares the same lock as the scheduled tick, so a
    /// rescan simply waits its turn rather than racing a concurrent
    /// `update()`, the same mutual-exclusion-by-plain-locking the source
    /// project's `LexeWallet` uses for its own foreground/background split.
    #[instrument(skip_all, name = "scan_transactions", fields(account = %account_id))]
    pub async fn scan_transactions(
        &self,
        account_id: &str,
        end_sequence: Option<u32>,
    ) -> Result<(), WalletError> {
        let mut guard = self.state.lock().await;
        let idx = guard
            .accounts
            .iter()
            .position(|a| a.id == account_id)
            .ok_or_else(|| WalletError::UnknownAccount(account_id.to_string()))?;

        let target = end_sequence
            .or_else(|| guard.indexer.cursor().map(|c| c.sequence))
            .unwrap_or(0);

        let mut from_sequence = {
            let txn = self.db.transaction();
            account::get_head(&txn, &guard.accounts[idx])?
                .map(|h| h.sequence + 1)
                .unwrap_or(1)
        };

        while from_sequence <= target {
            let account = guard.accounts[idx].clone();
            let Some(header) = guard
                .indexer
                .chain()
                .get_header_by_sequence(from_sequence)
                .await
                .map_err(|e| WalletError::InvalidTransaction(e.to_string()))?
            else {
                break;
            };
            let block_transactions = guard
                .indexer
                .chain()
                .get_block_transactions(&header)
                .await
                .map_err(|e| WalletError::InvalidTransaction(e.to_string()))?;
            guard
                .indexer
                .connect_block_for_account(&header, &account, &block_transactions)
                .await
                .map_err(|e| WalletError::InvalidTransaction(e.to_string()))?;

            self.events.notify(WalletEvent::ScanProgress { sequence: from_sequence, end_sequence: target });
            from_sequence += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::{test_account, FakeChain, FakeMempool, FakePeerNetwork, FakeWorkerPool};
    use crate::types::{BlockHeader, BlockTransaction, TransactionDescriptor};

    fn header(hash: u8, sequence: u32) -> BlockHeader {
        BlockHeader { hash: [hash; 32], parent_hash: [0; 32], sequence, timestamp: 1_700_000_000_000 }
    }

    fn scheduler_with(
        db: &WalletDb,
        chain: FakeChain,
        accounts: Vec<Account>,
    ) -> Scheduler<FakeChain, FakeWorkerPool, FakeMempool, FakePeerNetwork> {
        let builder = Arc::new(TransactionBuilder::new(
            db.clone(),
            chain.clone(),
            FakeWorkerPool,
            FakeMempool,
            FakePeerNetwork,
            WalletConfig::default(),
            EventsBus::new(),
        ));
        Scheduler::new(db.clone(), chain, FakeWorkerPool, builder, WalletConfig::default(), EventsBus::new(), accounts)
    }

    fn coinbase_block(account_key: &[u8], sequence: u32) -> (BlockHeader, Vec<BlockTransaction>) {
        let header = header(sequence as u8, sequence);
        let descriptor = TransactionDescriptor {
            hash: [sequence as u8; 32],
            transaction: vec![sequence as u8; 8],
            expiration: crate::store::keys::NEVER_EXPIRES,
            is_miners_fee: true,
            spent_nullifiers: vec![],
            mints: vec![],
            burns: vec![],
            output_notes: vec![account_key.to_vec()],
        };
        (header, vec![BlockTransaction { descriptor, initial_note_index: Some(0) }])
    }

    #[tokio::test]
    async fn run_tick_advances_every_tracked_account_to_chain_head() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let chain = FakeChain::default();
        let (h1, txs1) = coinbase_block(b"alice-key-material", 1);
        chain.push(h1, txs1);

        let account = test_account("alice", b"alice-key-material".to_vec());
        let scheduler = scheduler_with(&db, chain, vec![account.clone()]);
        let shutdown = ShutdownChannel::new();

        scheduler.run_tick(&shutdown).await.unwrap();

        let txn = db.transaction();
        let head = account::get_head(&txn, &account).unwrap().unwrap();
        assert_eq!(head.sequence, 1);
    }

    #[tokio::test]
    async fn scan_transactions_catches_up_one_account_without_touching_others() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let chain = FakeChain::default();
        let (h1, txs1) = coinbase_block(b"alice-key-material", 1);
        chain.push(h1, txs1);

        let alice = test_account("alice", b"alice-key-material".to_vec());
        let bob = test_account("bob", b"bob-key-material-!!".to_vec());
        let scheduler = scheduler_with(&db, chain, vec![alice.clone(), bob.clone()]);

        scheduler.scan_transactions(&alice.id, Some(1)).await.unwrap();

        let txn = db.transaction();
        assert_eq!(account::get_head(&txn, &alice).unwrap().unwrap().sequence, 1);
        assert!(
            account::get_head(&txn, &bob).unwrap().is_none(),
            "scan_transactions must not advance an account it wasn't asked to catch up"
        );
    }

    #[tokio::test]
    async fn scan_transactions_rejects_unknown_account() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let chain = FakeChain::default();
        chain.push(header(1, 1), vec![]);
        let scheduler = scheduler_with(&db, chain, vec![]);

        let err = scheduler.scan_transactions("nobody", None).await.unwrap_err();
        assert!(matches!(err, WalletError::UnknownAccount(id) if id == "nobody"));
    }
}
