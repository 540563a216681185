//! `Wallet`, spec §1: the single type a host application talks to. Wires
//! together the persistent store, the chain indexer/scheduler loop, and the
//! transaction builder, and owns account import/removal and the
//! passphrase-based encryption-at-rest path for accounts stored with a
//! wallet master key.
//!
//! Grounded on `lexe-ln`'s top-level `LexeWallet`/`LexeChannelManager` shape:
//! one struct a host embeds, constructed once via an `open`/`new` that wires
//! up every collaborator, with `start`/`stop` bracketing the background
//! task's lifetime.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::instrument;

use wallet_common::crypto::envelope;
use wallet_common::notify;
use wallet_common::rng::SysRng;
use wallet_common::shutdown::ShutdownChannel;
use wallet_common::task::Task;

use crate::account::balance::{self, BalanceSnapshot};
use crate::account::types::AccountSummary;
use crate::account::{self, Account, AccountValue};
use crate::builder::{CreateTransactionOptions, TransactionBuilder};
use crate::config::WalletConfig;
use crate::errors::WalletError;
use crate::events::{EventsBus, WalletEvent};
use crate::scheduler::Scheduler;
use crate::store::{values, WalletDb, CF_ACCOUNTS};
use crate::traits::{WalletChain, WalletMempool, WalletPeerNetwork, WalletWorkerPool};
use crate::types::{AssetId, BurnRequest, MintRequest, OutputDescriptor, RawTransaction, TxHash};

/// The running background loop's join handle and its early-wake sender,
/// present only between a [`Wallet::start`] and the matching
/// [`Wallet::stop`].
struct Running {
    task: Task<()>,
    resync: notify::Sender,
}

pub struct Wallet<C, W, M, P> {
    db: WalletDb,
    builder: Arc<TransactionBuilder<C, W, M, P>>,
    scheduler: Scheduler<C, W, M, P>,
    events: EventsBus,
    shutdown: ShutdownChannel,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl<C: WalletChain, W: WalletWorkerPool, M: WalletMempool, P: WalletPeerNetwork>
    Wallet<C, W, M, P>
{
    /// Opens (creating if absent) the wallet database at `path` and loads
    /// every account stored in plaintext. Encrypted accounts aren't
    /// decrypted here — they stay invisible to the scheduler and to
    /// [`list_accounts`](Self::list_accounts) until [`unlock_account`]
    /// (Self::unlock_account) is called with the right passphrase.
    pub fn open(
        path: impl AsRef<Path>,
        chain: C,
        workers: W,
        mempool: M,
        peers: P,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        let db = WalletDb::open(path)?;
        let events = EventsBus::new();
        let accounts = load_decrypted_accounts(&db)?;

        let builder = Arc::new(TransactionBuilder::new(
            db.clone(),
            chain.clone(),
            workers.clone(),
            mempool,
            peers,
            config.clone(),
            events.clone(),
        ));
        let scheduler = Scheduler::new(
            db.clone(),
            chain,
            workers,
            builder.clone(),
            config,
            events.clone(),
            accounts,
        );

        Ok(Self {
            db,
            builder,
            scheduler,
            events,
            shutdown: ShutdownChannel::new(),
            running: tokio::sync::Mutex::new(None),
        })
    }

    /// Starts the background scheduler loop. A no-op (returns `false`) if
    /// already running.
    pub async fn start(&self) -> bool {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            return false;
        }
        let (task, resync) = self.scheduler.start(self.shutdown.clone());
        *guard = Some(Running { task, resync });
        true
    }

    /// Signals the background loop to stop and waits for it to finish.
    /// A no-op if not running.
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        let Some(running) = running else { return };
        self.shutdown.send();
        let _ = running.task.await;
    }

    /// Wakes the background loop early instead of waiting out its tick
    /// interval, e.g. after a host's chain-tip subscription fires. A no-op
    /// if the loop isn't running.
    pub async fn wake(&self) {
        if let Some(running) = self.running.lock().await.as_ref() {
            running.resync.notify();
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    // --- account lifecycle --- //

    /// `importAccount`, spec §4.1, for a plaintext (no wallet master key)
    /// account.
    #[instrument(skip_all, name = "import_account", fields(account = %account.id))]
    pub async fn import_account(&self, account: Account) -> Result<AccountSummary, WalletError> {
        let summary = {
            let txn = self.db.transaction();
            if account::get_account(&txn, &account.id)?.is_some() {
                return Err(WalletError::DuplicateAccount(account.id.clone()));
            }
            account::put_account(&txn, &AccountValue::Decrypted(account.clone()))?;
            let summary = account::summarize(&txn, &account)?;
            txn.commit()?;
            summary
        };
        self.scheduler.add_account(account).await;
        self.events.notify(WalletEvent::AccountImported {
            account_id: summary.id.clone(),
        });
        Ok(summary)
    }

    /// `importAccount`, spec §4.1, sealing `account` under `passphrase`
    /// instead of storing it in plaintext. The sealed account is not
    /// registered with the scheduler until [`unlock_account`]
    /// (Self::unlock_account) is called; nothing about it but its id is
    /// readable until then.
    #[instrument(skip_all, name = "import_account_encrypted", fields(account = %account.id))]
    pub async fn import_account_encrypted(
        &self,
        account: Account,
        passphrase: &str,
    ) -> Result<(), WalletError> {
        let plaintext = values::encode(&AccountValue::Decrypted(account.clone()))?;
        let mut rng = SysRng::new();
        let ciphertext = envelope::encrypt(&mut rng, passphrase, &plaintext)
            .map_err(|_| WalletError::AccountDecryptionFailed)?;

        let txn = self.db.transaction();
        if account::get_account(&txn, &account.id)?.is_some() {
            return Err(WalletError::DuplicateAccount(account.id.clone()));
        }
        account::put_account_encrypted(
            &txn,
            &account.id,
            &AccountValue::Encrypted {
                salt: Vec::new(),
                nonce: Vec::new(),
                ciphertext,
            },
        )?;
        txn.commit()?;

        self.events.notify(WalletEvent::AccountImported {
            account_id: account.id,
        });
        Ok(())
    }

    /// Decrypts an `importAccountEncrypted`-sealed account and registers it
    /// with the scheduler for the remainder of this process's lifetime.
    /// This never rewrites the stored row back to plaintext: the envelope
    /// stays the row's on-disk shape, matching [`AccountValue::Encrypted`]'s
    /// `{salt, nonce, ciphertext}` layout (`salt`/`nonce` are folded into the
    /// envelope's own self-describing header rather than split out, so both
    /// fields are always empty on write).
    #[instrument(skip_all, name = "unlock_account", fields(account_id = %account_id))]
    pub async fn unlock_account(
        &self,
        account_id: &str,
        passphrase: &str,
    ) -> Result<AccountSummary, WalletError> {
        let (account, summary) = {
            let txn = self.db.transaction();
            let value = account::get_account(&txn, account_id)?
                .ok_or_else(|| WalletError::UnknownAccount(account_id.to_string()))?;
            let ciphertext = match value {
                AccountValue::Decrypted(_) => return Err(WalletError::AccountDecryptionFailed),
                AccountValue::Encrypted { ciphertext, .. } => ciphertext,
            };
            let plaintext = envelope::decrypt(passphrase, &ciphertext)
                .map_err(|_| WalletError::AccountDecryptionFailed)?;
            let AccountValue::Decrypted(account) = values::decode(&plaintext)? else {
                return Err(WalletError::DbCorruption(
                    "decrypted account envelope held another envelope".into(),
                ));
            };
            let summary = account::summarize(&txn, &account)?;
            (account, summary)
        };
        self.scheduler.add_account(account).await;
        Ok(summary)
    }

    /// Drops `account_id` from the in-memory scheduler without touching the
    /// stored envelope, the inverse of [`unlock_account`](Self::unlock_account).
    pub async fn lock_account(&self, account_id: &str) {
        self.scheduler.forget_account(account_id).await;
    }

    /// `removeAccount`, spec §4.1: tombstones the account's store rows and
    /// drops it from the scheduler. The bulk of its data is reclaimed by the
    /// background cleanup task, not synchronously here.
    #[instrument(skip_all, name = "remove_account", fields(account_id = %account_id))]
    pub async fn remove_account(&self, account_id: &str) -> Result<(), WalletError> {
        {
            let txn = self.db.transaction();
            if account::get_account(&txn, account_id)?.is_none() {
                return Err(WalletError::UnknownAccount(account_id.to_string()));
            }
            account::remove_account(&txn, account_id)?;
            txn.commit()?;
        }
        self.scheduler.forget_account(account_id).await;
        self.events.notify(WalletEvent::AccountRemoved {
            account_id: account_id.to_string(),
        });
        Ok(())
    }

    /// Every account id this store has a row for, decrypted or not.
    pub fn list_account_ids(&self) -> Result<Vec<String>, WalletError> {
        let txn = self.db.transaction();
        let rows = txn.scan_cf(CF_ACCOUNTS)?;
        rows.into_iter()
            .map(|(key, _)| {
                String::from_utf8(key.to_vec())
                    .map_err(|_| WalletError::DbCorruption("non-utf8 account id".into()))
            })
            .collect()
    }

    /// Summaries of every account currently registered with the scheduler,
    /// i.e. every plaintext account plus every encrypted one that's been
    /// [`unlock_account`](Self::unlock_account)ed this session.
    pub async fn list_accounts(&self) -> Result<Vec<AccountSummary>, WalletError> {
        let txn = self.db.transaction();
        self.scheduler
            .accounts()
            .await
            .iter()
            .map(|account| account::summarize(&txn, account))
            .collect()
    }

    async fn require_account(&self, account_id: &str) -> Result<Account, WalletError> {
        self.scheduler
            .accounts()
            .await
            .into_iter()
            .find(|a| a.id == account_id)
            .ok_or_else(|| WalletError::UnknownAccount(account_id.to_string()))
    }

    // --- balances --- //

    pub async fn get_balance(
        &self,
        account_id: &str,
        asset_id: AssetId,
        confirmations: u32,
    ) -> Result<BalanceSnapshot, WalletError> {
        let account = self.require_account(account_id).await?;
        let head_sequence = self.head_sequence(&account)?;
        let txn = self.db.transaction();
        balance::get_balance(&txn, &account, asset_id, head_sequence, confirmations)
    }

    pub async fn get_all_balances(
        &self,
        account_id: &str,
        confirmations: u32,
    ) -> Result<BTreeMap<AssetId, BalanceSnapshot>, WalletError> {
        let account = self.require_account(account_id).await?;
        let head_sequence = self.head_sequence(&account)?;
        let txn = self.db.transaction();
        balance::get_all_balances(&txn, &account, head_sequence, confirmations)
    }

    fn head_sequence(&self, account: &Account) -> Result<u32, WalletError> {
        let txn = self.db.transaction();
        Ok(account::get_head(&txn, account)?.map(|h| h.sequence).unwrap_or(0))
    }

    // --- transactions --- //

    pub async fn create_transaction(
        &self,
        account_id: &str,
        options: CreateTransactionOptions,
    ) -> Result<RawTransaction, WalletError> {
        let account = self.require_account(account_id).await?;
        self.builder.create_transaction(&account, options).await
    }

    pub async fn send(
        &self,
        account_id: &str,
        outputs: Vec<OutputDescriptor>,
        fee: Option<u64>,
    ) -> Result<TxHash, WalletError> {
        let account = self.require_account(account_id).await?;
        let spending_key = account.spending_key.clone().ok_or_else(|| {
            WalletError::InvalidTransaction("account is view-only".into())
        })?;
        self.builder.send(&account, outputs, fee, &spending_key).await
    }

    pub async fn mint(
        &self,
        account_id: &str,
        mint: MintRequest,
        fee: Option<u64>,
    ) -> Result<TxHash, WalletError> {
        let account = self.require_account(account_id).await?;
        let spending_key = account.spending_key.clone().ok_or_else(|| {
            WalletError::InvalidTransaction("account is view-only".into())
        })?;
        self.builder.mint(&account, mint, fee, &spending_key).await
    }

    pub async fn burn(
        &self,
        account_id: &str,
        burn: BurnRequest,
        fee: Option<u64>,
    ) -> Result<TxHash, WalletError> {
        let account = self.require_account(account_id).await?;
        let spending_key = account.spending_key.clone().ok_or_else(|| {
            WalletError::InvalidTransaction("account is view-only".into())
        })?;
        self.builder.burn(&account, burn, fee, &spending_key).await
    }

    /// `scanTransactions`, spec §4.5: a foreground rescan of `account_id` up
    /// to `end_sequence` (the indexer's current cursor if unset), emitting
    /// [`WalletEvent::ScanProgress`] as it goes.
    pub async fn scan_transactions(
        &self,
        account_id: &str,
        end_sequence: Option<u32>,
    ) -> Result<(), WalletError> {
        self.scheduler.scan_transactions(account_id, end_sequence).await
    }
}

fn load_decrypted_accounts(db: &WalletDb) -> Result<Vec<Account>, WalletError> {
    let txn = db.transaction();
    let rows = txn.scan_cf(CF_ACCOUNTS)?;
    let mut accounts = Vec::with_capacity(rows.len());
    for (_, value_bytes) in rows {
        if let AccountValue::Decrypted(account) = values::decode(&value_bytes)? {
            accounts.push(account);
        }
    }
    Ok(accounts)
}
