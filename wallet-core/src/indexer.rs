//! Chain processor, spec §4.3. The indexer owns a `(hash, sequence)` cursor
//! distinct from any one account's head — an account lags behind when it's
//! quarantined or pre-birthday — and is the single writer that ever advances
//! or rewinds an account.
//!
//! Grounded on the source project's chain-listener synchronization module
//! (`node/src/lexe/sync.rs`): the same two-phase "walk disconnects back to
//! the fork point, then walk connects forward to the new tip" shape used
//! there to reconcile `ChannelManager`/`ChannelMonitor` listeners against a
//! polled chain tip.

use std::collections::BTreeMap;

use tracing::{debug, info, instrument, warn};

use wallet_common::shutdown::ShutdownChannel;

use crate::account::{self, Account};
use crate::config::WalletConfig;
use crate::store::WalletDb;
use crate::traits::{WalletChain, WalletWorkerPool};
use crate::types::{
    AssetId, BlockHeader, BlockTransaction, DecryptNotePayload, DecryptedOutput, HeadLocator,
};

/// Whether `header` extends this account's current per-account head, per
/// spec §4.3's `connectBlock` preconditions.
fn extends(current_head: Option<HeadLocator>, header: &BlockHeader) -> bool {
    match current_head {
        Some(h) => h.hash == header.parent_hash,
        None => header.sequence == 1,
    }
}

enum ConnectMode {
    Advance,
    SkipDecryption,
    ForkedBirthday,
}

fn connect_mode(account: &Account, header: &BlockHeader) -> ConnectMode {
    if let Some(birthday) = account.created_at {
        if birthday.sequence == header.sequence && birthday.hash != header.hash {
            return ConnectMode::ForkedBirthday;
        }
        if birthday.sequence > header.sequence {
            return ConnectMode::SkipDecryption;
        }
    }
    ConnectMode::Advance
}

/// Builds a fresh reset account for a birthday caught on a forked branch:
/// same keys, a new id (so the old prefix's stale indexes are simply
/// abandoned to cleanup rather than needing an in-place wipe), and a
/// birthday rolled back to the block's parent so the rescan starts from
/// there. The id suffix is derived from the forked block's own hash rather
/// than a clock reading, so the reset is reproducible given the same reorg.
fn reset_for_fork(old: &Account, header: &BlockHeader) -> Account {
    let suffix = crate::hash::note_hash(&header.hash)[..4]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    Account {
        id: format!("{}-fork-{suffix}", old.id),
        name: old.name.clone(),
        version: old.version,
        spending_key: old.spending_key.clone(),
        view_key: old.view_key.clone(),
        incoming_view_key: old.incoming_view_key.clone(),
        outgoing_view_key: old.outgoing_view_key.clone(),
        public_address: old.public_address.clone(),
        proof_authorizing_key: old.proof_authorizing_key.clone(),
        created_at: Some(HeadLocator {
            hash: header.parent_hash,
            sequence: header.sequence.saturating_sub(1),
        }),
        scanning_enabled: old.scanning_enabled,
        multisig_keys: old.multisig_keys.clone(),
    }
}

/// Decrypts every output of `tx` against `account`'s keys, both as intended
/// recipient and as spender, batching requests at `batch_size` per spec
/// §4.3's "Decryption batching."
async fn decrypt_transaction<W: WalletWorkerPool>(
    workers: &W,
    account: &Account,
    block_tx: &BlockTransaction,
    batch_size: usize,
) -> anyhow::Result<Vec<DecryptedOutput>> {
    let mut payloads = Vec::with_capacity(block_tx.descriptor.output_notes.len() * 2);
    for (i, serialized_note) in block_tx.descriptor.output_notes.iter().enumerate() {
        let current_note_index = block_tx
            .initial_note_index
            .map(|base| base + i as u64);
        for decrypt_for_spender in [false, true] {
            payloads.push(DecryptNotePayload {
                serialized_note: serialized_note.clone(),
                incoming_view_key: account.incoming_view_key.clone(),
                outgoing_view_key: account.outgoing_view_key.clone(),
                view_key: account.view_key.clone(),
                current_note_index,
                decrypt_for_spender,
            });
        }
    }

    let mut decrypted = Vec::new();
    for chunk in payloads.chunks(batch_size.max(1)) {
        let results = workers.decrypt_notes(chunk.to_vec()).await?;
        decrypted.extend(results.into_iter().flatten());
    }
    Ok(decrypted)
}

/// The chain follower. Generic over the chain and worker-pool collaborators
/// so callers can plug in any implementation satisfying [`WalletChain`] /
/// [`WalletWorkerPool`].
pub struct Indexer<C, W> {
    db: WalletDb,
    chain: C,
    workers: W,
    config: WalletConfig,
    /// The indexer's own tip, distinct from any individual account's head.
    cursor: Option<HeadLocator>,
}

impl<C: WalletChain, W: WalletWorkerPool> Indexer<C, W> {
    pub fn new(db: WalletDb, chain: C, workers: W, config: WalletConfig) -> Self {
        Self {
            db,
            chain,
            workers,
            config,
            cursor: None,
        }
    }

    pub fn cursor(&self) -> Option<HeadLocator> {
        self.cursor
    }

    /// The chain handle, for callers (the scheduler's foreground rescan)
    /// that need to walk headers outside the normal `update()` loop.
    pub(crate) fn chain(&self) -> &C {
        &self.chain
    }

    /// spec §4.3's `update()`: walk back to the common ancestor, then
    /// forward to the chain's head, checking `abort` between blocks.
    #[instrument(skip_all, name = "indexer_update")]
    pub async fn update(
        &mut self,
        accounts: &mut Vec<Account>,
        abort: &ShutdownChannel,
    ) -> anyhow::Result<()> {
        let chain_head = self.chain.head().await?;

        while let Some(cursor) = self.cursor {
            if abort.try_recv() {
                return Ok(());
            }
            let canonical = self.chain.get_header_by_sequence(cursor.sequence).await?;
            if canonical.as_ref().map(|h| h.hash) == Some(cursor.hash) {
                break;
            }
            let header = self
                .chain
                .get_header(&cursor.hash)
                .await?
                .ok_or_else(|| anyhow::anyhow!("indexer cursor points at an unknown header"))?;
            self.disconnect_block(&header, accounts).await?;
            self.cursor = if header.sequence == 0 {
                None
            } else {
                Some(HeadLocator {
                    hash: header.parent_hash,
                    sequence: header.sequence - 1,
                })
            };
        }

        let start_sequence = self.cursor.map(|c| c.sequence + 1).unwrap_or(1);
        for sequence in start_sequence..=chain_head.sequence {
            if abort.try_recv() {
                return Ok(());
            }
            let Some(header) = self.chain.get_header_by_sequence(sequence).await? else {
                warn!(sequence, "chain head advertised but header missing, stopping");
                break;
            };
            self.connect_block(&header, accounts).await?;
            self.cursor = Some(HeadLocator {
                hash: header.hash,
                sequence: header.sequence,
            });
        }

        Ok(())
    }

    #[instrument(skip_all, name = "connect_block", fields(sequence = header.sequence))]
    async fn connect_block(
        &self,
        header: &BlockHeader,
        accounts: &mut Vec<Account>,
    ) -> anyhow::Result<()> {
        let block_transactions = self.chain.get_block_transactions(header).await?;

        for idx in 0..accounts.len() {
            let account = accounts[idx].clone();
            let head = account::get_head(&self.db.transaction(), &account)?;
            if !extends(head, header) {
                continue;
            }

            match connect_mode(&account, header) {
                ConnectMode::ForkedBirthday => {
                    let reset = reset_for_fork(&account, header);
                    let txn = self.db.transaction();
                    account::put_account(&txn, &account::AccountValue::Decrypted(reset.clone()))?;
                    // Tombstone the old prefix's data for background cleanup.
                    txn.put_cf(
                        crate::store::CF_ACCOUNT_IDS_TO_CLEANUP,
                        account.id.as_bytes(),
                        &[],
                    )?;
                    account::set_head(&txn, &reset, None)?;
                    txn.commit()?;
                    info!(old = %account.id, new = %reset.id, "account birthday forked, reset for rescan");
                    accounts[idx] = reset;
                }
                ConnectMode::SkipDecryption => {
                    let txn = self.db.transaction();
                    account::set_head(
                        &txn,
                        &account,
                        Some(HeadLocator {
                            hash: header.hash,
                            sequence: header.sequence,
                        }),
                    )?;
                    txn.commit()?;
                }
                ConnectMode::Advance => {
                    self.connect_block_for_account(header, &account, &block_transactions)
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Replays one already-canonical block for a single account, e.g. a
    /// foreground rescan catching it up to a point the indexer's own cursor
    /// has long since passed. Skips the fork/birthday bookkeeping
    /// [`connect_block`](Self::connect_block) does across the whole account
    /// set, since a rescan target is always below the indexer's cursor and
    /// therefore already known-canonical.
    pub(crate) async fn connect_block_for_account(
        &self,
        header: &BlockHeader,
        account: &Account,
        block_transactions: &[BlockTransaction],
    ) -> anyhow::Result<()> {
        let txn = self.db.transaction();
        let mut block_deltas: BTreeMap<AssetId, i64> = BTreeMap::new();

        for block_tx in block_transactions {
            let decrypted =
                decrypt_transaction(&self.workers, account, block_tx, self.config.decrypt_batch_size)
                    .await?;
            let deltas = account::connect_transaction(&txn, account, header, block_tx, &decrypted)?;
            for (asset, delta) in deltas {
                *block_deltas.entry(asset).or_insert(0) += delta;
            }
        }

        account::update_unconfirmed_balances(&txn, account, &block_deltas, header.hash, header.sequence)?;
        account::set_head(
            &txn,
            account,
            Some(HeadLocator {
                hash: header.hash,
                sequence: header.sequence,
            }),
        )?;
        txn.commit()?;
        debug!(account = %account.id, sequence = header.sequence, "connected block");
        Ok(())
    }

    #[instrument(skip_all, name = "disconnect_block", fields(sequence = header.sequence))]
    async fn disconnect_block(
        &self,
        header: &BlockHeader,
        accounts: &mut [Account],
    ) -> anyhow::Result<()> {
        let block_transactions = self.chain.get_block_transactions(header).await?;

        for account in accounts.iter_mut() {
            let head = account::get_head(&self.db.transaction(), account)?;
            if head.map(|h| h.hash) != Some(header.hash) {
                continue;
            }

            let txn = self.db.transaction();
            let mut block_deltas: BTreeMap<AssetId, i64> = BTreeMap::new();

            for block_tx in block_transactions.iter().rev() {
                let decrypted = decrypt_transaction(
                    &self.workers,
                    account,
                    block_tx,
                    self.config.decrypt_batch_size,
                )
                .await?;
                let deltas =
                    account::disconnect_transaction(&txn, account, header, block_tx, &decrypted)?;
                for (asset, delta) in deltas {
                    *block_deltas.entry(asset).or_insert(0) += delta;
                }
            }

            account::update_unconfirmed_balances(
                &txn,
                account,
                &block_deltas,
                header.parent_hash,
                header.sequence.saturating_sub(1),
            )?;
            account::set_head(
                &txn,
                account,
                if header.sequence <= 1 {
                    None
                } else {
                    Some(HeadLocator {
                        hash: header.parent_hash,
                        sequence: header.sequence - 1,
                    })
                },
            )?;

            if let Some(birthday) = account.created_at {
                if birthday.hash == header.hash && birthday.sequence == header.sequence {
                    account.created_at = Some(HeadLocator {
                        hash: header.parent_hash,
                        sequence: header.sequence.saturating_sub(1),
                    });
                    account::put_account(&txn, &account::AccountValue::Decrypted(account.clone()))?;
                }
            }

            txn.commit()?;
            debug!(account = %account.id, sequence = header.sequence, "disconnected block");
        }

        Ok(())
    }
}
