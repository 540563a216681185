//! Balance derivation, spec §4.2.2: `unconfirmed`/`confirmed`/`pending`/
//! `available`, each a single range iteration over one of the indexes in
//! §4.1 — never an O(wallet size) scan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::account::types::{Account, Balance, DecryptedNote, TransactionRecord};
use crate::errors::WalletError;
use crate::store::keys::{self, NEVER_EXPIRES};
use crate::store::values;
use crate::store::{
    Txn, CF_BALANCES, CF_DECRYPTED_NOTES, CF_PENDING_TRANSACTION_HASHES,
    CF_SEQUENCE_TO_TRANSACTION_HASH, CF_TRANSACTIONS, CF_UNSPENT_NOTE_HASHES_BY_VALUE,
};
use crate::types::{AssetId, BlockHash};

/// The shape published to consumers, spec §6: "The balance record published
/// to consumers has the exact shape: `{assetId, unconfirmed,
/// unconfirmedCount, confirmed, pending, pendingCount, available,
/// availableNoteCount, blockHash, sequence}`."
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub asset_id: AssetId,
    pub unconfirmed: i128,
    pub unconfirmed_count: usize,
    pub confirmed: i128,
    pub pending: i128,
    pub pending_count: usize,
    pub available: u128,
    pub available_note_count: usize,
    pub block_hash: Option<BlockHash>,
    pub sequence: Option<u32>,
}

/// The earliest sequence a chain position can take. Used as the floor of
/// the confirmation window per spec §4.2.2's `max(H-C+1, GENESIS)`.
pub const GENESIS_SEQUENCE: u32 = 1;

pub fn read_balance_row(
    txn: &Txn,
    account: &Account,
    asset_id: AssetId,
) -> Result<Balance, WalletError> {
    let key = keys::prefix_asset_key(account.prefix(), asset_id);
    match txn.get_cf(CF_BALANCES, &key)? {
        Some(bytes) => values::decode(&bytes),
        None => Ok(Balance::default()),
    }
}

pub fn write_balance_row(
    txn: &Txn,
    account: &Account,
    asset_id: AssetId,
    balance: &Balance,
) -> Result<(), WalletError> {
    let key = keys::prefix_asset_key(account.prefix(), asset_id);
    txn.put_cf(CF_BALANCES, &key, &values::encode(balance)?)
}

/// Computes the full balance snapshot for one asset at head sequence `h`
/// with `c` confirmations required.
pub fn get_balance(
    txn: &Txn,
    account: &Account,
    asset_id: AssetId,
    head_sequence: u32,
    confirmations: u32,
) -> Result<BalanceSnapshot, WalletError> {
    let row = read_balance_row(txn, account, asset_id)?;
    let prefix = account.prefix();

    let window_lo = head_sequence.saturating_sub(confirmations).saturating_add(1);
    let window_lo = window_lo.max(GENESIS_SEQUENCE);
    let (delta_c, unconfirmed_count) =
        sum_on_chain_deltas(txn, prefix, asset_id, window_lo, head_sequence)?;
    let confirmed = row.unconfirmed - delta_c;

    let (delta_p, pending_count, pending_spent) =
        sum_pending_deltas(txn, account, asset_id)?;
    let pending = row.unconfirmed + delta_p;

    let confirmation_floor = head_sequence.saturating_sub(confirmations);
    let (available_gross, available_note_count) =
        sum_available_notes(txn, prefix, asset_id, confirmation_floor)?;
    let available = available_gross.saturating_sub(pending_spent);

    Ok(BalanceSnapshot {
        asset_id,
        unconfirmed: row.unconfirmed,
        unconfirmed_count,
        confirmed,
        pending,
        pending_count,
        available,
        available_note_count,
        block_hash: row.block_hash,
        sequence: row.sequence,
    })
}

/// Sums `assetBalanceDeltas[asset]` over on-chain transactions with
/// sequence in `[lo, hi]`, used both for the confirmation-window subtraction
/// and as `unconfirmedCount`'s basis (every on-chain transaction touching
/// this asset, across all sequences, when `lo = GENESIS_SEQUENCE` and
/// `hi = u32::MAX`).
fn sum_on_chain_deltas(
    txn: &Txn,
    prefix: [u8; 4],
    asset_id: AssetId,
    lo: u32,
    hi: u32,
) -> Result<(i128, usize), WalletError> {
    let (start, end) = keys::sequence_to_tx_hash_range(prefix, lo, hi);
    let rows = txn.range_cf(CF_SEQUENCE_TO_TRANSACTION_HASH, &start, &end)?;
    let mut delta = 0i128;
    let mut count = 0usize;
    for (key, _) in rows {
        let tx_hash = keys::hash32_from_tail(&key);
        let record = read_transaction(txn, prefix, tx_hash)?;
        if let Some(d) = record.asset_balance_deltas.get(&asset_id) {
            delta += i128::from(*d);
            count += 1;
        }
    }
    Ok((delta, count))
}

/// Sums deltas and subtractable input value across every pending
/// transaction, regardless of expiration (`[0, NEVER_EXPIRES]`).
fn sum_pending_deltas(
    txn: &Txn,
    account: &Account,
    asset_id: AssetId,
) -> Result<(i128, usize, u128), WalletError> {
    let prefix = account.prefix();
    let (start, end) = keys::expired_range(prefix, NEVER_EXPIRES);
    // `expired_range` excludes 0, but a pending tx is never keyed at
    // expiration 0 (builder-created transactions always set an expiration;
    // `NEVER_EXPIRES` is the "no expiration" sentinel, not zero), so this
    // still covers every pending transaction.
    let rows = txn.range_cf(CF_PENDING_TRANSACTION_HASHES, &start, &end)?;
    let mut delta = 0i128;
    let mut count = 0usize;
    let mut spent = 0u128;
    for (key, _) in rows {
        let tx_hash = keys::hash32_from_tail(&key);
        let record = read_transaction(txn, prefix, tx_hash)?;
        if let Some(d) = record.asset_balance_deltas.get(&asset_id) {
            delta += i128::from(*d);
            count += 1;
        }
        if let Some(v) = record.pending_spent.get(&asset_id) {
            spent += u128::from(*v);
        }
    }
    Ok((delta, count, spent))
}

/// Sums `note.value` over every unspent note of `asset_id` with
/// `sequence <= confirmation_floor`, iterating the full
/// `unspentNoteHashesByValue` range for the asset (spec §4.2.2: "via
/// unspentNoteHashesByValue range").
fn sum_available_notes(
    txn: &Txn,
    prefix: [u8; 4],
    asset_id: AssetId,
    confirmation_floor: u32,
) -> Result<(u128, usize), WalletError> {
    let (start, end) = keys::unspent_by_value_asset_range(prefix, asset_id);
    let rows = txn.range_cf(CF_UNSPENT_NOTE_HASHES_BY_VALUE, &start, &end)?;
    let mut total = 0u128;
    let mut count = 0usize;
    for (key, _) in rows {
        let note_hash = keys::unspent_note_hash_from_key(&key);
        let value = keys::unspent_value_from_key(&key);
        let note_key = keys::prefix_note_key(prefix, note_hash);
        let Some(bytes) = txn.get_cf(CF_DECRYPTED_NOTES, &note_key)? else {
            continue;
        };
        let note: DecryptedNote = values::decode(&bytes)?;
        if let Some(sequence) = note.sequence {
            if sequence <= confirmation_floor {
                total += u128::from(value);
                count += 1;
            }
        }
    }
    Ok((total, count))
}

fn read_transaction(
    txn: &Txn,
    prefix: [u8; 4],
    tx_hash: crate::types::TxHash,
) -> Result<TransactionRecord, WalletError> {
    let key = keys::prefix_tx_key(prefix, tx_hash);
    let bytes = txn.get_cf(CF_TRANSACTIONS, &key)?.ok_or_else(|| {
        WalletError::DbCorruption(format!(
            "range index pointed at missing transaction {}",
            wallet_common::hex::encode(&tx_hash)
        ))
    })?;
    values::decode(&bytes)
}

/// Balances for every asset this account has ever touched, keyed by asset
/// id. Used by `getBalances`-style callers that want the whole table rather
/// than one asset at a time.
pub fn get_all_balances(
    txn: &Txn,
    account: &Account,
    head_sequence: u32,
    confirmations: u32,
) -> Result<BTreeMap<AssetId, BalanceSnapshot>, WalletError> {
    let (start, end) = keys::prefix_range(account.prefix(), 32);
    let rows = txn.range_cf(CF_BALANCES, &start, &end)?;
    let mut out = BTreeMap::new();
    for (key, _) in rows {
        let asset_id = keys::hash32_from_tail(&key);
        let snapshot = get_balance(txn, account, asset_id, head_sequence, confirmations)?;
        out.insert(asset_id, snapshot);
    }
    Ok(out)
}
