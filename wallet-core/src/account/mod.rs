//! Account State (spec §4.2): the single point of mutation for one
//! account's notes, transactions, assets, and balances. Every mutating
//! function here takes the [`Txn`] handle its caller opened — building the
//! new rows in memory, writing them through the transaction, and leaving
//! the commit to the caller — following the source project's
//! check/persist/commit update pattern (see `SPEC_FULL.md` §4.2).

pub mod balance;
pub mod mint;
pub mod types;

pub use types::{
    Account, AccountValue, AssetCreatedAt, AssetRecord, Balance, DecryptedNote, MultisigKeys,
    TransactionRecord,
};

use std::collections::BTreeMap;

use wallet_common::time::TimestampMillis;

use crate::account::types::{AccountSummary, NoteSummary};
use crate::errors::WalletError;
use crate::store::keys::{self, Prefix};
use crate::store::{
    values, Txn, CF_ACCOUNTS, CF_ACCOUNT_IDS_TO_CLEANUP, CF_BALANCES, CF_DECRYPTED_NOTES,
    CF_HEADS, CF_NON_CHAIN_NOTE_HASHES, CF_NULLIFIER_TO_NOTE_HASH,
    CF_NULLIFIER_TO_TRANSACTION_HASH, CF_PENDING_TRANSACTION_HASHES, CF_SEQUENCE_TO_NOTE_HASH,
    CF_SEQUENCE_TO_TRANSACTION_HASH, CF_TRANSACTIONS, CF_UNSPENT_NOTE_HASHES_BY_VALUE,
};
use crate::types::{AssetId, BlockHeader, BlockTransaction, DecryptedOutput, HeadLocator, NoteHash, Nullifier, TxHash};

/// `account.createdAt`-less genesis birthday, i.e. "scan from the start."

// --- head pointer --- //

pub fn get_head(txn: &Txn, account: &Account) -> Result<Option<HeadLocator>, WalletError> {
    let key = keys::account_key(&account.id);
    match txn.get_cf(CF_HEADS, &key)? {
        Some(bytes) if bytes.is_empty() => Ok(None),
        Some(bytes) => Ok(Some(values::decode(&bytes)?)),
        None => Ok(None),
    }
}

pub fn set_head(
    txn: &Txn,
    account: &Account,
    head: Option<HeadLocator>,
) -> Result<(), WalletError> {
    let key = keys::account_key(&account.id);
    match head {
        Some(h) => txn.put_cf(CF_HEADS, &key, &values::encode(&h)?),
        None => txn.put_cf(CF_HEADS, &key, &[]),
    }
}

// --- account record --- //

pub fn get_account(txn: &Txn, account_id: &str) -> Result<Option<AccountValue>, WalletError> {
    let key = keys::account_key(account_id);
    match txn.get_cf(CF_ACCOUNTS, &key)? {
        Some(bytes) => Ok(Some(values::decode(&bytes)?)),
        None => Ok(None),
    }
}

pub fn put_account(txn: &Txn, value: &AccountValue) -> Result<(), WalletError> {
    let id = match value {
        AccountValue::Decrypted(a) => a.id.as_str(),
        AccountValue::Encrypted { .. } => {
            return Err(WalletError::DbCorruption(
                "put_account requires a plaintext Account to learn its id".into(),
            ))
        }
    };
    let key = keys::account_key(id);
    txn.put_cf(CF_ACCOUNTS, &key, &values::encode(value)?)
}

/// Stores an already-id-known encrypted envelope; used once the plaintext
/// account id has been established by the caller (it's not recoverable
/// from the ciphertext alone).
pub fn put_account_encrypted(
    txn: &Txn,
    account_id: &str,
    value: &AccountValue,
) -> Result<(), WalletError> {
    let key = keys::account_key(account_id);
    txn.put_cf(CF_ACCOUNTS, &key, &values::encode(value)?)
}

// --- connect / disconnect --- //

/// Derives the value, per asset, of this account's own notes that
/// `spent_nullifiers` spends — used both for `addPendingTransaction`'s
/// `pending_spent` bookkeeping and to recompute it when a spend re-becomes
/// pending after a disconnect. Looks the nullifier up in
/// `nullifier_to_note_hash`, which (per spec invariant 1) is populated for
/// every on-chain note of this account regardless of spent status, so this
/// works even though the note hasn't been marked spent yet.
fn compute_pending_spent(
    txn: &Txn,
    prefix: Prefix,
    spent_nullifiers: &[Nullifier],
) -> Result<BTreeMap<AssetId, u64>, WalletError> {
    let mut spent = BTreeMap::new();
    for nullifier in spent_nullifiers {
        let nf_key = keys::prefix_nullifier_key(prefix, *nullifier);
        let Some(note_hash_bytes) = txn.get_cf(CF_NULLIFIER_TO_NOTE_HASH, &nf_key)? else {
            continue;
        };
        let note_hash: NoteHash = note_hash_bytes
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::DbCorruption("malformed note hash".into()))?;
        let note_key = keys::prefix_note_key(prefix, note_hash);
        if let Some(note_bytes) = txn.get_cf(CF_DECRYPTED_NOTES, &note_key)? {
            let note: DecryptedNote = values::decode(&note_bytes)?;
            *spent.entry(note.asset_id).or_insert(0) += note.value;
        }
    }
    Ok(spent)
}

fn read_transaction_opt(
    txn: &Txn,
    prefix: Prefix,
    tx_hash: TxHash,
) -> Result<Option<TransactionRecord>, WalletError> {
    let key = keys::prefix_tx_key(prefix, tx_hash);
    match txn.get_cf(CF_TRANSACTIONS, &key)? {
        Some(bytes) => Ok(Some(values::decode(&bytes)?)),
        None => Ok(None),
    }
}

fn write_transaction(
    txn: &Txn,
    prefix: Prefix,
    tx_hash: TxHash,
    record: &TransactionRecord,
) -> Result<(), WalletError> {
    let key = keys::prefix_tx_key(prefix, tx_hash);
    txn.put_cf(CF_TRANSACTIONS, &key, &values::encode(record)?)
}

/// `connectTransaction`, spec §4.2. Returns the per-asset delta this
/// transaction contributed, for the caller to aggregate across the block
/// and pass to [`update_unconfirmed_balances`].
pub fn connect_transaction(
    txn: &Txn,
    account: &Account,
    header: &BlockHeader,
    block_tx: &BlockTransaction,
    decrypted_outputs: &[DecryptedOutput],
) -> Result<BTreeMap<AssetId, i64>, WalletError> {
    let prefix = account.prefix();
    let descriptor = &block_tx.descriptor;
    let mut deltas: BTreeMap<AssetId, i64> = BTreeMap::new();
    let mut any_effect = false;

    for output in decrypted_outputs.iter().filter(|o| !o.for_spender) {
        let note = DecryptedNote {
            account_id: account.id.clone(),
            serialized_note: output.native_note.clone(),
            spent: false,
            transaction_hash: descriptor.hash,
            index: output.index,
            nullifier: output.nullifier,
            block_hash: Some(header.hash),
            sequence: Some(header.sequence),
            asset_id: output.asset_id,
            value: output.value,
        };
        let note_key = keys::prefix_note_key(prefix, output.note_hash);
        txn.put_cf(CF_DECRYPTED_NOTES, &note_key, &values::encode(&note)?)?;
        txn.delete_cf(CF_NON_CHAIN_NOTE_HASHES, &note_key)?;
        if let Some(nullifier) = output.nullifier {
            let nf_key = keys::prefix_nullifier_key(prefix, nullifier);
            txn.put_cf(CF_NULLIFIER_TO_NOTE_HASH, &nf_key, &output.note_hash)?;
        }
        let seq_key = keys::sequence_to_note_hash_key(prefix, header.sequence, output.note_hash);
        txn.put_cf(CF_SEQUENCE_TO_NOTE_HASH, &seq_key, &[])?;
        let unspent_key =
            keys::unspent_by_value_key(prefix, output.asset_id, output.value, output.note_hash);
        txn.put_cf(CF_UNSPENT_NOTE_HASHES_BY_VALUE, &unspent_key, &[])?;

        *deltas.entry(output.asset_id).or_insert(0) += output.value as i64;
        any_effect = true;
    }

    for nullifier in &descriptor.spent_nullifiers {
        let nf_key = keys::prefix_nullifier_key(prefix, *nullifier);
        let Some(note_hash_bytes) = txn.get_cf(CF_NULLIFIER_TO_NOTE_HASH, &nf_key)? else {
            continue;
        };
        let note_hash: NoteHash = note_hash_bytes
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::DbCorruption("malformed note hash".into()))?;
        let note_key = keys::prefix_note_key(prefix, note_hash);
        let Some(note_bytes) = txn.get_cf(CF_DECRYPTED_NOTES, &note_key)? else {
            continue;
        };
        let mut note: DecryptedNote = values::decode(&note_bytes)?;
        if note.spent {
            continue;
        }
        note.spent = true;
        txn.put_cf(CF_DECRYPTED_NOTES, &note_key, &values::encode(&note)?)?;
        txn.put_cf(CF_NULLIFIER_TO_TRANSACTION_HASH, &nf_key, &descriptor.hash)?;
        let unspent_key = keys::unspent_by_value_key(prefix, note.asset_id, note.value, note_hash);
        txn.delete_cf(CF_UNSPENT_NOTE_HASHES_BY_VALUE, &unspent_key)?;
        *deltas.entry(note.asset_id).or_insert(0) -= note.value as i64;
        any_effect = true;
    }

    for mint in &descriptor.mints {
        if mint::apply_mint(txn, account, mint, header, descriptor.hash)? {
            any_effect = true;
        }
    }
    for burn in &descriptor.burns {
        if mint::apply_burn(txn, account, burn)? {
            any_effect = true;
        }
    }

    if !any_effect {
        return Ok(deltas);
    }

    let existing = read_transaction_opt(txn, prefix, descriptor.hash)?;
    let timestamp = existing
        .as_ref()
        .map(|r| r.timestamp)
        .unwrap_or_else(|| TimestampMillis::from_millis(header.timestamp));
    let submitted_sequence = existing
        .as_ref()
        .map(|r| r.submitted_sequence)
        .unwrap_or(header.sequence);

    if let Some(prior) = &existing {
        let pending_key = keys::pending_tx_key(prefix, prior.expiration, descriptor.hash);
        txn.delete_cf(CF_PENDING_TRANSACTION_HASHES, &pending_key)?;
    }

    let record = TransactionRecord {
        transaction: descriptor.transaction.clone(),
        timestamp,
        block_hash: Some(header.hash),
        sequence: Some(header.sequence),
        submitted_sequence,
        expiration: descriptor.expiration,
        asset_balance_deltas: deltas.clone(),
        pending_spent: BTreeMap::new(),
    };
    write_transaction(txn, prefix, descriptor.hash, &record)?;
    let seq_tx_key = keys::sequence_to_tx_hash_key(prefix, header.sequence, descriptor.hash);
    txn.put_cf(CF_SEQUENCE_TO_TRANSACTION_HASH, &seq_tx_key, &[])?;

    Ok(deltas)
}

/// `disconnectTransaction`, spec §4.2 — the inverse of [`connect_transaction`].
/// Takes the same decrypted-outputs list as connect (decryption is a pure
/// function of the note ciphertext and the account's keys, so the indexer
/// can recompute it for the block being rolled back rather than the engine
/// needing a `notes-by-transaction` index it has nowhere else to use).
pub fn disconnect_transaction(
    txn: &Txn,
    account: &Account,
    header: &BlockHeader,
    block_tx: &BlockTransaction,
    decrypted_outputs: &[DecryptedOutput],
) -> Result<BTreeMap<AssetId, i64>, WalletError> {
    let prefix = account.prefix();
    let descriptor = &block_tx.descriptor;
    let mut deltas: BTreeMap<AssetId, i64> = BTreeMap::new();

    let Some(existing) = read_transaction_opt(txn, prefix, descriptor.hash)? else {
        // This transaction never affected the account (the storage-space
        // optimization in `connect_transaction` skipped writing a record);
        // nothing to roll back.
        return Ok(deltas);
    };

    for output in decrypted_outputs.iter().filter(|o| !o.for_spender) {
        let note_key = keys::prefix_note_key(prefix, output.note_hash);
        let Some(note_bytes) = txn.get_cf(CF_DECRYPTED_NOTES, &note_key)? else {
            continue;
        };
        let mut note: DecryptedNote = values::decode(&note_bytes)?;

        if let Some(seq) = note.sequence {
            let seq_key = keys::sequence_to_note_hash_key(prefix, seq, output.note_hash);
            txn.delete_cf(CF_SEQUENCE_TO_NOTE_HASH, &seq_key)?;
        }
        if !note.spent {
            let unspent_key =
                keys::unspent_by_value_key(prefix, note.asset_id, note.value, output.note_hash);
            txn.delete_cf(CF_UNSPENT_NOTE_HASHES_BY_VALUE, &unspent_key)?;
        }
        if let Some(nullifier) = note.nullifier {
            let nf_key = keys::prefix_nullifier_key(prefix, nullifier);
            txn.delete_cf(CF_NULLIFIER_TO_NOTE_HASH, &nf_key)?;
        }

        note.index = None;
        note.nullifier = None;
        note.block_hash = None;
        note.sequence = None;
        txn.put_cf(CF_DECRYPTED_NOTES, &note_key, &values::encode(&note)?)?;
        txn.put_cf(CF_NON_CHAIN_NOTE_HASHES, &note_key, &[])?;

        *deltas.entry(note.asset_id).or_insert(0) -= note.value as i64;
    }

    for nullifier in &descriptor.spent_nullifiers {
        let nf_key = keys::prefix_nullifier_key(prefix, *nullifier);
        let Some(note_hash_bytes) = txn.get_cf(CF_NULLIFIER_TO_NOTE_HASH, &nf_key)? else {
            continue;
        };
        let note_hash: NoteHash = note_hash_bytes
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::DbCorruption("malformed note hash".into()))?;
        let note_key = keys::prefix_note_key(prefix, note_hash);
        let Some(note_bytes) = txn.get_cf(CF_DECRYPTED_NOTES, &note_key)? else {
            continue;
        };
        let mut note: DecryptedNote = values::decode(&note_bytes)?;
        if !note.spent {
            continue;
        }
        let spent_by = txn.get_cf(CF_NULLIFIER_TO_TRANSACTION_HASH, &nf_key)?;
        if spent_by.as_deref() != Some(descriptor.hash.as_slice()) {
            continue;
        }
        note.spent = false;
        txn.put_cf(CF_DECRYPTED_NOTES, &note_key, &values::encode(&note)?)?;
        let unspent_key = keys::unspent_by_value_key(prefix, note.asset_id, note.value, note_hash);
        txn.put_cf(CF_UNSPENT_NOTE_HASHES_BY_VALUE, &unspent_key, &[])?;
        txn.delete_cf(CF_NULLIFIER_TO_TRANSACTION_HASH, &nf_key)?;
        *deltas.entry(note.asset_id).or_insert(0) += note.value as i64;
    }

    for burn in descriptor.burns.iter().rev() {
        mint::reverse_burn(txn, account, burn)?;
    }
    for mint in descriptor.mints.iter().rev() {
        mint::reverse_mint(txn, account, mint, header)?;
    }

    let seq_tx_key = keys::sequence_to_tx_hash_key(prefix, header.sequence, descriptor.hash);
    txn.delete_cf(CF_SEQUENCE_TO_TRANSACTION_HASH, &seq_tx_key)?;

    if descriptor.is_miners_fee {
        txn.delete_cf(CF_TRANSACTIONS, &keys::prefix_tx_key(prefix, descriptor.hash))?;
    } else {
        let pending_spent = compute_pending_spent(txn, prefix, &descriptor.spent_nullifiers)?;
        let record = TransactionRecord {
            transaction: existing.transaction,
            timestamp: existing.timestamp,
            block_hash: None,
            sequence: None,
            submitted_sequence: existing.submitted_sequence,
            expiration: existing.expiration,
            asset_balance_deltas: deltas.clone(),
            pending_spent,
        };
        write_transaction(txn, prefix, descriptor.hash, &record)?;
        let pending_key = keys::pending_tx_key(prefix, existing.expiration, descriptor.hash);
        txn.put_cf(CF_PENDING_TRANSACTION_HASHES, &pending_key, &[])?;
    }

    Ok(deltas)
}

/// `addPendingTransaction`, spec §4.2. Idempotent: a tx hash already known
/// is a no-op, per spec's pending-idempotence invariant.
pub fn add_pending_transaction(
    txn: &Txn,
    account: &Account,
    descriptor: &crate::types::TransactionDescriptor,
    decrypted_outputs: &[DecryptedOutput],
    submitted_sequence: u32,
) -> Result<(), WalletError> {
    let prefix = account.prefix();
    if read_transaction_opt(txn, prefix, descriptor.hash)?.is_some() {
        return Ok(());
    }

    let mut deltas: BTreeMap<AssetId, i64> = BTreeMap::new();
    let mut any_effect = false;

    for output in decrypted_outputs.iter().filter(|o| !o.for_spender) {
        let note = DecryptedNote {
            account_id: account.id.clone(),
            serialized_note: output.native_note.clone(),
            spent: false,
            transaction_hash: descriptor.hash,
            index: None,
            nullifier: None,
            block_hash: None,
            sequence: None,
            asset_id: output.asset_id,
            value: output.value,
        };
        let note_key = keys::prefix_note_key(prefix, output.note_hash);
        txn.put_cf(CF_DECRYPTED_NOTES, &note_key, &values::encode(&note)?)?;
        txn.put_cf(CF_NON_CHAIN_NOTE_HASHES, &note_key, &[])?;
        *deltas.entry(output.asset_id).or_insert(0) += output.value as i64;
        any_effect = true;
    }

    if !descriptor.mints.is_empty() || !descriptor.burns.is_empty() {
        any_effect = true;
    }

    if !any_effect {
        return Ok(());
    }

    let pending_spent = compute_pending_spent(txn, prefix, &descriptor.spent_nullifiers)?;
    let record = TransactionRecord {
        transaction: descriptor.transaction.clone(),
        timestamp: TimestampMillis::now(),
        block_hash: None,
        sequence: None,
        submitted_sequence,
        expiration: descriptor.expiration,
        asset_balance_deltas: deltas,
        pending_spent,
    };
    write_transaction(txn, prefix, descriptor.hash, &record)?;
    let pending_key = keys::pending_tx_key(prefix, descriptor.expiration, descriptor.hash);
    txn.put_cf(CF_PENDING_TRANSACTION_HASHES, &pending_key, &[])?;
    Ok(())
}

/// `expireTransaction`, spec §4.2: removes the output notes entirely,
/// unspends any note the transaction (authoritatively) spent, and drops the
/// pending-index entry. The `TransactionRecord` itself is kept (spec §9,
/// Open Question (a)) unless the caller separately calls
/// [`delete_transaction`].
pub fn expire_transaction(txn: &Txn, account: &Account, tx_hash: TxHash) -> Result<(), WalletError> {
    let prefix = account.prefix();
    let Some(record) = read_transaction_opt(txn, prefix, tx_hash)? else {
        return Ok(());
    };

    // Every note this account holds whose `transaction_hash` is this tx is
    // one of its outputs; find them through the nullifier-less
    // `non_chain_note_hashes` set a pending tx's outputs were inserted into
    // (expiry only ever applies to a still-pending transaction).
    let (start, end) = keys::prefix_range(prefix, 32);
    let candidates = txn.range_cf(CF_NON_CHAIN_NOTE_HASHES, &start, &end)?;
    for (key, _) in candidates {
        let note_hash = keys::hash32_from_tail(&key);
        let note_key = keys::prefix_note_key(prefix, note_hash);
        let Some(note_bytes) = txn.get_cf(CF_DECRYPTED_NOTES, &note_key)? else {
            continue;
        };
        let note: DecryptedNote = values::decode(&note_bytes)?;
        if note.transaction_hash != tx_hash {
            continue;
        }
        txn.delete_cf(CF_DECRYPTED_NOTES, &note_key)?;
        txn.delete_cf(CF_NON_CHAIN_NOTE_HASHES, &note_key)?;
    }

    // The record's `asset_balance_deltas` are left as-is: the
    // `TransactionRecord` itself stays in place (Open Question (a)), and
    // balance derivation only counts pending/on-chain rows, so once this
    // transaction drops out of `pending_transaction_hashes` below it no
    // longer contributes to `pending` either.

    // Any note this account previously marked spent by this transaction
    // reverts to unspent, since the spend never confirmed.
    let (note_start, note_end) = keys::prefix_range(prefix, 32);
    let all_notes = txn.range_cf(CF_DECRYPTED_NOTES, &note_start, &note_end)?;
    for (key, value) in all_notes {
        let note_hash = keys::hash32_from_tail(&key);
        let mut note: DecryptedNote = values::decode(&value)?;
        if !note.spent {
            continue;
        }
        let Some(nullifier) = note.nullifier else { continue };
        let nf_key = keys::prefix_nullifier_key(prefix, nullifier);
        let spent_by = txn.get_cf(CF_NULLIFIER_TO_TRANSACTION_HASH, &nf_key)?;
        if spent_by.as_deref() != Some(tx_hash.as_slice()) {
            continue;
        }
        note.spent = false;
        txn.put_cf(CF_DECRYPTED_NOTES, &key, &values::encode(&note)?)?;
        let unspent_key = keys::unspent_by_value_key(prefix, note.asset_id, note.value, note_hash);
        txn.put_cf(CF_UNSPENT_NOTE_HASHES_BY_VALUE, &unspent_key, &[])?;
        txn.delete_cf(CF_NULLIFIER_TO_TRANSACTION_HASH, &nf_key)?;
    }

    let pending_key = keys::pending_tx_key(prefix, record.expiration, tx_hash);
    txn.delete_cf(CF_PENDING_TRANSACTION_HASHES, &pending_key)?;
    Ok(())
}

/// `deleteTransaction`, spec §4.2: expires, then erases the record itself.
pub fn delete_transaction(txn: &Txn, account: &Account, tx_hash: TxHash) -> Result<(), WalletError> {
    expire_transaction(txn, account, tx_hash)?;
    let key = keys::prefix_tx_key(account.prefix(), tx_hash);
    txn.delete_cf(CF_TRANSACTIONS, &key)
}

/// Applies the block's aggregate per-asset deltas to the stored running
/// balance once per block (not once per transaction), per spec §4.3's
/// "Aggregate per-asset deltas across the block and call
/// `Account.updateUnconfirmedBalances` once."
pub fn update_unconfirmed_balances(
    txn: &Txn,
    account: &Account,
    deltas: &BTreeMap<AssetId, i64>,
    block_hash: crate::types::BlockHash,
    sequence: u32,
) -> Result<(), WalletError> {
    for (asset_id, delta) in deltas {
        let mut row = balance::read_balance_row(txn, account, *asset_id)?;
        row.unconfirmed += i128::from(*delta);
        row.block_hash = Some(block_hash);
        row.sequence = Some(sequence);
        balance::write_balance_row(txn, account, *asset_id, &row)?;
    }
    Ok(())
}

// --- read accessors --- //

/// Unspent notes of `asset_id` confirmed at least `confirmations` deep as
/// of `head_sequence`, in ascending value order (the order
/// `unspent_note_hashes_by_value` is keyed in) — the order the transaction
/// builder's greedy note selection consumes.
pub fn get_unspent_notes(
    txn: &Txn,
    account: &Account,
    asset_id: AssetId,
    head_sequence: u32,
    confirmations: u32,
) -> Result<Vec<DecryptedNote>, WalletError> {
    let prefix = account.prefix();
    let confirmation_floor = head_sequence.saturating_sub(confirmations);
    let (start, end) = keys::unspent_by_value_asset_range(prefix, asset_id);
    let rows = txn.range_cf(CF_UNSPENT_NOTE_HASHES_BY_VALUE, &start, &end)?;
    let mut out = Vec::new();
    for (key, _) in rows {
        let note_hash = keys::unspent_note_hash_from_key(&key);
        let note_key = keys::prefix_note_key(prefix, note_hash);
        let Some(bytes) = txn.get_cf(CF_DECRYPTED_NOTES, &note_key)? else {
            continue;
        };
        let note: DecryptedNote = values::decode(&bytes)?;
        if let Some(sequence) = note.sequence {
            if sequence <= confirmation_floor {
                out.push(note);
            }
        }
    }
    Ok(out)
}

/// Every pending transaction hash for this account, in expiration order —
/// the iteration order `expiredTransactions`/rebroadcast both want.
pub fn pending_transaction_hashes(
    txn: &Txn,
    account: &Account,
) -> Result<Vec<TxHash>, WalletError> {
    let prefix = account.prefix();
    let (start, end) = keys::expired_range(prefix, keys::NEVER_EXPIRES);
    let rows = txn.range_cf(CF_PENDING_TRANSACTION_HASHES, &start, &end)?;
    Ok(rows.iter().map(|(k, _)| keys::hash32_from_tail(k)).collect())
}

/// Pending transactions with `0 < expiration <= head_sequence`, i.e. those
/// [`expire_transaction`] should be called on this tick.
pub fn expired_transaction_hashes(
    txn: &Txn,
    account: &Account,
    head_sequence: u32,
) -> Result<Vec<TxHash>, WalletError> {
    let prefix = account.prefix();
    let (start, end) = keys::expired_range(prefix, head_sequence);
    let rows = txn.range_cf(CF_PENDING_TRANSACTION_HASHES, &start, &end)?;
    Ok(rows.iter().map(|(k, _)| keys::hash32_from_tail(k)).collect())
}

pub fn get_transaction(
    txn: &Txn,
    account: &Account,
    tx_hash: TxHash,
) -> Result<Option<TransactionRecord>, WalletError> {
    read_transaction_opt(txn, account.prefix(), tx_hash)
}

pub fn get_note_by_hash(
    txn: &Txn,
    account: &Account,
    note_hash: NoteHash,
) -> Result<Option<DecryptedNote>, WalletError> {
    let key = keys::prefix_note_key(account.prefix(), note_hash);
    match txn.get_cf(CF_DECRYPTED_NOTES, &key)? {
        Some(bytes) => Ok(Some(values::decode(&bytes)?)),
        None => Ok(None),
    }
}

/// The read-only projection listing callers get instead of the full
/// [`Account`], which carries key material.
pub fn summarize(txn: &Txn, account: &Account) -> Result<AccountSummary, WalletError> {
    Ok(AccountSummary {
        id: account.id.clone(),
        name: account.name.clone(),
        public_address: account.public_address.clone(),
        view_only: account.spending_key.is_none(),
        scanning_enabled: account.scanning_enabled,
        head: get_head(txn, account)?,
    })
}

/// Notes with `sequence` in `[lo, hi]`, in ascending sequence order — the
/// `sequence_to_note_hash` index's native iteration order, used for
/// `notesBySequenceRange`-style callers (spec §1).
pub fn note_summaries_by_sequence_range(
    txn: &Txn,
    account: &Account,
    lo: u32,
    hi: u32,
) -> Result<Vec<NoteSummary>, WalletError> {
    let prefix = account.prefix();
    let (start, end) = keys::sequence_to_note_hash_range(prefix, lo, hi);
    let rows = txn.range_cf(CF_SEQUENCE_TO_NOTE_HASH, &start, &end)?;
    let mut out = Vec::with_capacity(rows.len());
    for (key, _) in rows {
        let note_hash = keys::hash32_from_tail(&key);
        let Some(note) = get_note_by_hash(txn, account, note_hash)? else {
            continue;
        };
        out.push(NoteSummary {
            note_hash,
            asset_id: note.asset_id,
            value: note.value,
            spent: note.spent,
            transaction_hash: note.transaction_hash,
            sequence: note.sequence,
        });
    }
    Ok(out)
}

/// `removeAccount`, spec §4.1's cleanup semantics: an atomic three-write
/// tombstone — delete the account record and its head, clear its balance
/// rows (the only per-account store small enough to clear synchronously),
/// and queue the rest of its prefix for the background cleanup task. Takes
/// a bare account id (not `&Account`) since a view into key material isn't
/// needed to remove one.
pub fn remove_account(txn: &Txn, account_id: &str) -> Result<(), WalletError> {
    let key = keys::account_key(account_id);
    txn.delete_cf(CF_ACCOUNTS, &key)?;
    txn.delete_cf(CF_HEADS, &key)?;

    let prefix = crate::hash::account_prefix(account_id);
    let (start, end) = keys::prefix_range(prefix, 32);
    for (row_key, _) in txn.range_cf(CF_BALANCES, &start, &end)? {
        txn.delete_cf(CF_BALANCES, &row_key)?;
    }

    txn.put_cf(CF_ACCOUNT_IDS_TO_CLEANUP, &key, &[])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::WalletDb;
    use crate::types::{DecryptedOutput, MintDescriptor, TransactionDescriptor};

    fn test_account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            name: id.to_string(),
            version: 1,
            spending_key: Some(vec![1, 2, 3]),
            view_key: vec![4, 5, 6],
            incoming_view_key: vec![7, 8, 9],
            outgoing_view_key: vec![10, 11, 12],
            public_address: vec![0xAA; 32],
            proof_authorizing_key: None,
            created_at: None,
            scanning_enabled: true,
            multisig_keys: None,
        }
    }

    fn header(hash: u8, parent: u8, sequence: u32) -> BlockHeader {
        BlockHeader {
            hash: [hash; 32],
            parent_hash: [parent; 32],
            sequence,
            timestamp: 1_700_000_000_000 + u64::from(sequence),
        }
    }

    fn miners_fee_output(value: u64, index: u64) -> DecryptedOutput {
        DecryptedOutput {
            note_hash: [value as u8; 32],
            native_note: vec![value as u8; 8],
            asset_id: [0u8; 32],
            value,
            index: Some(index),
            nullifier: Some([value as u8 + 1; 32]),
            for_spender: false,
        }
    }

    fn tx_descriptor(hash: u8, spends: Vec<Nullifier>, is_miners_fee: bool) -> crate::types::TransactionDescriptor {
        TransactionDescriptor {
            hash: [hash; 32],
            transaction: vec![hash; 16],
            expiration: keys::NEVER_EXPIRES,
            is_miners_fee,
            spent_nullifiers: spends,
            mints: vec![],
            burns: vec![],
            output_notes: vec![],
        }
    }

    #[test]
    fn connect_then_disconnect_restores_balance() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let account = test_account("alice");

        let h1 = header(1, 0, 1);
        let descriptor = tx_descriptor(1, vec![], true);
        let output = miners_fee_output(2_000_000_000, 0);
        let block_tx = BlockTransaction {
            descriptor: descriptor.clone(),
            initial_note_index: Some(0),
        };

        let txn = db.transaction();
        let deltas =
            connect_transaction(&txn, &account, &h1, &block_tx, std::slice::from_ref(&output))
                .unwrap();
        update_unconfirmed_balances(&txn, &account, &deltas, h1.hash, h1.sequence).unwrap();
        txn.commit().unwrap();

        let txn = db.transaction();
        let balance = balance::read_balance_row(&txn, &account, [0u8; 32]).unwrap();
        assert_eq!(balance.unconfirmed, 2_000_000_000);

        let deltas = disconnect_transaction(
            &txn,
            &account,
            &h1,
            &block_tx,
            std::slice::from_ref(&output),
        )
        .unwrap();
        // reverse the aggregate application too, mirroring the indexer
        let mut reverse = BTreeMap::new();
        for (asset, delta) in deltas {
            *reverse.entry(asset).or_insert(0i64) += delta;
        }
        let mut row = balance::read_balance_row(&txn, &account, [0u8; 32]).unwrap();
        for (asset, delta) in &reverse {
            let _ = asset;
            row.unconfirmed += i128::from(*delta);
        }
        balance::write_balance_row(&txn, &account, [0u8; 32], &row).unwrap();
        txn.commit().unwrap();

        let txn = db.transaction();
        let balance = balance::read_balance_row(&txn, &account, [0u8; 32]).unwrap();
        assert_eq!(balance.unconfirmed, 0, "disconnect must restore pre-connect balance");
    }

    #[test]
    fn add_pending_transaction_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let account = test_account("alice");
        let descriptor = tx_descriptor(9, vec![], false);
        let output = DecryptedOutput {
            note_hash: [42u8; 32],
            native_note: vec![42u8; 8],
            asset_id: [0u8; 32],
            value: 5,
            index: None,
            nullifier: None,
            for_spender: false,
        };

        let txn = db.transaction();
        add_pending_transaction(&txn, &account, &descriptor, &[output.clone()], 1).unwrap();
        add_pending_transaction(&txn, &account, &descriptor, &[output.clone()], 1).unwrap();
        txn.commit().unwrap();

        let txn = db.transaction();
        let pending = pending_transaction_hashes(&txn, &account).unwrap();
        assert_eq!(pending.len(), 1, "calling add_pending_transaction twice must not duplicate state");
    }

    #[test]
    fn expire_transaction_removes_output_notes() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let account = test_account("alice");
        let descriptor = tx_descriptor(3, vec![], false);
        let output = DecryptedOutput {
            note_hash: [7u8; 32],
            native_note: vec![7u8; 8],
            asset_id: [0u8; 32],
            value: 3,
            index: None,
            nullifier: None,
            for_spender: false,
        };

        let txn = db.transaction();
        add_pending_transaction(&txn, &account, &descriptor, &[output.clone()], 1).unwrap();
        txn.commit().unwrap();

        let txn = db.transaction();
        expire_transaction(&txn, &account, descriptor.hash).unwrap();
        txn.commit().unwrap();

        let txn = db.transaction();
        let note_key = keys::prefix_note_key(account.prefix(), output.note_hash);
        assert!(txn.get_cf(CF_DECRYPTED_NOTES, &note_key).unwrap().is_none());
        let pending = pending_transaction_hashes(&txn, &account).unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn mint_descriptor_round_trips_through_asset_table() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let account = test_account("alice");
        let mint = MintDescriptor {
            asset_id: [3u8; 32],
            value: 100,
            asset_name: b"testcoin".to_vec(),
            metadata: vec![],
            nonce: 0,
            creator: account.public_address.clone(),
            owner: account.public_address.clone(),
        };
        let h1 = header(1, 0, 1);

        let txn = db.transaction();
        assert!(mint::apply_mint(&txn, &account, &mint, &h1, [9u8; 32]).unwrap());
        txn.commit().unwrap();

        let txn = db.transaction();
        let key = keys::prefix_asset_key(account.prefix(), mint.asset_id);
        let bytes = txn.get_cf(crate::store::CF_ASSETS, &key).unwrap().unwrap();
        let record: AssetRecord = values::decode(&bytes).unwrap();
        assert_eq!(record.supply, Some(100));
    }

    use proptest::collection::vec as pvec;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Invariant 3: connecting a run of miner's-fee blocks with arbitrary
        /// values brings the unconfirmed balance to exactly their sum, no
        /// matter how the run is split into blocks.
        #[test]
        fn connecting_miners_fee_blocks_sums_to_the_unconfirmed_balance(
            values in pvec(1u64..1_000_000, 0..8),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let db = WalletDb::open(dir.path()).unwrap();
            let account = test_account("alice");

            let mut expected: i128 = 0;
            for (i, value) in values.iter().enumerate() {
                let sequence = (i + 1) as u32;
                let h = header(sequence as u8, sequence.saturating_sub(1) as u8, sequence);
                let descriptor = tx_descriptor(sequence as u8, vec![], true);
                let output = miners_fee_output(*value, i as u64);
                let block_tx = BlockTransaction { descriptor, initial_note_index: Some(i as u64) };

                let txn = db.transaction();
                let deltas =
                    connect_transaction(&txn, &account, &h, &block_tx, std::slice::from_ref(&output)).unwrap();
                update_unconfirmed_balances(&txn, &account, &deltas, h.hash, h.sequence).unwrap();
                set_head(&txn, &account, Some(HeadLocator { hash: h.hash, sequence: h.sequence })).unwrap();
                txn.commit().unwrap();

                expected += *value as i128;
            }

            let txn = db.transaction();
            let row = balance::read_balance_row(&txn, &account, [0u8; 32]).unwrap();
            prop_assert_eq!(row.unconfirmed, expected);
        }

        /// Invariant 4: disconnecting the same run of blocks in reverse order
        /// restores the unconfirmed balance to zero and clears the head,
        /// regardless of the values or run length.
        #[test]
        fn disconnecting_every_block_in_reverse_restores_a_zero_balance(
            values in pvec(1u64..1_000_000, 1..8),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let db = WalletDb::open(dir.path()).unwrap();
            let account = test_account("alice");

            let mut blocks = Vec::new();
            for (i, value) in values.iter().enumerate() {
                let sequence = (i + 1) as u32;
                let h = header(sequence as u8, sequence.saturating_sub(1) as u8, sequence);
                let descriptor = tx_descriptor(sequence as u8, vec![], true);
                let output = miners_fee_output(*value, i as u64);
                let block_tx = BlockTransaction { descriptor, initial_note_index: Some(i as u64) };

                let txn = db.transaction();
                let deltas =
                    connect_transaction(&txn, &account, &h, &block_tx, std::slice::from_ref(&output)).unwrap();
                update_unconfirmed_balances(&txn, &account, &deltas, h.hash, h.sequence).unwrap();
                set_head(&txn, &account, Some(HeadLocator { hash: h.hash, sequence: h.sequence })).unwrap();
                txn.commit().unwrap();

                blocks.push((h, block_tx, output));
            }

            for (h, block_tx, output) in blocks.into_iter().rev() {
                let txn = db.transaction();
                let deltas =
                    disconnect_transaction(&txn, &account, &h, &block_tx, std::slice::from_ref(&output)).unwrap();
                update_unconfirmed_balances(
                    &txn,
                    &account,
                    &deltas,
                    h.parent_hash,
                    h.sequence.saturating_sub(1),
                )
                .unwrap();
                set_head(
                    &txn,
                    &account,
                    if h.sequence <= 1 { None } else { Some(HeadLocator { hash: h.parent_hash, sequence: h.sequence - 1 }) },
                )
                .unwrap();
                txn.commit().unwrap();
            }

            let txn = db.transaction();
            let row = balance::read_balance_row(&txn, &account, [0u8; 32]).unwrap();
            prop_assert_eq!(row.unconfirmed, 0);
            prop_assert!(get_head(&txn, &account).unwrap().is_none());
        }
    }
}
