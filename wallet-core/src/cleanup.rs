//! Background cleanup, spec §4.1/§4.5: a removed account's per-prefix rows
//! outlive the account record itself as a queue of work
//! (`account_ids_to_cleanup`) the scheduler drains a little at a time rather
//! than deleting synchronously on `removeAccount`, so removing an account
//! with millions of notes doesn't stall the caller.
//!
//! Grounded on the same bounded-work-per-tick shape as the source project's
//! network-graph pruning in `lexe-ln/src/background_processor.rs`, except
//! here the bound is a row count rather than a timer period, since one
//! tombstone's backlog varies wildly in size.

use crate::errors::WalletError;
use crate::store::{
    keys, Txn, WalletDb, CF_ACCOUNT_IDS_TO_CLEANUP, CF_ASSETS, CF_DECRYPTED_NOTES,
    CF_NON_CHAIN_NOTE_HASHES, CF_NULLIFIER_TO_NOTE_HASH, CF_NULLIFIER_TO_TRANSACTION_HASH,
    CF_PENDING_TRANSACTION_HASHES, CF_SEQUENCE_TO_NOTE_HASH, CF_SEQUENCE_TO_TRANSACTION_HASH,
    CF_TIMESTAMP_TO_TRANSACTION_HASH, CF_TRANSACTIONS, CF_UNSPENT_NOTE_HASHES_BY_VALUE,
};

/// Every column family a tombstoned account prefix can still have rows in,
/// paired with that store's key suffix length (the key minus the 4-byte
/// prefix), matching [`keys`]'s per-store key layout exactly.
const CLEANUP_TARGETS: &[(&str, usize)] = &[
    (CF_DECRYPTED_NOTES, 32),
    (CF_NON_CHAIN_NOTE_HASHES, 32),
    (CF_NULLIFIER_TO_NOTE_HASH, 32),
    (CF_NULLIFIER_TO_TRANSACTION_HASH, 32),
    (CF_SEQUENCE_TO_NOTE_HASH, 36),
    (CF_SEQUENCE_TO_TRANSACTION_HASH, 36),
    (CF_TRANSACTIONS, 32),
    (CF_PENDING_TRANSACTION_HASHES, 36),
    (CF_TIMESTAMP_TO_TRANSACTION_HASH, 8),
    (CF_UNSPENT_NOTE_HASHES_BY_VALUE, 72),
    (CF_ASSETS, 32),
];

/// Drains up to `budget` rows belonging to the single oldest tombstoned
/// account, removing the tombstone itself once every target store is
/// confirmed empty for that prefix. Returns the number of rows deleted.
///
/// Only ever works on one account at a time: `account_ids_to_cleanup` is
/// keyed by bare account id, so [`Txn::first_cf`] always returns the same
/// entry until it's fully drained, which is what keeps a single call's work
/// bounded regardless of how many accounts are queued.
pub fn tick(db: &WalletDb, budget: usize) -> Result<usize, WalletError> {
    let txn = db.transaction();
    let Some((account_key, _)) = txn.first_cf(CF_ACCOUNT_IDS_TO_CLEANUP)? else {
        return Ok(0);
    };
    let account_id = std::str::from_utf8(&account_key)
        .map_err(|_| WalletError::DbCorruption("non-utf8 account id in cleanup queue".into()))?;
    let prefix = crate::hash::account_prefix(account_id);

    let deleted = drain_targets(&txn, prefix, budget)?;

    if deleted < budget && targets_are_empty(&txn, prefix)? {
        txn.delete_cf(CF_ACCOUNT_IDS_TO_CLEANUP, &account_key)?;
    }

    txn.commit()?;
    Ok(deleted)
}

fn drain_targets(txn: &Txn, prefix: keys::Prefix, budget: usize) -> Result<usize, WalletError> {
    let mut deleted = 0usize;
    for (cf_name, suffix_len) in CLEANUP_TARGETS {
        if deleted >= budget {
            break;
        }
        let (start, end) = keys::prefix_range(prefix, *suffix_len);
        let rows = txn.range_cf_limited(cf_name, &start, &end, budget - deleted)?;
        for (key, _) in &rows {
            txn.delete_cf(cf_name, key)?;
        }
        deleted += rows.len();
    }
    Ok(deleted)
}

fn targets_are_empty(txn: &Txn, prefix: keys::Prefix) -> Result<bool, WalletError> {
    for (cf_name, suffix_len) in CLEANUP_TARGETS {
        let (start, end) = keys::prefix_range(prefix, *suffix_len);
        if !txn.range_cf_limited(cf_name, &start, &end, 1)?.is_empty() {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::account::{self, Account};

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

    #[test]
    fn tick_drains_tombstoned_account_and_clears_queue() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let account = test_account("alice");
        let prefix = account.prefix();

        let txn = db.transaction();
        account::put_account(&txn, &account::AccountValue::Decrypted(account.clone())).unwrap();
        let note = account::DecryptedNote {
            account_id: account.id.clone(),
            serialized_note: vec![1, 2, 3],
            spent: false,
            transaction_hash: [1; 32],
            index: None,
            nullifier: None,
            block_hash: None,
            sequence: None,
            asset_id: [0u8; 32],
            value: 5,
        };
        txn.put_cf(
            crate::store::CF_DECRYPTED_NOTES,
            &keys::prefix_note_key(prefix, [9u8; 32]),
            &crate::store::values::encode(&note).unwrap(),
        )
        .unwrap();
        txn.commit().unwrap();

        let txn = db.transaction();
        account::remove_account(&txn, &account.id).unwrap();
        txn.commit().unwrap();

        let deleted = tick(&db, 100).unwrap();
        assert_eq!(deleted, 1);

        let txn = db.transaction();
        assert!(txn
            .get_cf(CF_ACCOUNT_IDS_TO_CLEANUP, account.id.as_bytes())
            .unwrap()
            .is_none());
    }

    #[test]
    fn tick_respects_budget_across_multiple_calls() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let account = test_account("bob");
        let prefix = account.prefix();

        let txn = db.transaction();
        for i in 0..5u8 {
            let note = account::DecryptedNote {
                account_id: account.id.clone(),
                serialized_note: vec![i],
                spent: false,
                transaction_hash: [i; 32],
                index: None,
                nullifier: None,
                block_hash: None,
                sequence: None,
                asset_id: [0u8; 32],
                value: 1,
            };
            txn.put_cf(
                crate::store::CF_DECRYPTED_NOTES,
                &keys::prefix_note_key(prefix, [i; 32]),
                &crate::store::values::encode(&note).unwrap(),
            )
            .unwrap();
        }
        txn.commit().unwrap();

        let txn = db.transaction();
        account::remove_account(&txn, &account.id).unwrap();
        txn.commit().unwrap();

        let first = tick(&db, 2).unwrap();
        assert_eq!(first, 2, "first tick must stop at the budget");
        assert!(txn_has_tombstone(&db, &account.id));

        let second = tick(&db, 2).unwrap();
        assert_eq!(second, 2);
        assert!(txn_has_tombstone(&db, &account.id));

        let third = tick(&db, 100).unwrap();
        assert_eq!(third, 1, "last tick drains the remainder and clears the tombstone");
        assert!(!txn_has_tombstone(&db, &account.id));
    }

    fn txn_has_tombstone(db: &WalletDb, account_id: &str) -> bool {
        let txn = db.transaction();
        txn.get_cf(CF_ACCOUNT_IDS_TO_CLEANUP, account_id.as_bytes())
            .unwrap()
            .is_some()
    }
}
