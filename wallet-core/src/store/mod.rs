//! `WalletDB`: the embedded ordered KV store, partitioned into one column
//! family per store in spec §4.1's table.
//!
//! Every store name in that table becomes a `rocksdb` column family verbatim;
//! [`keys`] owns the composite-key byte layout for each. All multi-store
//! writes go through [`WalletDb::transaction`], a thin wrapper around
//! `rocksdb::Transaction` so a suspension between two store writes (a `.await`
//! on a slow disk, say) can never leave an inconsistent partial update
//! visible to another reader.

pub mod keys;
pub mod values;

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    ColumnFamilyDescriptor, IteratorMode, Options, ReadOptions, Transaction,
    TransactionDB, TransactionDBOptions,
};

use crate::errors::WalletError;

/// Schema version written to `meta`. Bumping this is a breaking change; an
/// unrecognized version on open is a fatal startup error (spec §6).
pub const SCHEMA_VERSION: u32 = 1;

pub const CF_META: &str = "meta";
pub const CF_ACCOUNTS: &str = "accounts";
pub const CF_HEADS: &str = "heads";
pub const CF_BALANCES: &str = "balances";
pub const CF_DECRYPTED_NOTES: &str = "decrypted_notes";
pub const CF_NULLIFIER_TO_NOTE_HASH: &str = "nullifier_to_note_hash";
pub const CF_SEQUENCE_TO_NOTE_HASH: &str = "sequence_to_note_hash";
pub const CF_NON_CHAIN_NOTE_HASHES: &str = "non_chain_note_hashes";
pub const CF_TRANSACTIONS: &str = "transactions";
pub const CF_SEQUENCE_TO_TRANSACTION_HASH: &str = "sequence_to_transaction_hash";
pub const CF_PENDING_TRANSACTION_HASHES: &str = "pending_transaction_hashes";
pub const CF_TIMESTAMP_TO_TRANSACTION_HASH: &str = "timestamp_to_transaction_hash";
pub const CF_ASSETS: &str = "assets";
pub const CF_UNSPENT_NOTE_HASHES_BY_VALUE: &str = "unspent_note_hashes_by_value";
pub const CF_NULLIFIER_TO_TRANSACTION_HASH: &str = "nullifier_to_transaction_hash";
pub const CF_ACCOUNT_IDS_TO_CLEANUP: &str = "account_ids_to_cleanup";

/// All column families, in the order spec §4.1's table lists them.
const ALL_CFS: &[&str] = &[
    CF_META,
    CF_ACCOUNTS,
    CF_HEADS,
    CF_BALANCES,
    CF_DECRYPTED_NOTES,
    CF_NULLIFIER_TO_NOTE_HASH,
    CF_SEQUENCE_TO_NOTE_HASH,
    CF_NON_CHAIN_NOTE_HASHES,
    CF_TRANSACTIONS,
    CF_SEQUENCE_TO_TRANSACTION_HASH,
    CF_PENDING_TRANSACTION_HASHES,
    CF_TIMESTAMP_TO_TRANSACTION_HASH,
    CF_ASSETS,
    CF_UNSPENT_NOTE_HASHES_BY_VALUE,
    CF_NULLIFIER_TO_TRANSACTION_HASH,
    CF_ACCOUNT_IDS_TO_CLEANUP,
];

const META_KEY_SCHEMA_VERSION: &[u8] = b"schema_version";
const META_KEY_DEFAULT_ACCOUNT: &[u8] = b"default_account_id";

/// The embedded ordered KV store backing a single wallet.
///
/// Readers that don't need cross-store consistency can call the `*_cf`
/// helpers directly; anything that mutates more than one column family MUST
/// go through [`WalletDb::transaction`] and commit once, per spec §4.1's
/// "every write that mutates more than one store" contract.
#[derive(Clone)]
pub struct WalletDb {
    db: Arc<TransactionDB>,
}

impl WalletDb {
    /// Opens (creating if absent) the wallet database at `path`, bootstraps
    /// any column family missing from [`ALL_CFS`], and checks the schema
    /// version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let existing_cfs =
            TransactionDB::list_cf(&db_opts, &path).unwrap_or_default();
        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();
        // Column families created by an older build that this build no
        // longer names are still opened (not dropped) so open never loses
        // data silently; they just go unused.
        let mut all_descriptors = cf_descriptors;
        for existing in &existing_cfs {
            if !ALL_CFS.contains(&existing.as_str()) {
                all_descriptors
                    .push(ColumnFamilyDescriptor::new(existing, Options::default()));
            }
        }

        let txn_db_opts = TransactionDBOptions::default();
        let db = TransactionDB::open_cf_descriptors(
            &db_opts,
            &txn_db_opts,
            &path,
            all_descriptors,
        )
        .map_err(|e| WalletError::DbCorruption(e.to_string()))?;

        let wallet_db = Self { db: Arc::new(db) };
        wallet_db.check_or_initialize_schema_version()?;
        Ok(wallet_db)
    }

    fn check_or_initialize_schema_version(&self) -> Result<(), WalletError> {
        let txn = self.transaction();
        match txn.get_cf(CF_META, META_KEY_SCHEMA_VERSION)? {
            None => {
                txn.put_cf(
                    CF_META,
                    META_KEY_SCHEMA_VERSION,
                    &SCHEMA_VERSION.to_be_bytes(),
                )?;
                txn.commit()
            }
            Some(bytes) => {
                let version = u32::from_be_bytes(
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| WalletError::DbCorruption(
                            "schema_version row is malformed".into(),
                        ))?,
                );
                if version != SCHEMA_VERSION {
                    return Err(WalletError::DbCorruption(format!(
                        "unrecognized schema version {version}, expected {SCHEMA_VERSION}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Opens a new atomic transaction. Callers build up every row mutation
    /// on it, then call [`Txn::commit`] exactly once.
    pub fn transaction(&self) -> Txn<'_> {
        Txn {
            db: &self.db,
            inner: self.db.transaction(),
        }
    }

    pub fn default_account_id(&self) -> Result<Option<String>, WalletError> {
        let txn = self.transaction();
        let bytes = txn.get_cf(CF_META, META_KEY_DEFAULT_ACCOUNT)?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    pub fn set_default_account_id(
        &self,
        id: Option<&str>,
    ) -> Result<(), WalletError> {
        let txn = self.transaction();
        match id {
            Some(id) => txn.put_cf(CF_META, META_KEY_DEFAULT_ACCOUNT, id.as_bytes())?,
            None => txn.delete_cf(CF_META, META_KEY_DEFAULT_ACCOUNT)?,
        }
        txn.commit()
    }
}

/// A handle to one in-flight `rocksdb` transaction, scoped to a single
/// logical operation (one `connectTransaction`, one `createTransaction`
/// fund, ...). Dropping it without calling [`commit`](Txn::commit) discards
/// every write made through it, which is what a suspended/aborted operation
/// relies on for atomicity.
pub struct Txn<'a> {
    db: &'a TransactionDB,
    inner: Transaction<'a, TransactionDB>,
}

impl<'a> Txn<'a> {
    pub fn commit(self) -> Result<(), WalletError> {
        self.inner
            .commit()
            .map_err(|e| WalletError::DbCorruption(e.to_string()))
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, WalletError> {
        self.db.cf_handle(name).ok_or_else(|| {
            WalletError::DbCorruption(format!("missing column family {name}"))
        })
    }

    pub fn get_cf(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, WalletError> {
        let cf = self.cf(cf_name)?;
        self.inner
            .get_cf(cf, key)
            .map_err(|e| WalletError::DbCorruption(e.to_string()))
    }

    pub fn put_cf(
        &self,
        cf_name: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), WalletError> {
        let cf = self.cf(cf_name)?;
        self.inner
            .put_cf(cf, key, value)
            .map_err(|e| WalletError::DbCorruption(e.to_string()))
    }

    pub fn delete_cf(&self, cf_name: &str, key: &[u8]) -> Result<(), WalletError> {
        let cf = self.cf(cf_name)?;
        self.inner
            .delete_cf(cf, key)
            .map_err(|e| WalletError::DbCorruption(e.to_string()))
    }

    pub fn exists_cf(&self, cf_name: &str, key: &[u8]) -> Result<bool, WalletError> {
        Ok(self.get_cf(cf_name, key)?.is_some())
    }

    /// Iterates every `(key, value)` pair with `key` in `[start, end]`
    /// inclusive, in ascending order. The caller is responsible for checking
    /// an abort signal between items on long scans (spec §9, "generators ...
    /// long scans MUST check the abort signal between items").
    pub fn range_cf(
        &self,
        cf_name: &str,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, WalletError> {
        let cf = self.cf(cf_name)?;
        let mut opts = ReadOptions::default();
        opts.set_iterate_upper_bound(upper_bound_exclusive(end));
        let iter = self
            .inner
            .iterator_cf_opt(cf, opts, IteratorMode::From(start, rocksdb::Direction::Forward));
        let mut out = Vec::new();
        for item in iter {
            let (k, v) = item.map_err(|e| WalletError::DbCorruption(e.to_string()))?;
            if k.as_ref() < start {
                continue;
            }
            out.push((k, v));
        }
        Ok(out)
    }

    /// Like [`range_cf`](Self::range_cf) but stops after `limit` entries,
    /// used by the bounded per-tick cleanup scan.
    pub fn range_cf_limited(
        &self,
        cf_name: &str,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, WalletError> {
        let mut all = self.range_cf(cf_name, start, end)?;
        all.truncate(limit);
        Ok(all)
    }

    /// Every `(key, value)` pair in `cf_name`, in key order. Used at startup
    /// to enumerate `accounts`, whose keys (bare account ids) have no fixed
    /// length and so can't be bounded with [`range_cf`](Self::range_cf).
    pub fn scan_cf(&self, cf_name: &str) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, WalletError> {
        let cf = self.cf(cf_name)?;
        let iter = self.inner.iterator_cf(cf, IteratorMode::Start);
        let mut out = Vec::new();
        for item in iter {
            let (k, v) = item.map_err(|e| WalletError::DbCorruption(e.to_string()))?;
            out.push((k, v));
        }
        Ok(out)
    }

    /// The first `(key, value)` pair in `cf_name` in key order, regardless of
    /// key shape. Used by the background cleanup task to pick one tombstoned
    /// account id at a time out of `account_ids_to_cleanup`.
    pub fn first_cf(
        &self,
        cf_name: &str,
    ) -> Result<Option<(Box<[u8]>, Box<[u8]>)>, WalletError> {
        let cf = self.cf(cf_name)?;
        let mut iter = self.inner.iterator_cf(cf, IteratorMode::Start);
        match iter.next() {
            Some(item) => {
                let (k, v) = item.map_err(|e| WalletError::DbCorruption(e.to_string()))?;
                Ok(Some((k, v)))
            }
            None => Ok(None),
        }
    }
}

/// `rocksdb`'s upper bound is exclusive; our ranges are inclusive, so the
/// caller's `end` gets one byte appended to push the bound just past it.
fn upper_bound_exclusive(end: &[u8]) -> Vec<u8> {
    let mut bound = end.to_vec();
    bound.push(0x00);
    bound
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn put_get_and_delete_round_trip_through_a_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();

        let txn = db.transaction();
        assert!(txn.get_cf(CF_META, b"k").unwrap().is_none());
        txn.put_cf(CF_META, b"k", b"v").unwrap();
        assert_eq!(txn.get_cf(CF_META, b"k").unwrap().unwrap(), b"v");
        txn.commit().unwrap();

        let txn = db.transaction();
        assert!(txn.exists_cf(CF_META, b"k").unwrap());
        txn.delete_cf(CF_META, b"k").unwrap();
        txn.commit().unwrap();

        let txn = db.transaction();
        assert!(!txn.exists_cf(CF_META, b"k").unwrap());
    }

    #[test]
    fn reopening_the_same_path_preserves_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = WalletDb::open(dir.path()).unwrap();
            let txn = db.transaction();
            txn.put_cf(CF_ACCOUNTS, b"alice", b"account-bytes").unwrap();
            txn.commit().unwrap();
        }
        let db = WalletDb::open(dir.path()).unwrap();
        let txn = db.transaction();
        assert_eq!(txn.get_cf(CF_ACCOUNTS, b"alice").unwrap().unwrap(), b"account-bytes");
    }

    #[test]
    fn scan_cf_returns_every_row_regardless_of_key_shape() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let txn = db.transaction();
        txn.put_cf(CF_ACCOUNTS, b"alice", b"a").unwrap();
        txn.put_cf(CF_ACCOUNTS, b"bob-has-a-longer-id", b"b").unwrap();
        txn.commit().unwrap();

        let txn = db.transaction();
        let mut rows = txn.scan_cf(CF_ACCOUNTS).unwrap();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(rows.len(), 2);
        assert_eq!(&*rows[0].0, b"alice");
        assert_eq!(&*rows[1].0, b"bob-has-a-longer-id");
    }

    #[test]
    fn scan_cf_on_an_empty_column_family_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let txn = db.transaction();
        assert!(txn.scan_cf(CF_ACCOUNTS).unwrap().is_empty());
    }

    #[test]
    fn range_cf_is_inclusive_of_both_endpoints_and_excludes_outside_keys() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let txn = db.transaction();
        for seq in [1u32, 2, 3, 4] {
            txn.put_cf(CF_HEADS, &seq.to_be_bytes(), &seq.to_be_bytes()).unwrap();
        }
        txn.commit().unwrap();

        let txn = db.transaction();
        let rows = txn.range_cf(CF_HEADS, &2u32.to_be_bytes(), &3u32.to_be_bytes()).unwrap();
        let values: Vec<u32> = rows.iter().map(|(k, _)| u32::from_be_bytes(k[..4].try_into().unwrap())).collect();
        assert_eq!(values, vec![2, 3]);
    }

    #[test]
    fn range_cf_limited_truncates_without_changing_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let txn = db.transaction();
        for seq in [1u32, 2, 3, 4] {
            txn.put_cf(CF_HEADS, &seq.to_be_bytes(), &seq.to_be_bytes()).unwrap();
        }
        txn.commit().unwrap();

        let txn = db.transaction();
        let rows = txn.range_cf_limited(CF_HEADS, &1u32.to_be_bytes(), &4u32.to_be_bytes(), 2).unwrap();
        assert_eq!(rows.len(), 2);
        let values: Vec<u32> = rows.iter().map(|(k, _)| u32::from_be_bytes(k[..4].try_into().unwrap())).collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn first_cf_picks_the_lowest_key_and_none_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        let txn = db.transaction();
        assert!(txn.first_cf(CF_ACCOUNT_IDS_TO_CLEANUP).unwrap().is_none());
        txn.put_cf(CF_ACCOUNT_IDS_TO_CLEANUP, b"zeta", b"").unwrap();
        txn.put_cf(CF_ACCOUNT_IDS_TO_CLEANUP, b"alpha", b"").unwrap();
        txn.commit().unwrap();

        let txn = db.transaction();
        let (key, _) = txn.first_cf(CF_ACCOUNT_IDS_TO_CLEANUP).unwrap().unwrap();
        assert_eq!(&*key, b"alpha");
    }

    #[test]
    fn default_account_id_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(dir.path()).unwrap();
        assert!(db.default_account_id().unwrap().is_none());
        db.set_default_account_id(Some("alice")).unwrap();
        assert_eq!(db.default_account_id().unwrap().unwrap(), "alice");
        db.set_default_account_id(None).unwrap();
        assert!(db.default_account_id().unwrap().is_none());
    }

    #[test]
    fn opening_a_store_written_by_a_newer_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = WalletDb::open(dir.path()).unwrap();
            let txn = db.transaction();
            txn.put_cf(CF_META, META_KEY_SCHEMA_VERSION, &(SCHEMA_VERSION + 1).to_be_bytes()).unwrap();
            txn.commit().unwrap();
        }
        let err = WalletDb::open(dir.path()).unwrap_err();
        assert!(matches!(err, WalletError::DbCorruption(_)));
    }
}
