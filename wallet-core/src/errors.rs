//! The error kinds a caller must be able to match on.
//!
//! Ad hoc plumbing (store I/O, chain/worker calls) uses [`anyhow::Result`]
//! with [`anyhow::Context`] instead; this enum is reserved for the error
//! kinds callers branch on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("not enough funds for asset {asset_id}: have {have}, need {need}")]
    NotEnoughFunds {
        asset_id: [u8; 32],
        have: u64,
        need: u64,
    },

    #[error("account has not finished scanning to the chain head")]
    AccountNotScanned,

    #[error("invalid expiration sequence")]
    InvalidExpiration,

    #[error("burn would drive asset supply negative")]
    InvalidBurn,

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("account decryption failed: wrong passphrase or corrupted envelope")]
    AccountDecryptionFailed,

    #[error("duplicate account: {0}")]
    DuplicateAccount(String),

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("unknown asset: {0:x?}")]
    UnknownAsset([u8; 32]),

    #[error("no genesis block")]
    NoGenesis,

    #[error("db corruption: {0}")]
    DbCorruption(String),

    #[error("operation aborted")]
    Aborted,
}

impl WalletError {
    /// Whether this error is fatal to the scheduler loop (vs. one that
    /// should quarantine a single account and let the loop continue).
    pub fn is_corruption(&self) -> bool {
        matches!(self, WalletError::DbCorruption(_))
    }

    /// `Aborted` is the expected result of cooperative cancellation and
    /// must never be logged at `error!`/`warn!` level.
    pub fn is_aborted(&self) -> bool {
        matches!(self, WalletError::Aborted)
    }
}

impl From<rocksdb::Error> for WalletError {
    fn from(e: rocksdb::Error) -> Self {
        WalletError::DbCorruption(e.to_string())
    }
}
