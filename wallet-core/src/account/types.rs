//! Entities from spec §3: [`Account`], [`DecryptedNote`], [`TransactionRecord`],
//! [`Balance`], [`AssetRecord`] — plus the tagged envelope [`AccountValue`]
//! and the FROST-style [`MultisigKeys`] sum type from spec §9's "dynamic
//! dispatch -> tagged variants" design note.

use serde::{Deserialize, Serialize};
use wallet_common::time::TimestampMillis;

use crate::hash::account_prefix;
use crate::store::keys::Prefix;
use crate::types::{AssetId, BlockHash, HeadLocator, NoteHash, Nullifier, TxHash};

/// A single participant's FROST key material, or the subset of it a
/// coordinator/hardware signer/trusted-dealer-import role carries. Exactly
/// one variant is ever stored per account; encoders branch on the tag
/// instead of modeling this as an inheritance hierarchy.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MultisigKeys {
    /// A full participant: secret share, optional key package, and the
    /// group's public key package.
    Signer {
        secret: Vec<u8>,
        key_package: Option<Vec<u8>>,
        public_key_package: Vec<u8>,
    },
    /// A coordinator that only ever sees the group's public key package.
    Coordinator { public_key_package: Vec<u8> },
    /// A participant whose secret share lives on a hardware signer; the
    /// wallet only holds its identity and the group's public key package.
    HardwareSigner {
        identity: Vec<u8>,
        public_key_package: Vec<u8>,
    },
    /// A key package imported from a trusted dealer, alongside the
    /// participant identity it was assigned.
    TrustedDealerImport {
        identity: Vec<u8>,
        key_package: Vec<u8>,
        public_key_package: Vec<u8>,
    },
}

/// Decrypted account state: everything in spec §3's Account entity.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub version: u32,
    /// Absent for a view-only account.
    pub spending_key: Option<Vec<u8>>,
    pub view_key: Vec<u8>,
    pub incoming_view_key: Vec<u8>,
    pub outgoing_view_key: Vec<u8>,
    pub public_address: Vec<u8>,
    pub proof_authorizing_key: Option<Vec<u8>>,
    /// The block the account was created at, i.e. the earliest block its
    /// scan needs to consider. `None` means "scan from genesis."
    pub created_at: Option<HeadLocator>,
    pub scanning_enabled: bool,
    pub multisig_keys: Option<MultisigKeys>,
}

impl Account {
    /// `prefix = first-4-bytes-big-endian(MurmurHash3_32(id, seed=1))`,
    /// spec §3's invariant. Collision-tolerant: the full id is also keyed in
    /// `accounts`, so a prefix collision only widens a shared range scan,
    /// never merges two accounts' data.
    pub fn prefix(&self) -> Prefix {
        account_prefix(&self.id)
    }
}

/// What's actually stored under an account id in the `accounts` column
/// family: either the plaintext [`Account`], or — when a wallet master key
/// is configured — an encryption envelope sealing it (spec §4.1).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AccountValue {
    Decrypted(Account),
    Encrypted {
        salt: Vec<u8>,
        nonce: Vec<u8>,
        ciphertext: Vec<u8>,
    },
}

/// A note belonging to an account, as persisted in `decrypted_notes`.
///
/// `index`, `nullifier`, `block_hash`, and `sequence` are populated only
/// while the containing transaction is on the main chain (spec §3's
/// invariant: "if `nullifier` is set, then the reverse map ... contains this
/// hash; if `sequence` is set, then (sequence, hash) is a member of the
/// sequence-to-hash index").
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DecryptedNote {
    pub account_id: String,
    /// Serialized native note bytes. The wallet doesn't parse these beyond
    /// what the worker pool reported back as `asset_id`/`value`.
    pub serialized_note: Vec<u8>,
    pub spent: bool,
    pub transaction_hash: TxHash,
    pub index: Option<u64>,
    pub nullifier: Option<Nullifier>,
    pub block_hash: Option<BlockHash>,
    pub sequence: Option<u32>,
    /// Not part of the native note bytes, but needed on essentially every
    /// read path (balance math, note selection); decrypted once by the
    /// worker pool and carried alongside the note rather than re-derived.
    pub asset_id: AssetId,
    pub value: u64,
}

impl DecryptedNote {
    pub fn is_on_chain(&self) -> bool {
        self.sequence.is_some()
    }

    pub fn note_hash(&self) -> NoteHash {
        crate::hash::note_hash(&self.serialized_note)
    }
}

/// A transaction record as persisted in `transactions`, spec §3.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction: Vec<u8>,
    pub timestamp: TimestampMillis,
    pub block_hash: Option<BlockHash>,
    pub sequence: Option<u32>,
    /// Sequence at which this node first learned of the transaction,
    /// regardless of on-chain status; used to throttle rebroadcast.
    pub submitted_sequence: u32,
    /// [`crate::store::keys::NEVER_EXPIRES`] if the transaction never
    /// expires. Carried here (not just derived from the pending-index key)
    /// so connect/disconnect can find and remove the right
    /// `pending_transaction_hashes` entry without needing it passed in.
    pub expiration: u32,
    /// Net change to this account's balance per asset, caused by this
    /// transaction.
    pub asset_balance_deltas: std::collections::BTreeMap<AssetId, i64>,
    /// Value, per asset, of this account's own notes this transaction
    /// spends — populated while pending (its spends aren't enacted against
    /// `decrypted_notes` until connect) and used by the `available` balance
    /// derivation to exclude notes about to be spent. Empty once on-chain,
    /// since spent notes are by then excluded from `available` directly.
    pub pending_spent: std::collections::BTreeMap<AssetId, u64>,
}

/// Per-asset running balance, spec §3. `unconfirmed` is the authoritative
/// running total; `confirmed`/`pending`/`available` are all derived at read
/// time (see [`crate::account::balance`]).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub unconfirmed: i128,
    pub block_hash: Option<BlockHash>,
    pub sequence: Option<u32>,
}

impl Default for Balance {
    fn default() -> Self {
        Self {
            unconfirmed: 0,
            block_hash: None,
            sequence: None,
        }
    }
}

/// The position a mint/burn was first confirmed at, preserved across later
/// mints of the same asset (spec §4.2.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AssetCreatedAt {
    pub block_hash: BlockHash,
    pub sequence: u32,
    pub created_transaction_hash: TxHash,
}

/// Per-account, per-asset metadata, spec §3. `supply` is non-null only when
/// this account is the asset's owner.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    pub metadata: Vec<u8>,
    pub name: Vec<u8>,
    pub nonce: u8,
    pub creator: Vec<u8>,
    pub owner: Vec<u8>,
    pub created_at: Option<AssetCreatedAt>,
    pub supply: Option<i128>,
}

/// A read-only projection of [`Account`] for listing callers, who have no
/// business seeing key material.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountSummary {
    pub id: String,
    pub name: String,
    pub public_address: Vec<u8>,
    pub view_only: bool,
    pub scanning_enabled: bool,
    pub head: Option<HeadLocator>,
}

/// A read-only projection of [`DecryptedNote`] for `notesBySequenceRange`
/// style callers, per spec §1's query surface.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NoteSummary {
    pub note_hash: NoteHash,
    pub asset_id: AssetId,
    pub value: u64,
    pub spent: bool,
    pub transaction_hash: TxHash,
    pub sequence: Option<u32>,
}
