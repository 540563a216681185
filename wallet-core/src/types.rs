//! Primitive wire/identifier types shared across the store, account,
//! indexer, and builder modules. The chain and worker pool are external
//! collaborators (see [`crate::traits`]); these are just the shapes the
//! engine needs to talk about their data.

use serde::{Deserialize, Serialize};

pub type AssetId = [u8; 32];
/// The chain's native asset, used for the miner's fee and every
/// transaction fee. Not otherwise distinguished from a minted asset in
/// storage — it's just the all-zero id by convention.
pub const NATIVE_ASSET_ID: AssetId = [0u8; 32];
pub type NoteHash = [u8; 32];
pub type Nullifier = [u8; 32];
pub type TxHash = [u8; 32];
pub type BlockHash = [u8; 32];

/// A chain position: a block hash plus its height ("sequence" in the
/// glossary).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HeadLocator {
    pub hash: BlockHash,
    pub sequence: u32,
}

/// Enough of a block header for the indexer to walk the chain and attribute
/// deltas to a height.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub sequence: u32,
    pub timestamp: u64,
}

/// Opaque, already-serialized transaction bytes. The engine never parses
/// transaction internals itself — spends, mints, burns, and expiration are
/// reported alongside the bytes by whoever produced them (the chain, for an
/// on-chain transaction; the builder, for one this wallet just created).
pub type RawTransactionBytes = Vec<u8>;

/// Everything the account layer needs to know about a transaction's effect,
/// without parsing its opaque bytes: which nullifiers it spends, which
/// assets it mints or burns, and when it expires. Sourced from the chain for
/// on-chain transactions and from the builder for ones freshly created here.
#[derive(Clone, Debug)]
pub struct TransactionDescriptor {
    pub hash: TxHash,
    pub transaction: RawTransactionBytes,
    /// [`crate::store::keys::NEVER_EXPIRES`] if the transaction has no
    /// expiration.
    pub expiration: u32,
    /// The first transaction of a block: has outputs but no spends, and its
    /// record is dropped entirely on disconnect rather than kept as pending.
    pub is_miners_fee: bool,
    pub spent_nullifiers: Vec<Nullifier>,
    pub mints: Vec<MintDescriptor>,
    pub burns: Vec<BurnDescriptor>,
    /// Serialized ciphertext of each output note, in order. The engine still
    /// never parses these — it only hands them to the worker pool for
    /// decryption — but it does need to enumerate them to build one
    /// [`DecryptNotePayload`] per output.
    pub output_notes: Vec<Vec<u8>>,
}

/// A transaction as returned by the chain, along with the note-commitment
/// tree index its first output would occupy (only meaningful on the
/// connect path; `None` for transactions the wallet only knows as pending).
#[derive(Clone, Debug)]
pub struct BlockTransaction {
    pub descriptor: TransactionDescriptor,
    pub initial_note_index: Option<u64>,
}

/// One asset minted by a transaction, spec §4.2.1.
#[derive(Clone, Debug)]
pub struct MintDescriptor {
    pub asset_id: AssetId,
    pub value: u64,
    pub asset_name: Vec<u8>,
    pub metadata: Vec<u8>,
    pub nonce: u8,
    pub creator: Vec<u8>,
    pub owner: Vec<u8>,
}

/// One asset burned by a transaction, spec §4.2.1.
#[derive(Clone, Debug)]
pub struct BurnDescriptor {
    pub asset_id: AssetId,
    pub value: u64,
}

/// The Merkle authentication path for a note at a given tree index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Witness {
    pub root: [u8; 32],
    pub auth_path: Vec<[u8; 32]>,
    pub tree_size: u64,
}

/// One note-decryption request submitted to the worker pool.
#[derive(Clone, Debug)]
pub struct DecryptNotePayload {
    pub serialized_note: Vec<u8>,
    pub incoming_view_key: Vec<u8>,
    pub outgoing_view_key: Vec<u8>,
    pub view_key: Vec<u8>,
    /// The tree index the note would occupy, if this is an on-chain (not
    /// pending) decryption. The caller increments this as it walks a
    /// block's outputs.
    pub current_note_index: Option<u64>,
    pub decrypt_for_spender: bool,
}

/// The result of successfully decrypting one output.
#[derive(Clone, Debug)]
pub struct DecryptedOutput {
    pub note_hash: NoteHash,
    pub native_note: Vec<u8>,
    pub asset_id: AssetId,
    pub value: u64,
    pub index: Option<u64>,
    pub nullifier: Option<Nullifier>,
    /// `true` when this payload was decrypted as the spender rather than
    /// the recipient (only present when the payload requested it).
    pub for_spender: bool,
}

// --- Transaction Builder (spec §4.4) --- //

/// One note the builder has selected to spend, paired with the Merkle
/// witness the chain reports for it at the requested confirmation depth.
#[derive(Clone, Debug)]
pub struct SpendDescriptor {
    pub note_hash: NoteHash,
    pub nullifier: Nullifier,
    pub witness: Witness,
}

/// One output `createTransaction` should add to the built transaction.
#[derive(Clone, Debug)]
pub struct OutputDescriptor {
    pub public_address: Vec<u8>,
    pub asset_id: AssetId,
    pub value: u64,
    pub memo: Vec<u8>,
}

/// A request to mint an asset, spec §4.2.1. `asset_id` is `None` for a
/// brand-new asset; [`crate::builder::TransactionBuilder::create_transaction`]
/// resolves it (and `nonce`) before the transaction is built, by the same
/// content-hash scheme [`crate::hash`] uses elsewhere.
#[derive(Clone, Debug)]
pub struct MintRequest {
    pub asset_id: Option<AssetId>,
    pub nonce: u8,
    pub name: Vec<u8>,
    pub metadata: Vec<u8>,
    pub value: u64,
}

/// A request to burn an already-owned asset.
#[derive(Clone, Debug)]
pub struct BurnRequest {
    pub asset_id: AssetId,
    pub value: u64,
}

/// Everything `createTransaction` assembled, ready to be signed by the
/// worker pool. Opaque to every layer except the worker pool that proves
/// and serializes it.
#[derive(Clone, Debug)]
pub struct RawTransaction {
    pub expiration: u32,
    pub spends: Vec<SpendDescriptor>,
    pub outputs: Vec<OutputDescriptor>,
    pub mints: Vec<MintRequest>,
    pub burns: Vec<BurnRequest>,
    pub fee: u64,
}

/// What the worker pool hands back after proving and serializing a
/// [`RawTransaction`]: the signed bytes, its hash, and the ciphertext of
/// every output note (including change), in the same order `outputs` then
/// `mints` were listed in, so the builder can decrypt against its own keys
/// the same way the indexer decrypts an on-chain transaction's outputs.
#[derive(Clone, Debug)]
pub struct PostedTransaction {
    pub hash: TxHash,
    pub transaction: RawTransactionBytes,
    pub output_notes: Vec<Vec<u8>>,
}
