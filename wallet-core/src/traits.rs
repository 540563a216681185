//! External collaborators the engine is coupled to but doesn't own: the
//! chain, the cryptographic worker pool, the mempool, and the peer network.
//! Each gets a "trait alias" — a blanket impl over `Clone + Send + Sync +
//! 'static` — so generic engine code can write `C: WalletChain` instead of
//! repeating those bounds at every call site.

use async_trait::async_trait;

use crate::account::AssetRecord;
use crate::types::{
    BlockHeader, BlockTransaction, DecryptNotePayload, DecryptedOutput,
    HeadLocator, Nullifier, PostedTransaction, RawTransaction, RawTransactionBytes, Witness,
};

/// The blockchain itself: block/header/transaction retrieval, note-witness
/// generation, and nullifier-set membership. Out of scope to implement here
/// — the engine only consumes it.
#[async_trait]
pub trait Chain: Send + Sync + 'static {
    async fn head(&self) -> anyhow::Result<HeadLocator>;
    async fn has_block(&self, hash: &[u8; 32]) -> anyhow::Result<bool>;
    async fn get_header(&self, hash: &[u8; 32]) -> anyhow::Result<Option<BlockHeader>>;
    async fn get_header_by_sequence(
        &self,
        sequence: u32,
    ) -> anyhow::Result<Option<BlockHeader>>;
    /// Headers from `start` to `end`, inclusive, in forward order unless
    /// `reverse` is set.
    async fn iterate_block_headers(
        &self,
        start: [u8; 32],
        end: [u8; 32],
        reverse: bool,
    ) -> anyhow::Result<Vec<BlockHeader>>;
    async fn get_block_transactions(
        &self,
        header: &BlockHeader,
    ) -> anyhow::Result<Vec<BlockTransaction>>;
    async fn get_note_witness(
        &self,
        index: u64,
        confirmations: u32,
    ) -> anyhow::Result<Witness>;
    async fn get_asset_by_id(
        &self,
        id: [u8; 32],
    ) -> anyhow::Result<Option<AssetRecord>>;
    async fn nullifier_contains(&self, nullifier: &Nullifier) -> anyhow::Result<bool>;
}

/// The cryptographic worker pool: note decryption and transaction signing,
/// dispatched off the single-threaded event loop.
#[async_trait]
pub trait WorkerPool: Send + Sync + 'static {
    async fn decrypt_notes(
        &self,
        payloads: Vec<DecryptNotePayload>,
    ) -> anyhow::Result<Vec<Option<DecryptedOutput>>>;
    /// Proves and serializes `raw`, signing with `spending_key`. Returns the
    /// posted bytes alongside the ciphertext of every output note so the
    /// builder can decrypt its own change outputs without a second round
    /// trip.
    async fn post_transaction(
        &self,
        raw: &RawTransaction,
        spending_key: &[u8],
    ) -> anyhow::Result<PostedTransaction>;
}

/// The mempool the engine submits newly-built transactions to.
#[async_trait]
pub trait Mempool: Send + Sync + 'static {
    async fn accept_transaction(&self, tx: &RawTransactionBytes) -> anyhow::Result<bool>;
}

/// The peer layer the engine asks to gossip a transaction.
#[async_trait]
pub trait PeerNetwork: Send + Sync + 'static {
    async fn broadcast_transaction(&self, tx: &RawTransactionBytes) -> anyhow::Result<()>;
}

/// Trait alias bundling [`Chain`] with the bounds generic engine code needs
/// to hold a cheaply-cloneable handle to it (e.g. an `Arc<ChainImpl>`).
pub trait WalletChain: Chain + Clone + Send + Sync + 'static {}
impl<T> WalletChain for T where T: Chain + Clone + Send + Sync + 'static {}

pub trait WalletWorkerPool: WorkerPool + Clone + Send + Sync + 'static {}
impl<T> WalletWorkerPool for T where T: WorkerPool + Clone + Send + Sync + 'static {}

pub trait WalletMempool: Mempool + Clone + Send + Sync + 'static {}
impl<T> WalletMempool for T where T: Mempool + Clone + Send + Sync + 'static {}

pub trait WalletPeerNetwork: PeerNetwork + Clone + Send + Sync + 'static {}
impl<T> WalletPeerNetwork for T where T: PeerNetwork + Clone + Send + Sync + 'static {}
