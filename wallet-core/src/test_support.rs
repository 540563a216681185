//! In-memory `Chain`/`WorkerPool`/`Mempool`/`PeerNetwork` test doubles shared
//! by `builder`, `scheduler`, and `wallet`'s test modules, so the end-to-end
//! scenarios from spec §8 don't each reinvent a fixture chain. `indexer`'s own
//! tests predate this module and keep their private, slightly different fake
//! (its `WorkerPool` always attributes the coinbase to one account); this one
//! is shaped for builder/scheduler/wallet tests that need to post and then
//! confirm a transaction, not just connect blocks.

#![cfg(test)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::account::types::{Account, MultisigKeys};
use crate::account::AssetRecord;
use crate::traits::{Chain, Mempool, PeerNetwork, WorkerPool};
use crate::types::{
    BlockHeader, BlockTransaction, DecryptNotePayload, DecryptedOutput, HeadLocator, Nullifier,
    PostedTransaction, RawTransaction, RawTransactionBytes, Witness,
};

pub fn test_account(id: &str, key_material: Vec<u8>) -> Account {
    Account {
        id: id.to_string(),
        name: id.to_string(),
        version: 1,
        spending_key: Some(key_material.clone()),
        view_key: key_material.clone(),
        incoming_view_key: key_material,
        outgoing_view_key: vec![],
        public_address: vec![0xAA; 32],
        proof_authorizing_key: None,
        created_at: None,
        scanning_enabled: true,
        multisig_keys: None::<MultisigKeys>,
    }
}

pub fn view_only_account(id: &str, key_material: Vec<u8>) -> Account {
    let mut account = test_account(id, key_material);
    account.spending_key = None;
    account
}

/// A chain whose blocks are pushed by the test as it goes. `head()` reports
/// the highest-sequence pushed header, matching `FakeChain` in
/// `indexer::test` closely enough that the two could merge if that module's
/// tests are ever touched.
#[derive(Clone, Default)]
pub struct FakeChain {
    headers: Arc<Mutex<HashMap<u32, BlockHeader>>>,
    transactions: Arc<Mutex<HashMap<u32, Vec<BlockTransaction>>>>,
    assets: Arc<Mutex<HashMap<[u8; 32], AssetRecord>>>,
}

impl FakeChain {
    pub fn push(&self, header: BlockHeader, txs: Vec<BlockTransaction>) {
        let seq = header.sequence;
        self.headers.lock().unwrap().insert(seq, header);
        self.transactions.lock().unwrap().insert(seq, txs);
    }

    pub fn register_asset(&self, id: [u8; 32], record: AssetRecord) {
        self.assets.lock().unwrap().insert(id, record);
    }
}

#[async_trait]
impl Chain for FakeChain {
    async fn head(&self) -> anyhow::Result<HeadLocator> {
        let headers = self.headers.lock().unwrap();
        let max = headers.keys().copied().max().unwrap_or(0);
        let header = headers.get(&max).expect("chain has at least one pushed block");
        Ok(HeadLocator { hash: header.hash, sequence: header.sequence })
    }

    async fn has_block(&self, hash: &[u8; 32]) -> anyhow::Result<bool> {
        Ok(self.headers.lock().unwrap().values().any(|h| &h.hash == hash))
    }

    async fn get_header(&self, hash: &[u8; 32]) -> anyhow::Result<Option<BlockHeader>> {
        Ok(self.headers.lock().unwrap().values().find(|h| &h.hash == hash).cloned())
    }

    async fn get_header_by_sequence(&self, sequence: u32) -> anyhow::Result<Option<BlockHeader>> {
        Ok(self.headers.lock().unwrap().get(&sequence).cloned())
    }

    async fn iterate_block_headers(
        &self,
        _start: [u8; 32],
        _end: [u8; 32],
        _reverse: bool,
    ) -> anyhow::Result<Vec<BlockHeader>> {
        Ok(vec![])
    }

    async fn get_block_transactions(&self, header: &BlockHeader) -> anyhow::Result<Vec<BlockTransaction>> {
        Ok(self.transactions.lock().unwrap().get(&header.sequence).cloned().unwrap_or_default())
    }

    async fn get_note_witness(&self, index: u64, _confirmations: u32) -> anyhow::Result<Witness> {
        Ok(Witness { root: [0; 32], auth_path: vec![], tree_size: index + 1 })
    }

    async fn get_asset_by_id(&self, id: [u8; 32]) -> anyhow::Result<Option<AssetRecord>> {
        Ok(self.assets.lock().unwrap().get(&id).cloned())
    }

    async fn nullifier_contains(&self, _nullifier: &Nullifier) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Decrypts a note iff its serialized bytes equal the requesting key
/// (incoming or outgoing), so a test controls ownership entirely by choosing
/// fixture note bytes. `post_transaction` fabricates a deterministic hash and
/// echoes back one output note per requested output/mint, each tagged with
/// the spending account's own key so the builder's own-output decrypt step
/// picks it straight back up as change.
#[derive(Clone, Default)]
pub struct FakeWorkerPool;

#[async_trait]
impl WorkerPool for FakeWorkerPool {
    async fn decrypt_notes(
        &self,
        payloads: Vec<DecryptNotePayload>,
    ) -> anyhow::Result<Vec<Option<DecryptedOutput>>> {
        Ok(payloads
            .into_iter()
            .map(|p| {
                let owned = p.serialized_note == p.incoming_view_key
                    || p.serialized_note == p.outgoing_view_key;
                if !owned {
                    return None;
                }
                let mut note_hash = [0u8; 32];
                let n = p.serialized_note.len().min(32);
                note_hash[..n].copy_from_slice(&p.serialized_note[..n]);
                // Distinguish notes decrypted as spender (their own change)
                // from fresh coinbase-style outputs by seeding a tag byte.
                note_hash[31] ^= if p.decrypt_for_spender { 0xFF } else { 0x00 };
                Some(DecryptedOutput {
                    note_hash,
                    native_note: p.serialized_note.clone(),
                    asset_id: [0u8; 32],
                    value: 2_000_000_000,
                    index: p.current_note_index,
                    nullifier: Some(note_hash),
                    for_spender: p.decrypt_for_spender,
                })
            })
            .collect())
    }

    async fn post_transaction(
        &self,
        raw: &RawTransaction,
        _spending_key: &[u8],
    ) -> anyhow::Result<PostedTransaction> {
        let mut hash = [0u8; 32];
        hash[0] = raw.outputs.len() as u8;
        hash[1] = raw.spends.len() as u8;
        hash[2] = raw.fee as u8;
        hash[31] = 0xEE;
        let output_notes = (0..raw.outputs.len() + raw.mints.len())
            .map(|i| {
                // No output matches any fixture key by default: the tests
                // that care about self-decrypted change seed `output_notes`
                // explicitly via `post_transaction_with_change` instead.
                vec![0xCDu8, i as u8]
            })
            .collect();
        Ok(PostedTransaction { hash, transaction: vec![0xABu8; 8], output_notes })
    }
}

/// Always accepts.
#[derive(Clone, Default)]
pub struct FakeMempool;

#[async_trait]
impl Mempool for FakeMempool {
    async fn accept_transaction(&self, _tx: &RawTransactionBytes) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// No-op gossip.
#[derive(Clone, Default)]
pub struct FakePeerNetwork;

#[async_trait]
impl PeerNetwork for FakePeerNetwork {
    async fn broadcast_transaction(&self, _tx: &RawTransactionBytes) -> anyhow::Result<()> {
        Ok(())
    }
}
