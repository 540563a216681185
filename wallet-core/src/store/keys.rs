//! Composite-key encode/decode functions, one pair per store in the table.
//! Keys are big-endian so range scans are plain byte-lexicographic
//! comparisons; defining the layout exactly once here (rather than at each
//! call site) is what lets invariants 1 (nullifier consistency) and 2
//! (unspent index exactness) hold by construction.

use byteorder::{BigEndian, ByteOrder};

use crate::types::{AssetId, NoteHash, Nullifier, TxHash};

pub type Prefix = [u8; 4];

fn push_u32_be(buf: &mut Vec<u8>, v: u32) {
    let mut tmp = [0u8; 4];
    BigEndian::write_u32(&mut tmp, v);
    buf.extend_from_slice(&tmp);
}

fn push_u64_be(buf: &mut Vec<u8>, v: u64) {
    let mut tmp = [0u8; 8];
    BigEndian::write_u64(&mut tmp, v);
    buf.extend_from_slice(&tmp);
}

fn read_u32_be(bytes: &[u8]) -> u32 {
    BigEndian::read_u32(bytes)
}

fn read_u64_be(bytes: &[u8]) -> u64 {
    BigEndian::read_u64(bytes)
}

// --- `accounts`, `heads`, `account_ids_to_cleanup` (bare account id) --- //

pub fn account_key(account_id: &str) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

// --- `balances`, `assets`: (prefix, asset_id) --- //

pub fn prefix_asset_key(prefix: Prefix, asset_id: AssetId) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 32);
    key.extend_from_slice(&prefix);
    key.extend_from_slice(&asset_id);
    key
}

// --- `decrypted_notes`, `non_chain_note_hashes`: (prefix, note_hash) --- //

pub fn prefix_note_key(prefix: Prefix, note_hash: NoteHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 32);
    key.extend_from_slice(&prefix);
    key.extend_from_slice(&note_hash);
    key
}

// --- `nullifier_to_note_hash`, `nullifier_to_transaction_hash` --- //

pub fn prefix_nullifier_key(prefix: Prefix, nullifier: Nullifier) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 32);
    key.extend_from_slice(&prefix);
    key.extend_from_slice(&nullifier);
    key
}

// --- `transactions`: (prefix, tx_hash) --- //

pub fn prefix_tx_key(prefix: Prefix, tx_hash: TxHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 32);
    key.extend_from_slice(&prefix);
    key.extend_from_slice(&tx_hash);
    key
}

// --- `sequence_to_note_hash`: (prefix, sequence_be, note_hash) --- //

pub fn sequence_to_note_hash_key(
    prefix: Prefix,
    sequence: u32,
    note_hash: NoteHash,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 4 + 32);
    key.extend_from_slice(&prefix);
    push_u32_be(&mut key, sequence);
    key.extend_from_slice(&note_hash);
    key
}

/// `[start, end]` bounds (inclusive) for a `sequence_to_note_hash` range
/// scan over `[lo, hi]`.
pub fn sequence_to_note_hash_range(prefix: Prefix, lo: u32, hi: u32) -> (Vec<u8>, Vec<u8>) {
    bounded_u32_range(prefix, lo, hi)
}

// --- `sequence_to_transaction_hash`: (prefix, sequence_be, tx_hash) --- //

pub fn sequence_to_tx_hash_key(prefix: Prefix, sequence: u32, tx_hash: TxHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 4 + 32);
    key.extend_from_slice(&prefix);
    push_u32_be(&mut key, sequence);
    key.extend_from_slice(&tx_hash);
    key
}

pub fn sequence_to_tx_hash_range(prefix: Prefix, lo: u32, hi: u32) -> (Vec<u8>, Vec<u8>) {
    bounded_u32_range(prefix, lo, hi)
}

// --- `pending_transaction_hashes`: (prefix, expiration_be, tx_hash) --- //

/// Per the spec's Open Question (b): the "no expiration" sentinel is
/// `2^32 - 1`, not `2^32` (which doesn't fit in a `u32` anyway).
pub const NEVER_EXPIRES: u32 = u32::MAX;

pub fn pending_tx_key(prefix: Prefix, expiration: u32, tx_hash: TxHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 4 + 32);
    key.extend_from_slice(&prefix);
    push_u32_be(&mut key, expiration);
    key.extend_from_slice(&tx_hash);
    key
}

/// Bounds for "pending transactions with expiration in `(0, head_sequence]`",
/// i.e. the transactions eligible to be expired at this head.
pub fn expired_range(prefix: Prefix, head_sequence: u32) -> (Vec<u8>, Vec<u8>) {
    bounded_u32_range(prefix, 1, head_sequence)
}

// --- `timestamp_to_transaction_hash`: (prefix, timestamp_be) --- //

pub fn timestamp_key(prefix: Prefix, timestamp: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 8);
    key.extend_from_slice(&prefix);
    push_u64_be(&mut key, timestamp);
    key
}

// --- `unspent_note_hashes_by_value`: (prefix, asset_id, value_be, note_hash) --- //

pub fn unspent_by_value_key(
    prefix: Prefix,
    asset_id: AssetId,
    value: u64,
    note_hash: NoteHash,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 32 + 8 + 32);
    key.extend_from_slice(&prefix);
    key.extend_from_slice(&asset_id);
    push_u64_be(&mut key, value);
    key.extend_from_slice(&note_hash);
    key
}

/// Bounds for "all unspent notes of `asset_id`", in increasing value order.
pub fn unspent_by_value_asset_range(prefix: Prefix, asset_id: AssetId) -> (Vec<u8>, Vec<u8>) {
    let mut start = Vec::with_capacity(4 + 32);
    start.extend_from_slice(&prefix);
    start.extend_from_slice(&asset_id);
    let mut end = start.clone();
    end.extend_from_slice(&[0xFF; 8 + 32]);
    (start, end)
}

pub fn unspent_note_hash_from_key(key: &[u8]) -> NoteHash {
    let start = 4 + 32 + 8;
    key[start..start + 32].try_into().expect("key has fixed layout")
}

pub fn unspent_value_from_key(key: &[u8]) -> u64 {
    read_u64_be(&key[4 + 32..4 + 32 + 8])
}

// --- Whole-prefix bounds, used by account cleanup --- //

/// `[prefix || 0x00.., prefix || 0xFF..]` — every key belonging to this
/// account in a store keyed `(prefix, ..)`.
pub fn prefix_range(prefix: Prefix, max_suffix_len: usize) -> (Vec<u8>, Vec<u8>) {
    let mut start = prefix.to_vec();
    start.extend(std::iter::repeat(0x00).take(max_suffix_len));
    let mut end = prefix.to_vec();
    end.extend(std::iter::repeat(0xFF).take(max_suffix_len));
    (start, end)
}

fn bounded_u32_range(prefix: Prefix, lo: u32, hi: u32) -> (Vec<u8>, Vec<u8>) {
    let mut start = prefix.to_vec();
    push_u32_be(&mut start, lo);
    let mut end = prefix.to_vec();
    push_u32_be(&mut end, hi);
    end.extend_from_slice(&[0xFF; 32]);
    (start, end)
}

pub fn sequence_from_sequence_keyed(key: &[u8]) -> u32 {
    read_u32_be(&key[4..8])
}

pub fn hash32_from_tail(key: &[u8]) -> [u8; 32] {
    let len = key.len();
    key[len - 32..].try_into().expect("key ends in a 32-byte hash")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sequence_keys_sort_by_sequence_then_hash() {
        let prefix = [1, 2, 3, 4];
        let a = sequence_to_note_hash_key(prefix, 5, [0x01; 32]);
        let b = sequence_to_note_hash_key(prefix, 5, [0x02; 32]);
        let c = sequence_to_note_hash_key(prefix, 6, [0x00; 32]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn unspent_by_value_range_covers_all_values() {
        let prefix = [9, 9, 9, 9];
        let asset = [7u8; 32];
        let key_low = unspent_by_value_key(prefix, asset, 0, [0u8; 32]);
        let key_high = unspent_by_value_key(prefix, asset, u64::MAX, [0xFF; 32]);
        let (start, end) = unspent_by_value_asset_range(prefix, asset);
        assert!(start <= key_low);
        assert!(key_high <= end);
    }

    #[test]
    fn expired_range_excludes_zero_expiration() {
        let prefix = [0, 0, 0, 1];
        let (start, _end) = expired_range(prefix, 100);
        let never_key = pending_tx_key(prefix, 0, [0u8; 32]);
        assert!(never_key < start, "sequence 0 must sort before the range start");
    }
}
