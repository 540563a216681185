//! Account-id -> store-prefix hashing, and the content hash used to key a
//! serialized native note in `decrypted_notes`.

use std::io::Cursor;

use crate::types::{AssetId, NoteHash};

/// `prefix = first-4-bytes-big-endian(MurmurHash3_32(id, seed=1))`.
///
/// Collisions are acceptable (the full account id is also keyed in
/// `accounts`); the prefix only shards shared range-scanned stores.
pub fn account_prefix(account_id: &str) -> [u8; 4] {
    let mut cursor = Cursor::new(account_id.as_bytes());
    let hash =
        murmur3::murmur3_32(&mut cursor, 1).expect("reading from a Vec never fails");
    hash.to_be_bytes()
}

/// Content hash identifying a decrypted note, used as its key in
/// `decrypted_notes` and in the reverse nullifier/sequence indexes.
///
/// The native note bytes already commit to everything that matters
/// cryptographically; this is just a fixed-size, collision-resistant handle
/// to them for use as a KV key, not itself part of the shielded protocol.
pub fn note_hash(serialized_note: &[u8]) -> NoteHash {
    *blake3::hash(serialized_note).as_bytes()
}

/// Derives a new asset's id from its creator, name, and a nonce the builder
/// increments to dodge a collision with an already-minted asset, spec
/// §4.2.1. A content hash, not part of the shielded protocol itself.
pub fn derive_asset_id(creator: &[u8], name: &[u8], nonce: u8) -> AssetId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(creator);
    hasher.update(name);
    hasher.update(&[nonce]);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn note_hash_is_deterministic() {
        let a = note_hash(b"some serialized note");
        let b = note_hash(b"some serialized note");
        assert_eq!(a, b);
    }

    #[test]
    fn note_hash_differs_for_different_notes() {
        let a = note_hash(b"note one");
        let b = note_hash(b"note two");
        assert_ne!(a, b);
    }

    #[test]
    fn is_deterministic() {
        let a = account_prefix("alice");
        let b = account_prefix("alice");
        assert_eq!(a, b);
    }

    #[test]
    fn differs_across_ids_in_practice() {
        let a = account_prefix("alice");
        let b = account_prefix("bob");
        assert_ne!(a, b);
    }
}
