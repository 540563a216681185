//! Passphrase-based encryption envelope for account secrets at rest.
//!
//! ## Design
//!
//! Every account's spending key material is encrypted under a key derived
//! from the account's passphrase, never under a key held only in memory, so
//! the persistent store can be copied or backed up without leaking secrets.
//! The scheme:
//!
//! ```text
//! Encrypt(passphrase, plaintext) :=
//! 1. version := 0_u8
//! 2. salt := random 16 bytes
//! 3. key := PBKDF2-HMAC-SHA256(passphrase, salt, PBKDF2_ITERATIONS) -> 32 bytes
//! 4. nonce := random 12 bytes
//! 5. aad := version || salt
//! 6. (ciphertext, tag) := AES-256-GCM(key, nonce, aad, plaintext)
//! 7. output := version || salt || nonce || ciphertext || tag
//! ```
//!
//! This is the same "key-per-message, AES-256-GCM, explicit AAD" shape used
//! elsewhere for at-rest encryption, just keyed by a passphrase-derived key
//! instead of a key derived from a long-lived root secret, since the engine
//! has no root secret of its own to derive from.
//!
//! A random nonce (rather than the all-zero nonce a derive-key-per-message
//! scheme can get away with) is used here because the key itself is derived
//! fresh from a random salt on every call, so there's no shared key across
//! encryptions that nonce reuse could break — but using a random nonce too
//! costs nothing and removes any argument about it.

use std::num::NonZeroU32;

use pbkdf2::pbkdf2_hmac;
use ring::aead::{self, BoundKey};
use sha2::Sha256;
use thiserror::Error;

use crate::rng::Crng;

const VERSION: u8 = 0;
const VERSION_LEN: usize = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// PBKDF2-HMAC-SHA256 iteration count. OWASP's 2023 recommendation for
/// PBKDF2-HMAC-SHA256 is 600,000.
const PBKDF2_ITERATIONS: u32 = 600_000;

/// The minimum number of characters required in a passphrase.
pub const MIN_PASSPHRASE_LEN: usize = 8;
/// The maximum number of characters allowed in a passphrase.
pub const MAX_PASSPHRASE_LEN: usize = 512;

#[derive(Clone, Debug, Error)]
pub enum EnvelopeError {
    #[error("passphrase must have at least {MIN_PASSPHRASE_LEN} characters")]
    PassphraseTooShort,
    #[error("passphrase must have at most {MAX_PASSPHRASE_LEN} characters")]
    PassphraseTooLong,
    #[error("envelope is truncated or has an unrecognized version byte")]
    Malformed,
    #[error("decryption failed: ciphertext, passphrase, or AAD is wrong")]
    Decrypt,
}

/// Encrypts `plaintext` under a key derived from `passphrase`, returning the
/// self-describing envelope (`version || salt || nonce || ciphertext || tag`).
pub fn encrypt(
    rng: &mut impl Crng,
    passphrase: &str,
    plaintext: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    validate_passphrase_len(passphrase)?;

    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(passphrase, &salt);
    let aad = envelope_aad(&salt);

    let unbound_key = aead::UnboundKey::new(&aead::AES_256_GCM, &key)
        .expect("key is exactly 32 bytes");
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);
    let mut sealing_key =
        aead::SealingKey::new(unbound_key, OneNonce::new(nonce));

    let mut out = Vec::with_capacity(
        VERSION_LEN + SALT_LEN + NONCE_LEN + plaintext.len() + TAG_LEN,
    );
    out.push(VERSION);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(plaintext);

    let plaintext_offset = VERSION_LEN + SALT_LEN + NONCE_LEN;
    let tag = sealing_key
        .seal_in_place_separate_tag(
            aead::Aad::from(aad.as_slice()),
            &mut out[plaintext_offset..],
        )
        .expect("plaintext is far smaller than AES-GCM's 64GiB limit");
    out.extend_from_slice(tag.as_ref());

    Ok(out)
}

/// Decrypts an envelope produced by [`encrypt`] under `passphrase`.
pub fn decrypt(
    passphrase: &str,
    envelope: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    validate_passphrase_len(passphrase)?;

    let header_len = VERSION_LEN + SALT_LEN + NONCE_LEN;
    if envelope.len() < header_len + TAG_LEN {
        return Err(EnvelopeError::Malformed);
    }
    if envelope[0] != VERSION {
        return Err(EnvelopeError::Malformed);
    }

    let salt: [u8; SALT_LEN] =
        envelope[VERSION_LEN..VERSION_LEN + SALT_LEN].try_into().unwrap();
    let nonce_bytes: [u8; NONCE_LEN] = envelope
        [VERSION_LEN + SALT_LEN..header_len]
        .try_into()
        .unwrap();

    let key = derive_key(passphrase, &salt);
    let aad = envelope_aad(&salt);

    let unbound_key = aead::UnboundKey::new(&aead::AES_256_GCM, &key)
        .expect("key is exactly 32 bytes");
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);
    let mut opening_key =
        aead::OpeningKey::new(unbound_key, OneNonce::new(nonce));

    let mut ciphertext_and_tag = envelope[header_len..].to_vec();
    let plaintext = opening_key
        .open_in_place(aead::Aad::from(aad.as_slice()), &mut ciphertext_and_tag)
        .map_err(|_| EnvelopeError::Decrypt)?;

    Ok(plaintext.to_vec())
}

pub fn validate_passphrase_len(passphrase: &str) -> Result<(), EnvelopeError> {
    let len = passphrase.chars().count();
    if len < MIN_PASSPHRASE_LEN {
        return Err(EnvelopeError::PassphraseTooShort);
    }
    if len > MAX_PASSPHRASE_LEN {
        return Err(EnvelopeError::PassphraseTooLong);
    }
    Ok(())
}

fn derive_key(passphrase: &str, salt: &[u8; SALT_LEN]) -> [u8; KEY_LEN] {
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).unwrap();
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(
        passphrase.as_bytes(),
        salt,
        iterations.get(),
        &mut key,
    );
    key
}

fn envelope_aad(salt: &[u8; SALT_LEN]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(VERSION_LEN + SALT_LEN);
    aad.push(VERSION);
    aad.extend_from_slice(salt);
    aad
}

/// A single-use nonce sequence. Panics if asked to produce a second nonce,
/// since every envelope uses a fresh [`SealingKey`]/[`OpeningKey`].
struct OneNonce(Option<aead::Nonce>);

impl OneNonce {
    fn new(nonce: aead::Nonce) -> Self {
        Self(Some(nonce))
    }
}

impl aead::NonceSequence for OneNonce {
    fn advance(&mut self) -> Result<aead::Nonce, ring::error::Unspecified> {
        self.0.take().ok_or(ring::error::Unspecified)
    }
}

#[cfg(test)]
mod test {
    use proptest::{arbitrary::any, collection::vec, proptest};

    use super::*;
    use crate::rng::SmallRng;

    #[test]
    fn roundtrip() {
        let mut rng = SmallRng::from_u64(7);
        let passphrase = "correct horse battery staple";
        let plaintext = b"shielded spending key material";

        let envelope = encrypt(&mut rng, passphrase, plaintext).unwrap();
        let decrypted = decrypt(passphrase, &envelope).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let mut rng = SmallRng::from_u64(8);
        let envelope = encrypt(&mut rng, "correct-passphrase", b"secret").unwrap();
        let result = decrypt("wrong-passphrase", &envelope);
        assert!(matches!(result, Err(EnvelopeError::Decrypt)));
    }

    #[test]
    fn truncated_envelope_is_malformed() {
        let result = decrypt("whatever-passphrase", &[0u8; 4]);
        assert!(matches!(result, Err(EnvelopeError::Malformed)));
    }

    #[test]
    fn passphrase_length_is_validated() {
        let mut rng = SmallRng::from_u64(9);
        assert!(matches!(
            encrypt(&mut rng, "short", b"data"),
            Err(EnvelopeError::PassphraseTooShort)
        ));
        let too_long = "a".repeat(MAX_PASSPHRASE_LEN + 1);
        assert!(matches!(
            encrypt(&mut rng, &too_long, b"data"),
            Err(EnvelopeError::PassphraseTooLong)
        ));
    }

    #[test]
    fn roundtrip_proptest() {
        let mut rng = SmallRng::from_u64(42);
        proptest!(|(data in vec(any::<u8>(), 0..256))| {
            let envelope = encrypt(&mut rng, "a reasonably long passphrase", &data).unwrap();
            let decrypted = decrypt("a reasonably long passphrase", &envelope).unwrap();
            assert_eq!(decrypted, data);
        })
    }
}
