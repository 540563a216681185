//! Cross-cutting utilities shared by the wallet engine crates, with no
//! domain (account/note/transaction) knowledge of its own: cancellation,
//! named task spawning, a dedup notification channel, a generic test-event
//! bus, a monotonic timestamp newtype, byte/hex helpers, and the passphrase
//! encryption envelope used to seal account secrets at rest.

// `proptest_derive::Arbitrary` issue. This will hard-error for edition 2024 so
// hopefully it gets fixed soon...
// See: <https://github.com/proptest-rs/proptest/issues/447>
#![allow(non_local_definitions)]

/// Exponential backoff.
pub mod backoff;
/// The passphrase-based account-secrets encryption envelope.
pub mod crypto;
/// A generic test/diagnostic event channel.
pub mod event;
/// Hex encode/decode utilities.
pub mod hex;
/// Iterator extensions.
pub mod iter;
/// A channel for sending deduplicated notifications with no data attached.
pub mod notify;
/// Random number generation.
pub mod rng;
/// `ShutdownChannel`.
pub mod shutdown;
/// Named, join-checked task spawning.
pub mod task;
/// `TimestampMillis`.
pub mod time;

/// Assert at compile time that a boolean expression evaluates to true.
/// Implementation copied from the `static_assertions` crate.
#[macro_export]
macro_rules! const_assert {
    ($x:expr $(,)?) => {
        #[allow(clippy::const_is_empty, clippy::eq_op, unknown_lints)]
        const _: [(); 0 - !{
            const CONST_ASSERT: bool = $x;
            CONST_ASSERT
        } as usize] = [];
    };
}

/// Copies of nightly-only functions for `&[u8]`.
// TODO: remove once `[T]::as_chunks` stabilizes.
trait SliceExt {
    /// Splits the slice into a slice of `N`-element arrays, starting at the
    /// beginning of the slice, and a remainder slice with length strictly
    /// less than `N`.
    fn as_chunks_stable<const N: usize>(&self) -> (&[[u8; N]], &[u8]);

    unsafe fn as_chunks_unchecked_stable<const N: usize>(&self) -> &[[u8; N]];
}

impl SliceExt for [u8] {
    #[inline]
    fn as_chunks_stable<const N: usize>(&self) -> (&[[u8; N]], &[u8]) {
        assert!(N != 0, "chunk size must be non-zero");

        let len = self.len() / N;
        let (multiple_of_n, remainder) = self.split_at(len * N);
        // SAFETY: We already panicked for zero, and ensured by construction
        // that the length of the subslice is a multiple of N.
        let array_slice = unsafe { multiple_of_n.as_chunks_unchecked_stable() };
        (array_slice, remainder)
    }

    #[inline]
    unsafe fn as_chunks_unchecked_stable<const N: usize>(&self) -> &[[u8; N]] {
        // SAFETY: Caller must guarantee that `N` is nonzero and exactly
        // divides the slice length.
        let new_len = self.len() / N;
        unsafe { std::slice::from_raw_parts(self.as_ptr().cast(), new_len) }
    }
}
