//! Wallet tunables. Loading these from a file or environment is a host
//! concern; this crate only defines the struct and its defaults.

use std::time::Duration;

/// Default confirmation depth used by balance queries and note selection
/// when the caller doesn't specify one.
pub const DEFAULT_CONFIRMATIONS: u32 = 0;
/// Number of head-advances a pending transaction waits before it is
/// considered for rebroadcast.
pub const DEFAULT_REBROADCAST_AFTER: u32 = 10;
/// Max tombstoned-account entries drained per scheduler tick.
pub const DEFAULT_CLEANUP_BATCH_SIZE: usize = 100;
/// Max notes submitted to the worker pool per decrypt-notes call.
pub const DEFAULT_DECRYPT_BATCH_SIZE: usize = 20;
/// Scheduler tick interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Blocks added to the chain head when a `createTransaction` caller
/// specifies neither `expiration` nor `expirationDelta`.
pub const DEFAULT_EXPIRATION_DELTA: u32 = 30;

#[derive(Clone, Debug)]
pub struct WalletConfig {
    pub default_confirmations: u32,
    pub rebroadcast_after: u32,
    pub cleanup_batch_size: usize,
    pub decrypt_batch_size: usize,
    pub tick_interval: Duration,
    pub default_expiration_delta: u32,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            default_confirmations: DEFAULT_CONFIRMATIONS,
            rebroadcast_after: DEFAULT_REBROADCAST_AFTER,
            cleanup_batch_size: DEFAULT_CLEANUP_BATCH_SIZE,
            decrypt_batch_size: DEFAULT_DECRYPT_BATCH_SIZE,
            tick_interval: DEFAULT_TICK_INTERVAL,
            default_expiration_delta: DEFAULT_EXPIRATION_DELTA,
        }
    }
}
