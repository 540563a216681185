/// Passphrase-based encryption envelope for sealing account secrets at rest.
pub mod envelope;
