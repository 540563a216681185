//! `bincode` encode/decode helpers shared by every value type persisted in
//! `WalletDb`. Keeping this in one place means a decode failure is always
//! reported the same way: [`WalletError::DbCorruption`], never a panic.

use serde::{de::DeserializeOwned, Serialize};

use crate::errors::WalletError;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WalletError> {
    bincode::serialize(value)
        .map_err(|e| WalletError::DbCorruption(format!("encode failed: {e}")))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WalletError> {
    bincode::deserialize(bytes)
        .map_err(|e| WalletError::DbCorruption(format!("decode failed: {e}")))
}

#[cfg(test)]
mod test {
    use serde::Deserialize;

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Dummy {
        a: u32,
        b: String,
    }

    #[test]
    fn roundtrip() {
        let value = Dummy { a: 7, b: "hi".into() };
        let bytes = encode(&value).unwrap();
        let decoded: Dummy = decode(&bytes).unwrap();
        assert_eq!(value, decoded);
    }
}
