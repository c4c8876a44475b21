//! Holder map encoding.
//!
//! JSON with sessions in key order, so decoding and re-encoding a value read
//! from the store reproduces it byte for byte.

use serde::de::Error as _;

use crate::types::HolderMap;

pub fn encode(map: &HolderMap) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(map)
}

/// Rejects maps whose grants overflow or exceed their own limit; the
/// coordinator never writes either.
pub fn decode(value: &[u8]) -> serde_json::Result<HolderMap> {
    let map: HolderMap = serde_json::from_slice(value)?;
    match map.checked_held() {
        None => Err(serde_json::Error::custom("granted slots overflow")),
        Some(held) if held > map.limit => Err(serde_json::Error::custom(format!(
            "{} slots granted over a limit of {}",
            held, map.limit
        ))),
        Some(_) => Ok(map),
    }
}
