//! Lossless byte/hex-bytes JSON encoding for the Raw Store.
//!
//! Plain byte sequences round-trip as a string prefixed `BYTE__`, hex-tagged
//! byte sequences as `HEXB__`, both followed by lowercase hex. Everything
//! else passes through untouched.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const BYTE_PREFIX: &str = "BYTE__";
const HEXB_PREFIX: &str = "HEXB__";

/// A plain byte sequence, encoded as `BYTE__<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ByteString(pub Vec<u8>);

impl Serialize for ByteString {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{BYTE_PREFIX}{}", hex::encode(&self.0)))
    }
}

impl<'de> Deserialize<'de> for ByteString {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        let hex_part = s
            .strip_prefix(BYTE_PREFIX)
            .ok_or_else(|| D::Error::custom(format!("expected {BYTE_PREFIX} prefix, got {s}")))?;
        let bytes = hex::decode(hex_part).map_err(D::Error::custom)?;
        Ok(ByteString(bytes))
    }
}

/// A hex-tagged byte sequence, encoded as `HEXB__<hex>`. Distinct wrapper
/// from [`ByteString`] so a Raw Store field's origin (plain bytes vs. an RPC
/// hex-bytes value) is preserved through the round trip.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HexBytesString(pub Vec<u8>);

impl Serialize for HexBytesString {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{HEXB_PREFIX}{}", hex::encode(&self.0)))
    }
}

impl<'de> Deserialize<'de> for HexBytesString {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        let hex_part = s
            .strip_prefix(HEXB_PREFIX)
            .ok_or_else(|| D::Error::custom(format!("expected {HEXB_PREFIX} prefix, got {s}")))?;
        let bytes = hex::decode(hex_part).map_err(D::Error::custom)?;
        Ok(HexBytesString(bytes))
    }
}
