//! Serde helpers for base64-encoding fixed-size byte arrays in textual config/session formats
//! (e.g. the `key`/`iv` strings exchanged during the handshake).
use base64::{decode as b64_decode, encode as b64_encode, DecodeError};
use serde::{de, Deserializer, Serializer};

pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&b64_encode(bytes))
}

pub fn deserialize_vec<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = <&str>::deserialize(deserializer)?;
    b64_decode(s).map_err(de::Error::custom)
}

pub fn decode(s: &str) -> Result<Vec<u8>, DecodeError> {
    b64_decode(s)
}

pub fn encode(bytes: &[u8]) -> String {
    b64_encode(bytes)
}
