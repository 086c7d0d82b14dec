use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const OID_LEN: usize = 20;
pub const OID_HEX_LEN: usize = 40;

/// Git object id: SHA-1 over `"<kind> <len>\0"` followed by the object bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid([u8; OID_LEN]);

impl Oid {
    pub const ZERO: Oid = Oid([0u8; OID_LEN]);

    pub fn from_bytes(bytes: [u8; OID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != OID_LEN {
            return Err(Error::InvalidOid(format!(
                "expected {} bytes, got {}",
                OID_LEN,
                slice.len()
            )));
        }
        let mut bytes = [0u8; OID_LEN];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != OID_HEX_LEN {
            return Err(Error::InvalidOid(format!(
                "expected {} hex chars, got {}",
                OID_HEX_LEN,
                hex.len()
            )));
        }
        let bytes = hex::decode(hex).map_err(|e| Error::InvalidOid(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn is_hex(s: &str) -> bool {
        s.len() == OID_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    pub fn hash_object(object_type: &str, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(object_type.as_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; OID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Loose object fan-out directory name.
    pub fn prefix_hex(&self) -> String {
        hex::encode(&self.0[..1])
    }

    pub fn suffix_hex(&self) -> String {
        hex::encode(&self.0[1..])
    }

    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; OID_LEN]
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.short())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for Oid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialOrd for Oid {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Oid {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// Serialized as hex so JSON payloads carry the same form git clients print.
impl Serialize for Oid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Oid::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
