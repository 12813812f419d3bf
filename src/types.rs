// Shared domain types. A single `Rpi` representation is used everywhere —
// raw 16 bytes internally, 32 lowercase hex characters at every boundary —
// rather than letting hex and binary forms drift apart across modules.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const RPI_BYTES: usize = 16;
pub const MK_BYTES: usize = 32;

/// Rolling Proximity Identifier: 16 raw bytes, 32 lowercase hex characters
/// at every wire and storage boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rpi(pub [u8; RPI_BYTES]);

impl Rpi {
    pub fn from_bytes(bytes: [u8; RPI_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Parses a 32-character lowercase hex string. Uppercase is rejected
    /// per §4.2's server input-validation contract.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != RPI_BYTES * 2 || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return None;
        }
        let decoded = hex::decode(s).ok()?;
        let arr: [u8; RPI_BYTES] = decoded.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; RPI_BYTES] {
        &self.0
    }
}

impl fmt::Debug for Rpi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rpi({})", self.to_hex())
    }
}

impl fmt::Display for Rpi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Rpi {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rpi {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Rpi::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid rpi hex"))
    }
}

/// A locally scanned contact, as stored by C4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: String,
    pub peer_rpi: String,
    pub peer_metadata_key: String,
    pub captured_at_ms: i64,
}

/// A single reported identifier as seen in a download page (C2/C6).
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRecord {
    pub rpi: Rpi,
    pub reported_at_ms: f64,
    pub metadata: String,
}

/// A match emitted by the matcher (C6) on the match stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub rpi: String,
    pub local_timestamp_ms: i64,
    pub reporter_timestamp_ms: f64,
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpi_hex_round_trip() {
        let bytes = [7u8; RPI_BYTES];
        let rpi = Rpi::from_bytes(bytes);
        let hex = rpi.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(Rpi::from_hex(&hex), Some(rpi));
    }

    #[test]
    fn rpi_rejects_uppercase() {
        let upper = "A".repeat(32);
        assert_eq!(Rpi::from_hex(&upper), None);
    }

    #[test]
    fn rpi_rejects_wrong_length() {
        assert_eq!(Rpi::from_hex("abcd"), None);
    }
}
