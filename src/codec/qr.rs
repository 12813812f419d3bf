// QR payload format: `proto:v1:<rpi-hex>:<minted-at-ms>:<metadata-key-hex>`.

use crate::types::Rpi;

#[derive(Debug, Clone, PartialEq)]
pub struct QrPayload {
    pub rpi: Rpi,
    pub minted_at_ms: u64,
    pub metadata_key_hex: String,
}

pub fn format(rpi: Rpi, minted_at_ms: u64, metadata_key_hex: &str) -> String {
    format!("proto:v1:{}:{}:{}", rpi.to_hex(), minted_at_ms, metadata_key_hex)
}

/// Rejects anything not exactly five colon-separated fields with the
/// first two literal fields matching `proto:v1`.
pub fn parse(payload: &str) -> Option<QrPayload> {
    let fields: Vec<&str> = payload.split(':').collect();
    if fields.len() != 5 {
        return None;
    }
    if fields[0] != "proto" || fields[1] != "v1" {
        return None;
    }
    let rpi = Rpi::from_hex(fields[2])?;
    let minted_at_ms: u64 = fields[3].parse().ok()?;
    let metadata_key_hex = fields[4].to_string();
    if metadata_key_hex.len() != 64 || !metadata_key_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    Some(QrPayload {
        rpi,
        minted_at_ms,
        metadata_key_hex,
    })
}

/// Rejects a payload whose mint time predates the RPI's epoch window, per
/// §4.2's additional consumer-side check.
pub fn is_within_epoch_window(payload: &QrPayload, now_ms: u64, rpi_duration_ms: u64) -> bool {
    let epoch_start = (now_ms / rpi_duration_ms) * rpi_duration_ms;
    payload.minted_at_ms >= epoch_start
}
