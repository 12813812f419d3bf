// Wire codec (C2): the compact binary download-batch format and the QR
// payload format. Grounded on the teacher's `storage::sql_storage` byte
// handling style (manual cursor arithmetic, explicit bounds checks) but
// with a from-scratch binary layout, since no teacher module encodes a
// network-byte-order batch format.

pub mod qr;

use crate::types::{DownloadRecord, Rpi, RPI_BYTES};
use tracing::warn;

pub const MAX_METADATA_LEN: usize = 10_240;

/// Computes the exact encoded size in one pass, then fills the buffer in a
/// second allocation-free pass, per §4.2's encode contract.
pub fn encode(records: &[DownloadRecord]) -> Vec<u8> {
    let mut size = 4;
    for r in records {
        size += RPI_BYTES + 8 + 2 + r.metadata.len();
    }

    let mut buf = Vec::with_capacity(size);
    buf.extend_from_slice(&(records.len() as u32).to_be_bytes());
    for r in records {
        buf.extend_from_slice(r.rpi.as_bytes());
        buf.extend_from_slice(&r.reported_at_ms.to_be_bytes());
        let meta_bytes = r.metadata.as_bytes();
        buf.extend_from_slice(&(meta_bytes.len() as u16).to_be_bytes());
        buf.extend_from_slice(meta_bytes);
    }
    buf
}

/// Bounds-checked decode. On truncation, stops at the last complete
/// record and logs a warning rather than erroring the caller — truncated
/// pages are an expected mid-stream condition (§4.6/S4), not a hard
/// failure.
pub fn decode(buf: &[u8]) -> Vec<DownloadRecord> {
    let mut records = Vec::new();
    if buf.len() < 4 {
        if !buf.is_empty() {
            warn!("download batch truncated before count header");
        }
        return records;
    }

    let count = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
    let mut cursor = 4usize;

    for _ in 0..count {
        if cursor + RPI_BYTES + 8 + 2 > buf.len() {
            warn!("download batch truncated mid-record; returning partial page");
            break;
        }
        let mut rpi_bytes = [0u8; RPI_BYTES];
        rpi_bytes.copy_from_slice(&buf[cursor..cursor + RPI_BYTES]);
        cursor += RPI_BYTES;

        let reported_at_ms = f64::from_be_bytes(buf[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;

        let metadata_len = u16::from_be_bytes(buf[cursor..cursor + 2].try_into().unwrap()) as usize;
        cursor += 2;

        if cursor + metadata_len > buf.len() {
            warn!("download batch truncated mid-metadata; returning partial page");
            break;
        }
        let metadata = String::from_utf8_lossy(&buf[cursor..cursor + metadata_len]).into_owned();
        cursor += metadata_len;

        records.push(DownloadRecord {
            rpi: Rpi::from_bytes(rpi_bytes),
            reported_at_ms,
            metadata,
        });
    }

    records
}
