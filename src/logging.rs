// Ambient logging (§11). A deliberately thin wrapper around
// `tracing-subscriber`, unlike the teacher's `StorageNodeLogger` — that
// module records `ClientInfo.ip_address` per operation, which this system
// cannot do anywhere without violating the IP↔RPI decorrelation contract
// of §4.7/§6. No module in this crate is given a way to attach a peer
// address to a log record.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global `tracing` subscriber from `RUST_LOG`, defaulting
/// to `info`. Safe to call once per process; subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
