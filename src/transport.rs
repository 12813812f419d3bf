// Transport collaborator contract (§6). The BLE/NFC adapters themselves
// are explicitly out of scope (§1); this trait documents the interface
// they are expected to drive: on a completed exchange with a peer, call
// `log_scan` after consulting `can_scan` to suppress duplicates.

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TransportCollaborator: Send + Sync {
    /// Consulted before logging a scan so the throttle policy (§4.4) is
    /// enforced at the point of capture, not just at read time.
    async fn can_scan(&self, peer_rpi_hex: &str) -> bool;

    /// Called once per completed exchange with a peer.
    async fn log_scan(&self, peer_rpi_hex: &str, peer_metadata_key_hex: &str, now_ms: i64) -> Result<()>;
}

/// Binds a `TransportCollaborator`'s calls directly to the encrypted local
/// store, the minimal glue the SDK needs to satisfy the contract without
/// pulling in any actual radio stack.
pub struct StoreBackedTransport {
    store: std::sync::Arc<crate::store::EncryptedStore>,
}

impl StoreBackedTransport {
    pub fn new(store: std::sync::Arc<crate::store::EncryptedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TransportCollaborator for StoreBackedTransport {
    async fn can_scan(&self, peer_rpi_hex: &str) -> bool {
        self.store.can_scan(peer_rpi_hex)
    }

    async fn log_scan(&self, peer_rpi_hex: &str, peer_metadata_key_hex: &str, now_ms: i64) -> Result<()> {
        self.store.log_scan(peer_rpi_hex, peer_metadata_key_hex, now_ms).await
    }
}
