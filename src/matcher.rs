// Matcher (C6): streaming download, intersection against the local
// contact log, decryption, and checkpointing. The single-threaded
// cooperative scheduling model of §5 is rendered as a type whose public
// methods take `&self` and await sequentially — no method spawns
// concurrent work, so the engine never runs two fetch passes at once
// regardless of which executor drives it.

use crate::error::Result;
use crate::net::VailixHttpClient;
use crate::store::EncryptedStore;
use crate::types::Match;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const MATCH_CHANNEL_CAPACITY: usize = 16;
const ERROR_CHANNEL_CAPACITY: usize = 64;

pub struct Matcher {
    store: Arc<EncryptedStore>,
    client: VailixHttpClient,
    match_tx: broadcast::Sender<Vec<Match>>,
    error_tx: broadcast::Sender<String>,
}

impl Matcher {
    pub fn new(store: Arc<EncryptedStore>, client: VailixHttpClient) -> Self {
        let (match_tx, _) = broadcast::channel(MATCH_CHANNEL_CAPACITY);
        let (error_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            store,
            client,
            match_tx,
            error_tx,
        }
    }

    /// Subscribing returns a receiver; dropping it is the teardown —
    /// the structured-channel rendering of the source's
    /// registration-returns-an-unregister-closure idiom (§9).
    pub fn subscribe_matches(&self) -> broadcast::Receiver<Vec<Match>> {
        self.match_tx.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.error_tx.subscribe()
    }

    fn emit_error(&self, msg: String) {
        warn!(error = %msg, "matcher error");
        let _ = self.error_tx.send(msg);
    }

    /// Downloads keys newer than the persisted checkpoint, page by page,
    /// intersects each page against local contacts, and decrypts hits.
    /// Never throws for network/decode failures — returns the matches
    /// accumulated up to (but not including) the failing page, and the
    /// checkpoint only advances if every page succeeded.
    pub async fn fetch_and_match(&self) -> Vec<Match> {
        let since = match self.store.get_checkpoint().await {
            Ok(v) => v,
            Err(e) => {
                self.emit_error(format!("failed to read checkpoint: {e}"));
                return Vec::new();
            }
        };

        let mut accumulated = Vec::new();
        let mut cursor: Option<String> = None;
        let mut max_reported_at = since;

        loop {
            let page = match self.client.download_page(since, cursor.as_deref()).await {
                Ok(page) => page,
                Err(e) => {
                    self.emit_error(format!("download failed: {e}"));
                    return Vec::new();
                }
            };

            if let Err(e) = self.process_page(&page.records, &mut accumulated, &mut max_reported_at).await {
                self.emit_error(format!("page processing failed: {e}"));
                return Vec::new();
            }

            // Release page memory and yield before the next allocation,
            // per §5's "no computation longer than one page decode"
            // suspension discipline.
            tokio::task::yield_now().await;

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if let Err(e) = self.store.set_checkpoint(max_reported_at).await {
            self.emit_error(format!("failed to persist checkpoint: {e}"));
            return Vec::new();
        }

        info!(matches = accumulated.len(), "fetch_and_match pass complete");
        let _ = self.match_tx.send(accumulated.clone());

        if let Err(e) = self.store.cleanup_old_scans().await {
            warn!(error = %e, "cleanup_old_scans failed after successful pass");
        }

        accumulated
    }

    async fn process_page(
        &self,
        records: &[crate::types::DownloadRecord],
        accumulated: &mut Vec<Match>,
        max_reported_at: &mut f64,
    ) -> Result<()> {
        let rpi_hexes: Vec<String> = records.iter().map(|r| r.rpi.to_hex()).collect();
        let contacts = self.store.matching_scans(&rpi_hexes).await?;

        for contact in &contacts {
            let record = match records.iter().find(|r| r.rpi.to_hex() == contact.peer_rpi) {
                Some(r) => r,
                None => continue,
            };

            let metadata = if record.metadata.is_empty() {
                None
            } else {
                decode_metadata(&contact.peer_metadata_key, &record.metadata)
            };

            accumulated.push(Match {
                rpi: contact.peer_rpi.clone(),
                local_timestamp_ms: contact.captured_at_ms,
                reporter_timestamp_ms: record.reported_at_ms,
                metadata,
            });
        }

        for record in records {
            if record.reported_at_ms > *max_reported_at {
                *max_reported_at = record.reported_at_ms;
            }
        }

        Ok(())
    }
}

/// Uses the peer's metadata key as captured at scan time (`log_scan`,
/// stored on the contact row) — not a key derived from this device's own
/// master secret. The reporter encrypted under its own MK, which this
/// device has no way to rederive; the only usable key is the one exchanged
/// and stored locally during the original contact. Any failure yields "no
/// metadata", never an error.
fn decode_metadata(peer_metadata_key_hex: &str, wire: &str) -> Option<serde_json::Value> {
    let mk_bytes = hex::decode(peer_metadata_key_hex).ok()?;
    let mk: [u8; 32] = mk_bytes.try_into().ok()?;
    let plaintext = crypto_decrypt(wire, &mk)?;
    serde_json::from_slice(&plaintext).ok().or_else(|| {
        error!("matched metadata decrypted but was not valid JSON");
        None
    })
}

fn crypto_decrypt(wire: &str, key: &[u8; 32]) -> Option<Vec<u8>> {
    crate::crypto::decrypt(wire, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityEngine, KeyStorage};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct InMemoryKeyStorage(StdMutex<Option<Vec<u8>>>);

    #[async_trait]
    impl KeyStorage for InMemoryKeyStorage {
        async fn get_key(&self, _name: &str) -> crate::error::Result<Option<Vec<u8>>> {
            Ok(self.0.lock().unwrap().clone())
        }
        async fn set_key(&self, _name: &str, value: &[u8]) -> crate::error::Result<()> {
            *self.0.lock().unwrap() = Some(value.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn checkpoint_unchanged_on_network_failure_property_7() {
        let storage = InMemoryKeyStorage(StdMutex::new(Some(vec![9u8; 32])));
        let identity = Arc::new(IdentityEngine::initialize(&storage, 60_000).await.unwrap());
        let dir = tempdir().unwrap();
        let store = Arc::new(
            EncryptedStore::open(dir.path().join("db"), identity.master_key(), 0)
                .await
                .unwrap(),
        );
        store.set_checkpoint(42.0).await.unwrap();

        let client = VailixHttpClient::new(crate::net::VailixClientConfig {
            download_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        })
        .unwrap();

        let matcher = Matcher::new(store.clone(), client);
        let mut errors = matcher.subscribe_errors();
        let matches = matcher.fetch_and_match().await;

        assert!(matches.is_empty());
        assert_eq!(store.get_checkpoint().await.unwrap(), 42.0);
        assert!(errors.try_recv().is_ok());
    }

    /// Two independent installations, each with its own random MS (the
    /// normal case — S1/S2 of §8). The reporter encrypts metadata under its
    /// own MK; the scanner only ever learns that MK via `log_scan` at
    /// contact time, never by recomputing it from its own MS. This is the
    /// path the metadata-key bug broke: deriving the key from the local
    /// identity engine instead of the stored contact row made cross-device
    /// decryption impossible.
    #[tokio::test]
    async fn cross_device_match_decrypts_peer_metadata() {
        let reporter_storage = InMemoryKeyStorage(StdMutex::new(Some(vec![11u8; 32])));
        let reporter = IdentityEngine::initialize(&reporter_storage, 60_000).await.unwrap();
        let reporter_rpi = reporter.current_rpi();
        let reporter_rpi_hex = reporter_rpi.to_hex();
        let reporter_mk = reporter.metadata_key(&reporter_rpi_hex);

        let plaintext = serde_json::json!({ "exposureMinutes": 12 });
        let encrypted = crate::crypto::encrypt(
            &serde_json::to_vec(&plaintext).unwrap(),
            &reporter_mk,
        )
        .unwrap();

        let scanner_storage = InMemoryKeyStorage(StdMutex::new(Some(vec![22u8; 32])));
        let scanner = IdentityEngine::initialize(&scanner_storage, 60_000).await.unwrap();
        let dir = tempdir().unwrap();
        let store = Arc::new(
            EncryptedStore::open(dir.path().join("db"), scanner.master_key(), 0)
                .await
                .unwrap(),
        );
        store
            .log_scan(&reporter_rpi_hex, &hex::encode(reporter_mk), 1_000)
            .await
            .unwrap();

        let client = VailixHttpClient::new(crate::net::VailixClientConfig {
            download_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        })
        .unwrap();
        let matcher = Matcher::new(store, client);

        let record = crate::types::DownloadRecord {
            rpi: reporter_rpi,
            reported_at_ms: 5_000.0,
            metadata: encrypted,
        };

        let mut accumulated = Vec::new();
        let mut max_reported_at = 0.0;
        matcher
            .process_page(&[record], &mut accumulated, &mut max_reported_at)
            .await
            .unwrap();

        assert_eq!(accumulated.len(), 1);
        assert_eq!(accumulated[0].metadata, Some(plaintext));
        assert_eq!(max_reported_at, 5_000.0);
    }
}
