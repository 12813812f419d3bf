// Report pipeline (C5): builds and submits a positive report from the
// identity engine's history. Per-RPI metadata encryption keeps the server
// from correlating the RPIs reported in a single batch beyond their
// co-submission (§4.5 rationale).

use crate::crypto;
use crate::identity::IdentityEngine;
use crate::net::VailixHttpClient;
use serde_json::Value;
use tracing::{error, info};

/// Enumerates `days` of history, encrypts `metadata` under each RPI's
/// metadata key, and submits the batch. Never propagates a network error
/// to the caller — it returns `false` and the caller's error stream
/// receives the detail, per §7's propagation policy.
pub async fn submit_report(
    identity: &IdentityEngine,
    client: &VailixHttpClient,
    days: u32,
    metadata: Option<&Value>,
    mut on_error: impl FnMut(String),
) -> bool {
    let plaintext = match metadata {
        Some(v) => match serde_json::to_vec(v) {
            Ok(bytes) => bytes,
            Err(e) => {
                on_error(format!("failed to serialize report metadata: {e}"));
                return false;
            }
        },
        None => Vec::new(),
    };

    let mut entries = Vec::new();
    for rpi in identity.history(days) {
        let rpi_hex = rpi.to_hex();
        let mk = identity.metadata_key(&rpi_hex);
        let encrypted_metadata = if plaintext.is_empty() {
            String::new()
        } else {
            match crypto::encrypt(&plaintext, &mk) {
                Ok(wire) => wire,
                Err(e) => {
                    // Oversized metadata is a programmer error: fatal to
                    // the whole report call, per §7.
                    on_error(format!("metadata encryption failed: {e}"));
                    return false;
                }
            }
        };
        entries.push((rpi_hex, encrypted_metadata));
    }

    match client.submit_report(entries).await {
        Ok(success) => {
            info!(success, "report submission completed");
            success
        }
        Err(e) => {
            error!(error = %e, "report submission failed");
            on_error(e.to_string());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityEngine, KeyStorage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct InMemoryKeyStorage(Mutex<Option<Vec<u8>>>);

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
    async fn report_returns_false_without_throwing_on_bad_url() {
        let storage = InMemoryKeyStorage(Mutex::new(Some(vec![1u8; 32])));
        let identity = IdentityEngine::initialize(&storage, 60_000).await.unwrap();
        let client = VailixHttpClient::new(crate::net::VailixClientConfig {
            report_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        })
        .unwrap();

        let mut errors = Vec::new();
        let ok = submit_report(&identity, &client, 1, None, |e| errors.push(e)).await;
        assert!(!ok);
        assert!(!errors.is_empty());
    }
}
