// Identity engine (C1): owns the master secret, derives rotating proximity
// identifiers and per-RPI metadata keys. Grounded on the teacher's
// `crypto::hash` module (deterministic derivation, `#[cfg(test)]` layout)
// with HMAC-SHA256 substituted for BLAKE3 per the cryptographic contract.

use crate::error::{Result, VailixError};
use crate::types::{Rpi, MK_BYTES, RPI_BYTES};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Abstract key-storage collaborator. Production builds back this with OS
/// secure storage (Keychain / Credential Manager / Secret Service); this
/// crate ships a file-backed implementation suitable for servers, tests,
/// and headless environments, matching §6's "default is OS secure storage"
/// note with a concrete fallback the core can actually run against.
#[async_trait]
pub trait KeyStorage: Send + Sync {
    async fn get_key(&self, name: &str) -> Result<Option<Vec<u8>>>;
    async fn set_key(&self, name: &str, value: &[u8]) -> Result<()>;
}

const MASTER_SECRET_KEY: &str = "vailix.master_secret";

/// File-backed `KeyStorage`. Stores the hex-encoded secret at a single
/// path with owner-only permissions where the platform supports it.
pub struct FileKeyStorage {
    path: std::path::PathBuf,
}

impl FileKeyStorage {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl KeyStorage for FileKeyStorage {
    async fn get_key(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if name != MASTER_SECRET_KEY {
            return Ok(None);
        }
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let bytes = hex::decode(contents.trim())
                    .map_err(|e| VailixError::KeyStorageUnavailable(e.to_string()))?;
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VailixError::KeyStorageUnavailable(e.to_string())),
        }
    }

    async fn set_key(&self, name: &str, value: &[u8]) -> Result<()> {
        if name != MASTER_SECRET_KEY {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VailixError::KeyStorageUnavailable(e.to_string()))?;
        }
        tokio::fs::write(&self.path, hex::encode(value))
            .await
            .map_err(|e| VailixError::KeyStorageUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// Owns the master secret and derives every identifier and key that
/// depends on it. Nothing outside `master_key()` — reserved for C4's
/// database-encryption collaborator — ever observes the raw secret.
pub struct IdentityEngine {
    master_secret: Vec<u8>,
    rpi_duration_ms: u64,
}

impl IdentityEngine {
    /// Idempotent: reads MS from `storage`; draws 32 random bytes and
    /// persists them on first run. `KeyStorageUnavailable` only if both
    /// the read and the subsequent write fail.
    pub async fn initialize(
        storage: &dyn KeyStorage,
        rpi_duration_ms: u64,
    ) -> Result<Self> {
        let master_secret = match storage.get_key(MASTER_SECRET_KEY).await {
            Ok(Some(existing)) => existing,
            Ok(None) => {
                let mut fresh = vec![0u8; 32];
                OsRng.fill_bytes(&mut fresh);
                storage.set_key(MASTER_SECRET_KEY, &fresh).await?;
                fresh
            }
            Err(read_err) => {
                let mut fresh = vec![0u8; 32];
                OsRng.fill_bytes(&mut fresh);
                storage
                    .set_key(MASTER_SECRET_KEY, &fresh)
                    .await
                    .map_err(|_| read_err)?;
                fresh
            }
        };

        Ok(Self {
            master_secret,
            rpi_duration_ms,
        })
    }

    fn epoch_at(&self, now_ms: u64) -> u64 {
        now_ms / self.rpi_duration_ms
    }

    fn rpi_for_epoch(&self, epoch: u64) -> Rpi {
        let mut mac = HmacSha256::new_from_slice(&self.master_secret)
            .expect("HMAC accepts key of any length");
        mac.update(epoch.to_string().as_bytes());
        let digest = mac.finalize().into_bytes();
        let mut bytes = [0u8; RPI_BYTES];
        bytes.copy_from_slice(&digest[..RPI_BYTES]);
        Rpi::from_bytes(bytes)
    }

    /// Current RPI, derived from the wall clock and the configured epoch
    /// length. Pure given (MS, now): property 1 of §8.
    pub fn current_rpi(&self) -> Rpi {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.rpi_for_epoch(self.epoch_at(now_ms))
    }

    /// Lazy history of RPIs for the last `days` days, most recent first.
    /// Materializes one epoch at a time; callers iterate rather than
    /// collecting the whole sequence unless they need to.
    pub fn history(&self, days: u32) -> impl Iterator<Item = Rpi> + '_ {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let current_epoch = self.epoch_at(now_ms);
        let epochs_per_day = (86_400_000u64 / self.rpi_duration_ms).max(1);
        let total = epochs_per_day * days as u64;
        (0..total).map(move |i| self.rpi_for_epoch(current_epoch - i))
    }

    /// Per-RPI metadata key: `HMAC-SHA256(MS, "meta:" || rpi_hex)[..32]`.
    pub fn metadata_key(&self, rpi_hex: &str) -> [u8; MK_BYTES] {
        let mut mac = HmacSha256::new_from_slice(&self.master_secret)
            .expect("HMAC accepts key of any length");
        mac.update(b"meta:");
        mac.update(rpi_hex.as_bytes());
        let digest = mac.finalize().into_bytes();
        let mut bytes = [0u8; MK_BYTES];
        bytes.copy_from_slice(&digest[..MK_BYTES]);
        bytes
    }

    /// The raw master secret, exposed exactly to C4's database-encryption
    /// initialization path.
    pub fn master_key(&self) -> &[u8] {
        &self.master_secret
    }

    /// Stable cosmetic pseudonym derived from the current RPI.
    pub fn display_name(&self) -> String {
        let hex = self.current_rpi().to_hex();
        format!("vailix-{}", &hex[..8])
    }
}

impl Drop for IdentityEngine {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct InMemoryKeyStorage(Mutex<Option<Vec<u8>>>);

    #[async_trait]
    impl KeyStorage for InMemoryKeyStorage {
        async fn get_key(&self, _name: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.0.lock().unwrap().clone())
        }

        async fn set_key(&self, _name: &str, value: &[u8]) -> Result<()> {
            *self.0.lock().unwrap() = Some(value.to_vec());
            Ok(())
        }
    }

    fn hmac_rpi(ms: &[u8], epoch: u64) -> Rpi {
        let mut mac = HmacSha256::new_from_slice(ms).unwrap();
        mac.update(epoch.to_string().as_bytes());
        let digest = mac.finalize().into_bytes();
        let mut bytes = [0u8; RPI_BYTES];
        bytes.copy_from_slice(&digest[..RPI_BYTES]);
        Rpi::from_bytes(bytes)
    }

    #[tokio::test]
    async fn initialize_is_idempotent_and_persists() {
        let storage = InMemoryKeyStorage(Mutex::new(None));
        let engine = IdentityEngine::initialize(&storage, 60_000).await.unwrap();
        let ms_first = engine.master_key().to_vec();

        let engine2 = IdentityEngine::initialize(&storage, 60_000).await.unwrap();
        assert_eq!(ms_first, engine2.master_key());
    }

    #[tokio::test]
    async fn rpi_determinism_property_1() {
        let storage = InMemoryKeyStorage(Mutex::new(Some(vec![0u8; 32])));
        let engine = IdentityEngine::initialize(&storage, 60_000).await.unwrap();
        let expected = hmac_rpi(&[0u8; 32], 1_000_000);
        assert_eq!(engine.rpi_for_epoch(1_000_000), expected);
    }

    #[tokio::test]
    async fn rpi_mk_independence_property_2() {
        use std::collections::HashSet;
        let mut seen_rpis = HashSet::new();
        for trial in 0u64..2000 {
            let storage = InMemoryKeyStorage(Mutex::new(Some(
                hmac_rpi(&trial.to_be_bytes(), 0).as_bytes().to_vec(),
            )));
            let engine = IdentityEngine::initialize(&storage, 60_000).await.unwrap();
            let a = engine.rpi_for_epoch(1);
            let b = engine.rpi_for_epoch(2);
            assert_ne!(a, b);
            seen_rpis.insert(a);
        }
        assert!(seen_rpis.len() > 1900);
    }

    #[tokio::test]
    async fn history_is_lazy_and_most_recent_first() {
        let storage = InMemoryKeyStorage(Mutex::new(Some(vec![1u8; 32])));
        let engine = IdentityEngine::initialize(&storage, 3_600_000).await.unwrap();
        let hist: Vec<_> = engine.history(1).take(3).collect();
        assert_eq!(hist[0], engine.current_rpi());
        assert_eq!(hist.len(), 3);
    }

    #[tokio::test]
    async fn metadata_key_is_32_bytes_and_deterministic() {
        let storage = InMemoryKeyStorage(Mutex::new(Some(vec![2u8; 32])));
        let engine = IdentityEngine::initialize(&storage, 60_000).await.unwrap();
        let rpi_hex = engine.current_rpi().to_hex();
        let mk1 = engine.metadata_key(&rpi_hex);
        let mk2 = engine.metadata_key(&rpi_hex);
        assert_eq!(mk1, mk2);
        assert_eq!(mk1.len(), MK_BYTES);
    }
}
