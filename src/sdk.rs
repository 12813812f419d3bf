// SDK lifecycle (C8): a single initialized engine per process, safe to
// create concurrently from any number of callers. Grounded on the design
// note of §9 — the JS "set an in-flight promise synchronously" idiom
// becomes a mutex-guarded state slot plus a `tokio::sync::Notify` so
// concurrent callers converge on the same in-flight initialization
// without a window where two callers both start the heavyweight work.

use crate::config::ClientConfig;
use crate::error::{Result, VailixError};
use crate::identity::{FileKeyStorage, IdentityEngine};
use crate::matcher::Matcher;
use crate::net::{VailixClientConfig, VailixHttpClient};
use crate::store::EncryptedStore;
use crate::transport::StoreBackedTransport;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

pub struct VailixEngine {
    pub identity: Arc<IdentityEngine>,
    pub store: Arc<EncryptedStore>,
    pub matcher: Matcher,
    /// The transport collaborator handle for §6's BLE/NFC adapter contract:
    /// the adapter (out of scope here) calls `can_scan`/`log_scan` on this
    /// once it completes an exchange with a peer.
    pub transport: StoreBackedTransport,
}

enum SingletonState {
    Uninit,
    Initializing,
    Ready(Arc<VailixEngine>),
}

static STATE: Lazy<Mutex<SingletonState>> = Lazy::new(|| Mutex::new(SingletonState::Uninit));
static NOTIFY: Lazy<Notify> = Lazy::new(Notify::new);

/// Idempotent, concurrency-safe creation. All concurrent callers observe
/// exactly one heavyweight initialization and receive the same `Arc`.
pub async fn create(config: ClientConfig) -> Result<Arc<VailixEngine>> {
    // Synchronous, I/O-free validation happens before any CAS attempt —
    // `ConfigInvalid` must surface from `create()` without ever touching
    // the singleton slot.
    config.validate()?;

    loop {
        let mut guard = STATE.lock();
        match &*guard {
            SingletonState::Ready(engine) => return Ok(engine.clone()),
            SingletonState::Initializing => {
                let notified = NOTIFY.notified();
                drop(guard);
                notified.await;
                continue;
            }
            SingletonState::Uninit => {
                *guard = SingletonState::Initializing;
                break;
            }
        }
    }

    match initialize_engine(&config).await {
        Ok(engine) => {
            let engine = Arc::new(engine);
            *STATE.lock() = SingletonState::Ready(engine.clone());
            NOTIFY.notify_waiters();
            info!("vailix engine reached READY");
            Ok(engine)
        }
        Err(e) => {
            *STATE.lock() = SingletonState::Uninit;
            NOTIFY.notify_waiters();
            Err(e)
        }
    }
}

async fn initialize_engine(config: &ClientConfig) -> Result<VailixEngine> {
    let key_storage = FileKeyStorage::new(format!("{}.key", config.db_path));
    let identity = Arc::new(IdentityEngine::initialize(&key_storage, config.rpi_duration_ms).await?);

    let store = Arc::new(
        EncryptedStore::open(
            config.db_path.clone(),
            identity.master_key(),
            config.rescan_interval_ms,
        )
        .await?,
    );

    let client = VailixHttpClient::new(VailixClientConfig {
        report_url: config.report_url.clone(),
        download_url: config.download_url.clone(),
        app_secret: config.app_secret.clone(),
        attest_token: None,
        ..Default::default()
    })
    .map_err(|e| VailixError::ConfigInvalid(e.to_string()))?;

    let matcher = Matcher::new(store.clone(), client);
    let transport = StoreBackedTransport::new(store.clone());

    store.cleanup_old_scans().await?;

    Ok(VailixEngine {
        identity,
        store,
        matcher,
        transport,
    })
}

pub fn is_initialized() -> bool {
    matches!(&*STATE.lock(), SingletonState::Ready(_))
}

/// Releases resources and clears the slot. A no-op if never created.
pub async fn destroy() {
    let engine = {
        let mut guard = STATE.lock();
        let previous = std::mem::replace(&mut *guard, SingletonState::Uninit);
        match previous {
            SingletonState::Ready(engine) => Some(engine),
            _ => None,
        }
    };
    NOTIFY.notify_waiters();
    if engine.is_some() {
        info!("vailix engine destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(n: u32) -> ClientConfig {
        ClientConfig {
            report_url: "http://127.0.0.1:1".into(),
            download_url: "http://127.0.0.1:1".into(),
            app_secret: "s".into(),
            rpi_duration_ms: 900_000,
            rescan_interval_ms: 0,
            report_days: 14,
            db_path: format!("/tmp/vailix-sdk-test-{n}.db"),
        }
    }

    #[tokio::test]
    async fn concurrent_create_converges_on_one_engine_property_9() {
        destroy().await;
        let config = test_config(rand::random::<u32>());
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let cfg = config.clone();
                tokio::spawn(async move { create(cfg).await })
            })
            .collect();

        let mut first_ptr: Option<usize> = None;
        for h in handles {
            let engine = h.await.unwrap().unwrap();
            let ptr = Arc::as_ptr(&engine) as usize;
            match first_ptr {
                None => first_ptr = Some(ptr),
                Some(p) => assert_eq!(p, ptr),
            }
        }
        destroy().await;
    }

    #[tokio::test]
    async fn config_invalid_never_touches_singleton_slot() {
        destroy().await;
        let mut cfg = test_config(rand::random::<u32>());
        cfg.rescan_interval_ms = cfg.rpi_duration_ms + 1;
        assert!(create(cfg).await.is_err());
        assert!(!is_initialized());
    }

    #[tokio::test]
    async fn destroy_without_create_is_a_no_op() {
        destroy().await;
        destroy().await;
        assert!(!is_initialized());
    }
}
