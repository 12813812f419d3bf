// Encrypted local store (C4). Grounded on the teacher's
// `storage::sql_storage::SqlStorage` (Arc<Mutex<Connection>>, schema
// bootstrap on open, chunked transactions) with the MongoDB-shaped source
// collection replaced by a SQLCipher-backed `scanned_events` table keyed
// directly on the master secret, per §4.4's key-derivation binding.

use crate::error::{Result, VailixError};
use crate::types::ContactRecord;
use dashmap::DashMap;
use parking_lot::Mutex;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const MATCHING_SCANS_CHUNK: usize = 500;
const RESCAN_LEDGER_MAX: usize = 10_000;
const RETENTION_DAYS: i64 = 14;

pub struct EncryptedStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    rescan_ledger: DashMap<String, i64>,
    rescan_interval_ms: u64,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn open_keyed(db_path: &Path, master_secret: &[u8]) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    let key_hex = hex::encode(master_secret);
    conn.pragma_update(None, "key", format!("x'{key_hex}'"))?;
    // Trivial query to confirm the key is correct; SQLCipher returns an
    // error here (rather than on every later query) when the key is wrong.
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))?;
    Ok(conn)
}

fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS scanned_events (
            id TEXT PRIMARY KEY,
            rpi TEXT NOT NULL,
            metadata_key TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_scanned_events_rpi ON scanned_events(rpi);
        CREATE TABLE IF NOT EXISTS rescan_ledger (
            rpi TEXT PRIMARY KEY,
            last_ms INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
}

impl EncryptedStore {
    /// Opens (or creates) the database at `db_path` keyed by `master_secret`
    /// (validated as hex — MS is always 32 raw bytes here, so this is an
    /// internal invariant check, not user input validation). On a key
    /// mismatch (wrong MS against an existing file, e.g. a restored OS
    /// backup with a fresh MS) the policy is fail-open-to-empty: close,
    /// delete the file, reopen fresh. Never falls open to plaintext.
    pub async fn open(
        db_path: impl Into<PathBuf>,
        master_secret: &[u8],
        rescan_interval_ms: u64,
    ) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = match open_keyed(&db_path, master_secret) {
            Ok(conn) => conn,
            Err(_) => {
                warn!("local store key mismatch; recreating database fresh");
                let _ = std::fs::remove_file(&db_path);
                open_keyed(&db_path, master_secret)
                    .map_err(|e| VailixError::store_io(e.to_string()))?
            }
        };

        initialize_schema(&conn).map_err(|e| VailixError::store_io(e.to_string()))?;

        let rescan_ledger = DashMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT rpi, last_ms FROM rescan_ledger ORDER BY last_ms DESC LIMIT ?1")
                .map_err(|e| VailixError::store_io(e.to_string()))?;
            let rows = stmt
                .query_map(params![RESCAN_LEDGER_MAX as i64], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| VailixError::store_io(e.to_string()))?;
            for row in rows {
                let (rpi, last_ms) = row.map_err(|e| VailixError::store_io(e.to_string()))?;
                rescan_ledger.insert(rpi, last_ms);
            }
        }

        info!("encrypted local store opened at {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            rescan_ledger,
            rescan_interval_ms,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// True if rescanning `rpi_hex` is currently permitted: throttle is
    /// disabled, no prior capture is known, or the throttle window has
    /// elapsed.
    pub fn can_scan(&self, rpi_hex: &str) -> bool {
        if self.rescan_interval_ms == 0 {
            return true;
        }
        match self.rescan_ledger.get(rpi_hex) {
            None => true,
            Some(last) => now_ms() - *last >= self.rescan_interval_ms as i64,
        }
    }

    /// Inserts a contact row and updates the rescan ledger. On failure the
    /// in-memory ledger is left untouched (§4.4 failure model).
    pub async fn log_scan(
        &self,
        peer_rpi_hex: &str,
        peer_metadata_key_hex: &str,
        timestamp_ms: i64,
    ) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO scanned_events (id, rpi, metadata_key, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![id, peer_rpi_hex, peer_metadata_key_hex, timestamp_ms],
            )
            .map_err(|e| VailixError::store_io(e.to_string()))?;
            conn.execute(
                "INSERT INTO rescan_ledger (rpi, last_ms) VALUES (?1, ?2)
                 ON CONFLICT(rpi) DO UPDATE SET last_ms = excluded.last_ms",
                params![peer_rpi_hex, timestamp_ms],
            )
            .map_err(|e| VailixError::store_io(e.to_string()))?;
        }

        self.rescan_ledger.insert(peer_rpi_hex.to_string(), timestamp_ms);
        self.evict_rescan_ledger_overflow();
        Ok(())
    }

    fn evict_rescan_ledger_overflow(&self) {
        if self.rescan_ledger.len() <= RESCAN_LEDGER_MAX {
            return;
        }
        let mut entries: Vec<(String, i64)> = self
            .rescan_ledger
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by_key(|(_, last_ms)| *last_ms);
        let overflow = entries.len() - RESCAN_LEDGER_MAX;
        for (rpi, _) in entries.into_iter().take(overflow) {
            self.rescan_ledger.remove(&rpi);
            let conn = self.conn.lock();
            let _ = conn.execute("DELETE FROM rescan_ledger WHERE rpi = ?1", params![rpi]);
        }
    }

    /// Returns every contact row whose `rpi` is in `rpis`, batching the
    /// underlying `IN` query into chunks of at most 500 identifiers.
    pub async fn matching_scans(&self, rpis: &[String]) -> Result<Vec<ContactRecord>> {
        let mut results = Vec::new();
        for chunk in rpis.chunks(MATCHING_SCANS_CHUNK) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT id, rpi, metadata_key, timestamp FROM scanned_events WHERE rpi IN ({placeholders})"
            );
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&sql).map_err(|e| VailixError::store_io(e.to_string()))?;
            let params: Vec<&dyn rusqlite::ToSql> =
                chunk.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ContactRecord {
                        id: row.get(0)?,
                        peer_rpi: row.get(1)?,
                        peer_metadata_key: row.get(2)?,
                        captured_at_ms: row.get(3)?,
                    })
                })
                .map_err(|e| VailixError::store_io(e.to_string()))?;
            for row in rows {
                results.push(row.map_err(|e| VailixError::store_io(e.to_string()))?);
            }
        }
        Ok(results)
    }

    pub async fn recent_pairs(&self, within_hours: i64) -> Result<Vec<ContactRecord>> {
        let cutoff = now_ms() - within_hours * 3_600_000;
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, rpi, metadata_key, timestamp FROM scanned_events WHERE timestamp > ?1")
            .map_err(|e| VailixError::store_io(e.to_string()))?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                Ok(ContactRecord {
                    id: row.get(0)?,
                    peer_rpi: row.get(1)?,
                    peer_metadata_key: row.get(2)?,
                    captured_at_ms: row.get(3)?,
                })
            })
            .map_err(|e| VailixError::store_io(e.to_string()))?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| VailixError::store_io(e.to_string()))?);
        }
        Ok(results)
    }

    /// Deletes rows older than 14 days and prunes rescan-ledger entries
    /// older than the configured throttle window.
    pub async fn cleanup_old_scans(&self) -> Result<()> {
        let scan_cutoff = now_ms() - RETENTION_DAYS * 86_400_000;
        let ledger_cutoff = now_ms() - self.rescan_interval_ms as i64;
        {
            let conn = self.conn.lock();
            conn.execute(
                "DELETE FROM scanned_events WHERE timestamp < ?1",
                params![scan_cutoff],
            )
            .map_err(|e| VailixError::store_io(e.to_string()))?;
            conn.execute(
                "DELETE FROM rescan_ledger WHERE last_ms < ?1",
                params![ledger_cutoff],
            )
            .map_err(|e| VailixError::store_io(e.to_string()))?;
        }
        self.rescan_ledger.retain(|_, last_ms| *last_ms >= ledger_cutoff);
        Ok(())
    }

    /// Persisted sync checkpoint accessors (max `reported_at_ms` observed
    /// by a successful matcher pass).
    pub async fn get_checkpoint(&self) -> Result<f64> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = 'sync_checkpoint'",
                [],
                |row| row.get(0),
            )
            .ok();
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0.0))
    }

    pub async fn set_checkpoint(&self, value: f64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv_store (key, value) VALUES ('sync_checkpoint', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![value.to_string()],
        )
        .map_err(|e| VailixError::store_io(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn open_store(dir: &Path, secret: &[u8; 32], rescan_ms: u64) -> EncryptedStore {
        EncryptedStore::open(dir.join("store.db"), secret, rescan_ms)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn log_scan_and_matching_scans() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), &[1u8; 32], 0).await;
        store.log_scan("a".repeat(32).as_str(), "b".repeat(64).as_str(), now_ms()).await.unwrap();
        let found = store.matching_scans(&["a".repeat(32)]).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn matching_scans_chunks_over_500() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), &[2u8; 32], 0).await;
        let mut rpis = Vec::new();
        for i in 0..600u32 {
            let rpi = format!("{i:032x}");
            store.log_scan(&rpi, "c".repeat(64).as_str(), now_ms()).await.unwrap();
            rpis.push(rpi);
        }
        let found = store.matching_scans(&rpis).await.unwrap();
        assert_eq!(found.len(), 600);
    }

    #[tokio::test]
    async fn rescan_throttle_property_8() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), &[3u8; 32], 1_000).await;
        let rpi = "d".repeat(32);
        assert!(store.can_scan(&rpi));
        store.log_scan(&rpi, "e".repeat(64).as_str(), now_ms()).await.unwrap();
        assert!(!store.can_scan(&rpi));
    }

    #[tokio::test]
    async fn checkpoint_round_trips() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), &[4u8; 32], 0).await;
        assert_eq!(store.get_checkpoint().await.unwrap(), 0.0);
        store.set_checkpoint(12345.0).await.unwrap();
        assert_eq!(store.get_checkpoint().await.unwrap(), 12345.0);
    }

    #[tokio::test]
    async fn key_mismatch_recreates_fresh_database_s3() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = EncryptedStore::open(&path, &[5u8; 32], 0).await.unwrap();
            store.log_scan("f".repeat(32).as_str(), "g".repeat(64).as_str(), now_ms()).await.unwrap();
        }
        // Reopen under a different master secret: the store must wipe and
        // recreate rather than propagate an error.
        let reopened = EncryptedStore::open(&path, &[6u8; 32], 0).await.unwrap();
        let found = reopened.matching_scans(&["f".repeat(32)]).await.unwrap();
        assert!(found.is_empty());
    }
}
