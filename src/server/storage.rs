// Server-side persistence (C7). The source collection is Mongo-shaped
// (`keys` with a unique `rpi` index and a TTL index on `created_at`); this
// workspace renders it in SQLite, grounded on the teacher's
// `storage::sql_storage::SqlStorage` (schema bootstrap on open,
// `Arc<Mutex<Connection>>`, explicit transactions). See DESIGN.md for why
// a relational table with a manual expiry sweep is the faithful
// equivalent of Mongo's upsert + TTL-index contract, not a literal
// reimplementation of Mongo semantics.

use crate::error::{Result, VailixError};
use crate::types::{DownloadRecord, Rpi};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub struct ServerStore {
    conn: Arc<Mutex<Connection>>,
    retention_days: u32,
}

pub struct DownloadPage {
    pub records: Vec<DownloadRecord>,
    pub next_cursor: Option<i64>,
}

impl ServerStore {
    pub fn open(database_url: &str, retention_days: u32) -> Result<Self> {
        let path = database_url
            .strip_prefix("sqlite://")
            .unwrap_or(database_url);
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS keys (
                rowid_surrogate INTEGER PRIMARY KEY AUTOINCREMENT,
                rpi BLOB NOT NULL UNIQUE,
                metadata TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_keys_created_at ON keys(created_at);",
        )?;
        info!(%database_url, retention_days, "server store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retention_days,
        })
    }

    /// Unordered upsert with `setOnInsert` semantics: repeated reports of
    /// the same RPI do not overwrite and do not multiply-count (property
    /// 5, §4.7).
    pub fn upsert(&self, rpi: Rpi, metadata: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO keys (rpi, metadata, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(rpi) DO NOTHING",
            params![rpi.as_bytes().to_vec(), metadata, now_ms()],
        )
        .map_err(|e| VailixError::store_io(e.to_string()))?;
        Ok(())
    }

    pub fn upsert_batch(&self, entries: &[(Rpi, Option<String>)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| VailixError::store_io(e.to_string()))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO keys (rpi, metadata, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(rpi) DO NOTHING",
                )
                .map_err(|e| VailixError::store_io(e.to_string()))?;
            let created_at = now_ms();
            for (rpi, metadata) in entries {
                stmt.execute(params![rpi.as_bytes().to_vec(), metadata, created_at])
                    .map_err(|e| VailixError::store_io(e.to_string()))?;
            }
        }
        tx.commit().map_err(|e| VailixError::store_io(e.to_string()))?;
        Ok(())
    }

    /// `created_at >= since AND rowid > cursor`, sorted ascending by
    /// rowid, limited to `limit` rows — the AND-applied pagination
    /// contract of §4.7/§9's resolved open question.
    pub fn download(&self, since_ms: i64, cursor: Option<i64>, limit: i64) -> Result<DownloadPage> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT rowid_surrogate, rpi, metadata, created_at FROM keys
                 WHERE created_at >= ?1 AND rowid_surrogate > ?2
                 ORDER BY rowid_surrogate ASC LIMIT ?3",
            )
            .map_err(|e| VailixError::store_io(e.to_string()))?;

        let rows = stmt
            .query_map(params![since_ms, cursor.unwrap_or(0), limit], |row| {
                let rowid: i64 = row.get(0)?;
                let rpi_bytes: Vec<u8> = row.get(1)?;
                let metadata: Option<String> = row.get(2)?;
                let created_at: i64 = row.get(3)?;
                Ok((rowid, rpi_bytes, metadata, created_at))
            })
            .map_err(|e| VailixError::store_io(e.to_string()))?;

        let mut records = Vec::new();
        let mut last_rowid = None;
        let mut count = 0i64;
        for row in rows {
            let (rowid, rpi_bytes, metadata, created_at) =
                row.map_err(|e| VailixError::store_io(e.to_string()))?;
            let rpi_arr: [u8; 16] = rpi_bytes
                .try_into()
                .map_err(|_| VailixError::store_io("corrupt rpi column"))?;
            records.push(DownloadRecord {
                rpi: Rpi::from_bytes(rpi_arr),
                reported_at_ms: created_at as f64,
                metadata: metadata.unwrap_or_default(),
            });
            last_rowid = Some(rowid);
            count += 1;
        }

        let next_cursor = if count == limit { last_rowid } else { None };
        Ok(DownloadPage { records, next_cursor })
    }

    /// Emulates the TTL index: removes rows older than the retention
    /// window. Run periodically by the server binary.
    pub fn sweep_expired(&self) -> Result<usize> {
        let cutoff = now_ms() - self.retention_days as i64 * 86_400_000;
        let conn = self.conn.lock();
        let deleted = conn
            .execute("DELETE FROM keys WHERE created_at < ?1", params![cutoff])
            .map_err(|e| VailixError::store_io(e.to_string()))?;
        Ok(deleted)
    }
}
