// Server ingest/serve handlers (C7). Grounded on the teacher's
// `bin/storage_node.rs` handler shape: free async functions taking
// `Extension`/`State` plus extractors, returning `impl IntoResponse`
// tuples of `(StatusCode, Json(...))`.

use crate::codec;
use crate::error::VailixError;
use crate::server::AppState;
use crate::types::{DownloadRecord, Rpi};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MAX_REPORT_BATCH: usize = 1500;
pub const MAX_METADATA_BYTES: usize = 10_240;

#[derive(Debug, Deserialize)]
pub struct ReportEntry {
    pub rpi: String,
    #[serde(rename = "encryptedMetadata", default)]
    pub encrypted_metadata: String,
}

#[derive(Debug, Deserialize)]
pub struct ReportBody {
    pub reports: Vec<ReportEntry>,
}

#[derive(Debug, Serialize)]
struct ReportResponse {
    accepted: usize,
}

/// `POST /v1/report`. Validates the schema, converts hex RPIs to 16-byte
/// binaries, and performs an idempotent upsert batch.
pub async fn report(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReportBody>,
) -> std::result::Result<Response, VailixError> {
    if body.reports.len() > MAX_REPORT_BATCH {
        return Err(VailixError::DecodeError(format!(
            "report batch of {} exceeds the {} entry cap",
            body.reports.len(),
            MAX_REPORT_BATCH
        )));
    }

    let mut entries = Vec::with_capacity(body.reports.len());
    for entry in body.reports {
        let rpi = Rpi::from_hex(&entry.rpi)
            .ok_or_else(|| VailixError::DecodeError(format!("invalid rpi: {}", entry.rpi)))?;
        if entry.encrypted_metadata.len() > MAX_METADATA_BYTES {
            return Err(VailixError::MetadataTooLarge {
                size: entry.encrypted_metadata.len(),
                max: MAX_METADATA_BYTES,
            });
        }
        let metadata = if entry.encrypted_metadata.is_empty() {
            None
        } else {
            Some(entry.encrypted_metadata)
        };
        entries.push((rpi, metadata));
    }

    state.store.upsert_batch(&entries)?;

    Ok((StatusCode::CREATED, Json(ReportResponse { accepted: entries.len() })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub since: i64,
    pub cursor: Option<String>,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "bin".to_string()
}

const DOWNLOAD_PAGE_LIMIT: i64 = 20_000;

/// `GET /v1/download`. `since` and `cursor` are AND-applied; the response
/// carries `x-vailix-next-cursor`, empty when exhausted.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DownloadQuery>,
) -> std::result::Result<Response, VailixError> {
    let cursor = query
        .cursor
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>())
        .transpose()
        .map_err(|_| VailixError::DecodeError("invalid cursor".into()))?;

    let page = state.store.download(query.since, cursor, DOWNLOAD_PAGE_LIMIT)?;

    let mut headers = HeaderMap::new();
    let next_cursor = page.next_cursor.map(|c| c.to_string()).unwrap_or_default();
    headers.insert(
        "x-vailix-next-cursor",
        HeaderValue::from_str(&next_cursor).unwrap_or_else(|_| HeaderValue::from_static("")),
    );

    if query.format == "json" {
        let body = page
            .records
            .iter()
            .map(|r| JsonRecord::from(r))
            .collect::<Vec<_>>();
        Ok((headers, Json(body)).into_response())
    } else {
        let bytes = codec::encode(&page.records);
        Ok((
            headers,
            [("content-type", "application/octet-stream")],
            bytes,
        )
            .into_response())
    }
}

#[derive(Serialize)]
struct JsonRecord {
    rpi: String,
    #[serde(rename = "reportedAt")]
    reported_at_ms: f64,
    #[serde(rename = "encryptedMetadata")]
    metadata: String,
}

impl From<&DownloadRecord> for JsonRecord {
    fn from(r: &DownloadRecord) -> Self {
        Self {
            rpi: r.rpi.to_hex(),
            reported_at_ms: r.reported_at_ms,
            metadata: r.metadata.clone(),
        }
    }
}

/// `/health` — outside the authenticated surface, bypasses the secret
/// check entirely (wired up in `server::build_router`, not behind the
/// auth middleware layer).
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}
