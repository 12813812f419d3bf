// HTTP collaborator used by the report pipeline (C5) and matcher (C6).
// Grounded on the teacher's `client::StorageNodeClient` (reqwest client
// builder with a timeout, bearer/secret header attachment, status-code
// mapping to `NetworkError`), generalized from a single storage-node base
// URL to the report/download split the spec's two endpoints require.

use crate::error::{Result, VailixError};
use crate::types::DownloadRecord;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone)]
pub struct VailixClientConfig {
    pub report_url: String,
    pub download_url: String,
    pub app_secret: String,
    pub attest_token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for VailixClientConfig {
    fn default() -> Self {
        Self {
            report_url: "http://localhost:8080".to_string(),
            download_url: "http://localhost:8080".to_string(),
            app_secret: String::new(),
            attest_token: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Serialize)]
struct ReportEntry {
    rpi: String,
    #[serde(rename = "encryptedMetadata")]
    encrypted_metadata: String,
}

#[derive(Serialize)]
struct ReportBody {
    reports: Vec<ReportEntry>,
}

pub struct VailixHttpClient {
    http: reqwest::Client,
    config: VailixClientConfig,
}

pub struct DownloadPage {
    pub records: Vec<DownloadRecord>,
    pub next_cursor: Option<String>,
}

impl VailixHttpClient {
    pub fn new(config: VailixClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .map_err(|e| VailixError::network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// POST `/v1/report` with the RPI/encrypted-metadata pairs built by
    /// C5. Returns `Ok(true)` iff the response status is 2xx.
    pub async fn submit_report(&self, entries: Vec<(String, String)>) -> Result<bool> {
        let url = format!("{}/v1/report", self.config.report_url.trim_end_matches('/'));
        let body = ReportBody {
            reports: entries
                .into_iter()
                .map(|(rpi, encrypted_metadata)| ReportEntry { rpi, encrypted_metadata })
                .collect(),
        };

        let mut builder = self
            .http
            .post(&url)
            .header("x-vailix-secret", &self.config.app_secret)
            .json(&body);

        if let Some(token) = &self.config.attest_token {
            builder = builder.header("x-attest-token", token);
        }

        let response = builder.send().await?;
        Ok(response.status().is_success())
    }

    /// GET one page of `/v1/download`, following the server's cursor
    /// contract: `since` is fixed for the whole pass, `cursor` advances.
    pub async fn download_page(&self, since: f64, cursor: Option<&str>) -> Result<DownloadPage> {
        let mut url = format!(
            "{}/v1/download?since={}&format=bin",
            self.config.download_url.trim_end_matches('/'),
            since as u64
        );
        if let Some(cursor) = cursor {
            url.push_str(&format!("&cursor={cursor}"));
        }

        let response = self
            .http
            .get(&url)
            .header("x-vailix-secret", &self.config.app_secret)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED || response.status() == StatusCode::FORBIDDEN {
            return Err(VailixError::network(format!(
                "download rejected: {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(VailixError::network(format!(
                "download failed: {}",
                response.status()
            )));
        }

        let next_cursor = response
            .headers()
            .get("x-vailix-next-cursor")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(String::from);

        let bytes = response.bytes().await?;
        let records = crate::codec::decode(&bytes);

        Ok(DownloadPage { records, next_cursor })
    }
}
