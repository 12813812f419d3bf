// Configuration surfaces (§6, §12). Loaded the way the teacher's
// `storage_node.rs::load_config` loads `AppConfig`: a serde-deserializable
// struct built from `config::Config`, TOML file under environment
// overrides.

use crate::error::{Result, VailixError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub report_url: String,
    pub download_url: String,
    pub app_secret: String,
    #[serde(default = "default_rpi_duration_ms")]
    pub rpi_duration_ms: u64,
    #[serde(default)]
    pub rescan_interval_ms: u64,
    #[serde(default = "default_report_days")]
    pub report_days: u32,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_rpi_duration_ms() -> u64 {
    900_000
}
fn default_report_days() -> u32 {
    14
}
fn default_db_path() -> String {
    "vailix-local.db".to_string()
}

impl ClientConfig {
    /// Synchronous, I/O-free validation, called from the lifecycle's
    /// `create()` before any heavyweight initialization. This is where
    /// `ConfigInvalid` for an impossible option combination is raised.
    pub fn validate(&self) -> Result<()> {
        if self.report_url.is_empty() || self.download_url.is_empty() {
            return Err(VailixError::ConfigInvalid(
                "reportUrl and downloadUrl are required".into(),
            ));
        }
        if self.app_secret.is_empty() {
            return Err(VailixError::ConfigInvalid("appSecret is required".into()));
        }
        if self.rescan_interval_ms > self.rpi_duration_ms {
            return Err(VailixError::ConfigInvalid(
                "rescanIntervalMs must be <= rpiDurationMs".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max: 300,
            window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    pub secret: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub attest_provider: Option<String>,
}

fn default_database_url() -> String {
    "vailix-server.db".to_string()
}
fn default_retention_days() -> u32 {
    14
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl ServerConfig {
    /// Loads from an optional TOML file, then layers the environment
    /// variable names enumerated in §6 on top (`MONGODB_URI` is kept as
    /// the documented override name for `database_url`; see DESIGN.md for
    /// why the collection itself is SQLite, not Mongo).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().set_default("retention_days", 14i64)?;

        if let Some(path) = path {
            if path.exists() {
                builder = builder.add_source(config::File::from(path));
            }
        }

        builder = builder
            .add_source(config::Environment::default().try_parsing(true).prefix_separator("_"))
            .set_override_option("database_url", std::env::var("MONGODB_URI").ok())?
            .set_override_option("secret", std::env::var("APP_SECRET").ok())?
            .set_override_option("port", std::env::var("PORT").ok().and_then(|v| v.parse::<i64>().ok()))?
            .set_override_option("host", std::env::var("HOST").ok())?
            .set_override_option(
                "retention_days",
                std::env::var("VAILIX_RETENTION_DAYS").ok().and_then(|v| v.parse::<i64>().ok()),
            )?
            .set_override_option("attest_provider", std::env::var("ATTEST_PROVIDER").ok())?;

        let built = builder.build()?;
        let config: ServerConfig = built.try_deserialize()?;
        if config.secret.is_empty() {
            return Err(VailixError::ConfigInvalid("secret is required".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_rejects_rescan_longer_than_epoch() {
        let cfg = ClientConfig {
            report_url: "http://a".into(),
            download_url: "http://a".into(),
            app_secret: "s".into(),
            rpi_duration_ms: 1000,
            rescan_interval_ms: 2000,
            report_days: 14,
            db_path: "x.db".into(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn client_config_accepts_equal_bounds() {
        let cfg = ClientConfig {
            report_url: "http://a".into(),
            download_url: "http://a".into(),
            app_secret: "s".into(),
            rpi_duration_ms: 1000,
            rescan_interval_ms: 1000,
            report_days: 14,
            db_path: "x.db".into(),
        };
        assert!(cfg.validate().is_ok());
    }
}
