// Unified error taxonomy for the vailix core and server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::result;
use thiserror::Error;

pub type Result<T> = result::Result<T, VailixError>;

/// Error taxonomy. Variant names track the component contracts directly:
/// see §7 of the specification for the propagation policy each variant
/// carries.
#[derive(Debug, Error)]
pub enum VailixError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("key storage unavailable: {0}")]
    KeyStorageUnavailable(String),

    #[error("local store I/O failure: {0}")]
    StoreIo(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("cipher error: {0}")]
    CipherError(String),

    #[error("metadata too large: {size} bytes exceeds cap of {max} bytes")]
    MetadataTooLarge { size: usize, max: usize },

    #[error("auth rejected: {0}")]
    AuthRejected(&'static str),

    #[error("rate limited")]
    RateLimited,

    #[error("internal error: {0}")]
    Internal(String),
}

impl VailixError {
    pub fn store_io(msg: impl Into<String>) -> Self {
        Self::StoreIo(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeError(msg.into())
    }

    pub fn cipher(msg: impl Into<String>) -> Self {
        Self::CipherError(msg.into())
    }
}

impl From<rusqlite::Error> for VailixError {
    fn from(e: rusqlite::Error) -> Self {
        VailixError::StoreIo(e.to_string())
    }
}

impl From<std::io::Error> for VailixError {
    fn from(e: std::io::Error) -> Self {
        VailixError::StoreIo(e.to_string())
    }
}

impl From<reqwest::Error> for VailixError {
    fn from(e: reqwest::Error) -> Self {
        VailixError::NetworkError(e.to_string())
    }
}

impl From<serde_json::Error> for VailixError {
    fn from(e: serde_json::Error) -> Self {
        VailixError::DecodeError(e.to_string())
    }
}

impl From<toml::de::Error> for VailixError {
    fn from(e: toml::de::Error) -> Self {
        VailixError::ConfigInvalid(e.to_string())
    }
}

impl From<config::ConfigError> for VailixError {
    fn from(e: config::ConfigError) -> Self {
        VailixError::ConfigInvalid(e.to_string())
    }
}

/// Server-side mapping to an HTTP response. Never includes the triggering
/// client's address; see `server::middleware` for why that value never
/// reaches this layer.
impl IntoResponse for VailixError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            VailixError::ConfigInvalid(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_invalid"),
            VailixError::KeyStorageUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "key_storage_unavailable")
            }
            VailixError::StoreIo(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_io"),
            VailixError::NetworkError(_) => (StatusCode::BAD_GATEWAY, "network_error"),
            VailixError::DecodeError(_) => (StatusCode::BAD_REQUEST, "decode_error"),
            VailixError::CipherError(_) => (StatusCode::BAD_REQUEST, "cipher_error"),
            VailixError::MetadataTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "metadata_too_large"),
            VailixError::AuthRejected(reason) if *reason == "attestation" => {
                (StatusCode::FORBIDDEN, "auth_rejected")
            }
            VailixError::AuthRejected(_) => (StatusCode::UNAUTHORIZED, "auth_rejected"),
            VailixError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            VailixError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
