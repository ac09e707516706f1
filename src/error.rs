//! Error types for the scan engine.

use thiserror::Error;

/// Failures of a result store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store lock poisoned")]
    Poisoned,
}

/// Errors surfaced by the scan coordinator and configuration loading.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("result store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("no scan in progress; start or resume a scan first")]
    NoActiveScan,

    #[error("scan was restarted or reset while the batch was running")]
    Superseded,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
