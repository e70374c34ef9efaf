//! Error types for Bloatprobe

use std::io;

use hyper::StatusCode;
use thiserror::Error;

/// Result type for Bloatprobe operations
pub type Result<T> = std::result::Result<T, BloatError>;

/// Errors that can occur in Bloatprobe
#[derive(Debug, Error)]
pub enum BloatError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// TLS material could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// Upload exceeded the configured size ceiling
    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Bytes received (or declared) when the ceiling was hit
        size: u64,
        /// Configured ceiling
        limit: u64,
    },

    /// Upload body could not be read
    #[error("Upload failed: {0}")]
    Ingestion(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl BloatError {
    /// Machine-readable error kind, reported to upload clients
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::ConfigError(_) => "config",
            Self::Tls(_) => "tls",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Ingestion(_) => "ingestion_failed",
            Self::Other(_) => "internal",
        }
    }

    /// HTTP status this error maps to when it reaches a client
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Configured limit carried by policy violations
    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        match self {
            Self::PayloadTooLarge { limit, .. } => Some(*limit),
            _ => None,
        }
    }
}
