//! Error types for fleetconf

use crate::coordinator::store::VersionStamp;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Write path ===
    #[error("Another process has updated the config (expected {expected}, found {actual})")]
    Conflict {
        expected: VersionStamp,
        actual: VersionStamp,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // === Codec ===
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    // === Storage ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    // === Fleet ===
    #[error("Probe of {member} failed: {reason}")]
    Probe { member: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    ///
    /// A conflict is recoverable: re-fetch the config and retry against the new stamp.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. } | Error::Probe { .. } | Error::Http(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::InvalidState(_) => StatusCode::PRECONDITION_FAILED,
            Error::MalformedEncoding(_) | Error::InvalidConfig(_) | Error::Serde(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Probe { .. } | Error::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
