//! Fetch error types.

use std::time::Duration;

use thiserror::Error;

/// Errors from object store access.
///
/// Cloneable so a single failed fetch can be reported to every caller that
/// was waiting on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// The object does not exist. Never retried.
    #[error("object not found: {location}")]
    NotFound { location: String },

    /// Credentials were rejected. Never retried.
    #[error("access denied for {location} (HTTP {status})")]
    Unauthorized { location: String, status: u16 },

    /// Connection reset, server error, throttling and similar.
    #[error("transient failure fetching {location}: {reason}")]
    Transient { location: String, reason: String },

    /// A single attempt exceeded the request timeout.
    #[error("request for {location} timed out after {timeout:?}")]
    Timeout { location: String, timeout: Duration },

    /// The store rejected the requested range.
    #[error("invalid range {range} for {location}")]
    InvalidRange { location: String, range: String },

    /// Local I/O failure other than a missing file.
    #[error("I/O error on {location}: {reason}")]
    Io { location: String, reason: String },

    /// Retry budget spent on transient failures.
    #[error("giving up on {location} after {attempts} attempts: {last}")]
    RetriesExhausted {
        location: String,
        attempts: u32,
        last: Box<FetchError>,
    },

    /// The store does not implement the requested operation.
    #[error("operation not supported by store: {0}")]
    Unsupported(String),
}

impl FetchError {
    /// True for failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    /// Maps an HTTP status code to an error, or `None` for success codes.
    pub fn from_status(location: &str, status: u16) -> Option<Self> {
        let location = location.to_string();
        match status {
            200..=299 => None,
            401 | 403 => Some(Self::Unauthorized { location, status }),
            404 | 410 => Some(Self::NotFound { location }),
            408 | 429 | 500..=599 => Some(Self::Transient {
                location,
                reason: format!("HTTP {status}"),
            }),
            416 => Some(Self::InvalidRange {
                location,
                range: "requested range not satisfiable".to_string(),
            }),
            _ => Some(Self::Io {
                location,
                reason: format!("unexpected HTTP {status}"),
            }),
        }
    }
}
