//! Error types for the veneer crate.

use crate::dom::DomException;
use thiserror::Error;

/// Errors that can occur while encoding proxy URLs or coordinating windows.
///
/// Wrapped DOM operations do not use this type: they surface
/// [`DomException`] directly so callers see the same failure shapes the
/// unproxied platform would produce.
#[derive(Error, Debug)]
pub enum VeneerError {
    #[error("Invalid session id {value:?}: {reason}")]
    InvalidSession { value: String, reason: String },

    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Not a proxy URL {url:?}: {reason}")]
    NotProxyUrl { url: String, reason: String },

    #[error("Unknown window: {0}")]
    UnknownWindow(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session token generation failed: {0}")]
    Random(String),

    #[error(transparent)]
    Dom(#[from] DomException),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VeneerError {
    pub(crate) fn not_proxy(url: &str, reason: impl Into<String>) -> Self {
        VeneerError::NotProxyUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for veneer operations.
pub type Result<T> = std::result::Result<T, VeneerError>;
