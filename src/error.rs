//! Typed errors for the parts of the crate whose callers need to tell
//! failure kinds apart.
//!
//! Resource and plumbing errors elsewhere stay on `anyhow` with context; the
//! search path and the upload lifecycle use the enums below so that the HTTP
//! layer can map them to distinct status codes.

use std::time::Duration;

use thiserror::Error;

use crate::models::UploadStatus;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("daily search limit reached ({used} of {limit} used)")]
    QuotaExceeded { used: i64, limit: i64 },

    #[error("{path} query timed out after {}ms", after.as_millis())]
    Timeout { path: &'static str, after: Duration },

    #[error("analytical store query failed: {0}")]
    Backend(String),

    #[error("control-plane store error: {0}")]
    Store(String),
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;

impl SearchError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::Validation(_) => "bad_request",
            SearchError::QuotaExceeded { .. } => "too_many_requests",
            SearchError::Timeout { .. } => "timeout",
            SearchError::Backend(_) | SearchError::Store(_) => "internal",
        }
    }

    pub(crate) fn store(err: anyhow::Error) -> Self {
        SearchError::Store(format!("{:#}", err))
    }

    pub(crate) fn backend(err: anyhow::Error) -> Self {
        SearchError::Backend(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(e: serde_json::Error) -> Self {
        SearchError::Validation(format!("malformed filter: {}", e))
    }
}

/// Rejected upload lifecycle move.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid upload transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: UploadStatus,
    pub to: UploadStatus,
}
