//! Error types for the sitesync layer
//!
//! Every failure a caller can observe is one of these variants. Transient
//! kinds (timeout, network, 5xx) are retried by the request client up to a
//! bound; permanent kinds surface immediately. Nothing here is fatal to the
//! host process.

use std::time::Duration;

use thiserror::Error;

use crate::client::transport::ApiResponse;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, SyncError>;

/// Synchronization error taxonomy
#[derive(Error, Debug)]
pub enum SyncError {
    /// The circuit breaker rejected the call before any network attempt.
    /// Distinct from a network failure: the backend was never contacted.
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("server returned HTTP {status}")]
    HttpStatus { status: u16 },

    /// HTTP 429. The retry-after hint is surfaced to the caller, never
    /// auto-waited.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// HTTP 401. Signals a re-auth need to collaborators; not retried here.
    #[error("authentication required")]
    AuthRequired,

    /// HTTP 403. Terminal.
    #[error("access denied")]
    AccessDenied,

    /// 2xx response with an application-level `success: false` body.
    #[error("application error: {message}")]
    Application { message: String },

    /// The server reported a lock or conflict. Terminal; never retried.
    #[error("server reported a conflict")]
    Conflict(Box<ApiResponse>),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl SyncError {
    /// Whether the request client may retry this outcome.
    ///
    /// Application errors are retryable only when the caller has explicitly
    /// flagged them as such.
    pub fn is_retryable(&self, retry_app_errors: bool) -> bool {
        match self {
            SyncError::Timeout(_) | SyncError::Network(_) | SyncError::HttpStatus { .. } => true,
            SyncError::Application { .. } => retry_app_errors,
            _ => false,
        }
    }

    /// One human-readable message per error kind, suitable for a toast or
    /// status bar. The raw error is always logged separately.
    pub fn user_message(&self) -> &'static str {
        match self {
            SyncError::CircuitOpen(_) => {
                "Service is temporarily unstable. Please try again shortly."
            }
            SyncError::Timeout(_) => "Request timed out. Please try again.",
            SyncError::Network(_) => "Please check your network connection.",
            SyncError::HttpStatus { .. } => {
                "A server error occurred. Please try again shortly."
            }
            SyncError::RateLimited { .. } => {
                "Too many requests. Please wait a moment and try again."
            }
            SyncError::AuthRequired => "Authentication required. Please sign in again.",
            SyncError::AccessDenied => "You do not have permission to do that.",
            SyncError::Application { .. } => "The server rejected the request.",
            SyncError::Conflict(_) => {
                "Someone else changed this record. Please review the conflict."
            }
            SyncError::Validation(_) => "Invalid input.",
            SyncError::Storage(_) => "Local storage failed. Changes may not be saved.",
        }
    }
}
