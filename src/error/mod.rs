use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Failure taxonomy for the sync client.
///
/// Every failure path in the crate resolves to one of these variants; nothing
/// is swallowed. Fetch callers receive them as `Err`, stream subscribers
/// through their registered error handlers.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Transient network failure: {0}")]
    Transient(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    #[error("Authentication required")]
    AuthRequired,

    #[error("Operation cancelled by caller")]
    Cancelled,

    #[error("Malformed frame: {0}")]
    Decode(String),

    /// The backend reported a problem in-band on the stream without closing
    /// it.
    #[error("Backend reported: {0}")]
    Backend(String),

    #[error("Stream closed unexpectedly")]
    StreamClosed,

    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Rejection observed through a coalesced in-flight request. All callers
    /// joined on one fetch see the same underlying failure.
    #[error("{0}")]
    Shared(Arc<SyncError>),
}

impl SyncError {
    /// Whether the retry primitive may attempt the operation again.
    ///
    /// Cancellation and authentication failures always propagate on first
    /// occurrence; token refresh is the token provider's job, not ours.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Cancelled | SyncError::AuthRequired => false,
            SyncError::Config(_) | SyncError::Decode(_) | SyncError::Backend(_) => false,
            SyncError::UnexpectedStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            SyncError::Transient(_) | SyncError::StreamClosed | SyncError::ConnectTimeout(_) => {
                true
            }
            SyncError::Shared(inner) => inner.is_retryable(),
        }
    }

    /// Map an HTTP error status to the right variant. 401/403 become
    /// `AuthRequired` so the retry primitive short-circuits.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::AuthRequired,
            _ => SyncError::UnexpectedStatus { status, body },
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
