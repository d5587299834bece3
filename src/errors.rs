use std::time::Duration;

use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- RemoteError -----------------------------------------------------------

/// Failure reported by the remote sandbox API.
///
/// `Clone` because a single connect or watch outcome is handed to every caller
/// awaiting the same shared operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("sandbox '{0}' not found")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote call failed: {0}")]
    Remote(String),
}

impl RemoteError {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }
}

// -----------------------------------------------------------------------------
// ----- PoolError -------------------------------------------------------------

/// Errors surfaced to callers of `acquire`.
///
/// Teardown failures never show up here; they are logged and swallowed.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("connect to sandbox '{key}' failed: {source}")]
    Connect { key: String, source: RemoteError },

    #[error("watch on {key} failed: {source}")]
    Watch { key: String, source: RemoteError },

    #[error("entry for {key} was evicted before setup completed")]
    Evicted { key: String },

    #[error("setup task for {key} did not complete: {reason}")]
    Aborted { key: String, reason: String },
}

impl PoolError {
    /// The remote failure behind this error, if there was one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            PoolError::Connect { source, .. } | PoolError::Watch { source, .. } => Some(source),
            PoolError::Evicted { .. } | PoolError::Aborted { .. } => None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
