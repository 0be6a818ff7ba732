//! Error types for gateway operations

use thiserror::Error;

/// Errors from management API calls and the key store.
#[derive(Debug, Error)]
pub enum Error {
    /// The management call itself came back non-2xx.
    #[error("management API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// No HTTP response was received (network failure, timeout).
    #[error("management API request failed: {0}")]
    Transport(String),

    #[error("key store error: {0}")]
    Store(String),
}

impl Error {
    /// HTTP status carried by this error, 0 if no response was received.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Api { status, .. } => *status,
            Error::Transport(_) | Error::Store(_) => 0,
        }
    }
}

/// Result alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;
