//! Service-specific error types

use thiserror::Error;

/// Cycle-level failures.
///
/// Per-item failures (a single probe or deletion) never surface here; they
/// are caught at the item scope and folded into entry state or the recorded
/// last error. A cycle-level failure aborts the remainder of that cycle but
/// leaves the registry as of the last successful cycle.
#[derive(Error, Debug)]
pub enum Error {
    #[error("missing management key; set MANAGEMENT_KEY or store one in the key store")]
    MissingKey,

    #[error("list auth files failed: {0}")]
    Listing(#[source] gateway::Error),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
