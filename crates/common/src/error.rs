//! Common error types for Sandwich Hub components.

use thiserror::Error;

/// Errors raised by collaborators of the monitoring layer (storage,
/// realtime channel, external integrations).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Operation did not finish in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Realtime channel could not be introspected
    #[error("Realtime channel error: {0}")]
    Realtime(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Stable, low-cardinality name of the variant, suitable as a metric label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::Database(_) => "database",
            HubError::Timeout(_) => "timeout",
            HubError::Realtime(_) => "realtime",
            HubError::Internal(_) => "internal",
        }
    }
}
