//! Common error types for Rollcall components.

use thiserror::Error;

/// Result alias used across Rollcall components
pub type RollcallResult<T> = Result<T, RollcallError>;

/// Common errors across Rollcall components
#[derive(Debug, Error)]
pub enum RollcallError {
    /// Missing/invalid address, bad schema, undecodable descriptor
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// RPC dial, Redis or database connectivity failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Persisted state could not be (de)serialized
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Identity, node, cluster or record lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Life-proof found nothing reclaimable; the stored bound was raised
    #[error("No reclaimable identity in cluster {name}; bound raised to {new_bound}")]
    Exhaustion { name: String, new_bound: u32 },

    /// An RPC exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A concurrent writer changed persisted state first
    #[error("Conflicting update: {0}")]
    Conflict(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Node status change not permitted
    #[error("Invalid status transition for node {node}: {from} -> {to}")]
    InvalidTransition {
        node: String,
        from: String,
        to: String,
    },
}

impl RollcallError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Configuration(_) => 500,
            Self::Connection(_) => 503,
            Self::Consistency(_) => 500,
            Self::NotFound(_) => 404,
            Self::Exhaustion { .. } => 503,
            Self::Timeout(_) => 504,
            Self::Conflict(_) => 409,
            Self::InvalidInput(_) => 400,
            Self::InvalidTransition { .. } => 409,
        }
    }

    /// Returns true if a caller may reasonably retry this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Conflict(_) | Self::Exhaustion { .. }
        )
    }

    /// Stable kind label used on the RPC wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Connection(_) => "connection",
            Self::Consistency(_) => "consistency",
            Self::NotFound(_) => "not_found",
            Self::Exhaustion { .. } => "exhaustion",
            Self::Timeout(_) => "timeout",
            Self::Conflict(_) => "conflict",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

impl From<serde_json::Error> for RollcallError {
    fn from(err: serde_json::Error) -> Self {
        Self::Consistency(err.to_string())
    }
}
