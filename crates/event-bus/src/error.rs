//! Event bus error types.

use thiserror::Error;

/// Errors returned by event handlers.
///
/// These are reported on the bus error channel; they never propagate to the
/// publisher.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Failed to deserialize an event payload.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// A handler-specific error.
    #[error("Handler error: {0}")]
    Failed(String),
}

/// Errors raised while building an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("missing envelope field: {0}")]
    MissingField(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
