//! Typed errors for dispatch and fan-out.

use pipes_store::{IdRef, IdRefParseError, StoreError};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, PipesError>;

#[derive(Debug, Error)]
pub enum PipesError {
    /// Change marker could not be advanced. Nothing was queued.
    #[error("failed to advance change marker for {source_id}: {cause}")]
    MarkerWrite {
        source_id: IdRef,
        #[source]
        cause: StoreError,
    },

    /// One envelope could not be queued. Sibling envelopes are unaffected.
    #[error("failed to enqueue envelope for sink {sink}: {cause}")]
    EnvelopeSubmit {
        sink: IdRef,
        #[source]
        cause: StoreError,
    },

    /// Payload or snapshot could not be decoded. Retrying cannot help.
    #[error("malformed payload: {0}")]
    Deserialization(String),

    #[error("failed to serialize {what}: {cause}")]
    Serialization {
        what: &'static str,
        #[source]
        cause: serde_json::Error,
    },

    /// `configure` or `id_ref` produced a key that cannot be stored.
    /// Raised before the marker moves.
    #[error("invalid key: {0}")]
    InvalidKey(#[from] IdRefParseError),

    #[error("no pipe registered under '{0}'")]
    UnknownPipe(String),

    #[error("pipe '{0}' registered twice")]
    DuplicatePipe(String),

    /// Sink read or write failed. Safe to retry by re-delivery.
    #[error("failed to write sink {sink}: {cause}")]
    SinkWrite {
        sink: IdRef,
        #[source]
        cause: StoreError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipesError {
    /// Permanent errors are dead-lettered; everything else is retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PipesError::Deserialization(_)
                | PipesError::Serialization { .. }
                | PipesError::InvalidKey(_)
                | PipesError::UnknownPipe(_)
                | PipesError::DuplicatePipe(_)
                | PipesError::Config(_)
        )
    }

    pub(crate) fn decode(what: &str, err: impl std::fmt::Display) -> Self {
        PipesError::Deserialization(format!("{what}: {err}"))
    }
}
