//! Error types for camcore.

use thiserror::Error;

use crate::format::PixelFormat;
use crate::negotiation::NegotiationError;
use crate::pipeline::PipelineState;

/// Result type alias using camcore's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for camcore operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Format negotiation failed.
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Two adjacent chain members disagree on the format between them.
    #[error("format mismatch at '{stage}': expected {expected}, got {actual}")]
    FormatMismatch {
        /// Name of the downstream member ("sink" for the sink edge).
        stage: String,
        /// Format the downstream member is bound to consume.
        expected: PixelFormat,
        /// Format the upstream member produces.
        actual: PixelFormat,
    },

    /// A stage refused to change state.
    #[error("stage '{stage}' failed to activate")]
    StageActivationFailed {
        /// Stage name.
        stage: String,
    },

    /// The source refused a format or state change.
    #[error("source rejected: {0}")]
    SourceRejected(String),

    /// The sink refused a format or state change.
    #[error("sink rejected: {0}")]
    SinkRejected(String),

    /// The capture device disappeared.
    #[error("device lost: {device}")]
    DeviceLost {
        /// Device identifier (serial).
        device: String,
    },

    /// No source attached.
    #[error("no source attached")]
    NoSource,

    /// No sink attached.
    #[error("no sink attached")]
    NoSink,

    /// Operation not allowed in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State at the time of the attempt.
        state: PipelineState,
    },

    /// Spawning the worker thread failed.
    #[error("worker thread error: {0}")]
    Thread(#[from] std::io::Error),
}

impl Error {
    /// Create a source rejection error.
    pub fn source_rejected(what: impl Into<String>) -> Self {
        Self::SourceRejected(what.into())
    }

    /// Create a sink rejection error.
    pub fn sink_rejected(what: impl Into<String>) -> Self {
        Self::SinkRejected(what.into())
    }
}
