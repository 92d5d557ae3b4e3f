//! Negotiation error types.

use thiserror::Error;

use crate::caps::CapsSet;
use crate::catalog::FormatCatalog;

/// Error during format negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// The source reported no formats at all.
    #[error("source reports no available formats")]
    NoAvailableFormats,

    /// Neither a direct match nor any stage chain bridges the two sides.
    #[error("no compatible format:\n  available: {available}\n  requested: {requested}")]
    NoCompatibleFormat {
        /// Formats the source offered.
        available: String,
        /// Formats the consumer asked for.
        requested: String,
    },

    /// A planned stage is not registered.
    #[error("stage not available: {name}")]
    StageUnavailable {
        /// Stage name.
        name: String,
    },
}

impl NegotiationError {
    /// Create a "no compatible format" error from both sides.
    pub fn no_compatible_format(available: &FormatCatalog, requested: &CapsSet) -> Self {
        Self::NoCompatibleFormat {
            available: available.to_string(),
            requested: requested.to_string(),
        }
    }

    /// Create a "stage not available" error.
    pub fn stage_unavailable(name: impl Into<String>) -> Self {
        Self::StageUnavailable { name: name.into() }
    }
}
