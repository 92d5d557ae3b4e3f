//! Pipeline lifecycle state.

use std::fmt;

/// State of a pipeline session.
///
/// ```text
/// Undefined ──attach source──▶ Stopped ──create + start──▶ Playing
///                                 ▲  ▲                      │   ▲
///                                 │  └────────stop──────────┘   │
///                                 │                         pause resume
///                      reconfigure│                             ▼
///                               Error ◀──negotiation failed── Paused
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineState {
    /// Nothing attached yet, or the pipeline was destroyed.
    #[default]
    Undefined,
    /// Attached and idle.
    Stopped,
    /// Components active, worker not draining.
    Paused,
    /// Worker draining the queue.
    Playing,
    /// Chain construction failed; needs reconfiguration.
    Error,
}

impl PipelineState {
    /// Upper-case name, as used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "UNDEFINED",
            Self::Stopped => "STOPPED",
            Self::Paused => "PAUSED",
            Self::Playing => "PLAYING",
            Self::Error => "ERROR",
        }
    }

    /// Whether components are activated (playing or paused).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_undefined() {
        assert_eq!(PipelineState::default(), PipelineState::Undefined);
    }

    #[test]
    fn test_active_states() {
        assert!(PipelineState::Playing.is_active());
        assert!(PipelineState::Paused.is_active());
        assert!(!PipelineState::Stopped.is_active());
        assert!(!PipelineState::Error.is_active());
        assert_eq!(PipelineState::Paused.to_string(), "PAUSED");
    }
}
