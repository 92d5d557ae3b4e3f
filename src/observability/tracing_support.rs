//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};

/// Configuration for tracing behavior.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether to create a span around the pipeline worker.
    pub pipeline_spans: bool,
    /// Whether to create spans around each stage transform.
    pub stage_spans: bool,
    /// Default span level.
    pub level: Level,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            pipeline_spans: true,
            stage_spans: false, // per buffer, can be expensive
            level: Level::INFO,
        }
    }
}

impl TracingConfig {
    /// Create a new tracing config with all spans enabled.
    pub fn all() -> Self {
        Self {
            pipeline_spans: true,
            stage_spans: true,
            level: Level::DEBUG,
        }
    }

    /// Create a minimal config (pipeline spans only).
    pub fn minimal() -> Self {
        Self {
            pipeline_spans: true,
            stage_spans: false,
            level: Level::INFO,
        }
    }

    /// Disable all spans.
    pub fn none() -> Self {
        Self {
            pipeline_spans: false,
            stage_spans: false,
            level: Level::INFO,
        }
    }
}

/// Create a span for a pipeline worker.
///
/// # Example
///
/// ```rust
/// use camcore::observability::span_pipeline;
///
/// let span = span_pipeline("camera-0");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_pipeline(name: &str) -> Span {
    span!(Level::INFO, "pipeline", name = %name)
}

/// Create a span for one stage.
#[inline]
pub fn span_stage(pipeline: &str, stage: &str) -> Span {
    span!(Level::DEBUG, "stage", pipeline = %pipeline, stage = %stage)
}

/// Enter a pipeline span if `config` asks for one.
pub fn instrument_pipeline(config: &TracingConfig, name: &str) -> Option<tracing::span::EnteredSpan> {
    config.pipeline_spans.then(|| span_pipeline(name).entered())
}

/// Log pipeline state change.
#[inline]
pub fn trace_state_change(pipeline: &str, from: &str, to: &str) {
    tracing::info!(
        pipeline = %pipeline,
        from = %from,
        to = %to,
        "pipeline state changed"
    );
}
