//! Observability: metrics and tracing.
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `camcore_buffers_pushed` | Counter | Buffers accepted into a pipeline queue |
//! | `camcore_buffers_delivered` | Counter | Buffers handed to a sink |
//! | `camcore_buffers_dropped` | Counter | Buffers returned early, labelled by reason |
//! | `camcore_negotiation_failures` | Counter | Negotiations without a result |
//! | `camcore_queue_depth` | Gauge | Buffers waiting for the worker |
//! | `camcore_stage_time_ns` | Histogram | Per-buffer stage time |
//!
//! Nothing is exported unless the application installs a `metrics` recorder.
//!
//! ## Tracing
//!
//! The worker thread runs inside a `pipeline` span; stage transforms can be
//! wrapped in `stage` spans. Both are toggled by [`TracingConfig`].

mod metrics;
mod tracing_support;

pub use metrics::{
    PipelineMetrics, TimerGuard, init_metrics, record_buffer_delivered, record_buffer_dropped,
    record_buffer_pushed, record_negotiation_failure, record_queue_depth, record_stage_time,
};
pub use tracing_support::{
    TracingConfig, instrument_pipeline, span_pipeline, span_stage, trace_state_change,
};
