//! The realized stage sequence of one pipeline session.

use std::fmt::Write as _;
use std::time::Instant;

use tracing::{debug, warn};

use crate::buffer::ImageBuffer;
use crate::error::{Error, Result};
use crate::format::PixelFormat;
use crate::negotiation::{Negotiation, NegotiationError};
use crate::observability;
use crate::pipeline::PipelineState;
use crate::stage::{Stage, StageRegistry};

/// Ordered stage instances between source and sink.
///
/// Every stage is created from the registry and bound to the formats the
/// negotiation planned for it. The chain exclusively owns its stages; they
/// are destroyed with it.
pub struct FilterChain {
    stages: Vec<Box<dyn Stage>>,
    source_format: PixelFormat,
    sink_format: PixelFormat,
    state: PipelineState,
    span_pipeline: Option<String>,
}

impl FilterChain {
    /// Instantiate and bind every stage of `negotiation`.
    pub fn build(negotiation: &Negotiation, registry: &StageRegistry) -> Result<Self> {
        let mut stages = Vec::with_capacity(negotiation.stages.len());
        for planned in &negotiation.stages {
            let mut stage = registry
                .create(&planned.name)
                .ok_or_else(|| NegotiationError::stage_unavailable(&planned.name))?;
            if !stage.set_video_format(&planned.input, &planned.output) {
                warn!(
                    "stage '{}' refused {} -> {}",
                    planned.name, planned.input, planned.output
                );
                return Err(Error::StageActivationFailed {
                    stage: planned.name.clone(),
                });
            }
            debug!("stage '{}' bound: {} -> {}", planned.name, planned.input, planned.output);
            stages.push(stage);
        }

        Ok(Self {
            stages,
            source_format: negotiation.source_format,
            sink_format: negotiation.sink_format,
            state: PipelineState::Stopped,
            span_pipeline: None,
        })
    }

    /// Check format continuity from `source` through every stage to `sink`.
    ///
    /// The first broken edge is reported; a broken sink edge names the
    /// stage `"sink"`.
    pub fn validate(&self, source: &PixelFormat, sink: &PixelFormat) -> Result<()> {
        let mut expected = *source;
        for stage in &self.stages {
            let (input, output) =
                stage
                    .video_format()
                    .ok_or_else(|| Error::StageActivationFailed {
                        stage: stage.name().to_string(),
                    })?;
            if input != expected {
                return Err(Error::FormatMismatch {
                    stage: stage.name().to_string(),
                    expected,
                    actual: input,
                });
            }
            expected = output;
        }
        if expected != *sink {
            return Err(Error::FormatMismatch {
                stage: "sink".to_string(),
                expected: *sink,
                actual: expected,
            });
        }
        Ok(())
    }

    /// Activate or deactivate every stage, in chain order.
    ///
    /// Activation stops at the first refusal and reports it; the caller is
    /// expected to roll back. Deactivation always reaches every stage.
    pub fn set_status(&mut self, state: PipelineState) -> Result<()> {
        if state.is_active() {
            for stage in &mut self.stages {
                if !stage.set_status(state) {
                    warn!("stage '{}' refused {}", stage.name(), state);
                    return Err(Error::StageActivationFailed {
                        stage: stage.name().to_string(),
                    });
                }
            }
        } else {
            for stage in &mut self.stages {
                if !stage.set_status(state) {
                    warn!("stage '{}' did not acknowledge {}", stage.name(), state);
                }
            }
        }
        self.state = state;
        Ok(())
    }

    /// Whether stages currently accept buffers.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Wrap every stage transform in a `stage` span of `pipeline`.
    pub fn set_stage_spans(&mut self, pipeline: Option<&str>) {
        self.span_pipeline = pipeline.map(str::to_string);
    }

    /// Run `buffer` through every stage in order.
    pub fn process(&mut self, buffer: &mut ImageBuffer) -> Result<()> {
        if !self.is_active() {
            return Err(Error::InvalidState {
                operation: "process buffers",
                state: self.state,
            });
        }
        for stage in &mut self.stages {
            let _span = self
                .span_pipeline
                .as_deref()
                .map(|p| observability::span_stage(p, stage.name()).entered());
            let start = Instant::now();
            stage.transform(buffer)?;
            observability::record_stage_time(stage.name(), start.elapsed());
        }
        Ok(())
    }

    /// Stage names in order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether source output goes straight to the sink.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Format entering the chain.
    pub fn source_format(&self) -> PixelFormat {
        self.source_format
    }

    /// Format leaving the chain.
    pub fn sink_format(&self) -> PixelFormat {
        self.sink_format
    }

    /// Human-readable description, e.g.
    /// `source(BA81 640x480 @ 30/1) ! debayer ! sink(RGB3 640x480 @ 30/1)`.
    pub fn describe(&self) -> String {
        let mut out = format!("source({})", self.source_format);
        for stage in &self.stages {
            let _ = write!(out, " ! {}", stage.name());
        }
        let _ = write!(out, " ! sink({})", self.sink_format);
        out
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("stages", &self.stage_names())
            .field("source_format", &self.source_format)
            .field("sink_format", &self.sink_format)
            .field("state", &self.state)
            .finish()
    }
}
