//! Pipeline state machine and worker thread.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::queue::{BufferQueue, Popped, QueueStats};
use super::{PipelineState, lock};
use crate::buffer::ImageBuffer;
use crate::caps::{CapsSet, FormatCaps};
use crate::catalog::FormatCatalog;
use crate::chain::FilterChain;
use crate::error::{Error, Result};
use crate::format::PixelFormat;
use crate::interface::{NoopPropertyFilter, PropertyFilter, Sink, Source};
use crate::negotiation::{Negotiation, NegotiationConfig, NegotiationEngine, NegotiationError};
use crate::observability::{self, PipelineMetrics, TracingConfig};
use crate::stage::StageRegistry;

type Shared<T> = Arc<Mutex<Box<T>>>;

// ============================================================================
// Configuration
// ============================================================================

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How often an idle worker wakes up to re-check the state.
    pub wake_interval: Duration,
    /// Worker thread name, also used as the pipeline name in logs and metrics.
    pub thread_name: String,
    /// Negotiation policy.
    pub negotiation: NegotiationConfig,
    /// Span settings.
    pub tracing: TracingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wake_interval: Duration::from_millis(500),
            thread_name: "camcore-pipeline".to_string(),
            negotiation: NegotiationConfig::default(),
            tracing: TracingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Set the idle wake interval.
    pub fn with_wake_interval(mut self, interval: Duration) -> Self {
        self.wake_interval = interval;
        self
    }

    /// Set the worker thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the negotiation policy.
    pub fn with_negotiation(mut self, negotiation: NegotiationConfig) -> Self {
        self.negotiation = negotiation;
        self
    }

    /// Set span settings.
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }
}

// ============================================================================
// PipelineHandle
// ============================================================================

/// Cloneable entry point for producers.
///
/// Handed to the source on attach. Pushing never blocks beyond the queue
/// mutex and is safe from any thread.
#[derive(Clone)]
pub struct PipelineHandle {
    queue: BufferQueue,
    name: Arc<str>,
}

impl PipelineHandle {
    /// Deliver a captured buffer.
    ///
    /// While the pipeline is neither playing nor paused the buffer is handed
    /// straight back to the caller.
    pub fn push_image(&self, buffer: ImageBuffer) -> std::result::Result<(), ImageBuffer> {
        match self.queue.push(buffer) {
            Ok(()) => {
                observability::record_buffer_pushed(&self.name);
                Ok(())
            }
            Err(buffer) => {
                debug!(
                    "pipeline '{}' not running, returning buffer {}",
                    self.name,
                    buffer.meta().sequence
                );
                observability::record_buffer_dropped(&self.name, "stopped");
                Err(buffer)
            }
        }
    }

    /// Current pipeline state.
    pub fn status(&self) -> PipelineState {
        self.queue.status()
    }
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

// ============================================================================
// PipelineManager
// ============================================================================

/// Connects one source to one sink through a negotiated filter chain.
///
/// ```text
/// Source ──push_image──▶ BufferQueue ──worker──▶ PropertyFilter ──▶ FilterChain ──▶ Sink
///    ▲                                                                               │
///    └────────────────────────────── requeue_buffer ─────────────────────────────────┘
/// ```
///
/// Control operations take `&mut self` and run on the caller's thread.
/// Buffer dispatch runs on one worker thread per playing session.
pub struct PipelineManager {
    config: PipelineConfig,
    registry: StageRegistry,
    queue: BufferQueue,
    name: Arc<str>,
    source: Option<Shared<dyn Source>>,
    sink: Option<Shared<dyn Sink>>,
    property_filter: Shared<dyn PropertyFilter>,
    available: FormatCatalog,
    requested: CapsSet,
    requested_format: Option<PixelFormat>,
    negotiation: Option<Negotiation>,
    chain: Option<Arc<Mutex<FilterChain>>>,
    worker: Option<JoinHandle<()>>,
}

impl PipelineManager {
    /// Create a manager drawing stages from `registry`.
    pub fn new(registry: StageRegistry) -> Self {
        Self::with_config(registry, PipelineConfig::default())
    }

    /// Create a manager with a custom configuration.
    pub fn with_config(registry: StageRegistry, config: PipelineConfig) -> Self {
        let name: Arc<str> = Arc::from(config.thread_name.as_str());
        Self {
            config,
            registry,
            queue: BufferQueue::new(),
            name,
            source: None,
            sink: None,
            property_filter: Arc::new(Mutex::new(Box::new(NoopPropertyFilter))),
            available: FormatCatalog::default(),
            requested: CapsSet::new(),
            requested_format: None,
            negotiation: None,
            chain: None,
            worker: None,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current state.
    pub fn status(&self) -> PipelineState {
        self.queue.status()
    }

    /// Producer handle for this pipeline.
    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            queue: self.queue.clone(),
            name: self.name.clone(),
        }
    }

    /// Queue statistics.
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    /// Attach the capture source.
    ///
    /// Moves the pipeline from `Undefined` (or `Error`) to `Stopped`. A
    /// source that reports no formats is refused.
    pub fn set_source(&mut self, mut source: Box<dyn Source>) -> Result<()> {
        self.ensure_idle("set source")?;

        let available = source.available_video_formats();
        if available.is_empty() {
            error!("pipeline '{}': source reports no formats", self.name);
            return Err(NegotiationError::NoAvailableFormats.into());
        }

        source.attach(self.handle());
        self.source = Some(Arc::new(Mutex::new(source)));
        self.available = available;
        self.discard_chain();
        self.set_state(PipelineState::Stopped);
        debug!(
            "pipeline '{}': source attached with {} encodings",
            self.name,
            self.available.encodings().len()
        );
        Ok(())
    }

    /// Attach the consumer.
    pub fn set_sink(&mut self, sink: Box<dyn Sink>) -> Result<()> {
        self.ensure_idle("set sink")?;
        self.sink = Some(Arc::new(Mutex::new(sink)));
        self.discard_chain();
        self.leave_error();
        debug!("pipeline '{}': sink attached", self.name);
        Ok(())
    }

    /// Replace the per-buffer property filter.
    pub fn set_property_filter(&mut self, filter: Box<dyn PropertyFilter>) -> Result<()> {
        self.ensure_idle("set property filter")?;
        self.property_filter = Arc::new(Mutex::new(filter));
        Ok(())
    }

    /// Formats reported by the attached source.
    pub fn available_video_formats(&self) -> &FormatCatalog {
        &self.available
    }

    /// Request one concrete output format.
    pub fn set_video_format(&mut self, format: PixelFormat) -> Result<()> {
        self.set_requested_caps(CapsSet::from(FormatCaps::from(format)))?;
        self.requested_format = Some(format);
        Ok(())
    }

    /// Request any output format matching `caps`.
    ///
    /// Empty caps ask for the most capable format the source offers.
    pub fn set_requested_caps(&mut self, caps: CapsSet) -> Result<()> {
        self.ensure_idle("set video format")?;
        debug!("pipeline '{}': requested {}", self.name, caps);
        self.requested = caps;
        self.requested_format = None;
        self.discard_chain();
        self.leave_error();
        Ok(())
    }

    /// Requested output caps.
    pub fn requested_caps(&self) -> &CapsSet {
        &self.requested
    }

    /// Negotiated output format, or the requested one before negotiation.
    pub fn video_format(&self) -> Option<PixelFormat> {
        self.negotiation
            .as_ref()
            .map(|n| n.sink_format)
            .or(self.requested_format)
    }

    /// Result of the last successful negotiation.
    pub fn negotiation(&self) -> Option<&Negotiation> {
        self.negotiation.as_ref()
    }

    /// Description of the current chain, empty when none is built.
    pub fn pipeline_description(&self) -> String {
        self.chain
            .as_ref()
            .map(|c| lock(c).describe())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------------

    /// Deliver a buffer on behalf of the source.
    ///
    /// Buffers arriving while the pipeline is not running go straight back
    /// to the source.
    pub fn push_image(&self, buffer: ImageBuffer) {
        if let Err(buffer) = self.handle().push_image(buffer) {
            self.requeue_buffer(buffer);
        }
    }

    /// Return a buffer to the source.
    pub fn requeue_buffer(&self, buffer: ImageBuffer) {
        match &self.source {
            Some(source) => lock(source).requeue_buffer(buffer),
            None => debug!(
                "pipeline '{}': no source, dropping buffer {}",
                self.name,
                buffer.meta().sequence
            ),
        }
    }

    /// Ask the source to discard incomplete frames.
    pub fn drop_incomplete_frames(&self, drop: bool) -> Result<()> {
        let source = self.source.as_ref().ok_or(Error::NoSource)?;
        lock(source).drop_incomplete_frames(drop);
        Ok(())
    }

    /// Whether the source discards incomplete frames.
    pub fn should_incomplete_frames_be_dropped(&self) -> bool {
        self.source
            .as_ref()
            .is_some_and(|s| lock(s).should_incomplete_frames_be_dropped())
    }

    // ------------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------------

    /// Move the pipeline to `target`.
    ///
    /// Requesting the current state does nothing. `Playing` negotiates and
    /// builds a chain first (or resumes from `Paused`); a failed start rolls
    /// back to `Stopped` before the error is returned. `Error` is only left
    /// by reconfiguring or by a new `Playing` request, never by `Stopped`.
    pub fn set_status(&mut self, target: PipelineState) -> Result<()> {
        let current = self.status();
        if current == target {
            debug!("pipeline '{}' already {}", self.name, target);
            return Ok(());
        }

        match target {
            PipelineState::Playing if current == PipelineState::Paused => self.resume(),
            PipelineState::Playing => {
                self.create_pipeline()?;
                self.start_playing()
            }
            PipelineState::Paused if current == PipelineState::Playing => {
                self.pause();
                Ok(())
            }
            PipelineState::Paused => Err(Error::InvalidState {
                operation: "pause",
                state: current,
            }),
            PipelineState::Stopped if current.is_active() => {
                self.stop_playing();
                Ok(())
            }
            PipelineState::Stopped if current == PipelineState::Error => Err(Error::InvalidState {
                operation: "stop",
                state: current,
            }),
            PipelineState::Stopped if self.source.is_some() => {
                self.set_state(PipelineState::Stopped);
                Ok(())
            }
            PipelineState::Stopped => Err(Error::NoSource),
            PipelineState::Undefined | PipelineState::Error => Err(Error::InvalidState {
                operation: "request this state",
                state: current,
            }),
        }
    }

    /// Negotiate, configure source and sink, and build the filter chain.
    ///
    /// On failure the pipeline enters `Error`, except when the source or
    /// sink is missing, which leaves the state untouched.
    pub fn create_pipeline(&mut self) -> Result<()> {
        self.ensure_idle("rebuild the pipeline")?;
        let source = self.source.clone().ok_or(Error::NoSource)?;
        let sink = self.sink.clone().ok_or(Error::NoSink)?;

        self.discard_chain();
        match self.build_chain(&source, &sink) {
            Ok((negotiation, chain)) => {
                info!("pipeline '{}' created: {}", self.name, chain.describe());
                self.negotiation = Some(negotiation);
                self.chain = Some(Arc::new(Mutex::new(chain)));
                Ok(())
            }
            Err(err) => {
                error!("pipeline '{}' could not be created: {}", self.name, err);
                self.set_state(PipelineState::Error);
                Err(err)
            }
        }
    }

    /// Stop streaming and release source, sink and chain.
    ///
    /// The pipeline ends `Undefined`.
    pub fn destroy_pipeline(&mut self) {
        if self.status().is_active() {
            self.stop_playing();
        }
        self.discard_chain();
        self.source = None;
        self.sink = None;
        self.available = FormatCatalog::default();
        self.set_state(PipelineState::Undefined);
    }

    fn build_chain(
        &self,
        source: &Shared<dyn Source>,
        sink: &Shared<dyn Sink>,
    ) -> Result<(Negotiation, FilterChain)> {
        let negotiation = NegotiationEngine::new(&self.registry)
            .with_config(self.config.negotiation.clone())
            .negotiate(&self.available, &self.requested)?;

        let actual_source = {
            let mut source = lock(source);
            if !source.set_video_format(&negotiation.source_format) {
                return Err(Error::source_rejected(format!(
                    "format {}",
                    negotiation.source_format
                )));
            }
            let pool = lock(sink).buffer_collection();
            if let Some(pool) = pool {
                if !source.set_buffer_collection(pool) {
                    return Err(Error::source_rejected("sink buffer collection"));
                }
            }
            source.video_format().unwrap_or(negotiation.source_format)
        };

        if !lock(sink).set_video_format(&negotiation.sink_format) {
            return Err(Error::sink_rejected(format!(
                "format {}",
                negotiation.sink_format
            )));
        }

        if !lock(&self.property_filter)
            .set_video_format(&negotiation.source_format, &negotiation.source_format)
        {
            return Err(Error::StageActivationFailed {
                stage: "property-filter".to_string(),
            });
        }

        let mut chain = FilterChain::build(&negotiation, &self.registry)?;
        chain.validate(&actual_source, &negotiation.sink_format)?;
        if self.config.tracing.stage_spans {
            chain.set_stage_spans(Some(&self.name));
        }
        Ok((negotiation, chain))
    }

    fn start_playing(&mut self) -> Result<()> {
        // Producers may push as soon as the source starts.
        self.set_state(PipelineState::Playing);
        if let Err(err) = self.activate() {
            error!("pipeline '{}' failed to start: {}", self.name, err);
            self.stop_playing();
            return Err(err);
        }
        info!("pipeline '{}' playing", self.name);
        Ok(())
    }

    fn activate(&mut self) -> Result<()> {
        let source = self.source.clone().ok_or(Error::NoSource)?;
        let sink = self.sink.clone().ok_or(Error::NoSink)?;
        let chain = self
            .chain
            .clone()
            .ok_or(Error::InvalidState {
                operation: "start without a chain",
                state: self.status(),
            })?;

        if !lock(&sink).set_status(PipelineState::Playing) {
            return Err(Error::sink_rejected("start"));
        }
        if !lock(&source).set_status(PipelineState::Playing) {
            return Err(Error::source_rejected("start"));
        }
        lock(&chain).set_status(PipelineState::Playing)?;
        if !lock(&self.property_filter).set_status(PipelineState::Playing) {
            return Err(Error::StageActivationFailed {
                stage: "property-filter".to_string(),
            });
        }
        self.spawn_worker()
    }

    /// Deactivate everything, join the worker and hand leftovers back.
    fn stop_playing(&mut self) {
        self.set_state(PipelineState::Stopped);

        if let Some(source) = &self.source {
            if !lock(source).set_status(PipelineState::Stopped) {
                warn!("pipeline '{}': source did not stop cleanly", self.name);
            }
        }
        if let Some(chain) = &self.chain {
            if let Err(err) = lock(chain).set_status(PipelineState::Stopped) {
                warn!("pipeline '{}': {}", self.name, err);
            }
        }
        if let Some(sink) = &self.sink {
            if !lock(sink).set_status(PipelineState::Stopped) {
                warn!("pipeline '{}': sink did not stop cleanly", self.name);
            }
        }
        if !lock(&self.property_filter).set_status(PipelineState::Stopped) {
            warn!("pipeline '{}': property filter did not stop cleanly", self.name);
        }

        self.join_worker();

        let leftovers = self.queue.drain();
        if !leftovers.is_empty() {
            debug!(
                "pipeline '{}': returning {} queued buffers",
                self.name,
                leftovers.len()
            );
        }
        for buffer in leftovers {
            self.requeue_buffer(buffer);
        }
        info!("pipeline '{}' stopped", self.name);
    }

    fn pause(&mut self) {
        self.set_state(PipelineState::Paused);
        self.join_worker();
        info!("pipeline '{}' paused", self.name);
    }

    fn resume(&mut self) -> Result<()> {
        self.set_state(PipelineState::Playing);
        if let Err(err) = self.spawn_worker() {
            error!("pipeline '{}' failed to resume: {}", self.name, err);
            self.stop_playing();
            return Err(err);
        }
        info!("pipeline '{}' resumed", self.name);
        Ok(())
    }

    fn spawn_worker(&mut self) -> Result<()> {
        let (Some(source), Some(sink), Some(chain)) =
            (self.source.clone(), self.sink.clone(), self.chain.clone())
        else {
            return Err(Error::InvalidState {
                operation: "start the worker",
                state: self.status(),
            });
        };

        let worker = Worker {
            name: self.name.clone(),
            queue: self.queue.clone(),
            source,
            sink,
            property_filter: self.property_filter.clone(),
            chain,
            wake_interval: self.config.wake_interval,
            metrics: PipelineMetrics::new(&self.name),
            tracing: self.config.tracing.clone(),
        };
        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || worker.run())?;
        self.worker = Some(handle);
        Ok(())
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("pipeline '{}' worker panicked", self.name);
            }
        }
    }

    fn ensure_idle(&self, operation: &'static str) -> Result<()> {
        let state = self.status();
        if state.is_active() {
            return Err(Error::InvalidState { operation, state });
        }
        Ok(())
    }

    fn discard_chain(&mut self) {
        self.chain = None;
        self.negotiation = None;
    }

    fn leave_error(&mut self) {
        if self.status() == PipelineState::Error {
            self.set_state(PipelineState::Stopped);
        }
    }

    fn set_state(&self, state: PipelineState) -> PipelineState {
        let previous = self.queue.set_status(state);
        if previous != state {
            observability::trace_state_change(&self.name, previous.as_str(), state.as_str());
        }
        previous
    }
}

impl Drop for PipelineManager {
    fn drop(&mut self) {
        if self.status().is_active() {
            self.stop_playing();
        }
        // Stale handles must not feed a dead queue.
        self.set_state(PipelineState::Undefined);
    }
}

impl fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineManager")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("requested", &self.requested)
            .field("negotiation", &self.negotiation)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker {
    name: Arc<str>,
    queue: BufferQueue,
    source: Shared<dyn Source>,
    sink: Shared<dyn Sink>,
    property_filter: Shared<dyn PropertyFilter>,
    chain: Arc<Mutex<FilterChain>>,
    wake_interval: Duration,
    metrics: PipelineMetrics,
    tracing: TracingConfig,
}

impl Worker {
    fn run(self) {
        let _span = observability::instrument_pipeline(&self.tracing, &self.name);
        debug!("pipeline '{}' worker started", self.name);
        loop {
            match self.queue.pop_wait(self.wake_interval) {
                Popped::Buffer(buffer) => self.dispatch(buffer),
                Popped::Timeout => continue,
                Popped::Closed => break,
            }
        }
        debug!("pipeline '{}' worker exiting", self.name);
    }

    fn dispatch(&self, mut buffer: ImageBuffer) {
        let _timer = self.metrics.start_timer();

        if buffer.is_damaged() && lock(&self.source).should_incomplete_frames_be_dropped() {
            debug!("dropping incomplete frame {}", buffer.meta().sequence);
            self.metrics.record_damaged();
            self.requeue(buffer);
            return;
        }

        lock(&self.property_filter).apply(&mut buffer);

        let processed = {
            let mut chain = lock(&self.chain);
            chain.is_active().then(|| chain.process(&mut buffer))
        };
        match processed {
            None => {
                // Stages were deactivated while this buffer was queued.
                self.metrics.record_stopped();
                self.requeue(buffer);
                return;
            }
            Some(Err(err)) => {
                warn!("pipeline '{}': buffer {} failed: {}", self.name, buffer.meta().sequence, err);
                self.metrics.record_failed();
                self.requeue(buffer);
                return;
            }
            Some(Ok(())) => {}
        }

        let returned = lock(&self.sink).push_image(buffer);
        self.metrics.record_delivered();
        if let Some(buffer) = returned {
            self.requeue(buffer);
        }
    }

    fn requeue(&self, buffer: ImageBuffer) {
        lock(&self.source).requeue_buffer(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::builtin_registry;

    #[test]
    fn test_config_builders() {
        let config = PipelineConfig::default()
            .with_wake_interval(Duration::from_millis(20))
            .with_thread_name("cam0")
            .with_tracing(TracingConfig::none());
        assert_eq!(config.wake_interval, Duration::from_millis(20));
        assert_eq!(config.thread_name, "cam0");
        assert!(!config.tracing.pipeline_spans);
        assert_eq!(PipelineConfig::default().wake_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_new_manager_is_undefined() {
        let mut manager = PipelineManager::new(builtin_registry());
        assert_eq!(manager.status(), PipelineState::Undefined);
        assert!(manager.pipeline_description().is_empty());
        assert!(matches!(manager.create_pipeline(), Err(Error::NoSource)));
        assert_eq!(manager.status(), PipelineState::Undefined);
        assert!(matches!(
            manager.set_status(PipelineState::Paused),
            Err(Error::InvalidState { operation: "pause", .. })
        ));
    }

    #[test]
    fn test_handle_rejects_when_not_running() {
        use crate::buffer::BufferMeta;
        use crate::format::{Fourcc, Framerate};

        let manager = PipelineManager::new(builtin_registry());
        let handle = manager.handle();
        let format = PixelFormat::new(Fourcc::MONO8, 2, 2, Framerate::FPS_30);
        let buffer = ImageBuffer::new(vec![0; 4], BufferMeta::new(format));
        assert!(handle.push_image(buffer).is_err());
        assert_eq!(manager.queue_stats().total_rejected, 1);
    }
}
