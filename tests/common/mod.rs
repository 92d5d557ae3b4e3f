//! Mock collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use camcore::buffer::{BufferMeta, BufferPool, ImageBuffer};
use camcore::caps::CapsValue;
use camcore::catalog::{FormatCatalog, FormatDescription, ResolutionRange};
use camcore::format::{Fourcc, Framerate, PixelFormat};
use camcore::interface::{Sink, Source};
use camcore::pipeline::{PipelineHandle, PipelineState};

/// Ordered record of component state changes, shared across mocks.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Poll `cond` until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Catalog with one fixed 4x4 @ 30 fps entry per encoding.
pub fn small_catalog(encodings: &[Fourcc]) -> FormatCatalog {
    encodings
        .iter()
        .map(|&encoding| {
            FormatDescription::new(
                encoding,
                vec![ResolutionRange::fixed(4, 4, CapsValue::Fixed(Framerate::FPS_30))],
            )
        })
        .collect()
}

pub fn small_format(encoding: Fourcc) -> PixelFormat {
    PixelFormat::new(encoding, 4, 4, Framerate::FPS_30)
}

/// A buffer sized for `format` with one byte per sample.
pub fn frame(format: PixelFormat, sequence: u64) -> ImageBuffer {
    let len = (format.width * format.height) as usize;
    ImageBuffer::new(vec![128; len], BufferMeta::new(format).with_sequence(sequence))
}

// ============================================================================
// MockSource
// ============================================================================

/// Test-side view of a [`MockSource`] after it moved into the pipeline.
#[derive(Clone)]
pub struct SourceProbe {
    handle: Arc<Mutex<Option<PipelineHandle>>>,
    requeued: Arc<Mutex<Vec<u64>>>,
    format: Arc<Mutex<Option<PixelFormat>>>,
}

impl SourceProbe {
    /// Push as the capture thread would; rejected buffers count as requeued.
    pub fn push(&self, buffer: ImageBuffer) -> bool {
        let handle = self.handle.lock().unwrap().clone().expect("source not attached");
        match handle.push_image(buffer) {
            Ok(()) => true,
            Err(buffer) => {
                self.requeued.lock().unwrap().push(buffer.meta().sequence);
                false
            }
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.lock().unwrap().clone().expect("source not attached")
    }

    pub fn requeued(&self) -> Vec<u64> {
        self.requeued.lock().unwrap().clone()
    }

    pub fn format(&self) -> Option<PixelFormat> {
        *self.format.lock().unwrap()
    }
}

pub struct MockSource {
    catalog: FormatCatalog,
    format: Arc<Mutex<Option<PixelFormat>>>,
    handle: Arc<Mutex<Option<PipelineHandle>>>,
    requeued: Arc<Mutex<Vec<u64>>>,
    log: EventLog,
    drop_incomplete: bool,
    refuse_start: bool,
    pool: Option<BufferPool>,
}

impl MockSource {
    pub fn new(catalog: FormatCatalog, log: EventLog) -> Self {
        Self {
            catalog,
            format: Arc::new(Mutex::new(None)),
            handle: Arc::new(Mutex::new(None)),
            requeued: Arc::new(Mutex::new(Vec::new())),
            log,
            drop_incomplete: false,
            refuse_start: false,
            pool: None,
        }
    }

    pub fn refusing_start(mut self) -> Self {
        self.refuse_start = true;
        self
    }

    pub fn probe(&self) -> SourceProbe {
        SourceProbe {
            handle: self.handle.clone(),
            requeued: self.requeued.clone(),
            format: self.format.clone(),
        }
    }
}

impl Source for MockSource {
    fn available_video_formats(&self) -> FormatCatalog {
        self.catalog.clone()
    }

    fn set_video_format(&mut self, format: &PixelFormat) -> bool {
        if !self.catalog.supports(format) {
            return false;
        }
        *self.format.lock().unwrap() = Some(*format);
        true
    }

    fn video_format(&self) -> Option<PixelFormat> {
        *self.format.lock().unwrap()
    }

    fn set_status(&mut self, state: PipelineState) -> bool {
        self.log.lock().unwrap().push(format!("source:{state}"));
        !(self.refuse_start && state == PipelineState::Playing)
    }

    fn set_buffer_collection(&mut self, pool: BufferPool) -> bool {
        self.pool = Some(pool);
        true
    }

    fn attach(&mut self, handle: PipelineHandle) {
        *self.handle.lock().unwrap() = Some(handle);
    }

    fn requeue_buffer(&mut self, buffer: ImageBuffer) {
        self.requeued.lock().unwrap().push(buffer.meta().sequence);
        if let Some(pool) = &self.pool {
            let _ = pool.release(buffer);
        }
    }

    fn drop_incomplete_frames(&mut self, drop: bool) {
        self.drop_incomplete = drop;
    }

    fn should_incomplete_frames_be_dropped(&self) -> bool {
        self.drop_incomplete
    }
}

// ============================================================================
// MockSink
// ============================================================================

/// A delivered buffer as the sink saw it.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub sequence: u64,
    pub format: PixelFormat,
    pub len: usize,
}

pub struct MockSink {
    received: Arc<Mutex<Vec<Delivery>>>,
    format: Arc<Mutex<Option<PixelFormat>>>,
    log: EventLog,
    refuse_start: bool,
}

impl MockSink {
    pub fn new(log: EventLog) -> Self {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            format: Arc::new(Mutex::new(None)),
            log,
            refuse_start: false,
        }
    }

    pub fn refusing_start(mut self) -> Self {
        self.refuse_start = true;
        self
    }

    pub fn received(&self) -> Arc<Mutex<Vec<Delivery>>> {
        self.received.clone()
    }

    pub fn format(&self) -> Arc<Mutex<Option<PixelFormat>>> {
        self.format.clone()
    }
}

impl Sink for MockSink {
    fn buffer_collection(&self) -> Option<BufferPool> {
        None
    }

    fn set_video_format(&mut self, format: &PixelFormat) -> bool {
        *self.format.lock().unwrap() = Some(*format);
        true
    }

    fn set_status(&mut self, state: PipelineState) -> bool {
        self.log.lock().unwrap().push(format!("sink:{state}"));
        !(self.refuse_start && state == PipelineState::Playing)
    }

    fn push_image(&mut self, buffer: ImageBuffer) -> Option<ImageBuffer> {
        self.received.lock().unwrap().push(Delivery {
            sequence: buffer.meta().sequence,
            format: buffer.format(),
            len: buffer.len(),
        });
        Some(buffer)
    }
}
