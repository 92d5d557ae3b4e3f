//! Collaborator traits the pipeline drives.
//!
//! Capture backends implement [`Source`], consumers implement [`Sink`], and
//! per-buffer property automation (exposure, gain, white balance control)
//! plugs in as a [`PropertyFilter`].

use crate::buffer::{BufferPool, ImageBuffer};
use crate::catalog::FormatCatalog;
use crate::format::PixelFormat;
use crate::pipeline::{PipelineHandle, PipelineState};

/// Producer of captured images.
///
/// The source pushes buffers into the pipeline through the
/// [`PipelineHandle`] it receives in [`attach`](Source::attach), from any
/// thread. Buffers come back through [`requeue_buffer`](Source::requeue_buffer)
/// once the sink is done with them or when they were dropped.
pub trait Source: Send {
    /// Formats the device can produce.
    fn available_video_formats(&self) -> FormatCatalog;

    /// Configure the capture format. Returns `false` if unsupported.
    fn set_video_format(&mut self, format: &PixelFormat) -> bool;

    /// Currently configured capture format.
    fn video_format(&self) -> Option<PixelFormat>;

    /// Start or stop capturing. Returns `false` on failure.
    fn set_status(&mut self, state: PipelineState) -> bool;

    /// Capture into buffers from `pool`, provided by the sink.
    ///
    /// Returns `false` if the source can only use its own buffers.
    fn set_buffer_collection(&mut self, pool: BufferPool) -> bool;

    /// Receive the handle used to deliver buffers.
    fn attach(&mut self, handle: PipelineHandle);

    /// Take back a buffer previously pushed.
    fn requeue_buffer(&mut self, buffer: ImageBuffer);

    /// Ask for incomplete frames to be discarded instead of delivered.
    fn drop_incomplete_frames(&mut self, drop: bool);

    /// Whether incomplete frames are discarded.
    fn should_incomplete_frames_be_dropped(&self) -> bool;
}

/// Consumer of processed images.
pub trait Sink: Send {
    /// Buffers the sink wants the source to capture into, if any.
    fn buffer_collection(&self) -> Option<BufferPool>;

    /// Configure the format the sink will receive. Returns `false` if
    /// unsupported.
    fn set_video_format(&mut self, format: &PixelFormat) -> bool;

    /// Start or stop accepting images. Returns `false` on failure.
    fn set_status(&mut self, state: PipelineState) -> bool;

    /// Consume one image.
    ///
    /// Returning the buffer hands it back for requeueing to the source;
    /// returning `None` means the sink keeps it and returns it later
    /// through [`PipelineManager::requeue_buffer`](crate::pipeline::PipelineManager::requeue_buffer).
    fn push_image(&mut self, buffer: ImageBuffer) -> Option<ImageBuffer>;
}

/// Per-buffer hook applied before the conversion stages.
pub trait PropertyFilter: Send {
    /// Inspect or adjust one buffer.
    fn apply(&mut self, buffer: &mut ImageBuffer);

    /// Start or stop. Returns `false` on failure.
    fn set_status(&mut self, state: PipelineState) -> bool;

    /// Bind the formats the filter will see.
    fn set_video_format(&mut self, input: &PixelFormat, output: &PixelFormat) -> bool;
}

/// Property filter that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPropertyFilter;

impl PropertyFilter for NoopPropertyFilter {
    fn apply(&mut self, _buffer: &mut ImageBuffer) {}

    fn set_status(&mut self, _state: PipelineState) -> bool {
        true
    }

    fn set_video_format(&mut self, _input: &PixelFormat, _output: &PixelFormat) -> bool {
        true
    }
}
