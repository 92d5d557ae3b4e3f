//! # camcore
//!
//! Runtime core for camera streaming: decides which pixel format a camera
//! should deliver and which conversion stages turn it into what the consumer
//! asked for, then runs captured frames through those stages on a dedicated
//! worker thread.
//!
//! ## Features
//!
//! - **Format negotiation**: direct matches first, then the cheapest chain
//!   of debayer, normalize, color-convert and decode stages
//! - **Validated chains**: every stage edge is checked before streaming
//! - **Explicit buffer ownership**: buffers move through the queue and go
//!   back to their pool, never shared
//! - **Device sessions**: device-lost listeners per opened camera
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use camcore::prelude::*;
//!
//! let session = CaptureSession::open(device_info, Box::new(camera))?;
//! session.set_video_format(PixelFormat::new(Fourcc::RGB24, 1920, 1080, Framerate::FPS_30))?;
//! session.start_stream(Box::new(display))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod caps;
pub mod catalog;
pub mod chain;
pub mod error;
pub mod format;
pub mod interface;
pub mod negotiation;
pub mod observability;
pub mod pipeline;
pub mod session;
pub mod stage;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::{BufferMeta, BufferPool, ImageBuffer};
    pub use crate::caps::{CapsSet, CapsValue, FormatCaps};
    pub use crate::catalog::{FormatCatalog, FormatDescription, ResolutionRange};
    pub use crate::error::{Error, Result};
    pub use crate::format::{Fourcc, Framerate, PixelFormat};
    pub use crate::interface::{PropertyFilter, Sink, Source};
    pub use crate::negotiation::{NegotiationEngine, NegotiationError};
    pub use crate::pipeline::{PipelineHandle, PipelineManager, PipelineState};
    pub use crate::session::{CaptureSession, DeviceInfo};
    pub use crate::stage::{StageRegistry, builtin_registry};
}

pub use error::{Error, Result};
