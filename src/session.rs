//! Device session: one opened camera and its pipeline.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{info, warn};

use crate::catalog::FormatCatalog;
use crate::error::{Error, Result};
use crate::format::PixelFormat;
use crate::interface::{Sink, Source};
use crate::pipeline::{PipelineConfig, PipelineManager, PipelineState, lock};
use crate::stage::{StageRegistry, builtin_registry};

/// Identity of a capture device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    /// Human-readable model name.
    pub name: String,
    /// Serial number, unique per device.
    pub serial: String,
}

impl DeviceInfo {
    /// Create device info.
    pub fn new(name: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            serial: serial.into(),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.serial)
    }
}

type DeviceLostListener = Arc<dyn Fn(&DeviceInfo) + Send + Sync>;

struct SessionShared {
    device: DeviceInfo,
    open: AtomicBool,
    lost: AtomicBool,
    pipeline: Mutex<PipelineManager>,
    listeners: Mutex<Vec<DeviceLostListener>>,
}

impl SessionShared {
    fn device_lost(&self) {
        if self.lost.swap(true, Ordering::SeqCst) || !self.open.load(Ordering::SeqCst) {
            return;
        }
        warn!("device {} lost", self.device);

        {
            let mut pipeline = lock(&self.pipeline);
            if pipeline.status().is_active() {
                if let Err(err) = pipeline.set_status(PipelineState::Stopped) {
                    warn!("stopping pipeline of lost device failed: {}", err);
                }
            }
        }

        let listeners = std::mem::take(&mut *lock(&self.listeners));
        for listener in &listeners {
            listener(&self.device);
        }
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        lock(&self.pipeline).destroy_pipeline();
        lock(&self.listeners).clear();
        info!("closed device {}", self.device);
    }

    fn check_usable(&self) -> Result<()> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(Error::DeviceLost {
                device: self.device.serial.clone(),
            });
        }
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::NoSource);
        }
        Ok(())
    }
}

/// An opened capture device.
///
/// Owns the [`PipelineManager`] that streams from the device. Device loss
/// is reported through listeners registered on the session; after a loss
/// the pipeline is stopped and every further operation fails with
/// [`Error::DeviceLost`]. There is no automatic reconnection.
pub struct CaptureSession {
    shared: Arc<SessionShared>,
}

impl CaptureSession {
    /// Open `device`, streaming from `source` through the built-in stages.
    pub fn open(device: DeviceInfo, source: Box<dyn Source>) -> Result<Self> {
        Self::open_with(device, source, builtin_registry(), PipelineConfig::default())
    }

    /// Open `device` with a custom stage registry and configuration.
    pub fn open_with(
        device: DeviceInfo,
        source: Box<dyn Source>,
        registry: StageRegistry,
        config: PipelineConfig,
    ) -> Result<Self> {
        let mut pipeline = PipelineManager::with_config(registry, config);
        pipeline.set_source(source)?;
        info!("opened device {}", device);

        Ok(Self {
            shared: Arc::new(SessionShared {
                device,
                open: AtomicBool::new(true),
                lost: AtomicBool::new(false),
                pipeline: Mutex::new(pipeline),
                listeners: Mutex::new(Vec::new()),
            }),
        })
    }

    /// The opened device.
    pub fn device(&self) -> &DeviceInfo {
        &self.shared.device
    }

    /// Whether the session is open and the device present.
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst) && !self.shared.lost.load(Ordering::SeqCst)
    }

    /// Formats the device offers; empty once closed.
    pub fn available_video_formats(&self) -> FormatCatalog {
        if !self.is_open() {
            return FormatCatalog::default();
        }
        lock(&self.shared.pipeline).available_video_formats().clone()
    }

    /// Request the output format for the next stream.
    pub fn set_video_format(&self, format: PixelFormat) -> Result<()> {
        self.shared.check_usable()?;
        lock(&self.shared.pipeline).set_video_format(format)
    }

    /// Negotiated or requested output format.
    pub fn video_format(&self) -> Option<PixelFormat> {
        lock(&self.shared.pipeline).video_format()
    }

    /// Start streaming into `sink`.
    pub fn start_stream(&self, sink: Box<dyn Sink>) -> Result<()> {
        self.shared.check_usable()?;
        let mut pipeline = lock(&self.shared.pipeline);
        pipeline.set_sink(sink)?;
        pipeline.set_status(PipelineState::Playing)
    }

    /// Stop streaming.
    pub fn stop_stream(&self) -> Result<()> {
        self.shared.check_usable()?;
        lock(&self.shared.pipeline).set_status(PipelineState::Stopped)
    }

    /// Pipeline state.
    pub fn status(&self) -> PipelineState {
        lock(&self.shared.pipeline).status()
    }

    /// Description of the running filter chain.
    pub fn pipeline_description(&self) -> String {
        lock(&self.shared.pipeline).pipeline_description()
    }

    /// Run `f` with exclusive access to the pipeline.
    pub fn with_pipeline<R>(&self, f: impl FnOnce(&mut PipelineManager) -> R) -> R {
        f(&mut lock(&self.shared.pipeline))
    }

    /// Call `listener` once if the device disappears.
    pub fn register_device_lost<F>(&self, listener: F) -> Result<()>
    where
        F: Fn(&DeviceInfo) + Send + Sync + 'static,
    {
        self.shared.check_usable()?;
        lock(&self.shared.listeners).push(Arc::new(listener));
        Ok(())
    }

    /// Handle the capture backend can use to report device loss.
    pub fn device_lost_notifier(&self) -> DeviceLostNotifier {
        DeviceLostNotifier {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Report that the device disappeared.
    ///
    /// Stops the pipeline, then fires every listener once. Later reports are
    /// ignored. Must not be called from a thread the source or sink joins
    /// while stopping.
    pub fn notify_device_lost(&self) {
        self.shared.device_lost();
    }

    /// Stop streaming and release the device.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("device", &self.shared.device)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Cloneable, thread-safe way to report device loss.
///
/// Holds the session weakly; reports after the session is dropped are
/// ignored.
#[derive(Clone)]
pub struct DeviceLostNotifier {
    shared: Weak<SessionShared>,
}

impl DeviceLostNotifier {
    /// Report device loss. Returns `false` if the session is gone.
    pub fn notify(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => {
                shared.device_lost();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for DeviceLostNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLostNotifier")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}
