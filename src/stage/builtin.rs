//! Built-in stages.
//!
//! Conversion stages:
//! - `bayer-normalize`: packed / deep / PWL Bayer to 8-bit Bayer of the same layout
//! - `debayer`: 8-bit Bayer to packed RGB (nearest neighbor)
//! - `color-convert`: between RGB, YUV and mono encodings
//! - `jpeg-decode`: MJPEG to raw
//! - `combined`: debayer and color conversion in one stage (not registered by default)
//!
//! Interpretation stages (not registered by default):
//! - `white-balance`: gray-world gains on 8-bit Bayer data
//! - `frame-statistics`: per-frame counters, any encoding
//!
//! Encoding pairs without a pixel kernel here are relabelled only; the payload
//! passes through unchanged. Deployments needing real decoding register their
//! own stage under the same role.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace, warn};

use super::{
    ConversionRole, EncodingSet, Stage, StageDescriptor, StageKind, StageRegistry, stage_factory,
};
use crate::buffer::ImageBuffer;
use crate::error::{Error, Result};
use crate::format::{EncodingFamily, Fourcc, PixelFormat};
use crate::pipeline::PipelineState;

/// Pixel kernel run by a [`ConvertStage`].
pub type Kernel = fn(&PixelFormat, &PixelFormat, &mut ImageBuffer) -> Result<()>;

const DEBAYER_OUTPUTS: [Fourcc; 4] = [Fourcc::RGB24, Fourcc::BGR24, Fourcc::RGBX32, Fourcc::BGRA32];

const COLOR_ENCODINGS: [Fourcc; 9] = [
    Fourcc::RGB24,
    Fourcc::BGR24,
    Fourcc::RGBX32,
    Fourcc::BGRA32,
    Fourcc::YUYV,
    Fourcc::UYVY,
    Fourcc::NV12,
    Fourcc::MONO8,
    Fourcc::MONO16,
];

// ============================================================================
// Descriptors and registry
// ============================================================================

fn families(list: &[EncodingFamily]) -> EncodingSet {
    list.iter().flat_map(|f| f.members().iter().copied()).collect()
}

/// Descriptor of the `bayer-normalize` stage.
pub fn bayer_normalize_descriptor() -> StageDescriptor {
    StageDescriptor::new(
        "bayer-normalize",
        StageKind::Conversion(ConversionRole::BayerNormalize),
        families(&[
            EncodingFamily::Bayer10,
            EncodingFamily::Bayer12,
            EncodingFamily::Bayer16,
            EncodingFamily::BayerPwl,
        ]),
        families(&[EncodingFamily::Bayer8]),
    )
    .keeping_bayer_pattern()
}

/// Descriptor of the `debayer` stage.
pub fn debayer_descriptor() -> StageDescriptor {
    StageDescriptor::new(
        "debayer",
        StageKind::Conversion(ConversionRole::Debayer),
        families(&[EncodingFamily::Bayer8]),
        EncodingSet::only(DEBAYER_OUTPUTS),
    )
}

/// Descriptor of the `color-convert` stage.
pub fn color_convert_descriptor() -> StageDescriptor {
    StageDescriptor::new(
        "color-convert",
        StageKind::Conversion(ConversionRole::ColorConvert),
        EncodingSet::only(COLOR_ENCODINGS),
        EncodingSet::only(COLOR_ENCODINGS),
    )
}

/// Descriptor of the `jpeg-decode` stage.
pub fn jpeg_decode_descriptor() -> StageDescriptor {
    StageDescriptor::new(
        "jpeg-decode",
        StageKind::Conversion(ConversionRole::Decode),
        EncodingSet::only([Fourcc::MJPEG]),
        EncodingSet::only([Fourcc::RGB24, Fourcc::BGRA32, Fourcc::YUYV, Fourcc::MONO8]),
    )
}

/// Descriptor of the `combined` stage.
pub fn combined_descriptor() -> StageDescriptor {
    StageDescriptor::new(
        "combined",
        StageKind::Conversion(ConversionRole::Combined),
        families(&[EncodingFamily::Bayer8]),
        EncodingSet::only(COLOR_ENCODINGS),
    )
}

/// Descriptor of the `white-balance` stage.
pub fn white_balance_descriptor() -> StageDescriptor {
    StageDescriptor::new(
        "white-balance",
        StageKind::Interpretation,
        families(&[EncodingFamily::Bayer8]),
        EncodingSet::Any,
    )
}

/// Descriptor of the `frame-statistics` stage.
pub fn frame_statistics_descriptor() -> StageDescriptor {
    StageDescriptor::new(
        "frame-statistics",
        StageKind::Interpretation,
        EncodingSet::Any,
        EncodingSet::Any,
    )
}

/// Create a registry with the default conversion stages.
///
/// Registered, in order: `bayer-normalize`, `debayer`, `color-convert`,
/// `jpeg-decode`. The combined stage and interpretation stages are opt-in:
///
/// ```rust
/// use camcore::stage::builtin::{self, WhiteBalance};
/// use camcore::stage::stage_factory;
///
/// let registry = builtin::builtin_registry().with(
///     builtin::white_balance_descriptor(),
///     stage_factory(WhiteBalance::new),
/// );
/// assert_eq!(registry.len(), 5);
/// ```
pub fn builtin_registry() -> StageRegistry {
    StageRegistry::new()
        .with(
            bayer_normalize_descriptor(),
            stage_factory(ConvertStage::bayer_normalize),
        )
        .with(debayer_descriptor(), stage_factory(ConvertStage::debayer))
        .with(
            color_convert_descriptor(),
            stage_factory(ConvertStage::color_convert),
        )
        .with(
            jpeg_decode_descriptor(),
            stage_factory(ConvertStage::jpeg_decode),
        )
}

// ============================================================================
// ConvertStage
// ============================================================================

/// Generic conversion stage driven by a descriptor and a pixel kernel.
pub struct ConvertStage {
    descriptor: StageDescriptor,
    formats: Option<(PixelFormat, PixelFormat)>,
    state: PipelineState,
    kernel: Kernel,
}

impl ConvertStage {
    /// Create a stage from a descriptor and kernel.
    pub fn new(descriptor: StageDescriptor, kernel: Kernel) -> Self {
        Self {
            descriptor,
            formats: None,
            state: PipelineState::Stopped,
            kernel,
        }
    }

    /// Packed / deep Bayer to 8-bit Bayer.
    pub fn bayer_normalize() -> Self {
        Self::new(bayer_normalize_descriptor(), normalize_kernel)
    }

    /// 8-bit Bayer to RGB.
    pub fn debayer() -> Self {
        Self::new(debayer_descriptor(), debayer_kernel)
    }

    /// Between color encodings.
    pub fn color_convert() -> Self {
        Self::new(color_convert_descriptor(), color_kernel)
    }

    /// MJPEG to raw. Relabels only.
    pub fn jpeg_decode() -> Self {
        Self::new(jpeg_decode_descriptor(), relabel_kernel)
    }

    /// Debayer plus color conversion.
    pub fn combined() -> Self {
        Self::new(combined_descriptor(), combined_kernel)
    }
}

impl Stage for ConvertStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn set_video_format(&mut self, input: &PixelFormat, output: &PixelFormat) -> bool {
        if input.size() != output.size() || input.framerate != output.framerate {
            warn!(
                "stage '{}' cannot scale: {} -> {}",
                self.descriptor.name, input, output
            );
            return false;
        }
        if !self.descriptor.converts(input.encoding, output.encoding) {
            warn!(
                "stage '{}' cannot convert {} to {}",
                self.descriptor.name, input.encoding, output.encoding
            );
            return false;
        }
        self.formats = Some((*input, *output));
        true
    }

    fn video_format(&self) -> Option<(PixelFormat, PixelFormat)> {
        self.formats
    }

    fn set_status(&mut self, state: PipelineState) -> bool {
        if state == PipelineState::Playing && self.formats.is_none() {
            warn!("stage '{}' has no format, refusing to play", self.descriptor.name);
            return false;
        }
        self.state = state;
        true
    }

    fn transform(&mut self, buffer: &mut ImageBuffer) -> Result<()> {
        let (input, output) = self.formats.ok_or(Error::InvalidState {
            operation: "transform without format",
            state: self.state,
        })?;
        check_input(&self.descriptor.name, &input, buffer)?;
        (self.kernel)(&input, &output, buffer)?;
        buffer.meta_mut().format = output;
        Ok(())
    }
}

fn check_input(stage: &str, input: &PixelFormat, buffer: &ImageBuffer) -> Result<()> {
    if buffer.format() != *input {
        return Err(Error::FormatMismatch {
            stage: stage.to_string(),
            expected: *input,
            actual: buffer.format(),
        });
    }
    Ok(())
}

// ============================================================================
// Kernels
// ============================================================================

fn relabel_kernel(_: &PixelFormat, _: &PixelFormat, _: &mut ImageBuffer) -> Result<()> {
    Ok(())
}

enum SampleLayout {
    Word { bits: u32 },
    Packed10,
    Packed12,
}

fn sample_layout(encoding: Fourcc) -> Option<SampleLayout> {
    match encoding {
        Fourcc::RGGB10_PACKED
        | Fourcc::GBRG10_PACKED
        | Fourcc::GRBG10_PACKED
        | Fourcc::BGGR10_PACKED => Some(SampleLayout::Packed10),
        Fourcc::RGGB12_PACKED
        | Fourcc::GBRG12_PACKED
        | Fourcc::GRBG12_PACKED
        | Fourcc::BGGR12_PACKED
        | Fourcc::PWL_RG12_PACKED => Some(SampleLayout::Packed12),
        _ => match encoding.family()? {
            EncodingFamily::Bayer10 => Some(SampleLayout::Word { bits: 10 }),
            EncodingFamily::Bayer12 | EncodingFamily::BayerPwl => {
                Some(SampleLayout::Word { bits: 12 })
            }
            EncodingFamily::Bayer16 => Some(SampleLayout::Word { bits: 16 }),
            _ => None,
        },
    }
}

/// Keep the eight most significant bits of every sample.
fn normalize_kernel(input: &PixelFormat, _: &PixelFormat, buffer: &mut ImageBuffer) -> Result<()> {
    let pixels = input.width as usize * input.height as usize;
    let Some(layout) = sample_layout(input.encoding) else {
        return Ok(());
    };
    let src = buffer.data();
    let out: Vec<u8> = match layout {
        SampleLayout::Word { bits } => src
            .chunks_exact(2)
            .take(pixels)
            .map(|w| (u16::from_le_bytes([w[0], w[1]]) >> (bits - 8)) as u8)
            .collect(),
        // Four pixels in five bytes; the first four carry the high bits.
        SampleLayout::Packed10 => src
            .chunks_exact(5)
            .flat_map(|c| c[..4].iter().copied())
            .take(pixels)
            .collect(),
        // Two pixels in three bytes; the first two carry the high bits.
        SampleLayout::Packed12 => src
            .chunks_exact(3)
            .flat_map(|c| c[..2].iter().copied())
            .take(pixels)
            .collect(),
    };
    if out.len() < pixels {
        trace!("short frame: {} of {} samples", out.len(), pixels);
    }
    buffer.replace_data(out);
    Ok(())
}

/// Nearest-neighbor demosaic over 2x2 cells.
fn debayer_kernel(input: &PixelFormat, output: &PixelFormat, buffer: &mut ImageBuffer) -> Result<()> {
    let Some(pattern) = input.encoding.bayer_pattern() else {
        return Ok(());
    };
    let (width, height) = (input.width as usize, input.height as usize);
    if buffer.len() < width * height || width < 2 || height < 2 {
        return Ok(());
    }
    let (channels, swap_rb) = match output.encoding {
        Fourcc::RGB24 => (3, false),
        Fourcc::BGR24 => (3, true),
        Fourcc::RGBX32 => (4, false),
        Fourcc::BGRA32 => (4, true),
        _ => return Ok(()),
    };
    let (rx, ry) = pattern.red_offset();
    let (bx, by) = pattern.blue_offset();
    let src = buffer.data();
    let mut out = vec![0xffu8; width * height * channels];
    for y in 0..height {
        let cy = (y & !1).min(height - 2);
        for x in 0..width {
            let cx = (x & !1).min(width - 2);
            let at = |dx: usize, dy: usize| src[(cy + dy) * width + cx + dx] as u16;
            let r = at(rx, ry) as u8;
            let b = at(bx, by) as u8;
            // The two greens sit on the other diagonal.
            let g = ((at(1 - rx, ry) + at(rx, 1 - ry)) / 2) as u8;
            let px = &mut out[(y * width + x) * channels..][..3];
            if swap_rb {
                px.copy_from_slice(&[b, g, r]);
            } else {
                px.copy_from_slice(&[r, g, b]);
            }
        }
    }
    buffer.replace_data(out);
    Ok(())
}

fn color_kernel(input: &PixelFormat, output: &PixelFormat, buffer: &mut ImageBuffer) -> Result<()> {
    let swapped = matches!(
        (input.encoding, output.encoding),
        (Fourcc::RGB24, Fourcc::BGR24) | (Fourcc::BGR24, Fourcc::RGB24)
    );
    if swapped {
        for px in buffer.data_mut().chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        return Ok(());
    }
    let luma_order = match (input.encoding, output.encoding) {
        (Fourcc::RGB24, Fourcc::MONO8) => Some((3, 0, 2)),
        (Fourcc::BGR24, Fourcc::MONO8) => Some((3, 2, 0)),
        (Fourcc::RGBX32, Fourcc::MONO8) => Some((4, 0, 2)),
        (Fourcc::BGRA32, Fourcc::MONO8) => Some((4, 2, 0)),
        _ => None,
    };
    if let Some((stride, r, b)) = luma_order {
        let out: Vec<u8> = buffer
            .data()
            .chunks_exact(stride)
            .map(|px| {
                let y = 77 * px[r] as u32 + 150 * px[1] as u32 + 29 * px[b] as u32;
                (y >> 8) as u8
            })
            .collect();
        buffer.replace_data(out);
    }
    Ok(())
}

fn combined_kernel(input: &PixelFormat, output: &PixelFormat, buffer: &mut ImageBuffer) -> Result<()> {
    if DEBAYER_OUTPUTS.contains(&output.encoding) {
        return debayer_kernel(input, output, buffer);
    }
    let rgb = output.with_encoding(Fourcc::RGB24);
    debayer_kernel(input, &rgb, buffer)?;
    color_kernel(&rgb, output, buffer)
}

// ============================================================================
// Interpretation stages
// ============================================================================

/// Gray-world white balance on 8-bit Bayer data.
///
/// Gains are learned from every frame and applied to the red and blue
/// samples in place. The format never changes.
pub struct WhiteBalance {
    descriptor: StageDescriptor,
    format: Option<PixelFormat>,
    state: PipelineState,
    gains: (f32, f32),
}

impl WhiteBalance {
    /// Maximum gain applied to a channel.
    pub const MAX_GAIN: f32 = 4.0;

    /// Create a stage with unit gains.
    pub fn new() -> Self {
        Self {
            descriptor: white_balance_descriptor(),
            format: None,
            state: PipelineState::Stopped,
            gains: (1.0, 1.0),
        }
    }

    /// Current red and blue gains.
    pub fn gains(&self) -> (f32, f32) {
        self.gains
    }

    fn learn(&mut self, format: &PixelFormat, data: &[u8]) {
        let Some(pattern) = format.encoding.bayer_pattern() else {
            return;
        };
        let width = format.width as usize;
        let (rx, ry) = pattern.red_offset();
        let (bx, by) = pattern.blue_offset();
        let (mut r, mut g, mut b) = (0u64, 0u64, 0u64);
        for (i, v) in data.iter().enumerate().take(width * format.height as usize) {
            let (x, y) = ((i % width) & 1, (i / width) & 1);
            match ((x, y) == (rx, ry), (x, y) == (bx, by)) {
                (true, _) => r += *v as u64,
                (_, true) => b += *v as u64,
                _ => g += *v as u64,
            }
        }
        if r == 0 || b == 0 {
            return;
        }
        // Two greens per cell.
        let g = g as f32 / 2.0;
        self.gains = (
            (g / r as f32).clamp(1.0, Self::MAX_GAIN),
            (g / b as f32).clamp(1.0, Self::MAX_GAIN),
        );
    }
}

impl Default for WhiteBalance {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for WhiteBalance {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn set_video_format(&mut self, input: &PixelFormat, output: &PixelFormat) -> bool {
        if input != output || !self.descriptor.accepts(input.encoding) {
            return false;
        }
        if input.width == 0 || input.height == 0 {
            warn!("{}: refusing empty frame size {}", self.descriptor.name, input);
            return false;
        }
        self.format = Some(*input);
        true
    }

    fn video_format(&self) -> Option<(PixelFormat, PixelFormat)> {
        self.format.map(|f| (f, f))
    }

    fn set_status(&mut self, state: PipelineState) -> bool {
        if state == PipelineState::Stopped {
            self.gains = (1.0, 1.0);
        }
        self.state = state;
        true
    }

    fn transform(&mut self, buffer: &mut ImageBuffer) -> Result<()> {
        let Some(format) = self.format else {
            return Err(Error::InvalidState {
                operation: "transform without format",
                state: self.state,
            });
        };
        check_input(&self.descriptor.name, &format, buffer)?;
        self.learn(&format, buffer.data());

        let Some(pattern) = format.encoding.bayer_pattern() else {
            return Ok(());
        };
        let (gr, gb) = self.gains;
        let width = format.width as usize;
        let (rx, ry) = pattern.red_offset();
        let (bx, by) = pattern.blue_offset();
        for (i, v) in buffer.data_mut().iter_mut().enumerate() {
            let cell = ((i % width) & 1, (i / width) & 1);
            let gain = if cell == (rx, ry) {
                gr
            } else if cell == (bx, by) {
                gb
            } else {
                continue;
            };
            *v = (*v as f32 * gain).min(255.0) as u8;
        }
        Ok(())
    }
}

/// Counters gathered by [`FrameStatistics`].
#[derive(Debug, Default)]
pub struct FrameStats {
    frames: AtomicU64,
    damaged: AtomicU64,
    bytes: AtomicU64,
    last_mean: Mutex<f64>,
}

impl FrameStats {
    /// Frames seen.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Damaged frames seen.
    pub fn damaged(&self) -> u64 {
        self.damaged.load(Ordering::Relaxed)
    }

    /// Payload bytes seen.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Mean byte value of the last frame.
    pub fn last_mean(&self) -> f64 {
        *self.last_mean.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts frames and bytes flowing past the front of the chain.
pub struct FrameStatistics {
    descriptor: StageDescriptor,
    format: Option<PixelFormat>,
    stats: Arc<FrameStats>,
}

impl FrameStatistics {
    /// Create a stage with fresh counters.
    pub fn new() -> Self {
        Self::with_stats(Arc::default())
    }

    /// Create a stage reporting into shared counters.
    pub fn with_stats(stats: Arc<FrameStats>) -> Self {
        Self {
            descriptor: frame_statistics_descriptor(),
            format: None,
            stats,
        }
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<FrameStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for FrameStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for FrameStatistics {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn set_video_format(&mut self, input: &PixelFormat, output: &PixelFormat) -> bool {
        if input != output {
            return false;
        }
        self.format = Some(*input);
        true
    }

    fn video_format(&self) -> Option<(PixelFormat, PixelFormat)> {
        self.format.map(|f| (f, f))
    }

    fn set_status(&mut self, state: PipelineState) -> bool {
        debug!(
            "frame statistics {}: {} frames, {} damaged",
            state,
            self.stats.frames(),
            self.stats.damaged()
        );
        true
    }

    fn transform(&mut self, buffer: &mut ImageBuffer) -> Result<()> {
        if let Some(format) = &self.format {
            check_input(&self.descriptor.name, format, buffer)?;
        }
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);
        if buffer.is_damaged() {
            self.stats.damaged.fetch_add(1, Ordering::Relaxed);
        }
        if !buffer.is_empty() {
            let sum: u64 = buffer.data().iter().map(|v| *v as u64).sum();
            *self.stats.last_mean.lock().unwrap_or_else(PoisonError::into_inner) =
                sum as f64 / buffer.len() as f64;
        }
        Ok(())
    }
}
