//! Immutable descriptions of what a device can produce.
//!
//! A [`FormatCatalog`] is reported once by a source and only read afterwards.
//! Negotiation consumes it through [`FormatCatalog::to_caps`].

use std::fmt;

use tracing::{debug, info};

use crate::caps::{CapsSet, CapsValue, FormatCaps};
use crate::format::{Fourcc, Framerate, PixelFormat, Size};

/// Resolutions commonly requested by consumers.
///
/// Ranged device resolutions are expanded into the members of this table that
/// fall inside the range, so a consumer asking for e.g. 1280x720 matches even
/// though the device only reports min/max.
pub const STANDARD_RESOLUTIONS: &[Size] = &[
    Size::new(128, 96),
    Size::new(320, 240),
    Size::new(352, 288),
    Size::new(360, 280),
    Size::new(544, 480),
    Size::new(576, 480),
    Size::new(640, 480),
    Size::new(720, 480),
    Size::new(720, 576),
    Size::new(800, 600),
    Size::new(1024, 768),
    Size::new(1280, 720),
    Size::new(1280, 960),
    Size::new(1280, 1024),
    Size::new(1440, 1080),
    Size::new(1600, 1200),
    Size::new(1920, 1080),
    Size::new(1920, 1200),
    Size::new(2048, 1536),
    Size::new(2560, 1440),
    Size::new(3840, 2160),
    Size::new(4096, 3072),
];

// ============================================================================
// ResolutionRange
// ============================================================================

/// One resolution entry of a format: a fixed size or a stepped range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolutionRange {
    /// A single frame size.
    Fixed {
        /// Frame size.
        size: Size,
        /// Framerates available at this size.
        framerates: CapsValue<Framerate>,
    },
    /// Any size between `min` and `max` on the step grid.
    Range {
        /// Smallest size.
        min: Size,
        /// Largest size.
        max: Size,
        /// Width granularity.
        width_step: u32,
        /// Height granularity.
        height_step: u32,
        /// Framerates available across the range.
        framerates: CapsValue<Framerate>,
    },
}

impl ResolutionRange {
    /// A fixed size offering the listed framerates.
    pub fn fixed(width: u32, height: u32, framerates: impl Into<CapsValue<Framerate>>) -> Self {
        Self::Fixed {
            size: Size::new(width, height),
            framerates: framerates.into(),
        }
    }

    /// A stepped range of sizes.
    pub fn range(
        min: Size,
        max: Size,
        width_step: u32,
        height_step: u32,
        framerates: impl Into<CapsValue<Framerate>>,
    ) -> Self {
        Self::Range {
            min,
            max,
            width_step,
            height_step,
            framerates: framerates.into(),
        }
    }

    /// Whether `size` can be produced.
    pub fn contains(&self, size: Size) -> bool {
        match self {
            Self::Fixed { size: s, .. } => *s == size,
            Self::Range {
                min,
                max,
                width_step,
                height_step,
                ..
            } => {
                on_grid(size.width, min.width, max.width, *width_step)
                    && on_grid(size.height, min.height, max.height, *height_step)
            }
        }
    }

    /// Largest producible size.
    pub fn largest(&self) -> Size {
        match self {
            Self::Fixed { size, .. } => *size,
            Self::Range { max, .. } => *max,
        }
    }

    /// Framerates offered by this entry.
    pub fn framerates(&self) -> &CapsValue<Framerate> {
        match self {
            Self::Fixed { framerates, .. } | Self::Range { framerates, .. } => framerates,
        }
    }

    /// Framerates available at `size`, or `None` when the size is not produced.
    pub fn framerates_for(&self, size: Size) -> Option<&CapsValue<Framerate>> {
        self.contains(size).then(|| self.framerates())
    }

    fn to_caps(&self, encoding: Fourcc, out: &mut Vec<FormatCaps>) {
        match self {
            Self::Fixed { size, framerates } => out.push(
                FormatCaps::encoding(encoding)
                    .with_size(size.width, size.height)
                    .with_framerate(framerates.clone()),
            ),
            Self::Range {
                min,
                max,
                width_step,
                height_step,
                framerates,
            } => {
                let mut sizes = vec![*min];
                sizes.extend(
                    STANDARD_RESOLUTIONS
                        .iter()
                        .copied()
                        .filter(|s| s != min && s != max && self.contains(*s)),
                );
                if max != min {
                    sizes.push(*max);
                }
                for size in sizes {
                    out.push(
                        FormatCaps::encoding(encoding)
                            .with_size(size.width, size.height)
                            .with_framerate(framerates.clone()),
                    );
                }
                out.push(
                    FormatCaps::encoding(encoding)
                        .with_size_range(*min, *max, *width_step, *height_step)
                        .with_framerate(framerates.clone()),
                );
            }
        }
    }
}

fn on_grid(value: u32, min: u32, max: u32, step: u32) -> bool {
    value >= min && value <= max && (step <= 1 || (value - min) % step == 0)
}

impl fmt::Display for ResolutionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed { size, framerates } => write!(f, "{size} @ {framerates}"),
            Self::Range {
                min,
                max,
                width_step,
                height_step,
                framerates,
            } => write!(
                f,
                "{min} - {max} (step {width_step}x{height_step}) @ {framerates}"
            ),
        }
    }
}

// ============================================================================
// FormatDescription / FormatCatalog
// ============================================================================

/// All resolutions a source offers for one encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatDescription {
    /// Pixel encoding.
    pub encoding: Fourcc,
    /// Resolution entries in report order.
    pub resolutions: Vec<ResolutionRange>,
}

impl FormatDescription {
    /// Create a description.
    pub fn new(encoding: Fourcc, resolutions: Vec<ResolutionRange>) -> Self {
        Self {
            encoding,
            resolutions,
        }
    }

    /// Largest format of this encoding: widest, then tallest, then fastest.
    pub fn largest_format(&self) -> Option<PixelFormat> {
        self.resolutions
            .iter()
            .filter_map(|r| {
                let size = r.largest();
                let framerate = r.framerates().fixate_max()?;
                Some(PixelFormat::new(
                    self.encoding,
                    size.width,
                    size.height,
                    framerate,
                ))
            })
            .max_by(|a, b| {
                (a.width, a.height, a.framerate)
                    .cmp(&(b.width, b.height, b.framerate))
                    .then(std::cmp::Ordering::Greater)
            })
    }

    /// Whether `format` matches this description exactly.
    pub fn supports(&self, format: &PixelFormat) -> bool {
        format.encoding == self.encoding
            && self.resolutions.iter().any(|r| {
                r.framerates_for(format.size())
                    .is_some_and(|rates| rates.accepts(&format.framerate))
            })
    }
}

/// Ordered, read-only list of format descriptions reported by a source.
///
/// # Example
///
/// ```rust
/// use camcore::catalog::{FormatCatalog, FormatDescription, ResolutionRange};
/// use camcore::caps::CapsValue;
/// use camcore::format::{Fourcc, Framerate};
///
/// let catalog = FormatCatalog::new(vec![FormatDescription::new(
///     Fourcc::RGGB8,
///     vec![ResolutionRange::fixed(
///         1920,
///         1080,
///         CapsValue::List(vec![Framerate::FPS_30, Framerate::FPS_60]),
///     )],
/// )]);
///
/// let largest = catalog.largest_format(Fourcc::RGGB8).unwrap();
/// assert_eq!(largest.framerate, Framerate::FPS_60);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormatCatalog {
    descriptions: Vec<FormatDescription>,
}

impl FormatCatalog {
    /// Create a catalog from descriptions in report order.
    pub fn new(descriptions: Vec<FormatDescription>) -> Self {
        Self { descriptions }
    }

    /// Whether the source reported nothing.
    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    /// All descriptions in report order.
    pub fn descriptions(&self) -> &[FormatDescription] {
        &self.descriptions
    }

    /// Encodings in report order, deduplicated, without the zero encoding.
    pub fn encodings(&self) -> Vec<Fourcc> {
        let mut out: Vec<Fourcc> = Vec::with_capacity(self.descriptions.len());
        for desc in &self.descriptions {
            if desc.encoding.is_valid() && !out.contains(&desc.encoding) {
                out.push(desc.encoding);
            }
        }
        out
    }

    /// First description of `encoding`.
    pub fn description(&self, encoding: Fourcc) -> Option<&FormatDescription> {
        self.descriptions.iter().find(|d| d.encoding == encoding)
    }

    /// Largest format over every description of `encoding`.
    pub fn largest_format(&self, encoding: Fourcc) -> Option<PixelFormat> {
        self.descriptions
            .iter()
            .filter(|d| d.encoding == encoding)
            .filter_map(FormatDescription::largest_format)
            .max_by(|a, b| {
                (a.width, a.height, a.framerate)
                    .cmp(&(b.width, b.height, b.framerate))
                    .then(std::cmp::Ordering::Greater)
            })
    }

    /// Whether some description produces `format` exactly.
    pub fn supports(&self, format: &PixelFormat) -> bool {
        self.descriptions.iter().any(|d| d.supports(format))
    }

    /// Convert to capabilities.
    ///
    /// Ranged resolutions become the range minimum, every standard resolution
    /// inside the range, the range maximum and finally the range itself.
    /// Descriptions with the zero encoding are skipped.
    pub fn to_caps(&self) -> CapsSet {
        let mut out = Vec::new();
        for desc in &self.descriptions {
            if !desc.encoding.is_valid() {
                info!("format has empty fourcc, ignoring");
                continue;
            }
            for res in &desc.resolutions {
                res.to_caps(desc.encoding, &mut out);
            }
        }
        debug!("catalog expanded into {} caps entries", out.len());
        out.into()
    }
}

impl FromIterator<FormatDescription> for FormatCatalog {
    fn from_iter<I: IntoIterator<Item = FormatDescription>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for FormatCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, desc) in self.descriptions.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}:", desc.encoding)?;
            for res in &desc.resolutions {
                write!(f, " [{res}]")?;
            }
        }
        Ok(())
    }
}
