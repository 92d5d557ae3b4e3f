//! Pixel encodings and concrete video formats.
//!
//! This module provides the leaf types every other part of the crate speaks:
//!
//! - [`Fourcc`]: opaque 32-bit encoding identifier
//! - [`EncodingFamily`]: coarse classification used by format ranking
//! - [`Framerate`] and [`Size`]: ordered building blocks
//! - [`PixelFormat`]: a fully fixed format (encoding, size, framerate)

use std::fmt;

// ============================================================================
// Fourcc - encoding identifier
// ============================================================================

/// Four-character code identifying a pixel data layout.
///
/// The value zero is reserved and never names a valid encoding.
///
/// # Examples
///
/// ```rust
/// use camcore::format::Fourcc;
///
/// let rggb = Fourcc::new(b"RGGB");
/// assert_eq!(rggb, Fourcc::RGGB8);
/// assert_eq!(rggb.to_string(), "RGGB");
/// assert!(!Fourcc::from_u32(0).is_valid());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Fourcc(u32);

impl Fourcc {
    /// Build a code from four ASCII bytes (little-endian packing, as V4L2 does).
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(u32::from_le_bytes(*code))
    }

    /// Wrap a raw 32-bit code.
    pub const fn from_u32(code: u32) -> Self {
        Self(code)
    }

    /// Raw 32-bit code.
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// The four bytes of the code.
    #[inline]
    pub const fn to_bytes(&self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Whether this code may name an encoding at all.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }

    // Bayer 8-bit
    /// Bayer RGGB, 8 bits per sample.
    pub const RGGB8: Self = Self::new(b"RGGB");
    /// Bayer GBRG, 8 bits per sample.
    pub const GBRG8: Self = Self::new(b"GBRG");
    /// Bayer GRBG, 8 bits per sample.
    pub const GRBG8: Self = Self::new(b"GRBG");
    /// Bayer BGGR, 8 bits per sample.
    pub const BGGR8: Self = Self::new(b"BA81");

    // Bayer 10-bit
    /// Bayer RGGB, 10 bits in 16-bit words.
    pub const RGGB10: Self = Self::new(b"RG10");
    /// Bayer GBRG, 10 bits in 16-bit words.
    pub const GBRG10: Self = Self::new(b"GB10");
    /// Bayer GRBG, 10 bits in 16-bit words.
    pub const GRBG10: Self = Self::new(b"BA10");
    /// Bayer BGGR, 10 bits in 16-bit words.
    pub const BGGR10: Self = Self::new(b"BG10");
    /// Bayer RGGB, 10 bits MIPI packed.
    pub const RGGB10_PACKED: Self = Self::new(b"pRAA");
    /// Bayer GBRG, 10 bits MIPI packed.
    pub const GBRG10_PACKED: Self = Self::new(b"pGAA");
    /// Bayer GRBG, 10 bits MIPI packed.
    pub const GRBG10_PACKED: Self = Self::new(b"pgAA");
    /// Bayer BGGR, 10 bits MIPI packed.
    pub const BGGR10_PACKED: Self = Self::new(b"pBAA");

    // Bayer 12-bit
    /// Bayer RGGB, 12 bits in 16-bit words.
    pub const RGGB12: Self = Self::new(b"RG12");
    /// Bayer GBRG, 12 bits in 16-bit words.
    pub const GBRG12: Self = Self::new(b"GB12");
    /// Bayer GRBG, 12 bits in 16-bit words.
    pub const GRBG12: Self = Self::new(b"BA12");
    /// Bayer BGGR, 12 bits in 16-bit words.
    pub const BGGR12: Self = Self::new(b"BG12");
    /// Bayer RGGB, 12 bits packed.
    pub const RGGB12_PACKED: Self = Self::new(b"pRCC");
    /// Bayer GBRG, 12 bits packed.
    pub const GBRG12_PACKED: Self = Self::new(b"pGCC");
    /// Bayer GRBG, 12 bits packed.
    pub const GRBG12_PACKED: Self = Self::new(b"pgCC");
    /// Bayer BGGR, 12 bits packed.
    pub const BGGR12_PACKED: Self = Self::new(b"pBCC");

    // Bayer 16-bit
    /// Bayer RGGB, 16 bits per sample.
    pub const RGGB16: Self = Self::new(b"RG16");
    /// Bayer GBRG, 16 bits per sample.
    pub const GBRG16: Self = Self::new(b"GB16");
    /// Bayer GRBG, 16 bits per sample.
    pub const GRBG16: Self = Self::new(b"GR16");
    /// Bayer BGGR, 16 bits per sample.
    pub const BGGR16: Self = Self::new(b"BYR2");

    // Piecewise-linear (HDR companded) Bayer
    /// PWL RGGB, 12-bit container.
    pub const PWL_RG12: Self = Self::new(b"PWLR");
    /// PWL RGGB, 12-bit MIPI packed.
    pub const PWL_RG12_PACKED: Self = Self::new(b"PWLM");
    /// PWL RGGB, 12 significant bits in 16-bit words.
    pub const PWL_RG16H12: Self = Self::new(b"PWLH");

    // Packed color
    /// RGB, 8 bits per channel.
    pub const RGB24: Self = Self::new(b"RGB3");
    /// BGR, 8 bits per channel.
    pub const BGR24: Self = Self::new(b"BGR3");
    /// RGBx, 8 bits per channel.
    pub const RGBX32: Self = Self::new(b"RGBx");
    /// BGRA, 8 bits per channel.
    pub const BGRA32: Self = Self::new(b"BGRA");
    /// BGRA, 16 bits per channel.
    pub const BGRA64: Self = Self::new(b"BA64");

    // YUV
    /// Packed YUV 4:2:2, Y0 U Y1 V.
    pub const YUYV: Self = Self::new(b"YUYV");
    /// Packed YUV 4:2:2, U Y0 V Y1.
    pub const UYVY: Self = Self::new(b"UYVY");
    /// Semi-planar YUV 4:2:0.
    pub const NV12: Self = Self::new(b"NV12");
    /// Packed YUV 4:1:1.
    pub const Y411: Self = Self::new(b"Y411");
    /// IEEE 1394 YUV 4:1:1.
    pub const IYU1: Self = Self::new(b"IYU1");
    /// IEEE 1394 YUV 4:4:4.
    pub const IYU2: Self = Self::new(b"IYU2");

    // Compressed
    /// Motion JPEG.
    pub const MJPEG: Self = Self::new(b"MJPG");

    // Mono
    /// 8-bit grayscale.
    pub const MONO8: Self = Self::new(b"GREY");
    /// 16-bit grayscale.
    pub const MONO16: Self = Self::new(b"Y16 ");

    // Polarization sensors
    /// Polarization Bayer BG, 8 bits.
    pub const POLARIZED_BAYER8: Self = Self::new(b"PBG8");
    /// Polarization Bayer BG, 12 bits packed.
    pub const POLARIZED_BAYER12_PACKED: Self = Self::new(b"PBGC");
    /// Polarization Bayer BG, 16 bits.
    pub const POLARIZED_BAYER16: Self = Self::new(b"PBGG");
    /// Polarization mono, 8 bits.
    pub const POLARIZED_MONO8: Self = Self::new(b"PMO8");
    /// Polarization mono, 12 bits packed.
    pub const POLARIZED_MONO12_PACKED: Self = Self::new(b"PMOC");
    /// Polarization mono, 16 bits.
    pub const POLARIZED_MONO16: Self = Self::new(b"PMOG");

    /// Coarse family of this encoding, if known.
    pub fn family(&self) -> Option<EncodingFamily> {
        EncodingFamily::of(*self)
    }

    /// Bayer color-filter layout, for every Bayer encoding regardless of depth.
    pub fn bayer_pattern(&self) -> Option<BayerPattern> {
        use BayerPattern::*;
        let pattern = match *self {
            Self::RGGB8 | Self::RGGB10 | Self::RGGB10_PACKED | Self::RGGB12 => Rggb,
            Self::RGGB12_PACKED | Self::RGGB16 => Rggb,
            Self::PWL_RG12 | Self::PWL_RG12_PACKED | Self::PWL_RG16H12 => Rggb,
            Self::GBRG8 | Self::GBRG10 | Self::GBRG10_PACKED | Self::GBRG12 => Gbrg,
            Self::GBRG12_PACKED | Self::GBRG16 => Gbrg,
            Self::GRBG8 | Self::GRBG10 | Self::GRBG10_PACKED | Self::GRBG12 => Grbg,
            Self::GRBG12_PACKED | Self::GRBG16 => Grbg,
            Self::BGGR8 | Self::BGGR10 | Self::BGGR10_PACKED | Self::BGGR12 => Bggr,
            Self::BGGR12_PACKED | Self::BGGR16 => Bggr,
            _ => return None,
        };
        Some(pattern)
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            // Trailing padding spaces are part of some codes ("Y16 ").
            let text: String = bytes.iter().map(|b| *b as char).collect();
            f.write_str(text.trim_end())
        } else {
            write!(f, "0x{:08x}", self.0)
        }
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fourcc({self})")
    }
}

impl From<u32> for Fourcc {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

/// Layout of the 2x2 color-filter cell of a Bayer sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BayerPattern {
    /// Red, green / green, blue.
    Rggb,
    /// Green, blue / red, green.
    Gbrg,
    /// Green, red / blue, green.
    Grbg,
    /// Blue, green / green, red.
    Bggr,
}

impl BayerPattern {
    /// Offset of the red sample inside the 2x2 cell as (column, row).
    pub const fn red_offset(&self) -> (usize, usize) {
        match self {
            Self::Rggb => (0, 0),
            Self::Gbrg => (0, 1),
            Self::Grbg => (1, 0),
            Self::Bggr => (1, 1),
        }
    }

    /// Offset of the blue sample inside the 2x2 cell as (column, row).
    pub const fn blue_offset(&self) -> (usize, usize) {
        let (x, y) = self.red_offset();
        (1 - x, 1 - y)
    }
}

// ============================================================================
// EncodingFamily - classification for ranking
// ============================================================================

/// Coarse classification of encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EncodingFamily {
    /// 8-bit Bayer.
    Bayer8,
    /// Packed RGB/BGR color.
    Rgb,
    /// YUV variants.
    Yuv,
    /// Compressed streams (MJPEG).
    Compressed,
    /// 16-bit grayscale.
    Mono16,
    /// 8-bit grayscale.
    Mono8,
    /// Piecewise-linear companded Bayer.
    BayerPwl,
    /// 10-bit Bayer, packed or not.
    Bayer10,
    /// 12-bit Bayer, packed or not.
    Bayer12,
    /// 16-bit Bayer.
    Bayer16,
    /// Bayer with a polarization filter array.
    PolarizedBayer,
    /// Mono with a polarization filter array.
    PolarizedMono,
}

impl EncodingFamily {
    /// Classify an encoding. Unknown codes return `None`.
    pub fn of(fourcc: Fourcc) -> Option<Self> {
        let family = match fourcc {
            Fourcc::RGGB8 | Fourcc::GBRG8 | Fourcc::GRBG8 | Fourcc::BGGR8 => Self::Bayer8,
            Fourcc::RGB24 | Fourcc::BGR24 | Fourcc::RGBX32 | Fourcc::BGRA32 | Fourcc::BGRA64 => {
                Self::Rgb
            }
            Fourcc::YUYV
            | Fourcc::UYVY
            | Fourcc::NV12
            | Fourcc::Y411
            | Fourcc::IYU1
            | Fourcc::IYU2 => Self::Yuv,
            Fourcc::MJPEG => Self::Compressed,
            Fourcc::MONO16 => Self::Mono16,
            Fourcc::MONO8 => Self::Mono8,
            Fourcc::PWL_RG12 | Fourcc::PWL_RG12_PACKED | Fourcc::PWL_RG16H12 => Self::BayerPwl,
            Fourcc::RGGB10
            | Fourcc::GBRG10
            | Fourcc::GRBG10
            | Fourcc::BGGR10
            | Fourcc::RGGB10_PACKED
            | Fourcc::GBRG10_PACKED
            | Fourcc::GRBG10_PACKED
            | Fourcc::BGGR10_PACKED => Self::Bayer10,
            Fourcc::RGGB12
            | Fourcc::GBRG12
            | Fourcc::GRBG12
            | Fourcc::BGGR12
            | Fourcc::RGGB12_PACKED
            | Fourcc::GBRG12_PACKED
            | Fourcc::GRBG12_PACKED
            | Fourcc::BGGR12_PACKED => Self::Bayer12,
            Fourcc::RGGB16 | Fourcc::GBRG16 | Fourcc::GRBG16 | Fourcc::BGGR16 => Self::Bayer16,
            Fourcc::POLARIZED_BAYER8
            | Fourcc::POLARIZED_BAYER12_PACKED
            | Fourcc::POLARIZED_BAYER16 => Self::PolarizedBayer,
            Fourcc::POLARIZED_MONO8
            | Fourcc::POLARIZED_MONO12_PACKED
            | Fourcc::POLARIZED_MONO16 => Self::PolarizedMono,
            _ => return None,
        };
        Some(family)
    }

    /// Every encoding of this crate's well-known set that belongs to this family.
    pub fn members(&self) -> &'static [Fourcc] {
        match self {
            Self::Bayer8 => &[Fourcc::RGGB8, Fourcc::GBRG8, Fourcc::GRBG8, Fourcc::BGGR8],
            Self::Rgb => &[
                Fourcc::RGB24,
                Fourcc::BGR24,
                Fourcc::RGBX32,
                Fourcc::BGRA32,
                Fourcc::BGRA64,
            ],
            Self::Yuv => &[
                Fourcc::YUYV,
                Fourcc::UYVY,
                Fourcc::NV12,
                Fourcc::Y411,
                Fourcc::IYU1,
                Fourcc::IYU2,
            ],
            Self::Compressed => &[Fourcc::MJPEG],
            Self::Mono16 => &[Fourcc::MONO16],
            Self::Mono8 => &[Fourcc::MONO8],
            Self::BayerPwl => &[
                Fourcc::PWL_RG12,
                Fourcc::PWL_RG12_PACKED,
                Fourcc::PWL_RG16H12,
            ],
            Self::Bayer10 => &[
                Fourcc::RGGB10,
                Fourcc::GBRG10,
                Fourcc::GRBG10,
                Fourcc::BGGR10,
                Fourcc::RGGB10_PACKED,
                Fourcc::GBRG10_PACKED,
                Fourcc::GRBG10_PACKED,
                Fourcc::BGGR10_PACKED,
            ],
            Self::Bayer12 => &[
                Fourcc::RGGB12,
                Fourcc::GBRG12,
                Fourcc::GRBG12,
                Fourcc::BGGR12,
                Fourcc::RGGB12_PACKED,
                Fourcc::GBRG12_PACKED,
                Fourcc::GRBG12_PACKED,
                Fourcc::BGGR12_PACKED,
            ],
            Self::Bayer16 => &[
                Fourcc::RGGB16,
                Fourcc::GBRG16,
                Fourcc::GRBG16,
                Fourcc::BGGR16,
            ],
            Self::PolarizedBayer => &[
                Fourcc::POLARIZED_BAYER8,
                Fourcc::POLARIZED_BAYER12_PACKED,
                Fourcc::POLARIZED_BAYER16,
            ],
            Self::PolarizedMono => &[
                Fourcc::POLARIZED_MONO8,
                Fourcc::POLARIZED_MONO12_PACKED,
                Fourcc::POLARIZED_MONO16,
            ],
        }
    }

    /// Whether samples are laid out under a Bayer color-filter array.
    pub fn is_bayer(&self) -> bool {
        matches!(
            self,
            Self::Bayer8 | Self::BayerPwl | Self::Bayer10 | Self::Bayer12 | Self::Bayer16
        )
    }
}

// ============================================================================
// Framerate and Size
// ============================================================================

/// Frame rate as numerator/denominator (8 bytes, Copy).
///
/// Using a fraction allows exact representation of common framerates
/// like 29.97 fps (30000/1001). Equality is structural; ordering compares
/// the rational values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Framerate {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (time units).
    pub den: u32,
}

impl Framerate {
    /// Create a new framerate.
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Whole frames per second.
    pub const fn fps(fps: u32) -> Self {
        Self::new(fps, 1)
    }

    /// 15 fps.
    pub const FPS_15: Self = Self::new(15, 1);
    /// 30 fps.
    pub const FPS_30: Self = Self::new(30, 1);
    /// 60 fps.
    pub const FPS_60: Self = Self::new(60, 1);

    /// Get the framerate as a floating-point value.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den.max(1) as f64
    }

    /// Get frame duration in nanoseconds.
    #[inline]
    pub const fn frame_duration_ns(&self) -> u64 {
        if self.num == 0 {
            return 0;
        }
        (self.den as u64 * 1_000_000_000) / self.num as u64
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self::FPS_30
    }
}

impl PartialOrd for Framerate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Framerate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Compare as fractions: a/b vs c/d => a*d vs c*b
        let lhs = (self.num as u64) * (other.den as u64);
        let rhs = (other.num as u64) * (self.den as u64);
        lhs.cmp(&rhs).then_with(|| self.den.cmp(&other.den))
    }
}

impl fmt::Display for Framerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Image dimensions in pixels, ordered by width then height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Create a new size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ============================================================================
// PixelFormat - fully fixed format
// ============================================================================

/// A concrete video format: encoding, resolution and framerate.
///
/// Equality is structural. Values are `Copy` and never mutated in place;
/// use [`PixelFormat::with_encoding`] to derive a neighbor format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    /// Pixel encoding.
    pub encoding: Fourcc,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frame rate.
    pub framerate: Framerate,
}

impl PixelFormat {
    /// Create a new format.
    pub const fn new(encoding: Fourcc, width: u32, height: u32, framerate: Framerate) -> Self {
        Self {
            encoding,
            width,
            height,
            framerate,
        }
    }

    /// Same size and framerate, different encoding.
    pub const fn with_encoding(&self, encoding: Fourcc) -> Self {
        Self { encoding, ..*self }
    }

    /// Frame dimensions.
    #[inline]
    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} @ {}",
            self.encoding, self.width, self.height, self.framerate
        )
    }
}
