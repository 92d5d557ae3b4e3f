//! Capability constraints for format negotiation.
//!
//! Capabilities describe *sets* of formats: a device advertises what it can
//! produce, a consumer states what it accepts, and negotiation intersects
//! the two before fixating a single [`PixelFormat`].
//!
//! - [`CapsValue`]: constraint on a single field (fixed, range, list, any)
//! - [`FormatCaps`]: constraint on a whole format
//! - [`CapsSet`]: ordered alternatives, first is preferred

use std::fmt;

use crate::format::{Fourcc, Framerate, PixelFormat, Size};

// ============================================================================
// CapsValue - single field constraint
// ============================================================================

/// A constraint on a single value.
///
/// ```rust
/// use camcore::caps::CapsValue;
///
/// let fixed: CapsValue<u32> = CapsValue::Fixed(1920);
/// let range: CapsValue<u32> = CapsValue::Range { min: 720, max: 1920 };
/// let list: CapsValue<u32> = CapsValue::List(vec![1920, 1280, 720]);
///
/// assert_eq!(fixed.intersect(&range), Some(CapsValue::Fixed(1920)));
/// assert_eq!(list.fixate_max(), Some(1920));
/// assert_eq!(CapsValue::<u32>::Any.fixate(), None);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum CapsValue<T> {
    /// Exact value (fully constrained).
    Fixed(T),
    /// Range of acceptable values (inclusive).
    Range {
        /// Minimum acceptable value.
        min: T,
        /// Maximum acceptable value.
        max: T,
    },
    /// List of acceptable values (ordered by preference, first is best).
    List(Vec<T>),
    /// Any value accepted (unconstrained).
    #[default]
    Any,
}

impl<T: Clone + Ord> CapsValue<T> {
    /// Check if a value is accepted by this constraint.
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            Self::Fixed(v) => v == value,
            Self::Range { min, max } => value >= min && value <= max,
            Self::List(values) => values.contains(value),
            Self::Any => true,
        }
    }

    /// Intersect two constraints, finding common values.
    ///
    /// Returns `None` if there's no overlap.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Any, other) => Some(other.clone()),
            (self_, Self::Any) => Some(self_.clone()),

            (Self::Fixed(a), Self::Fixed(b)) => (a == b).then(|| Self::Fixed(a.clone())),

            (Self::Fixed(v), Self::Range { min, max })
            | (Self::Range { min, max }, Self::Fixed(v)) => {
                (v >= min && v <= max).then(|| Self::Fixed(v.clone()))
            }

            (Self::Fixed(v), Self::List(list)) | (Self::List(list), Self::Fixed(v)) => {
                list.contains(v).then(|| Self::Fixed(v.clone()))
            }

            (
                Self::Range {
                    min: min1,
                    max: max1,
                },
                Self::Range {
                    min: min2,
                    max: max2,
                },
            ) => {
                let new_min = min1.max(min2);
                let new_max = max1.min(max2);
                if new_min > new_max {
                    None
                } else if new_min == new_max {
                    Some(Self::Fixed(new_min.clone()))
                } else {
                    Some(Self::Range {
                        min: new_min.clone(),
                        max: new_max.clone(),
                    })
                }
            }

            // Range vs List: filter list to values in range
            (Self::Range { min, max }, Self::List(list))
            | (Self::List(list), Self::Range { min, max }) => {
                Self::from_candidates(list.iter().filter(|v| *v >= min && *v <= max).cloned())
            }

            // List vs List: common values, preserving order from the first list
            (Self::List(list1), Self::List(list2)) => {
                Self::from_candidates(list1.iter().filter(|v| list2.contains(v)).cloned())
            }
        }
    }

    fn from_candidates(values: impl Iterator<Item = T>) -> Option<Self> {
        let mut values: Vec<T> = values.collect();
        match values.len() {
            0 => None,
            1 => values.pop().map(Self::Fixed),
            _ => Some(Self::List(values)),
        }
    }

    /// Fixate: choose the preferred value (first in list, min in range).
    ///
    /// Returns `None` for `Any`.
    pub fn fixate(&self) -> Option<T> {
        match self {
            Self::Fixed(v) => Some(v.clone()),
            Self::Range { min, .. } => Some(min.clone()),
            Self::List(values) => values.first().cloned(),
            Self::Any => None,
        }
    }

    /// Fixate to the largest accepted value.
    ///
    /// Returns `None` for `Any` and for an empty list.
    pub fn fixate_max(&self) -> Option<T> {
        match self {
            Self::Fixed(v) => Some(v.clone()),
            Self::Range { max, .. } => Some(max.clone()),
            Self::List(values) => values.iter().max().cloned(),
            Self::Any => None,
        }
    }

    /// Check if this is a fixed value.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    /// Check if this accepts any value.
    #[inline]
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Get the fixed value if this is fixed.
    #[inline]
    pub fn as_fixed(&self) -> Option<&T> {
        match self {
            Self::Fixed(v) => Some(v),
            _ => None,
        }
    }
}

impl<T: Clone + Ord> From<T> for CapsValue<T> {
    fn from(value: T) -> Self {
        Self::Fixed(value)
    }
}

impl<T: Clone + Ord> From<std::ops::RangeInclusive<T>> for CapsValue<T> {
    fn from(range: std::ops::RangeInclusive<T>) -> Self {
        let (min, max) = range.into_inner();
        Self::Range { min, max }
    }
}

impl<T: Clone + Ord> From<Vec<T>> for CapsValue<T> {
    fn from(mut values: Vec<T>) -> Self {
        match values.len() {
            0 => Self::Any,
            1 => values.pop().map_or(Self::Any, Self::Fixed),
            _ => Self::List(values),
        }
    }
}

impl<T: fmt::Display> fmt::Display for CapsValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(v) => write!(f, "{v}"),
            Self::Range { min, max } => write!(f, "[{min}, {max}]"),
            Self::List(values) => {
                f.write_str("{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("}")
            }
            Self::Any => f.write_str("*"),
        }
    }
}

// ============================================================================
// FormatCaps - whole format constraint
// ============================================================================

/// Constraints on a whole video format.
///
/// Ranged dimensions may carry a step; a value inside the range is only
/// accepted when `(value - min)` is a multiple of the step. A step of 0 or 1
/// means every value.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FormatCaps {
    /// Accepted encodings.
    pub encoding: CapsValue<Fourcc>,
    /// Accepted widths.
    pub width: CapsValue<u32>,
    /// Accepted heights.
    pub height: CapsValue<u32>,
    /// Width granularity for ranged widths.
    pub width_step: u32,
    /// Height granularity for ranged heights.
    pub height_step: u32,
    /// Accepted framerates.
    pub framerate: CapsValue<Framerate>,
}

impl FormatCaps {
    /// Caps that accept every format.
    pub fn any() -> Self {
        Self::default()
    }

    /// Caps constrained to a single encoding, anything else free.
    pub fn encoding(encoding: Fourcc) -> Self {
        Self {
            encoding: CapsValue::Fixed(encoding),
            ..Self::default()
        }
    }

    /// Caps constrained to a list of encodings.
    pub fn encodings(encodings: impl IntoIterator<Item = Fourcc>) -> Self {
        Self {
            encoding: encodings.into_iter().collect::<Vec<_>>().into(),
            ..Self::default()
        }
    }

    /// Pin the resolution.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = CapsValue::Fixed(width);
        self.height = CapsValue::Fixed(height);
        self
    }

    /// Constrain the resolution to a stepped range.
    pub fn with_size_range(mut self, min: Size, max: Size, width_step: u32, height_step: u32) -> Self {
        self.width = CapsValue::Range {
            min: min.width,
            max: max.width,
        };
        self.height = CapsValue::Range {
            min: min.height,
            max: max.height,
        };
        self.width_step = width_step;
        self.height_step = height_step;
        self
    }

    /// Constrain the framerate.
    pub fn with_framerate(mut self, framerate: impl Into<CapsValue<Framerate>>) -> Self {
        self.framerate = framerate.into();
        self
    }

    /// Whether width or height is constrained.
    pub fn has_explicit_resolution(&self) -> bool {
        !self.width.is_any() || !self.height.is_any()
    }

    /// Check if a concrete format satisfies every constraint.
    pub fn accepts(&self, format: &PixelFormat) -> bool {
        self.encoding.accepts(&format.encoding)
            && accepts_stepped(&self.width, self.width_step, format.width)
            && accepts_stepped(&self.height, self.height_step, format.height)
            && self.framerate.accepts(&format.framerate)
    }

    /// Intersect two caps. Returns `None` when any field has no overlap.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let encoding = self.encoding.intersect(&other.encoding)?;
        let (width, width_step) = intersect_stepped(
            (&self.width, self.width_step),
            (&other.width, other.width_step),
        )?;
        let (height, height_step) = intersect_stepped(
            (&self.height, self.height_step),
            (&other.height, other.height_step),
        )?;
        let framerate = self.framerate.intersect(&other.framerate)?;
        Some(Self {
            encoding,
            width,
            height,
            width_step,
            height_step,
            framerate,
        })
    }

    /// Fixate to the largest format: highest width, then height, then framerate.
    ///
    /// The encoding uses its preferred value. Returns `None` while any field
    /// is still unconstrained.
    pub fn fixate_largest(&self) -> Option<PixelFormat> {
        let encoding = self.encoding.fixate()?;
        let width = fixate_stepped_max(&self.width, self.width_step)?;
        let height = fixate_stepped_max(&self.height, self.height_step)?;
        let framerate = self.framerate.fixate_max()?;
        Some(PixelFormat::new(encoding, width, height, framerate))
    }
}

impl From<PixelFormat> for FormatCaps {
    fn from(format: PixelFormat) -> Self {
        Self::encoding(format.encoding)
            .with_size(format.width, format.height)
            .with_framerate(CapsValue::Fixed(format.framerate))
    }
}

impl fmt::Display for FormatCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} @ {}",
            self.encoding, self.width, self.height, self.framerate
        )
    }
}

fn accepts_stepped(caps: &CapsValue<u32>, step: u32, value: u32) -> bool {
    if !caps.accepts(&value) {
        return false;
    }
    match caps {
        CapsValue::Range { min, .. } if step > 1 => (value - min) % step == 0,
        _ => true,
    }
}

fn intersect_stepped(
    (a, a_step): (&CapsValue<u32>, u32),
    (b, b_step): (&CapsValue<u32>, u32),
) -> Option<(CapsValue<u32>, u32)> {
    if let (
        CapsValue::Range { min: a_min, max: a_max },
        CapsValue::Range { min: b_min, max: b_max },
    ) = (a, b)
    {
        return intersect_grids((*a_min, *a_max, a_step), (*b_min, *b_max, b_step));
    }

    let value = a.intersect(b)?;
    let value = match value {
        CapsValue::Fixed(v) => {
            if !(accepts_stepped(a, a_step, v) && accepts_stepped(b, b_step, v)) {
                return None;
            }
            CapsValue::Fixed(v)
        }
        CapsValue::List(list) => CapsValue::from_candidates(
            list.into_iter()
                .filter(|v| accepts_stepped(a, a_step, *v) && accepts_stepped(b, b_step, *v)),
        )?,
        other => other,
    };
    // Only Range against Any is left here; the step belongs to the range side.
    let step = match (&value, a) {
        (CapsValue::Range { .. }, CapsValue::Range { .. }) => a_step,
        (CapsValue::Range { .. }, _) => b_step,
        _ => 0,
    };
    Some((value, step))
}

/// Values on both grids, where a grid is `min + k * step` up to `max`.
///
/// The result is re-based on its own first value with the combined step,
/// so every value it admits lies on both original grids.
fn intersect_grids(
    (a_min, a_max, a_step): (u32, u32, u32),
    (b_min, b_max, b_step): (u32, u32, u32),
) -> Option<(CapsValue<u32>, u32)> {
    let (a_min, a_step) = (u64::from(a_min), u64::from(a_step.max(1)));
    let (b_min, b_step) = (u64::from(b_min), u64::from(b_step.max(1)));
    let lo = a_min.max(b_min);
    let hi = u64::from(a_max.min(b_max));
    if lo > hi {
        return None;
    }

    let step = a_step / gcd(a_step, b_step) * b_step;
    let start = lo + (a_step - (lo - a_min) % a_step) % a_step;
    let first = (0..step / a_step)
        .map(|k| start + k * a_step)
        .take_while(|v| *v <= hi)
        .find(|v| (v - b_min) % b_step == 0)?;
    let last = hi - (hi - first) % step;

    // Both bounds come from u32 inputs and lie within [lo, hi].
    let (first, last) = (first as u32, last as u32);
    if first == last {
        return Some((CapsValue::Fixed(first), 0));
    }
    // A second value exists, so the step is below u32::MAX.
    let step = step as u32;
    Some((
        CapsValue::Range {
            min: first,
            max: last,
        },
        if step > 1 { step } else { 0 },
    ))
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn fixate_stepped_max(caps: &CapsValue<u32>, step: u32) -> Option<u32> {
    match caps {
        CapsValue::Range { min, max } if step > 1 => Some(max - (max - min) % step),
        other => other.fixate_max(),
    }
}

// ============================================================================
// CapsSet - ordered alternatives
// ============================================================================

/// Ordered list of format alternatives.
///
/// An empty set carries no constraint: negotiation treats it as a request for
/// the device's most capable format.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CapsSet(Vec<FormatCaps>);

impl CapsSet {
    /// Create an empty (unconstrained) set.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an alternative.
    pub fn push(&mut self, caps: FormatCaps) {
        self.0.push(caps);
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, caps: FormatCaps) -> Self {
        self.push(caps);
        self
    }

    /// Whether there are no alternatives.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of alternatives.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate alternatives in preference order.
    pub fn iter(&self) -> std::slice::Iter<'_, FormatCaps> {
        self.0.iter()
    }

    /// Pairwise intersection. Order follows `self` first, then `other`.
    pub fn intersect(&self, other: &CapsSet) -> CapsSet {
        self.0
            .iter()
            .flat_map(|a| other.0.iter().filter_map(move |b| a.intersect(b)))
            .collect()
    }

    /// Encodings named by the set, in order, without duplicates.
    ///
    /// Alternatives with an unconstrained encoding contribute nothing.
    pub fn encodings(&self) -> Vec<Fourcc> {
        let mut out = Vec::new();
        for caps in &self.0 {
            let named: &[Fourcc] = match &caps.encoding {
                CapsValue::Fixed(f) => std::slice::from_ref(f),
                CapsValue::List(list) => list,
                _ => &[],
            };
            for f in named {
                if !out.contains(f) {
                    out.push(*f);
                }
            }
        }
        out
    }

    /// Whether any alternative accepts the encoding.
    pub fn accepts_encoding(&self, encoding: Fourcc) -> bool {
        self.0.iter().any(|c| c.encoding.accepts(&encoding))
    }

    /// Whether any alternative accepts the concrete format.
    pub fn accepts(&self, format: &PixelFormat) -> bool {
        self.0.iter().any(|c| c.accepts(format))
    }

    /// Copy of the set with every alternative pinned to `encoding`.
    pub fn with_encoding(&self, encoding: Fourcc) -> CapsSet {
        self.map_encoding(CapsValue::Fixed(encoding))
    }

    /// Copy of the set with the encoding constraint dropped.
    pub fn without_encoding(&self) -> CapsSet {
        self.map_encoding(CapsValue::Any)
    }

    fn map_encoding(&self, encoding: CapsValue<Fourcc>) -> CapsSet {
        self.0
            .iter()
            .map(|c| FormatCaps {
                encoding: encoding.clone(),
                ..c.clone()
            })
            .collect()
    }

    /// Alternatives restricted to a single encoding.
    pub fn filter_encoding(&self, encoding: Fourcc) -> CapsSet {
        self.0
            .iter()
            .filter(|c| c.encoding.accepts(&encoding))
            .map(|c| FormatCaps {
                encoding: CapsValue::Fixed(encoding),
                ..c.clone()
            })
            .collect()
    }

    /// Whether any alternative constrains width or height.
    pub fn has_explicit_resolution(&self) -> bool {
        self.0.iter().any(FormatCaps::has_explicit_resolution)
    }

    /// Fixate to a single format.
    ///
    /// With an explicit resolution the first alternative that can be fixated
    /// wins. Otherwise the largest candidate across all alternatives is
    /// taken: width, then height, then framerate.
    pub fn fixate(&self) -> Option<PixelFormat> {
        if self.has_explicit_resolution() {
            self.fixate_first()
        } else {
            self.fixate_largest()
        }
    }

    /// Intersect with `available` and fixate the result.
    ///
    /// Whether a resolution was asked for is decided by `self` alone: a
    /// device listing fixed sizes does not turn an encoding-only request
    /// into an explicit one.
    pub fn fixate_against(&self, available: &CapsSet) -> Option<PixelFormat> {
        let candidates = self.intersect(available);
        if self.has_explicit_resolution() {
            candidates.fixate_first()
        } else {
            candidates.fixate_largest()
        }
    }

    fn fixate_first(&self) -> Option<PixelFormat> {
        self.0.iter().find_map(FormatCaps::fixate_largest)
    }

    fn fixate_largest(&self) -> Option<PixelFormat> {
        self.0
            .iter()
            .filter_map(FormatCaps::fixate_largest)
            .max_by(|a, b| {
                (a.width, a.height, a.framerate)
                    .cmp(&(b.width, b.height, b.framerate))
                    // Earlier alternatives win ties.
                    .then(std::cmp::Ordering::Greater)
            })
    }
}

impl From<FormatCaps> for CapsSet {
    fn from(caps: FormatCaps) -> Self {
        Self(vec![caps])
    }
}

impl From<Vec<FormatCaps>> for CapsSet {
    fn from(caps: Vec<FormatCaps>) -> Self {
        Self(caps)
    }
}

impl FromIterator<FormatCaps> for CapsSet {
    fn from_iter<I: IntoIterator<Item = FormatCaps>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a CapsSet {
    type Item = &'a FormatCaps;
    type IntoIter = std::slice::Iter<'a, FormatCaps>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for CapsSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("EMPTY");
        }
        for (i, caps) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{caps}")?;
        }
        Ok(())
    }
}
