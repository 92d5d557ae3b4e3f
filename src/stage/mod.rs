//! Transform stages and the registry negotiation draws them from.
//!
//! A stage is described twice:
//!
//! - statically, by a [`StageDescriptor`] (name, kind, encoding sets) that
//!   negotiation inspects without instantiating anything;
//! - at runtime, by a [`Stage`] instance created from a [`StageFactory`] and
//!   bound to one input/output [`PixelFormat`] pair.

pub mod builtin;

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::buffer::ImageBuffer;
use crate::error::Result;
use crate::format::{Fourcc, PixelFormat};
use crate::pipeline::PipelineState;

pub use builtin::builtin_registry;

// ============================================================================
// Descriptors
// ============================================================================

/// What a conversion stage does, used to assemble bridging strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConversionRole {
    /// Debayer and color conversion in one pass.
    Combined,
    /// Packed or deep Bayer to 8-bit Bayer.
    BayerNormalize,
    /// Bayer to color.
    Debayer,
    /// Between color, YUV and mono encodings.
    ColorConvert,
    /// Compressed to raw.
    Decode,
}

impl fmt::Display for ConversionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Combined => "combined",
            Self::BayerNormalize => "bayer-normalize",
            Self::Debayer => "debayer",
            Self::ColorConvert => "color-convert",
            Self::Decode => "decode",
        };
        f.write_str(name)
    }
}

/// Stage classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Changes the encoding.
    Conversion(ConversionRole),
    /// Observes or corrects data in place; never changes the format.
    Interpretation,
}

impl StageKind {
    /// Whether this is an interpretation stage.
    pub fn is_interpretation(&self) -> bool {
        matches!(self, Self::Interpretation)
    }
}

/// Set of encodings a stage consumes or produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncodingSet {
    /// Every encoding. As an output set it means "same as the input".
    Any,
    /// Only the listed encodings, in preference order.
    Only(SmallVec<[Fourcc; 8]>),
}

impl EncodingSet {
    /// Build a set from a list of encodings.
    pub fn only(encodings: impl IntoIterator<Item = Fourcc>) -> Self {
        Self::Only(encodings.into_iter().collect())
    }

    /// Whether the set contains `encoding`.
    pub fn contains(&self, encoding: Fourcc) -> bool {
        match self {
            Self::Any => encoding.is_valid(),
            Self::Only(list) => list.contains(&encoding),
        }
    }

    /// Whether this is the `Any` set.
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Listed encodings; empty for `Any`.
    pub fn as_slice(&self) -> &[Fourcc] {
        match self {
            Self::Any => &[],
            Self::Only(list) => list.as_slice(),
        }
    }
}

impl FromIterator<Fourcc> for EncodingSet {
    fn from_iter<I: IntoIterator<Item = Fourcc>>(iter: I) -> Self {
        Self::only(iter)
    }
}

/// Static description of a stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageDescriptor {
    /// Registry name, unique.
    pub name: String,
    /// Classification.
    pub kind: StageKind,
    /// Encodings the stage consumes.
    pub input: EncodingSet,
    /// Encodings the stage produces.
    pub output: EncodingSet,
    /// Output keeps the Bayer layout of the input (e.g. RG12 to RGGB only).
    pub keeps_bayer_pattern: bool,
}

impl StageDescriptor {
    /// Create a descriptor.
    pub fn new(
        name: impl Into<String>,
        kind: StageKind,
        input: EncodingSet,
        output: EncodingSet,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            input,
            output,
            keeps_bayer_pattern: false,
        }
    }

    /// Mark the output as keeping the input's Bayer layout.
    pub fn keeping_bayer_pattern(mut self) -> Self {
        self.keeps_bayer_pattern = true;
        self
    }

    /// Whether the stage consumes `encoding`.
    pub fn accepts(&self, encoding: Fourcc) -> bool {
        self.input.contains(encoding)
    }

    /// Encodings the stage can produce from `input`, in preference order.
    ///
    /// Empty when the input is not accepted.
    pub fn outputs_for(&self, input: Fourcc) -> Vec<Fourcc> {
        if !self.accepts(input) {
            return Vec::new();
        }
        match &self.output {
            EncodingSet::Any => vec![input],
            EncodingSet::Only(list) => list
                .iter()
                .copied()
                .filter(|out| {
                    !self.keeps_bayer_pattern || out.bayer_pattern() == input.bayer_pattern()
                })
                .collect(),
        }
    }

    /// Whether the stage turns `input` into `output`.
    pub fn converts(&self, input: Fourcc, output: Fourcc) -> bool {
        self.outputs_for(input).contains(&output)
    }
}

// ============================================================================
// Stage instances
// ============================================================================

/// A runtime stage instance.
///
/// Instances are exclusively owned by one filter chain. The chain binds the
/// format pair with [`set_video_format`](Stage::set_video_format), toggles
/// activity with [`set_status`](Stage::set_status) and feeds buffers through
/// [`transform`](Stage::transform) from the worker thread.
pub trait Stage: Send {
    /// Static description.
    fn descriptor(&self) -> &StageDescriptor;

    /// Registry name.
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Bind input and output formats. Returns `false` if unsupported.
    fn set_video_format(&mut self, input: &PixelFormat, output: &PixelFormat) -> bool;

    /// Bound input and output formats.
    fn video_format(&self) -> Option<(PixelFormat, PixelFormat)>;

    /// Change activity. Returns `false` if the stage refuses.
    fn set_status(&mut self, state: PipelineState) -> bool;

    /// Process one buffer in place.
    ///
    /// On return the buffer must carry the bound output format.
    fn transform(&mut self, buffer: &mut ImageBuffer) -> Result<()>;
}

/// Factory function for creating stage instances.
pub type StageFactory = Arc<dyn Fn() -> Box<dyn Stage> + Send + Sync>;

/// Wrap a constructor into a [`StageFactory`].
pub fn stage_factory<S, F>(make: F) -> StageFactory
where
    S: Stage + 'static,
    F: Fn() -> S + Send + Sync + 'static,
{
    Arc::new(move || Box::new(make()) as Box<dyn Stage>)
}

// ============================================================================
// StageRegistry
// ============================================================================

#[derive(Clone)]
struct StageEntry {
    descriptor: StageDescriptor,
    factory: StageFactory,
}

/// Ordered collection of available stages.
///
/// Registration order is significant: lookups return stages in the order
/// they were registered, which is also the order interpretation stages are
/// inserted into a chain.
#[derive(Clone, Default)]
pub struct StageRegistry {
    entries: Vec<StageEntry>,
}

impl StageRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage. A later registration under an existing name
    /// replaces the earlier one in place.
    pub fn register(&mut self, descriptor: StageDescriptor, factory: StageFactory) {
        let entry = StageEntry {
            descriptor,
            factory,
        };
        match self
            .entries
            .iter_mut()
            .find(|e| e.descriptor.name == entry.descriptor.name)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Builder-style registration.
    pub fn with(mut self, descriptor: StageDescriptor, factory: StageFactory) -> Self {
        self.register(descriptor, factory);
        self
    }

    /// Stages of `kind` that consume `input`, in registration order.
    pub fn find(&self, kind: StageKind, input: Fourcc) -> Vec<&StageDescriptor> {
        self.descriptors()
            .filter(|d| d.kind == kind && d.accepts(input))
            .collect()
    }

    /// Conversion stages filling `role`, in registration order.
    pub fn find_role(&self, role: ConversionRole) -> Vec<&StageDescriptor> {
        self.descriptors()
            .filter(|d| d.kind == StageKind::Conversion(role))
            .collect()
    }

    /// Interpretation stages that consume `input`, in registration order.
    pub fn interpretation_stages(&self, input: Fourcc) -> Vec<&StageDescriptor> {
        self.find(StageKind::Interpretation, input)
    }

    /// Descriptor registered under `name`.
    pub fn descriptor(&self, name: &str) -> Option<&StageDescriptor> {
        self.descriptors().find(|d| d.name == name)
    }

    /// Instantiate the stage registered under `name`.
    pub fn create(&self, name: &str) -> Option<Box<dyn Stage>> {
        self.entries
            .iter()
            .find(|e| e.descriptor.name == name)
            .map(|e| (e.factory)())
    }

    /// All descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    /// Number of registered stages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.descriptor.name))
            .finish()
    }
}
