//! The negotiation engine.

use std::fmt;

use tracing::{debug, info, warn};

use super::{NegotiationError, RankingPolicy};
use crate::caps::CapsSet;
use crate::catalog::FormatCatalog;
use crate::format::{Fourcc, PixelFormat};
use crate::observability;
use crate::stage::{ConversionRole, StageDescriptor, StageKind, StageRegistry};

/// Bridging strategies in priority order.
const STRATEGIES: &[&[ConversionRole]] = {
    use ConversionRole::*;
    &[
        &[Combined],
        &[BayerNormalize, Debayer],
        &[BayerNormalize, Debayer, ColorConvert],
        &[Debayer],
        &[Debayer, ColorConvert],
        &[ColorConvert],
        &[Decode],
        &[Decode, ColorConvert],
    ]
};

/// Configuration for the negotiation engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiationConfig {
    /// Encoding preference when the consumer states none.
    pub ranking: RankingPolicy,
    /// Try a registered combined stage before multi-stage chains.
    pub use_combined_stage: bool,
    /// Allow bayer normalization ahead of debayering.
    pub use_bayer_normalize: bool,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            ranking: RankingPolicy::default(),
            use_combined_stage: true,
            use_bayer_normalize: true,
        }
    }
}

impl NegotiationConfig {
    /// Use a different ranking policy.
    pub fn with_ranking(mut self, ranking: RankingPolicy) -> Self {
        self.ranking = ranking;
        self
    }

    /// Enable or disable the combined-stage strategy.
    pub fn with_combined_stage(mut self, enabled: bool) -> Self {
        self.use_combined_stage = enabled;
        self
    }

    /// Enable or disable the normalize-then-debayer strategies.
    pub fn with_bayer_normalize(mut self, enabled: bool) -> Self {
        self.use_bayer_normalize = enabled;
        self
    }
}

/// A stage chosen by negotiation, bound to its formats.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedStage {
    /// Registry name.
    pub name: String,
    /// Stage kind.
    pub kind: StageKind,
    /// Bound input format.
    pub input: PixelFormat,
    /// Bound output format.
    pub output: PixelFormat,
}

/// Result of a successful negotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Negotiation {
    /// Format the source must produce.
    pub source_format: PixelFormat,
    /// Format the sink receives.
    pub sink_format: PixelFormat,
    /// Stages in processing order; interpretation stages first.
    pub stages: Vec<PlannedStage>,
}

impl Negotiation {
    /// A result without any conversion.
    pub fn direct(format: PixelFormat) -> Self {
        Self {
            source_format: format,
            sink_format: format,
            stages: Vec::new(),
        }
    }

    /// Stage names in processing order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Whether no conversion stage is needed.
    pub fn is_direct(&self) -> bool {
        self.stages.iter().all(|s| s.kind.is_interpretation())
    }
}

impl fmt::Display for Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source_format)?;
        for stage in &self.stages {
            write!(f, " -> {}", stage.name)?;
        }
        write!(f, " -> {}", self.sink_format)
    }
}

type Hop<'a> = (&'a StageDescriptor, Fourcc, Fourcc);

/// Decides boundary formats and bridging stages.
///
/// The engine is a pure computation over its inputs; it never instantiates
/// stages.
pub struct NegotiationEngine<'a> {
    registry: &'a StageRegistry,
    config: NegotiationConfig,
}

impl<'a> NegotiationEngine<'a> {
    /// Create an engine over `registry` with the default configuration.
    pub fn new(registry: &'a StageRegistry) -> Self {
        Self {
            registry,
            config: NegotiationConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: NegotiationConfig) -> Self {
        self.config = config;
        self
    }

    /// Current configuration.
    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    /// Negotiate between what the source offers and what the consumer wants.
    ///
    /// An empty `requested` asks for the most capable format.
    pub fn negotiate(
        &self,
        available: &FormatCatalog,
        requested: &CapsSet,
    ) -> Result<Negotiation, NegotiationError> {
        match self.negotiate_conversion(available, requested) {
            Ok(mut negotiation) => {
                self.insert_interpretation(&mut negotiation);
                info!("negotiated {}", negotiation);
                Ok(negotiation)
            }
            Err(e) => {
                observability::record_negotiation_failure();
                warn!("negotiation failed: {}", e);
                Err(e)
            }
        }
    }

    fn negotiate_conversion(
        &self,
        available: &FormatCatalog,
        requested: &CapsSet,
    ) -> Result<Negotiation, NegotiationError> {
        let encodings = available.encodings();
        if encodings.is_empty() {
            return Err(NegotiationError::NoAvailableFormats);
        }
        if requested.is_empty() {
            return self.most_capable(available, &encodings);
        }

        let available_caps = available.to_caps();
        if let Some(format) = requested.fixate_against(&available_caps) {
            debug!("direct match: {}", format);
            return Ok(Negotiation::direct(format));
        }

        let sources = self.config.ranking.sort(&encodings);
        for roles in STRATEGIES.iter().filter(|r| self.strategy_enabled(r)) {
            for &source in &sources {
                if let Some(negotiation) =
                    self.try_strategy(roles, source, &available_caps, requested)
                {
                    return Ok(negotiation);
                }
            }
        }

        Err(NegotiationError::no_compatible_format(available, requested))
    }

    fn strategy_enabled(&self, roles: &[ConversionRole]) -> bool {
        roles.iter().all(|role| match role {
            ConversionRole::Combined => self.config.use_combined_stage,
            ConversionRole::BayerNormalize => self.config.use_bayer_normalize,
            _ => true,
        })
    }

    fn most_capable(
        &self,
        available: &FormatCatalog,
        encodings: &[Fourcc],
    ) -> Result<Negotiation, NegotiationError> {
        let format = self
            .config
            .ranking
            .preferred(encodings)
            .and_then(|encoding| available.largest_format(encoding))
            .ok_or_else(|| NegotiationError::no_compatible_format(available, &CapsSet::new()))?;
        debug!("no request, using most capable format {}", format);
        Ok(Negotiation::direct(format))
    }

    fn try_strategy(
        &self,
        roles: &[ConversionRole],
        source: Fourcc,
        available_caps: &CapsSet,
        requested: &CapsSet,
    ) -> Option<Negotiation> {
        let mut path: Vec<Hop<'a>> = Vec::with_capacity(roles.len());
        if !self.find_path(roles, source, requested, &mut path) {
            return None;
        }
        let sink_encoding = path.last()?.2;

        // Conversions never scale, so size and framerate are shared along
        // the chain and only need to satisfy both ends.
        let format = requested
            .filter_encoding(sink_encoding)
            .without_encoding()
            .fixate_against(&available_caps.filter_encoding(source))?;

        let stages = path
            .iter()
            .map(|(desc, input, output)| PlannedStage {
                name: desc.name.clone(),
                kind: desc.kind,
                input: format.with_encoding(*input),
                output: format.with_encoding(*output),
            })
            .collect();
        debug!(
            "strategy [{}] bridges {} to {}",
            roles
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            source,
            sink_encoding
        );
        Some(Negotiation {
            source_format: format,
            sink_format: format.with_encoding(sink_encoding),
            stages,
        })
    }

    /// Depth-first search for one stage per role, each consuming its
    /// predecessor's output, ending in a requested encoding.
    fn find_path(
        &self,
        roles: &[ConversionRole],
        input: Fourcc,
        requested: &CapsSet,
        path: &mut Vec<Hop<'a>>,
    ) -> bool {
        let Some((role, rest)) = roles.split_first() else {
            return requested.accepts_encoding(input);
        };
        let registry: &'a StageRegistry = self.registry;
        for desc in registry.find(StageKind::Conversion(*role), input) {
            for output in candidate_outputs(desc, input, rest.is_empty(), requested) {
                path.push((desc, input, output));
                if self.find_path(rest, output, requested, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    fn insert_interpretation(&self, negotiation: &mut Negotiation) {
        let source = negotiation.source_format;
        let front: Vec<PlannedStage> = self
            .registry
            .interpretation_stages(source.encoding)
            .into_iter()
            .map(|desc| PlannedStage {
                name: desc.name.clone(),
                kind: desc.kind,
                input: source,
                output: source,
            })
            .collect();
        if !front.is_empty() {
            debug!("inserting {} interpretation stage(s)", front.len());
            negotiation.stages.splice(0..0, front);
        }
    }
}

/// Outputs worth trying; for the last hop only requested encodings, in the
/// consumer's preference order.
fn candidate_outputs(
    desc: &StageDescriptor,
    input: Fourcc,
    last: bool,
    requested: &CapsSet,
) -> Vec<Fourcc> {
    let outputs = desc.outputs_for(input);
    if !last {
        return outputs;
    }
    let mut ordered: Vec<Fourcc> = requested
        .encodings()
        .into_iter()
        .filter(|f| outputs.contains(f))
        .collect();
    for f in outputs {
        if !ordered.contains(&f) && requested.accepts_encoding(f) {
            ordered.push(f);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{CapsValue, FormatCaps};
    use crate::catalog::{FormatDescription, ResolutionRange};
    use crate::format::{Framerate, Size};
    use crate::stage::builtin::{self, ConvertStage, FrameStatistics, WhiteBalance};
    use crate::stage::{builtin_registry, stage_factory};

    fn catalog(encoding: Fourcc, width: u32, height: u32) -> FormatCatalog {
        FormatCatalog::new(vec![FormatDescription::new(
            encoding,
            vec![ResolutionRange::fixed(width, height, Framerate::FPS_30)],
        )])
    }

    #[test]
    fn test_empty_catalog_fails() {
        let registry = builtin_registry();
        let err = NegotiationEngine::new(&registry)
            .negotiate(&FormatCatalog::default(), &CapsSet::new())
            .unwrap_err();
        assert_eq!(err, NegotiationError::NoAvailableFormats);
    }

    #[test]
    fn test_direct_match_wins_over_conversion() {
        let registry = builtin_registry();
        let available = FormatCatalog::new(vec![
            FormatDescription::new(
                Fourcc::RGGB8,
                vec![ResolutionRange::fixed(1920, 1080, Framerate::FPS_30)],
            ),
            FormatDescription::new(
                Fourcc::RGB24,
                vec![ResolutionRange::fixed(640, 480, Framerate::FPS_30)],
            ),
        ]);
        let requested = CapsSet::from(FormatCaps::encoding(Fourcc::RGB24));
        let result = NegotiationEngine::new(&registry)
            .negotiate(&available, &requested)
            .unwrap();
        assert!(result.stages.is_empty());
        assert_eq!(result.source_format.size(), Size::new(640, 480));
    }

    #[test]
    fn test_combined_stage_preferred_when_registered() {
        let registry = builtin_registry()
            .with(builtin::combined_descriptor(), stage_factory(ConvertStage::combined));
        let available = catalog(Fourcc::RGGB8, 640, 480);
        let requested = CapsSet::from(FormatCaps::encoding(Fourcc::YUYV));

        let result = NegotiationEngine::new(&registry)
            .negotiate(&available, &requested)
            .unwrap();
        assert_eq!(result.stage_names(), vec!["combined"]);

        let config = NegotiationConfig::default().with_combined_stage(false);
        let result = NegotiationEngine::new(&registry)
            .with_config(config)
            .negotiate(&available, &requested)
            .unwrap();
        assert_eq!(result.stage_names(), vec!["debayer", "color-convert"]);
    }

    #[test]
    fn test_normalize_can_be_disabled() {
        let registry = builtin_registry();
        let available = catalog(Fourcc::BGGR10, 640, 480);
        let requested = CapsSet::from(FormatCaps::encoding(Fourcc::BGR24));
        let config = NegotiationConfig::default().with_bayer_normalize(false);
        let err = NegotiationEngine::new(&registry)
            .with_config(config)
            .negotiate(&available, &requested)
            .unwrap_err();
        assert!(matches!(err, NegotiationError::NoCompatibleFormat { .. }));
    }

    #[test]
    fn test_normalize_keeps_pattern() {
        let registry = builtin_registry();
        let available = catalog(Fourcc::BGGR10, 640, 480);
        let requested = CapsSet::from(FormatCaps::encoding(Fourcc::BGR24));
        let result = NegotiationEngine::new(&registry)
            .negotiate(&available, &requested)
            .unwrap();
        assert_eq!(result.stage_names(), vec!["bayer-normalize", "debayer"]);
        assert_eq!(result.stages[0].output.encoding, Fourcc::BGGR8);
        assert_eq!(result.sink_format.encoding, Fourcc::BGR24);
    }

    #[test]
    fn test_decode_path() {
        let registry = builtin_registry();
        let available = catalog(Fourcc::MJPEG, 1280, 720);
        let requested = CapsSet::from(FormatCaps::encoding(Fourcc::BGR24));
        let result = NegotiationEngine::new(&registry)
            .negotiate(&available, &requested)
            .unwrap();
        assert_eq!(result.stage_names(), vec!["jpeg-decode", "color-convert"]);
        assert_eq!(result.stages[0].output, result.stages[1].input);
    }

    #[test]
    fn test_resolution_mismatch_fails() {
        let registry = builtin_registry();
        let available = catalog(Fourcc::RGGB8, 640, 480);
        let requested = CapsSet::from(FormatCaps::encoding(Fourcc::RGB24).with_size(1920, 1080));
        let err = NegotiationEngine::new(&registry)
            .negotiate(&available, &requested)
            .unwrap_err();
        assert!(err.to_string().contains("RGB3 1920x1080"));
    }

    #[test]
    fn test_explicit_resolution_inside_range() {
        let registry = builtin_registry();
        let available = FormatCatalog::new(vec![FormatDescription::new(
            Fourcc::GBRG8,
            vec![ResolutionRange::range(
                Size::new(256, 4),
                Size::new(2448, 2048),
                16,
                4,
                CapsValue::Range {
                    min: Framerate::new(1, 1),
                    max: Framerate::new(75, 1),
                },
            )],
        )]);
        let requested = CapsSet::from(
            FormatCaps::encoding(Fourcc::BGRA32)
                .with_size(1024, 768)
                .with_framerate(Framerate::FPS_30),
        );
        let result = NegotiationEngine::new(&registry)
            .negotiate(&available, &requested)
            .unwrap();
        assert_eq!(
            result.source_format,
            PixelFormat::new(Fourcc::GBRG8, 1024, 768, Framerate::FPS_30)
        );
        assert_eq!(result.stage_names(), vec!["debayer"]);
    }

    #[test]
    fn test_unranked_only_when_requested() {
        let registry = builtin_registry();
        let odd = Fourcc::new(b"Y10B");
        let available = catalog(odd, 640, 480);

        let err = NegotiationEngine::new(&registry)
            .negotiate(&available, &CapsSet::new())
            .unwrap_err();
        assert!(matches!(err, NegotiationError::NoCompatibleFormat { .. }));

        let result = NegotiationEngine::new(&registry)
            .negotiate(&available, &CapsSet::from(FormatCaps::encoding(odd)))
            .unwrap();
        assert_eq!(result.sink_format.encoding, odd);
    }

    #[test]
    fn test_interpretation_stages_go_first() {
        let registry = builtin_registry()
            .with(builtin::white_balance_descriptor(), stage_factory(WhiteBalance::new))
            .with(
                builtin::frame_statistics_descriptor(),
                stage_factory(FrameStatistics::new),
            );
        let available = catalog(Fourcc::RGGB8, 640, 480);
        let requested = CapsSet::from(FormatCaps::encoding(Fourcc::RGB24));
        let result = NegotiationEngine::new(&registry)
            .negotiate(&available, &requested)
            .unwrap();
        assert_eq!(
            result.stage_names(),
            vec!["white-balance", "frame-statistics", "debayer"]
        );
        for stage in &result.stages[..2] {
            assert_eq!(stage.input, result.source_format);
            assert_eq!(stage.output, result.source_format);
        }
        assert!(!result.is_direct());

        // Bayer-only interpretation stages skip non-Bayer sources.
        let result = NegotiationEngine::new(&registry)
            .negotiate(&catalog(Fourcc::YUYV, 640, 480), &CapsSet::new())
            .unwrap();
        assert_eq!(result.stage_names(), vec!["frame-statistics"]);
        assert!(result.is_direct());
    }

    #[test]
    fn test_display() {
        let registry = builtin_registry();
        let result = NegotiationEngine::new(&registry)
            .negotiate(
                &catalog(Fourcc::RGGB8, 640, 480),
                &CapsSet::from(FormatCaps::encoding(Fourcc::RGB24)),
            )
            .unwrap();
        assert_eq!(
            result.to_string(),
            "RGGB 640x480 @ 30/1 -> debayer -> RGB3 640x480 @ 30/1"
        );
    }
}
