//! Format negotiation between a source and a consumer.
//!
//! Given what the device offers ([`FormatCatalog`]) and what the consumer asks
//! for ([`CapsSet`], empty meaning "most capable format"), the engine decides
//! the boundary format and the stages that bridge the two.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    NegotiationEngine                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  1. Empty request: rank encodings, take the largest format      │
//! │  2. Direct intersection of available and requested              │
//! │  3. Bridging strategies, first success wins:                    │
//! │       combined | normalize+debayer | debayer | convert | decode │
//! │  4. Prepend interpretation stages bound to the source format    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use camcore::caps::{CapsSet, CapsValue, FormatCaps};
//! use camcore::catalog::{FormatCatalog, FormatDescription, ResolutionRange};
//! use camcore::format::{Fourcc, Framerate};
//! use camcore::negotiation::NegotiationEngine;
//! use camcore::stage::builtin_registry;
//!
//! let available = FormatCatalog::new(vec![FormatDescription::new(
//!     Fourcc::RGGB8,
//!     vec![ResolutionRange::fixed(
//!         1920,
//!         1080,
//!         CapsValue::List(vec![Framerate::FPS_30, Framerate::FPS_60]),
//!     )],
//! )]);
//! let requested = CapsSet::from(FormatCaps::encoding(Fourcc::RGB24));
//!
//! let registry = builtin_registry();
//! let result = NegotiationEngine::new(&registry)
//!     .negotiate(&available, &requested)
//!     .unwrap();
//!
//! assert_eq!(result.sink_format.encoding, Fourcc::RGB24);
//! assert_eq!(result.sink_format.framerate, Framerate::FPS_60);
//! assert_eq!(result.stage_names(), vec!["debayer"]);
//! ```

mod engine;
mod error;
mod ranking;

pub use engine::{Negotiation, NegotiationConfig, NegotiationEngine, PlannedStage};
pub use error::NegotiationError;
pub use ranking::RankingPolicy;
