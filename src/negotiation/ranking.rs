//! Preferred-encoding ranking.

use tracing::warn;

use crate::format::{EncodingFamily, Fourcc};

/// Ordered list of encoding families, most preferred first.
///
/// Used when the consumer states no preference. Encodings outside every
/// listed family are unranked: they are never picked automatically but stay
/// selectable when requested explicitly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankingPolicy {
    order: Vec<EncodingFamily>,
}

impl RankingPolicy {
    /// Create a policy from families in preference order.
    pub fn new(order: Vec<EncodingFamily>) -> Self {
        Self { order }
    }

    /// Default order with 8-bit mono ahead of 16-bit mono.
    pub fn prefer_mono8() -> Self {
        let mut policy = Self::default();
        if let (Some(m16), Some(m8)) = (
            policy.position(EncodingFamily::Mono16),
            policy.position(EncodingFamily::Mono8),
        ) {
            policy.order.swap(m16, m8);
        }
        policy
    }

    fn position(&self, family: EncodingFamily) -> Option<usize> {
        self.order.iter().position(|f| *f == family)
    }

    /// Families in preference order.
    pub fn order(&self) -> &[EncodingFamily] {
        &self.order
    }

    /// Rank of `encoding`, lower is better. `None` when unranked.
    pub fn rank(&self, encoding: Fourcc) -> Option<usize> {
        self.position(encoding.family()?)
    }

    /// Best ranked encoding. The first one listed wins ties.
    ///
    /// Zero encodings are skipped, unranked ones are logged and skipped.
    pub fn preferred(&self, encodings: &[Fourcc]) -> Option<Fourcc> {
        let mut best: Option<(usize, Fourcc)> = None;
        for &encoding in encodings.iter().filter(|f| f.is_valid()) {
            match self.rank(encoding) {
                Some(rank) if best.is_none_or(|(r, _)| rank < r) => best = Some((rank, encoding)),
                Some(_) => {}
                None => warn!("encoding {} is not ranked, ignoring", encoding),
            }
        }
        best.map(|(_, f)| f)
    }

    /// All valid encodings, best first.
    ///
    /// The sort is stable, so equally ranked encodings keep their order.
    /// Unranked encodings follow the ranked ones.
    pub fn sort(&self, encodings: &[Fourcc]) -> Vec<Fourcc> {
        let mut sorted: Vec<Fourcc> = encodings.iter().copied().filter(|f| f.is_valid()).collect();
        sorted.sort_by_key(|f| self.rank(*f).unwrap_or(usize::MAX));
        sorted
    }
}

impl Default for RankingPolicy {
    fn default() -> Self {
        use EncodingFamily::*;
        Self::new(vec![
            Bayer8,
            Rgb,
            Yuv,
            Compressed,
            Mono16,
            Mono8,
            BayerPwl,
            Bayer10,
            Bayer12,
            Bayer16,
            PolarizedBayer,
            PolarizedMono,
        ])
    }
}
