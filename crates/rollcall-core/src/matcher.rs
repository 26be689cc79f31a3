//! Matching query descriptors against the gallery.
//!
//! Exact linear scan over every enrolled descriptor. Each (query, identity)
//! pair that clears the threshold yields one [`MatchRecord`]; several
//! identities may match the same query face.

use crate::store::Gallery;
use crate::types::{round_confidence, Descriptor, MatchRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default cosine similarity a descriptor must exceed to be accepted.
pub const DEFAULT_THRESHOLD: f32 = 0.55;

/// Strategy for scoring query descriptors against an enrolled gallery.
pub trait Matcher {
    /// Returns matches ordered by query, then by gallery iteration order.
    fn identify(&self, gallery: &Gallery, queries: &[Descriptor], threshold: f32) -> Vec<MatchRecord>;
}

/// Accepts an identity on the first enrolled descriptor that exceeds the
/// threshold and skips the rest of that identity's descriptors.
///
/// The reported confidence is that descriptor's similarity, not
/// necessarily the identity's best.
pub struct FirstAcceptMatcher;

impl Matcher for FirstAcceptMatcher {
    fn identify(&self, gallery: &Gallery, queries: &[Descriptor], threshold: f32) -> Vec<MatchRecord> {
        let mut matches = Vec::new();

        for (face, query) in queries.iter().enumerate() {
            for (name, enrolled) in gallery.iter() {
                for stored in enrolled.iter().filter(|s| s.dim() == query.dim()) {
                    let sim = stored.similarity(query);
                    tracing::trace!(face, name, similarity = sim, "compared");
                    if sim > threshold {
                        matches.push(MatchRecord {
                            name: name.to_string(),
                            confidence: round_confidence(sim),
                        });
                        break;
                    }
                }
            }
        }

        matches
    }
}

/// Scores every enrolled descriptor and accepts an identity on its best one.
pub struct BestDescriptorMatcher;

impl Matcher for BestDescriptorMatcher {
    fn identify(&self, gallery: &Gallery, queries: &[Descriptor], threshold: f32) -> Vec<MatchRecord> {
        let mut matches = Vec::new();

        for (face, query) in queries.iter().enumerate() {
            for (name, enrolled) in gallery.iter() {
                let best = enrolled
                    .iter()
                    .filter(|s| s.dim() == query.dim())
                    .map(|s| s.similarity(query))
                    .fold(f32::NEG_INFINITY, f32::max);
                tracing::trace!(face, name, similarity = best, "best compared");
                if best > threshold {
                    matches.push(MatchRecord {
                        name: name.to_string(),
                        confidence: round_confidence(best),
                    });
                }
            }
        }

        matches
    }
}

/// Which [`Matcher`] to use, as named in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    #[default]
    First,
    Best,
}

impl MatchPolicy {
    pub fn matcher(self) -> Box<dyn Matcher + Send + Sync> {
        match self {
            MatchPolicy::First => Box::new(FirstAcceptMatcher),
            MatchPolicy::Best => Box::new(BestDescriptorMatcher),
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchPolicy::First => "first",
            MatchPolicy::Best => "best",
        })
    }
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MatchPolicy::First),
            "best" => Ok(MatchPolicy::Best),
            other => Err(format!("unknown match policy {other:?} (expected \"first\" or \"best\")")),
        }
    }
}
