//! Uniform capability interface over the scoring strategies.
//!
//! Each strategy is a pure function of a prepared [`Query`] and a catalog
//! [`Verse`], returning a score in `[0, 1]`. Fusion only ever sees the three
//! numbers, so strategies can be swapped without touching the selector.

use std::collections::HashMap;

use crate::models::Verse;
use crate::normalize::{normalize, NormalizedText};

/// A transcript fragment prepared for scoring.
#[derive(Debug, Clone)]
pub struct Query {
    pub raw: String,
    pub text: NormalizedText,
    /// Semantic similarity keyed by index position. Positions outside the
    /// nearest-neighbor result score 0.
    pub semantic: HashMap<usize, f64>,
}

impl Query {
    pub fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            text: normalize(raw),
            semantic: HashMap::new(),
        }
    }

    pub fn with_semantic(mut self, hits: impl IntoIterator<Item = (usize, f64)>) -> Self {
        self.semantic = hits.into_iter().collect();
        self
    }
}

pub trait Scorer: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    fn score(&self, query: &Query, verse: &Verse) -> f64;
}

/// Reads the precomputed nearest-neighbor similarity for a verse.
pub struct SemanticScorer;

impl Scorer for SemanticScorer {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn score(&self, query: &Query, verse: &Verse) -> f64 {
        query
            .semantic
            .get(&verse.position)
            .copied()
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }
}
