//! Literal quotation scoring: how much of the verse was actually quoted.

use std::collections::HashSet;

use crate::models::Verse;
use crate::normalize::NormalizedText;
use crate::scoring::{Query, Scorer};

/// A query may run this many times longer than the verse before a verse
/// found inside it stops counting as a full quote.
pub const SHORT_QUERY_RATIO: f64 = 2.0;

/// `1.0` when the query is a substring of the verse. Otherwise the share of
/// verse tokens present in the query (`1.0` if the whole verse is inside it),
/// scaled down once the query is more than [`SHORT_QUERY_RATIO`] times the
/// verse length.
pub fn exact_score(query: &NormalizedText, verse: &NormalizedText) -> f64 {
    if query.is_empty() || verse.is_empty() {
        return 0.0;
    }
    if verse.contains(query) {
        return 1.0;
    }

    let coverage = if query.contains(verse) {
        1.0
    } else {
        token_coverage(query, verse)
    };
    (coverage * length_factor(query, verse)).clamp(0.0, 1.0)
}

fn token_coverage(query: &NormalizedText, verse: &NormalizedText) -> f64 {
    let query_tokens: HashSet<&str> = query.tokens().collect();
    let mut total = 0usize;
    let mut matched = 0usize;
    for token in verse.tokens() {
        total += 1;
        if query_tokens.contains(token) {
            matched += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    matched as f64 / total as f64
}

fn length_factor(query: &NormalizedText, verse: &NormalizedText) -> f64 {
    let q = query.char_len() as f64;
    let v = verse.char_len() as f64;
    (SHORT_QUERY_RATIO * v / q).min(1.0)
}

pub struct ExactScorer;

impl Scorer for ExactScorer {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn score(&self, query: &Query, verse: &Verse) -> f64 {
        exact_score(&query.text, &verse.search_text)
    }
}
