//! Edit-distance similarity with a best-substring variant.
//!
//! The shorter text is compared against windows of the longer one that start
//! at each word boundary, so a short spoken fragment embedded in a long verse
//! can still score close to `1.0`. The whole-string ratio is also considered.

use strsim::levenshtein;

use crate::models::Verse;
use crate::normalize::NormalizedText;
use crate::scoring::{Query, Scorer};

/// `1 - distance / max(len_a, len_b)` over characters.
pub fn ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Best [`ratio`] between the shorter text and any same-length window of the
/// longer text aligned on a word start.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let m = short.chars().count();
    if m == 0 {
        return 0.0;
    }

    let mut best = ratio(short, long);
    for start in word_starts(long) {
        let window = take_chars(&long[start..], m);
        let score = ratio(short, window);
        if score > best {
            best = score;
            if best >= 1.0 {
                break;
            }
        }
    }
    best.clamp(0.0, 1.0)
}

pub fn fuzzy_score(query: &NormalizedText, verse: &NormalizedText) -> f64 {
    if query.is_empty() || verse.is_empty() {
        return 0.0;
    }
    partial_ratio(query.as_str(), verse.as_str())
}

fn word_starts(text: &str) -> impl Iterator<Item = usize> + '_ {
    std::iter::once(0).chain(
        text.char_indices()
            .filter(|(_, c)| *c == ' ')
            .map(|(i, _)| i + 1)
            .filter(move |&i| i < text.len()),
    )
}

/// Prefix of `s` holding at most `n` characters.
fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub struct FuzzyScorer;

impl Scorer for FuzzyScorer {
    fn name(&self) -> &'static str {
        "fuzzy"
    }

    fn score(&self, query: &Query, verse: &Verse) -> f64 {
        fuzzy_score(&query.text, &verse.search_text)
    }
}
