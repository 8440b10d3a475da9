//! Score fusion and match selection.
//!
//! # Weighting policy
//!
//! | Condition | exact | fuzzy | semantic |
//! |-----------|-------|-------|----------|
//! | `exact > 0.5` | 0.6 | 0.3 | 0.1 |
//! | otherwise | 0.2 | 0.5 | 0.3 |
//!
//! A strong literal quote dominates; weak literal overlap leans on the
//! signals that tolerate paraphrase and transcription noise. The comparison
//! is strict, so `exact == 0.5` takes the second row and the fused score
//! jumps as `exact` crosses 0.5. Keep the boundary as is.

use std::cmp::Ordering;

use crate::models::MatchCandidate;

/// Literal-branch threshold; applies only when `exact` is strictly greater.
pub const LITERAL_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub exact: f64,
    pub fuzzy: f64,
    pub semantic: f64,
}

pub const LITERAL_WEIGHTS: FusionWeights = FusionWeights {
    exact: 0.6,
    fuzzy: 0.3,
    semantic: 0.1,
};

pub const PARAPHRASE_WEIGHTS: FusionWeights = FusionWeights {
    exact: 0.2,
    fuzzy: 0.5,
    semantic: 0.3,
};

pub fn weights_for(exact: f64) -> FusionWeights {
    if exact > LITERAL_THRESHOLD {
        LITERAL_WEIGHTS
    } else {
        PARAPHRASE_WEIGHTS
    }
}

fn unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

pub fn fuse(exact: f64, fuzzy: f64, semantic: f64) -> f64 {
    let (e, f, s) = (unit(exact), unit(fuzzy), unit(semantic));
    let w = weights_for(e);
    unit(w.exact * e + w.fuzzy * f + w.semantic * s)
}

/// Ranking order: fused desc, then exact desc, then verse id asc.
fn rank(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.fused
        .total_cmp(&a.fused)
        .then(b.exact.total_cmp(&a.exact))
        .then(a.verse.id.cmp(&b.verse.id))
}

/// Picks the best candidate, or `None` when nothing reaches `min_score`.
pub fn select(candidates: &[MatchCandidate], min_score: f64) -> Option<MatchCandidate> {
    let best = candidates.iter().min_by(|a, b| rank(a, b))?;
    if best.fused >= min_score {
        Some(best.clone())
    } else {
        None
    }
}

/// Sorts candidates best-first using the selector's ordering.
pub fn rank_all(candidates: &mut [MatchCandidate]) {
    candidates.sort_by(rank);
}
