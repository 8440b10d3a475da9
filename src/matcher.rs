//! Catalog-wide candidate scoring.
//!
//! A [`VerseMatcher`] is an immutable bundle of one catalog snapshot, its
//! semantic index and a token index. Every transcript is scored by the
//! exact, fuzzy and semantic [`Scorer`]s and fused into [`MatchCandidate`]s.
//! Catalog changes produce a new matcher; a built matcher is never patched.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::exact::ExactScorer;
use crate::fusion;
use crate::fuzzy::FuzzyScorer;
use crate::index::{IndexError, Metric, Neighbor, SemanticIndex};
use crate::models::{MatchCandidate, Verse, VerseRef};
use crate::scoring::{Query, Scorer, SemanticScorer};

pub struct VerseMatcher {
    verses: Vec<Arc<Verse>>,
    by_id: HashMap<i64, usize>,
    by_ref: HashMap<VerseRef, usize>,
    tokens: HashMap<String, Vec<usize>>,
    index: SemanticIndex,
    exact: Box<dyn Scorer>,
    fuzzy: Box<dyn Scorer>,
    semantic: Box<dyn Scorer>,
}

impl VerseMatcher {
    /// Builds a matcher from verses ordered by index position.
    ///
    /// `vectors` holds one vector per verse in the same order; `None` builds
    /// an empty semantic index so semantic scores are always 0.
    pub fn build(
        verses: Vec<Verse>,
        vectors: Option<Vec<Vec<f32>>>,
        metric: Metric,
    ) -> Result<Self, IndexError> {
        for (expected, v) in verses.iter().enumerate() {
            if v.position != expected {
                return Err(IndexError::PositionGap { position: expected });
            }
        }

        let index = match vectors {
            Some(vectors) => SemanticIndex::build_for_catalog(verses.len(), vectors, metric)?,
            None => SemanticIndex::build(Vec::new(), metric)?,
        };

        let mut by_id = HashMap::with_capacity(verses.len());
        let mut by_ref = HashMap::with_capacity(verses.len());
        let mut tokens: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, v) in verses.iter().enumerate() {
            by_id.insert(v.id, pos);
            by_ref.insert(v.reference.clone(), pos);
            let mut seen = BTreeSet::new();
            for t in v.search_text.tokens() {
                if seen.insert(t) {
                    tokens.entry(t.to_string()).or_default().push(pos);
                }
            }
        }

        Ok(Self {
            verses: verses.into_iter().map(Arc::new).collect(),
            by_id,
            by_ref,
            tokens,
            index,
            exact: Box::new(ExactScorer),
            fuzzy: Box::new(FuzzyScorer),
            semantic: Box::new(SemanticScorer),
        })
    }

    pub fn len(&self) -> usize {
        self.verses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verses.is_empty()
    }

    pub fn verses(&self) -> &[Arc<Verse>] {
        &self.verses
    }

    pub fn has_vectors(&self) -> bool {
        !self.index.is_empty()
    }

    pub fn index_dims(&self) -> usize {
        self.index.dims()
    }

    pub fn by_id(&self, id: i64) -> Option<Arc<Verse>> {
        self.by_id.get(&id).map(|&p| self.verses[p].clone())
    }

    pub fn by_ref(&self, reference: &VerseRef) -> Option<Arc<Verse>> {
        self.by_ref.get(reference).map(|&p| self.verses[p].clone())
    }

    /// Nearest neighbors for a query embedding.
    pub fn semantic_hits(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.index.query(vector, k)
    }

    /// Positions worth scoring. Small catalogs are scanned in full; larger
    /// ones are narrowed to verses sharing a token with the query plus the
    /// semantic hits.
    fn candidate_positions(&self, query: &Query, full_scan_max: usize) -> Vec<usize> {
        if self.verses.len() <= full_scan_max {
            return (0..self.verses.len()).collect();
        }
        let mut pool = BTreeSet::new();
        for t in query.text.tokens() {
            if let Some(positions) = self.tokens.get(t) {
                pool.extend(positions.iter().copied());
            }
        }
        pool.extend(
            query
                .semantic
                .keys()
                .copied()
                .filter(|&p| p < self.verses.len()),
        );
        pool.into_iter().collect()
    }

    /// Scores every candidate verse, dropping those with a zero fused score.
    pub fn score(&self, query: &Query, full_scan_max: usize) -> Vec<MatchCandidate> {
        if query.text.is_empty() {
            return Vec::new();
        }

        self.candidate_positions(query, full_scan_max)
            .into_iter()
            .filter_map(|pos| {
                let verse = &self.verses[pos];
                let exact = self.exact.score(query, verse);
                let fuzzy = self.fuzzy.score(query, verse);
                let semantic = self.semantic.score(query, verse);
                let fused = fusion::fuse(exact, fuzzy, semantic);
                (fused > 0.0).then(|| MatchCandidate {
                    verse: verse.clone(),
                    exact,
                    fuzzy,
                    semantic,
                    fused,
                })
            })
            .collect()
    }
}
