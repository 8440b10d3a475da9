//! Core data models used throughout Scripture Sync.
//!
//! These types represent the verses, match candidates, session snapshots and
//! history records that flow through the matching pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::normalize::NormalizedText;

/// Identity of a verse: `(translation, book, chapter, verse)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerseRef {
    pub translation: String,
    pub book: String,
    pub chapter: i64,
    pub verse: i64,
}

impl fmt::Display for VerseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} ({})",
            self.book, self.chapter, self.verse, self.translation
        )
    }
}

/// A catalog verse, read-only while serving.
#[derive(Debug, Clone)]
pub struct Verse {
    /// Store row id; the lower id wins selector ties.
    pub id: i64,
    pub reference: VerseRef,
    /// Display text.
    pub text: String,
    /// Normalized text used for every textual comparison.
    pub search_text: NormalizedText,
    /// Position in the semantic index, fixed for the lifetime of one build.
    pub position: usize,
}

impl Verse {
    pub fn new(id: i64, reference: VerseRef, text: impl Into<String>, position: usize) -> Self {
        let text = text.into();
        let search_text = crate::normalize::normalize(&text);
        Self {
            id,
            reference,
            text,
            search_text,
            position,
        }
    }
}

/// Wire shape of a verse inside viewer events and HTTP responses.
#[derive(Debug, Clone, Serialize)]
pub struct VersePayload {
    pub id: i64,
    pub translation: String,
    pub book: String,
    pub chapter: i64,
    pub verse: i64,
    pub text: String,
    pub reference: String,
}

impl From<&Verse> for VersePayload {
    fn from(v: &Verse) -> Self {
        Self {
            id: v.id,
            translation: v.reference.translation.clone(),
            book: v.reference.book.clone(),
            chapter: v.reference.chapter,
            verse: v.reference.verse,
            text: v.text.clone(),
            reference: v.reference.to_string(),
        }
    }
}

/// Scored candidate for one transcript fragment. All scores are in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub verse: Arc<Verse>,
    pub exact: f64,
    pub fuzzy: f64,
    pub semantic: f64,
    pub fused: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidatePayload {
    pub verse: VersePayload,
    pub exact_score: f64,
    pub fuzzy_score: f64,
    pub semantic_score: f64,
    pub score: f64,
}

impl From<&MatchCandidate> for CandidatePayload {
    fn from(c: &MatchCandidate) -> Self {
        Self {
            verse: VersePayload::from(c.verse.as_ref()),
            exact_score: c.exact,
            fuzzy_score: c.fuzzy,
            semantic_score: c.semantic,
            score: c.fused,
        }
    }
}

/// Append-only history record handed to the event log.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionEvent {
    /// Unix timestamp in seconds (fractional).
    pub timestamp: f64,
    pub transcript: String,
    pub verse_id: Option<i64>,
    pub exact_score: f64,
    pub fuzzy_score: f64,
    pub semantic_score: f64,
    pub fused_score: f64,
    pub latency_ms: f64,
}

/// Who performed the last accepted session change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterKind {
    Automatic,
    Manual,
}

/// Consistent read of the session state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub verse: Option<VersePayload>,
    pub locked: bool,
    pub seq: u64,
    pub last_writer: Option<WriterKind>,
}
