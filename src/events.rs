//! Viewer-facing state-change events.
//!
//! Serialized as JSON objects tagged by `type`:
//!
//! ```json
//! { "type": "verse_match", "text": "...", "verse": { ... }, "score": 0.92, "latency_ms": 41.0, "seq": 7 }
//! { "type": "manual_verse", "verse": { ... }, "seq": 8 }
//! { "type": "lock_status", "locked": true, "verse_id": 3, "seq": 9 }
//! { "type": "state", "verse": null, "locked": false, "seq": 0, "last_writer": null }
//! ```
//!
//! `state` is sent once to each viewer when it connects.

use serde::Serialize;

use crate::models::{MatchCandidate, SessionSnapshot, VersePayload};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    VerseMatch {
        text: String,
        verse: VersePayload,
        score: f64,
        exact_score: f64,
        fuzzy_score: f64,
        semantic_score: f64,
        latency_ms: f64,
        seq: u64,
    },
    ManualVerse {
        verse: VersePayload,
        seq: u64,
    },
    LockStatus {
        locked: bool,
        verse_id: Option<i64>,
        seq: u64,
    },
    State(SessionSnapshot),
}

impl StateEvent {
    pub fn verse_match(text: &str, candidate: &MatchCandidate, latency_ms: f64, seq: u64) -> Self {
        StateEvent::VerseMatch {
            text: text.to_string(),
            verse: VersePayload::from(candidate.verse.as_ref()),
            score: candidate.fused,
            exact_score: candidate.exact,
            fuzzy_score: candidate.fuzzy,
            semantic_score: candidate.semantic,
            latency_ms,
            seq,
        }
    }

    pub fn manual_verse(snapshot: &SessionSnapshot) -> Option<Self> {
        snapshot.verse.clone().map(|verse| StateEvent::ManualVerse {
            verse,
            seq: snapshot.seq,
        })
    }

    pub fn lock_status(snapshot: &SessionSnapshot) -> Self {
        StateEvent::LockStatus {
            locked: snapshot.locked,
            verse_id: snapshot.verse.as_ref().map(|v| v.id),
            seq: snapshot.seq,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StateEvent::VerseMatch { .. } => "verse_match",
            StateEvent::ManualVerse { .. } => "manual_verse",
            StateEvent::LockStatus { .. } => "lock_status",
            StateEvent::State(_) => "state",
        }
    }

    /// Session sequence number the event reflects.
    pub fn seq(&self) -> u64 {
        match self {
            StateEvent::VerseMatch { seq, .. }
            | StateEvent::ManualVerse { seq, .. }
            | StateEvent::LockStatus { seq, .. } => *seq,
            StateEvent::State(snapshot) => snapshot.seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Verse, VerseRef, WriterKind};
    use std::sync::Arc;

    fn verse() -> Arc<Verse> {
        Arc::new(Verse::new(
            3,
            VerseRef {
                translation: "KJV".into(),
                book: "John".into(),
                chapter: 3,
                verse: 16,
            },
            "For God so loved the world",
            0,
        ))
    }

    #[test]
    fn test_verse_match_json_shape() {
        let cand = MatchCandidate {
            verse: verse(),
            exact: 1.0,
            fuzzy: 0.9,
            semantic: 0.0,
            fused: 0.87,
        };
        let ev = StateEvent::verse_match("for god so loved", &cand, 12.5, 4);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "verse_match");
        assert_eq!(json["verse"]["reference"], "John 3:16 (KJV)");
        assert_eq!(json["score"], 0.87);
        assert_eq!(json["latency_ms"], 12.5);
        assert_eq!(json["seq"], 4);
    }

    #[test]
    fn test_lock_status_and_state_shapes() {
        let snap = SessionSnapshot {
            verse: Some(VersePayload::from(verse().as_ref())),
            locked: true,
            seq: 9,
            last_writer: Some(WriterKind::Manual),
        };
        assert_eq!(StateEvent::lock_status(&snap).seq(), 9);
        let lock = serde_json::to_value(StateEvent::lock_status(&snap)).unwrap();
        assert_eq!(lock["type"], "lock_status");
        assert_eq!(lock["locked"], true);
        assert_eq!(lock["verse_id"], 3);

        let state = serde_json::to_value(StateEvent::State(snap)).unwrap();
        assert_eq!(state["type"], "state");
        assert_eq!(state["last_writer"], "manual");
        assert_eq!(state["verse"]["book"], "John");
    }

    #[test]
    fn test_manual_verse_requires_selection() {
        let empty = SessionSnapshot {
            verse: None,
            locked: false,
            seq: 1,
            last_writer: None,
        };
        assert!(StateEvent::manual_verse(&empty).is_none());
    }
}
