//! Append-only history of processed transcript fragments.
//!
//! The pipeline hands each [`TranscriptionEvent`] to an [`EventSink`] and
//! moves on; persistence happens off the matching path and a failed write
//! is logged, never surfaced to the caller.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::sync::{Mutex, PoisonError};

use crate::models::TranscriptionEvent;

pub trait EventSink: Send + Sync {
    /// Fire-and-forget append.
    fn record(&self, event: TranscriptionEvent);
}

/// Writes events to the `transcription_events` table on a background task.
#[derive(Clone)]
pub struct SqliteEventLog {
    pool: SqlitePool,
}

impl SqliteEventLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl EventSink for SqliteEventLog {
    fn record(&self, event: TranscriptionEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime; transcription event dropped");
            return;
        };
        let pool = self.pool.clone();
        handle.spawn(async move {
            if let Err(e) = insert_event(&pool, &event).await {
                tracing::warn!(error = %e, "failed to record transcription event");
            }
        });
    }
}

pub async fn insert_event(pool: &SqlitePool, event: &TranscriptionEvent) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO transcription_events
            (timestamp, transcript, verse_id, exact_score, fuzzy_score, semantic_score, fused_score, latency_ms)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.timestamp)
    .bind(&event.transcript)
    .bind(event.verse_id)
    .bind(event.exact_score)
    .bind(event.fuzzy_score)
    .bind(event.semantic_score)
    .bind(event.fused_score)
    .bind(event.latency_ms)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    #[serde(flatten)]
    pub event: TranscriptionEvent,
}

/// Most recent events first.
pub async fn recent_events(pool: &SqlitePool, limit: i64) -> Result<Vec<StoredEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT id, timestamp, transcript, verse_id, exact_score, fuzzy_score,
               semantic_score, fused_score, latency_ms
        FROM transcription_events
        ORDER BY timestamp DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(limit.max(0))
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| StoredEvent {
            id: row.get("id"),
            event: TranscriptionEvent {
                timestamp: row.get("timestamp"),
                transcript: row.get("transcript"),
                verse_id: row.get("verse_id"),
                exact_score: row.get("exact_score"),
                fuzzy_score: row.get("fuzzy_score"),
                semantic_score: row.get("semantic_score"),
                fused_score: row.get("fused_score"),
                latency_ms: row.get("latency_ms"),
            },
        })
        .collect())
}

/// In-process sink, used by tests and by callers without a database.
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<TranscriptionEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TranscriptionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for MemoryEventLog {
    fn record(&self, event: TranscriptionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
