use anyhow::Result;
use sqlx::SqlitePool;

/// Creates the catalog, vector cache and event log tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            translation TEXT NOT NULL,
            book TEXT NOT NULL,
            chapter INTEGER NOT NULL,
            verse INTEGER NOT NULL,
            text TEXT NOT NULL,
            embedding_index INTEGER NOT NULL,
            UNIQUE(translation, book, chapter, verse)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vectors are cached per model so switching providers forces a re-embed.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verse_vectors (
            verse_id INTEGER NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (verse_id, model),
            FOREIGN KEY (verse_id) REFERENCES verses(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transcription_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp REAL NOT NULL,
            transcript TEXT NOT NULL,
            verse_id INTEGER,
            exact_score REAL NOT NULL,
            fuzzy_score REAL NOT NULL,
            semantic_score REAL NOT NULL,
            fused_score REAL NOT NULL,
            latency_ms REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_verses_embedding_index ON verses(embedding_index)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_verses_book ON verses(translation, book)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON transcription_events(timestamp DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
