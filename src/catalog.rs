//! Verse catalog storage: import, seed data, loading and the vector cache.
//!
//! Verses live in the `verses` table. `embedding_index` fixes the order in
//! which verses are loaded; loaded verses get contiguous index positions
//! `0..n` in that order, so gaps left by a replaced translation never reach
//! the semantic index.
//!
//! # Import formats
//!
//! Nested lists:
//!
//! ```json
//! { "books": [ { "name": "John", "chapters": [ { "chapter": 3, "verses": [ { "verse": 16, "text": "..." } ] } ] } ] }
//! ```
//!
//! Nested maps keyed by book, chapter and verse number:
//!
//! ```json
//! { "John": { "3": { "16": "..." } } }
//! ```
//!
//! Entries with a missing name, non-numeric number or missing text are skipped.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use crate::config::Config;
use crate::embedding::{blob_to_vec, embed_batched, vec_to_blob, EmbeddingProvider};
use crate::index::Metric;
use crate::matcher::VerseMatcher;
use crate::models::{Verse, VersePayload, VerseRef};

/// One verse parsed from an import file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedVerse {
    pub book: String,
    pub chapter: i64,
    pub verse: i64,
    pub text: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub inserted: u64,
    pub skipped: u64,
    pub removed: u64,
}

const SAMPLE: &[(&str, &str, i64, i64, &str)] = &[
    ("KJV", "John", 3, 16, "For God so loved the world, that he gave his only begotten Son, that whosoever believeth in him should not perish, but have everlasting life."),
    ("KJV", "Psalm", 23, 1, "The LORD is my shepherd; I shall not want."),
    ("KJV", "Psalm", 23, 2, "He maketh me to lie down in green pastures: he leadeth me beside the still waters."),
    ("KJV", "Psalm", 23, 3, "He restoreth my soul: he leadeth me in the paths of righteousness for his name's sake."),
    ("KJV", "Psalm", 23, 4, "Yea, though I walk through the valley of the shadow of death, I will fear no evil: for thou art with me; thy rod and thy staff they comfort me."),
    ("KJV", "Genesis", 1, 1, "In the beginning God created the heaven and the earth."),
    ("NIV", "John", 3, 16, "For God so loved the world that he gave his one and only Son, that whoever believes in him shall not perish but have eternal life."),
    ("NIV", "Psalm", 23, 1, "The Lord is my shepherd, I lack nothing."),
    ("NIV", "Psalm", 23, 2, "He makes me lie down in green pastures, he leads me beside quiet waters,"),
    ("NIV", "Psalm", 23, 3, "he refreshes my soul. He guides me along the right paths for his name's sake."),
    ("NIV", "Psalm", 23, 4, "Even though I walk through the darkest valley, I will fear no evil, for you are with me; your rod and your staff, they comfort me."),
    ("NIV", "Genesis", 1, 1, "In the beginning God created the heavens and the earth."),
];

fn as_number(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Extracts verses from either supported JSON layout.
pub fn parse_import(data: &Value) -> Vec<ImportedVerse> {
    let mut out = Vec::new();
    let Some(root) = data.as_object() else {
        return out;
    };

    if let Some(books) = root.get("books").and_then(Value::as_array) {
        for book in books {
            let Some(name) = book.get("name").and_then(Value::as_str) else {
                continue;
            };
            let chapters = book.get("chapters").and_then(Value::as_array);
            for chapter in chapters.into_iter().flatten() {
                let Some(chapter_num) = chapter.get("chapter").and_then(as_number) else {
                    continue;
                };
                let verses = chapter.get("verses").and_then(Value::as_array);
                for v in verses.into_iter().flatten() {
                    let (Some(verse_num), Some(text)) = (
                        v.get("verse").and_then(as_number),
                        v.get("text").and_then(Value::as_str),
                    ) else {
                        continue;
                    };
                    out.push(ImportedVerse {
                        book: name.to_string(),
                        chapter: chapter_num,
                        verse: verse_num,
                        text: text.to_string(),
                    });
                }
            }
        }
        return out;
    }

    for (book, chapters) in root {
        let Some(chapters) = chapters.as_object() else {
            continue;
        };
        for (chapter_key, verses) in chapters {
            let (Ok(chapter_num), Some(verses)) = (chapter_key.trim().parse::<i64>(), verses.as_object())
            else {
                continue;
            };
            for (verse_key, text) in verses {
                let (Ok(verse_num), Some(text)) = (verse_key.trim().parse::<i64>(), text.as_str()) else {
                    continue;
                };
                out.push(ImportedVerse {
                    book: book.clone(),
                    chapter: chapter_num,
                    verse: verse_num,
                    text: text.to_string(),
                });
            }
        }
    }
    out
}

/// Inserts verses for one translation. Existing references are kept unless
/// `replace` is set, in which case the whole translation is removed first.
pub async fn import_verses(
    pool: &SqlitePool,
    translation: &str,
    verses: &[ImportedVerse],
    replace: bool,
) -> Result<ImportStats> {
    let mut stats = ImportStats::default();
    let mut tx = pool.begin().await?;

    if replace {
        sqlx::query(
            "DELETE FROM verse_vectors WHERE verse_id IN (SELECT id FROM verses WHERE translation = ?)",
        )
        .bind(translation)
        .execute(&mut *tx)
        .await?;
        stats.removed = sqlx::query("DELETE FROM verses WHERE translation = ?")
            .bind(translation)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }

    let max: Option<i64> = sqlx::query_scalar("SELECT MAX(embedding_index) FROM verses")
        .fetch_one(&mut *tx)
        .await?;
    let mut position = max.map(|m| m + 1).unwrap_or(0);

    for v in verses {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO verses (translation, book, chapter, verse, text, embedding_index)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(translation)
        .bind(&v.book)
        .bind(v.chapter)
        .bind(v.verse)
        .bind(&v.text)
        .bind(position)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 1 {
            stats.inserted += 1;
            position += 1;
        } else {
            stats.skipped += 1;
        }
    }

    tx.commit().await?;
    tracing::info!(
        translation,
        inserted = stats.inserted,
        skipped = stats.skipped,
        removed = stats.removed,
        "catalog import finished"
    );
    Ok(stats)
}

pub async fn import_file(
    pool: &SqlitePool,
    path: &Path,
    translation: &str,
    replace: bool,
) -> Result<ImportStats> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let data: Value = serde_json::from_str(&content)
        .with_context(|| format!("Import file is not valid JSON: {}", path.display()))?;
    let verses = parse_import(&data);
    if verses.is_empty() {
        anyhow::bail!("No verses found in {}", path.display());
    }
    import_verses(pool, translation, &verses, replace).await
}

/// Seeds the bundled sample verses when the catalog is empty. Returns the
/// number inserted.
pub async fn seed_sample(pool: &SqlitePool) -> Result<u64> {
    if verse_count(pool).await? > 0 {
        return Ok(0);
    }
    let mut by_translation: Vec<(&str, Vec<ImportedVerse>)> = Vec::new();
    for &(translation, book, chapter, verse, text) in SAMPLE {
        let entry = ImportedVerse {
            book: book.to_string(),
            chapter,
            verse,
            text: text.to_string(),
        };
        match by_translation.iter_mut().find(|(t, _)| *t == translation) {
            Some((_, list)) => list.push(entry),
            None => by_translation.push((translation, vec![entry])),
        }
    }
    let mut inserted = 0;
    for (translation, verses) in &by_translation {
        inserted += import_verses(pool, translation, verses, false).await?.inserted;
    }
    Ok(inserted)
}

pub async fn verse_count(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM verses")
        .fetch_one(pool)
        .await?)
}

/// Verse counts per translation, alphabetical.
pub async fn translation_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(
        "SELECT translation, COUNT(*) AS n FROM verses GROUP BY translation ORDER BY translation",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| (r.get::<String, _>("translation"), r.get::<i64, _>("n")))
        .collect())
}

/// Loads the full catalog in index order with positions `0..n`.
pub async fn load_catalog(pool: &SqlitePool) -> Result<Vec<Verse>> {
    let rows = sqlx::query(
        "SELECT id, translation, book, chapter, verse, text FROM verses ORDER BY embedding_index ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .enumerate()
        .map(|(position, row)| {
            Verse::new(
                row.get("id"),
                VerseRef {
                    translation: row.get("translation"),
                    book: row.get("book"),
                    chapter: row.get("chapter"),
                    verse: row.get("verse"),
                },
                row.get::<String, _>("text"),
                position,
            )
        })
        .collect())
}

#[derive(Debug, Default, Clone)]
pub struct VerseFilter {
    pub translation: Option<String>,
    pub book: Option<String>,
    pub skip: i64,
    pub limit: i64,
}

pub async fn list_verses(pool: &SqlitePool, filter: &VerseFilter) -> Result<Vec<VersePayload>> {
    let rows = sqlx::query(
        r#"
        SELECT id, translation, book, chapter, verse, text FROM verses
        WHERE (?1 IS NULL OR translation = ?1) AND (?2 IS NULL OR book = ?2)
        ORDER BY embedding_index ASC, id ASC
        LIMIT ?3 OFFSET ?4
        "#,
    )
    .bind(filter.translation.as_deref())
    .bind(filter.book.as_deref())
    .bind(filter.limit)
    .bind(filter.skip.max(0))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_payload).collect())
}

pub async fn get_verse(pool: &SqlitePool, id: i64) -> Result<Option<VersePayload>> {
    let row = sqlx::query("SELECT id, translation, book, chapter, verse, text FROM verses WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(row_payload))
}

fn row_payload(row: &sqlx::sqlite::SqliteRow) -> VersePayload {
    let reference = VerseRef {
        translation: row.get("translation"),
        book: row.get("book"),
        chapter: row.get("chapter"),
        verse: row.get("verse"),
    };
    VersePayload {
        id: row.get("id"),
        reference: reference.to_string(),
        translation: reference.translation,
        book: reference.book,
        chapter: reference.chapter,
        verse: reference.verse,
        text: row.get("text"),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VectorStats {
    pub cached: usize,
    pub embedded: usize,
}

/// Returns one vector per verse in position order, embedding and caching
/// any verse not yet stored for this provider's model.
pub async fn ensure_vectors(
    pool: &SqlitePool,
    verses: &[Verse],
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<(Vec<Vec<f32>>, VectorStats)> {
    let model = provider.model_name().to_string();
    let dims = provider.dims();

    let rows = sqlx::query("SELECT verse_id, dims, embedding FROM verse_vectors WHERE model = ?")
        .bind(&model)
        .fetch_all(pool)
        .await?;
    let mut cached: HashMap<i64, Vec<f32>> = HashMap::with_capacity(rows.len());
    for row in &rows {
        let row_dims: i64 = row.get("dims");
        if row_dims as usize != dims {
            continue;
        }
        let blob: Vec<u8> = row.get("embedding");
        cached.insert(row.get("verse_id"), blob_to_vec(&blob));
    }

    let missing: Vec<&Verse> = verses.iter().filter(|v| !cached.contains_key(&v.id)).collect();
    let stats = VectorStats {
        cached: verses.len() - missing.len(),
        embedded: missing.len(),
    };

    if !missing.is_empty() {
        tracing::info!(model = %model, count = missing.len(), "embedding verses");
        let texts: Vec<String> = missing.iter().map(|v| v.text.clone()).collect();
        let vectors = embed_batched(provider, &texts, batch_size).await?;

        let mut tx = pool.begin().await?;
        for (verse, vector) in missing.iter().zip(vectors) {
            if vector.len() != dims {
                anyhow::bail!(
                    "{} returned a {}-dimensional vector for verse {}, expected {}",
                    model,
                    vector.len(),
                    verse.id,
                    dims
                );
            }
            sqlx::query(
                r#"
                INSERT INTO verse_vectors (verse_id, model, dims, embedding) VALUES (?, ?, ?, ?)
                ON CONFLICT(verse_id, model) DO UPDATE SET dims = excluded.dims, embedding = excluded.embedding
                "#,
            )
            .bind(verse.id)
            .bind(&model)
            .bind(dims as i64)
            .bind(vec_to_blob(&vector))
            .execute(&mut *tx)
            .await?;
            cached.insert(verse.id, vector);
        }
        tx.commit().await?;
    }

    let mut ordered = Vec::with_capacity(verses.len());
    for v in verses {
        let vector = cached
            .remove(&v.id)
            .ok_or_else(|| anyhow::anyhow!("missing vector for verse {}", v.id))?;
        ordered.push(vector);
    }
    Ok((ordered, stats))
}

/// Loads the catalog and builds a complete matcher. Any vector or index
/// failure is returned as an error; no partial matcher is produced.
pub async fn build_matcher(
    pool: &SqlitePool,
    config: &Config,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<VerseMatcher> {
    let started = Instant::now();
    let verses = load_catalog(pool).await?;
    let metric = Metric::from_config(&config.semantic.metric, config.semantic.distance_scale)?;

    let vectors = match provider {
        Some(p) if !verses.is_empty() => {
            let (vectors, _) = ensure_vectors(pool, &verses, p, config.embedding.batch_size).await?;
            Some(vectors)
        }
        _ => None,
    };

    let matcher = VerseMatcher::build(verses, vectors, metric).context("Semantic index build failed")?;
    tracing::info!(
        verses = matcher.len(),
        dims = matcher.index_dims(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "matcher built"
    );
    Ok(matcher)
}
