use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use scripture_sync::catalog::{self, ImportedVerse, VerseFilter};
use scripture_sync::config::Config;
use scripture_sync::db;
use scripture_sync::embedding::EmbeddingProvider;
use scripture_sync::event_log;
use scripture_sync::migrate;
use scripture_sync::models::TranscriptionEvent;

async fn setup() -> (TempDir, Config, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = Config::with_db_path(tmp.path().join("data").join("scripture.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (tmp, config, pool)
}

fn imported(book: &str, chapter: i64, verse: i64, text: &str) -> ImportedVerse {
    ImportedVerse {
        book: book.into(),
        chapter,
        verse,
        text: text.into(),
    }
}

/// Counts how many texts it was asked to embed.
#[derive(Default)]
struct CountingEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let (_tmp, _config, pool) = setup().await;
    migrate::run_migrations(&pool).await.unwrap();
    assert_eq!(catalog::verse_count(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_sample_seeds_once() {
    let (_tmp, _config, pool) = setup().await;
    assert_eq!(catalog::seed_sample(&pool).await.unwrap(), 12);
    assert_eq!(catalog::seed_sample(&pool).await.unwrap(), 0);
    let counts = catalog::translation_counts(&pool).await.unwrap();
    assert_eq!(counts, vec![("KJV".to_string(), 6), ("NIV".to_string(), 6)]);
}

#[tokio::test]
async fn test_import_skips_duplicates_and_replace_starts_over() {
    let (_tmp, _config, pool) = setup().await;
    let verses = vec![
        imported("John", 3, 16, "For God so loved the world"),
        imported("John", 3, 17, "For God sent not his Son"),
    ];

    let first = catalog::import_verses(&pool, "KJV", &verses, false).await.unwrap();
    assert_eq!((first.inserted, first.skipped), (2, 0));

    let again = catalog::import_verses(&pool, "KJV", &verses, false).await.unwrap();
    assert_eq!((again.inserted, again.skipped), (0, 2));

    let replaced = catalog::import_verses(&pool, "KJV", &verses[..1], true).await.unwrap();
    assert_eq!((replaced.removed, replaced.inserted), (2, 1));
    assert_eq!(catalog::verse_count(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn test_loaded_positions_stay_contiguous_after_replace() {
    let (_tmp, _config, pool) = setup().await;
    catalog::seed_sample(&pool).await.unwrap();
    catalog::import_verses(&pool, "KJV", &[imported("Genesis", 1, 1, "In the beginning")], true)
        .await
        .unwrap();

    let verses = catalog::load_catalog(&pool).await.unwrap();
    assert_eq!(verses.len(), 7);
    for (i, v) in verses.iter().enumerate() {
        assert_eq!(v.position, i);
    }
    assert_eq!(verses[0].reference.translation, "NIV");
    assert_eq!(verses[6].reference.translation, "KJV");
}

#[tokio::test]
async fn test_import_file_reads_nested_map_format() {
    let (tmp, _config, pool) = setup().await;
    let path = tmp.path().join("web.json");
    std::fs::write(
        &path,
        r#"{ "Psalm": { "23": { "1": "The LORD is my shepherd", "2": "He maketh me to lie down" } } }"#,
    )
    .unwrap();
    let stats = catalog::import_file(&pool, &path, "WEB", false).await.unwrap();
    assert_eq!(stats.inserted, 2);

    let listed = catalog::list_verses(
        &pool,
        &VerseFilter {
            translation: Some("WEB".into()),
            book: Some("Psalm".into()),
            skip: 0,
            limit: 10,
        },
    )
    .await
    .unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].reference, "Psalm 23:1 (WEB)");

    let one = catalog::get_verse(&pool, listed[1].id).await.unwrap().unwrap();
    assert_eq!(one.verse, 2);
    assert!(catalog::get_verse(&pool, 9999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_import_file_without_verses_fails() {
    let (tmp, _config, pool) = setup().await;
    let path = tmp.path().join("empty.json");
    std::fs::write(&path, r#"{ "books": [] }"#).unwrap();
    assert!(catalog::import_file(&pool, &path, "KJV", false).await.is_err());
}

#[tokio::test]
async fn test_vectors_are_cached_per_model() {
    let (_tmp, config, pool) = setup().await;
    catalog::seed_sample(&pool).await.unwrap();
    let verses = catalog::load_catalog(&pool).await.unwrap();
    let embedder = CountingEmbedder::default();

    let (vectors, stats) = catalog::ensure_vectors(&pool, &verses, &embedder, 5).await.unwrap();
    assert_eq!(vectors.len(), 12);
    assert_eq!((stats.cached, stats.embedded), (0, 12));
    assert_eq!(vectors[0][0], verses[0].text.len() as f32);

    let (_, stats) = catalog::ensure_vectors(&pool, &verses, &embedder, 5).await.unwrap();
    assert_eq!((stats.cached, stats.embedded), (12, 0));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 12);

    let provider: &dyn EmbeddingProvider = &embedder;
    let matcher = catalog::build_matcher(&pool, &config, Some(provider)).await.unwrap();
    assert_eq!(matcher.len(), 12);
    assert!(matcher.has_vectors());
    assert_eq!(matcher.index_dims(), 2);
}

#[tokio::test]
async fn test_build_matcher_without_embeddings() {
    let (_tmp, config, pool) = setup().await;
    catalog::seed_sample(&pool).await.unwrap();
    let matcher = catalog::build_matcher(&pool, &config, None).await.unwrap();
    assert_eq!(matcher.len(), 12);
    assert!(!matcher.has_vectors());
}

#[tokio::test]
async fn test_event_history_is_newest_first() {
    let (_tmp, _config, pool) = setup().await;
    for (i, text) in ["first", "second", "third"].iter().enumerate() {
        event_log::insert_event(
            &pool,
            &TranscriptionEvent {
                timestamp: 1_700_000_000.0 + i as f64,
                transcript: text.to_string(),
                verse_id: if i == 1 { Some(7) } else { None },
                exact_score: 0.1,
                fuzzy_score: 0.2,
                semantic_score: 0.3,
                fused_score: 0.25,
                latency_ms: 12.0,
            },
        )
        .await
        .unwrap();
    }
    let events = event_log::recent_events(&pool, 2).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event.transcript, "third");
    assert_eq!(events[1].event.verse_id, Some(7));
}
