//! Bodies of the CLI subcommands. Results go to stdout; diagnostics go
//! through `tracing` to stderr.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;

use crate::catalog::{self, VerseFilter};
use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::event_log::{self, MemoryEventLog};
use crate::migrate;
use crate::pipeline::Engine;

pub async fn run_init(config: &Config, with_sample: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    println!("Database initialized successfully.");
    if with_sample {
        let seeded = catalog::seed_sample(&pool).await?;
        if seeded > 0 {
            println!("Seeded {} sample verses.", seeded);
        }
    }
    pool.close().await;
    Ok(())
}

pub async fn run_import(config: &Config, file: &Path, translation: &str, replace: bool) -> Result<()> {
    if translation.trim().is_empty() {
        bail!("--translation must not be empty");
    }
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let stats = catalog::import_file(&pool, file, translation, replace).await?;

    println!("import {} ({})", file.display(), translation);
    if replace {
        println!("  removed: {}", stats.removed);
    }
    println!("  inserted: {}", stats.inserted);
    println!("  skipped (already present): {}", stats.skipped);
    for (t, n) in catalog::translation_counts(&pool).await? {
        println!("  {}: {} verses", t, n);
    }
    println!("ok");
    pool.close().await;
    Ok(())
}

pub async fn run_verses(
    config: &Config,
    translation: Option<String>,
    book: Option<String>,
    skip: i64,
    limit: i64,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let filter = VerseFilter {
        translation,
        book,
        skip,
        limit,
    };
    let verses = catalog::list_verses(&pool, &filter).await?;
    if verses.is_empty() {
        println!("No verses found.");
    }
    for v in &verses {
        println!("[{}] {}  {}", v.id, v.reference, v.text);
    }
    pool.close().await;
    Ok(())
}

/// Embeds every verse not yet cached for the configured model.
pub async fn run_index(config: &Config) -> Result<()> {
    let Some(provider) = create_provider(&config.embedding)? else {
        bail!("embeddings are disabled; set [embedding] provider in the config");
    };
    let pool = db::connect(config).await?;
    let verses = catalog::load_catalog(&pool).await?;
    let (vectors, stats) =
        catalog::ensure_vectors(&pool, &verses, provider.as_ref(), config.embedding.batch_size).await?;

    println!("index {}", provider.model_name());
    println!("  verses: {}", verses.len());
    println!("  cached: {}", stats.cached);
    println!("  embedded: {}", stats.embedded);
    println!("  dims: {}", vectors.first().map(|v| v.len()).unwrap_or(provider.dims()));
    println!("ok");
    pool.close().await;
    Ok(())
}

/// Scores a transcript against the catalog without a live session.
pub async fn run_match(config: &Config, text: &str, min_score: Option<f64>, limit: usize) -> Result<()> {
    let pool = db::connect(config).await?;
    let embedder = create_provider(&config.embedding)?;
    let matcher = catalog::build_matcher(&pool, config, embedder.as_deref()).await?;
    pool.close().await;

    let engine = Engine::new(
        Arc::new(config.clone()),
        matcher,
        embedder,
        Arc::new(MemoryEventLog::new()),
    );
    let min_score = min_score.unwrap_or(config.matching.search_min_score);
    let report = engine.score_transcript(text, min_score).await;

    match &report.best {
        Some(best) => {
            println!("match: {}", best.verse.reference);
            println!("  {}", best.verse.text);
            println!(
                "  score: {:.3} (exact {:.3}, fuzzy {:.3}, semantic {:.3})",
                best.fused, best.exact, best.fuzzy, best.semantic
            );
        }
        None => println!("No match above {:.2}.", min_score),
    }
    if limit > 1 && !report.candidates.is_empty() {
        println!("candidates:");
        for (i, c) in report.candidates.iter().take(limit).enumerate() {
            println!("  {}. {:.3}  {}", i + 1, c.fused, c.verse.reference);
        }
    }
    println!("latency: {:.1} ms", report.latency_ms);
    Ok(())
}

pub async fn run_history(config: &Config, limit: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let events = event_log::recent_events(&pool, limit).await?;
    if events.is_empty() {
        println!("No transcription events recorded.");
    }
    for e in &events {
        let when = chrono::DateTime::from_timestamp_micros((e.event.timestamp * 1_000_000.0) as i64)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string());
        let verse = e
            .event
            .verse_id
            .map(|id| format!("verse {}", id))
            .unwrap_or_else(|| "no match".to_string());
        println!(
            "{}  {:<10} fused {:.3}  {:>7.1} ms  \"{}\"",
            when, verse, e.event.fused_score, e.event.latency_ms, e.event.transcript
        );
    }
    pool.close().await;
    Ok(())
}
