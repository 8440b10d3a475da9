use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    /// Minimum fused score for a match to be admitted into the session.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// Minimum fused score for `/search` and `match` results.
    #[serde(default = "default_search_min_score")]
    pub search_min_score: f64,
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,
    #[serde(default = "default_semantic_top_k")]
    pub semantic_top_k: usize,
    /// Catalogs up to this size are scanned in full; larger ones are
    /// pre-filtered through the token index.
    #[serde(default = "default_full_scan_max")]
    pub full_scan_max: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            search_min_score: default_search_min_score(),
            min_query_chars: default_min_query_chars(),
            semantic_top_k: default_semantic_top_k(),
            full_scan_max: default_full_scan_max(),
        }
    }
}

fn default_min_score() -> f64 {
    0.6
}
fn default_search_min_score() -> f64 {
    0.3
}
fn default_min_query_chars() -> usize {
    5
}
fn default_semantic_top_k() -> usize {
    20
}
fn default_full_scan_max() -> usize {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SemanticConfig {
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_distance_scale")]
    pub distance_scale: f64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            distance_scale: default_distance_scale(),
        }
    }
}

fn default_metric() -> String {
    "l2".to_string()
}
fn default_distance_scale() -> f64 {
    10.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptionConfig {
    #[serde(default = "default_transcription_timeout_ms")]
    pub timeout_ms: u64,
    /// HTTP speech-to-text endpoint. Audio fragments are rejected when unset.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_transcription_timeout_ms(),
            url: None,
        }
    }
}

impl TranscriptionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_transcription_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Config with every section at its default, backed by the given database.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            matching: MatchingConfig::default(),
            semantic: SemanticConfig::default(),
            embedding: EmbeddingConfig::default(),
            transcription: TranscriptionConfig::default(),
            broadcast: BroadcastConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let m = &config.matching;
    if !(0.0..=1.0).contains(&m.min_score) {
        anyhow::bail!("matching.min_score must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&m.search_min_score) {
        anyhow::bail!("matching.search_min_score must be in [0.0, 1.0]");
    }
    if m.semantic_top_k == 0 {
        anyhow::bail!("matching.semantic_top_k must be >= 1");
    }

    match config.semantic.metric.as_str() {
        "l2" | "cosine" => {}
        other => anyhow::bail!("Unknown semantic metric: '{}'. Must be l2 or cosine.", other),
    }
    if config.semantic.distance_scale <= 0.0 || !config.semantic.distance_scale.is_finite() {
        anyhow::bail!("semantic.distance_scale must be > 0");
    }

    if config.broadcast.queue_capacity == 0 {
        anyhow::bail!("broadcast.queue_capacity must be >= 1");
    }
    if config.transcription.timeout_ms == 0 {
        anyhow::bail!("transcription.timeout_ms must be >= 1");
    }

    // Validate embedding
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(())
}
