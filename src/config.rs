//! TOML configuration.
//!
//! Every tunable of the indexing and chat pipeline lives here. All sections
//! are optional; omitted keys fall back to the defaults below, so an empty
//! file (or no file at all) yields a working configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub reindex: ReindexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/repochat.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetadataConfig {
    pub dir: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./metadatas"),
        }
    }
}

/// Chunk sizing, in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    5000
}
fn default_chunk_overlap() -> usize {
    2000
}

/// Exclusion rules for the corpus scanner.
///
/// This is the single owner of the ignore list; every scan, full or
/// restricted, goes through the same rules.
#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_ignored_extensions")]
    pub ignored_extensions: Vec<String>,
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            exclude_globs: default_exclude_globs(),
            ignored_extensions: default_ignored_extensions(),
            respect_gitignore: true,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_exclude_globs() -> Vec<String> {
    [
        ".git",
        ".git/**",
        "node_modules",
        "node_modules/**",
        "**/node_modules/**",
        "pnpm-lock.yaml",
        "package-lock.json",
        "yarn.lock",
        "Cargo.lock",
        ".env",
        ".env.*",
        "**/.env",
        "**/.env.*",
        "target/**",
        "dist/**",
        "build/**",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ignored_extensions() -> Vec<String> {
    [
        "tsbuildinfo",
        "sh",
        "svg",
        "webmanifest",
        "png",
        "jpg",
        "jpeg",
        "gif",
        "ico",
        "xml",
        "woff",
        "woff2",
        "ttf",
        "riv",
        "toml",
        "pdf",
        "zip",
        "gz",
        "lock",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}
fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReindexConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_insert_group_size")]
    pub insert_group_size: usize,
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            insert_group_size: default_insert_group_size(),
        }
    }
}

fn default_interval_secs() -> u64 {
    10
}
fn default_insert_group_size() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_openai")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
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
            provider: default_openai(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_openai() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_dims() -> usize {
    1536
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

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_openai")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_openai(),
            model: default_chat_model(),
            temperature: 0.0,
            history_window: default_history_window(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4".to_string()
}
fn default_history_window() -> usize {
    5
}
fn default_chat_timeout_secs() -> u64 {
    120
}

/// Load and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        let config = Config::default();
        validate(&config)?;
        return Ok(config);
    }
    load_config(path)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.chat.history_window < 1 {
        anyhow::bail!("chat.history_window must be >= 1");
    }

    if config.reindex.interval_secs < 1 {
        anyhow::bail!("reindex.interval_secs must be >= 1");
    }
    if config.reindex.insert_group_size < 1 {
        anyhow::bail!("reindex.insert_group_size must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.chat.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown chat provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 5000);
        assert_eq!(cfg.chunking.chunk_overlap, 2000);
        assert_eq!(cfg.reindex.interval_secs, 10);
        assert_eq!(cfg.reindex.insert_group_size, 1000);
        assert_eq!(cfg.chat.history_window, 5);
        assert!(cfg.scanner.exclude_globs.contains(&".git/**".to_string()));
    }

    #[test]
    fn test_overrides() {
        let cfg = parse_config(
            r#"
            [chunking]
            chunk_size = 100
            chunk_overlap = 10

            [retrieval]
            top_k = 8

            [embedding]
            provider = "disabled"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.chunking.chunk_size, 100);
        assert_eq!(cfg.retrieval.top_k, 8);
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse_config("[chunking]\nchunk_size = 10\nchunk_overlap = 10\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(parse_config("[embedding]\nprovider = \"cohere\"\n").is_err());
        assert!(parse_config("[chat]\nprovider = \"cohere\"\n").is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/repochat.example.toml")).unwrap();
        assert_eq!(cfg.embedding.dims, 1536);
        assert_eq!(cfg.chat.model, "gpt-4");
        assert_eq!(cfg.scanner.max_file_bytes, 1024 * 1024);
    }

    #[test]
    fn test_missing_file_defaults() {
        let cfg = load_or_default(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(cfg.retrieval.top_k, 4);
        assert!(load_config(Path::new("/definitely/not/here.toml")).is_err());
    }
}
