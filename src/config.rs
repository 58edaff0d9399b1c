use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory holding the per-scope index/docstore file pairs.
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embed_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embed_base_url(),
            model: default_model(),
            dims: default_dims(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_embed_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "granite3.3:8b".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_embed_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_embed_base_url(),
            model: default_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Messages per root-history page.
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    /// Messages per reply page.
    #[serde(default = "default_reply_page_limit")]
    pub reply_page_limit: usize,
    /// Maximum reply fetches (and name lookups) in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Fixed target time zone for rendered dates, as hours east of UTC.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// Per-call ceiling on rate-limit retries.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Per-call ceiling on total time spent retrying, in seconds.
    #[serde(default = "default_retry_max_elapsed_secs")]
    pub retry_max_elapsed_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            page_limit: default_page_limit(),
            reply_page_limit: default_reply_page_limit(),
            concurrency: default_concurrency(),
            utc_offset_hours: default_utc_offset_hours(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_max_elapsed_secs: default_retry_max_elapsed_secs(),
        }
    }
}

fn default_page_limit() -> usize {
    200
}
fn default_reply_page_limit() -> usize {
    1000
}
fn default_concurrency() -> usize {
    12
}
fn default_utc_offset_hours() -> i32 {
    9
}
fn default_retry_max_attempts() -> u32 {
    8
}
fn default_retry_max_elapsed_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    if config.ingest.page_limit == 0 {
        anyhow::bail!("ingest.page_limit must be >= 1");
    }

    if config.ingest.concurrency == 0 {
        anyhow::bail!("ingest.concurrency must be >= 1");
    }

    // UTC offsets beyond ±14 h do not exist
    if config.ingest.utc_offset_hours.abs() > 14 {
        anyhow::bail!("ingest.utc_offset_hours must be within ±14");
    }

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    Ok(config)
}
