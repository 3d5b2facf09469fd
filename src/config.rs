use anyhow::{bail, Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub recursive: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(".bot_cache.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default)]
    pub vector_store_id: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            vector_store_id: None,
            api_base: default_api_base(),
            timeout_secs: default_remote_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_remote_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_ingestion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_ingestion_timeout_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    2
}
fn default_ingestion_timeout_secs() -> u64 {
    300
}

/// Which signals the reconciler trusts when deciding that a document changed.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDetection {
    /// Declared `created_at` / `updated_at` against the last sync time only.
    #[default]
    Watermark,
    /// Watermark first, then the content fingerprint for anything the
    /// watermark considers unchanged.
    Fingerprint,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub change_detection: ChangeDetection,
    #[serde(default)]
    pub prune_missing: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportsConfig {
    #[serde(default = "default_reports_dir")]
    pub dir: PathBuf,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            dir: default_reports_dir(),
        }
    }
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

impl Config {
    /// Resolve the target vector store: explicit override, then config,
    /// then the `VECTOR_STORE_ID` environment variable.
    pub fn vector_store_id(&self, overridden: Option<&str>) -> Option<String> {
        overridden
            .map(str::to_string)
            .or_else(|| self.remote.vector_store_id.clone())
            .or_else(|| std::env::var("VECTOR_STORE_ID").ok())
            .filter(|id| !id.trim().is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate corpus globs
    if config.corpus.include_globs.is_empty() {
        bail!("corpus.include_globs must not be empty");
    }
    for pattern in config
        .corpus
        .include_globs
        .iter()
        .chain(config.corpus.exclude_globs.iter())
    {
        Glob::new(pattern).with_context(|| format!("Invalid corpus glob: '{}'", pattern))?;
    }

    // Validate ingestion wait
    if config.ingestion.poll_interval_secs == 0 {
        bail!("ingestion.poll_interval_secs must be > 0");
    }
    if config.ingestion.timeout_secs < config.ingestion.poll_interval_secs {
        bail!("ingestion.timeout_secs must be >= ingestion.poll_interval_secs");
    }

    // Validate remote
    if config.remote.timeout_secs == 0 {
        bail!("remote.timeout_secs must be > 0");
    }

    Ok(config)
}
