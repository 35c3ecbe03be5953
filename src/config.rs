use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::fatal;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub cdn: CdnConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub words: WordsConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CdnConfig {
    pub bucket: String,
    /// Public base URL objects are served from (the edge cache).
    pub base_url: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub addressing_style: AddressingStyle,
    /// Per-request timeout for origin reads and uploads.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://nyc3.digitaloceanspaces.com".to_string()
}
fn default_region() -> String {
    "nyc3".to_string()
}

/// How the bucket name is placed in origin URLs.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddressingStyle {
    /// `https://<bucket>.<endpoint-host>/<key>`
    #[default]
    Virtual,
    /// `https://<endpoint-host>/<bucket>/<key>`
    Path,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_image_size")]
    pub image_size: String,
    /// Vision model that checks generated images for text.
    #[serde(default = "default_qa_model")]
    pub qa_model: String,
    /// Image generations per challenge while text keeps showing up.
    #[serde(default = "default_max_image_attempts")]
    pub max_image_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            chat_model: default_chat_model(),
            image_model: default_image_model(),
            image_size: default_image_size(),
            qa_model: default_qa_model(),
            max_image_attempts: default_max_image_attempts(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_ai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_chat_model() -> String {
    "gpt-4".to_string()
}
fn default_image_model() -> String {
    "dall-e-3".to_string()
}
fn default_image_size() -> String {
    "1024x1024".to_string()
}
fn default_qa_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_image_attempts() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct WordsConfig {
    /// Directory holding `objects.json`, `gerunds.json` and `concepts.json`.
    #[serde(default = "default_words_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_word_attempts")]
    pub max_attempts: usize,
}

impl Default for WordsConfig {
    fn default() -> Self {
        Self {
            dir: default_words_dir(),
            max_attempts: default_word_attempts(),
        }
    }
}

fn default_words_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_word_attempts() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImagesConfig {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            max_dimension: default_max_dimension(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("daydream")
}
fn default_max_dimension() -> u32 {
    800
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    /// Fail the attempt (instead of starting from an empty index) when
    /// `days.json` exists but cannot be fetched or parsed.
    #[serde(default)]
    pub strict_fetch: bool,
}

/// Secrets read from the environment rather than the config file.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub openai_api_key: String,
    pub cdn: CdnCredentials,
}

impl Credentials {
    /// Load `OPENAI_API_KEY` plus the CDN credentials.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            openai_api_key: required_env("OPENAI_API_KEY")?,
            cdn: CdnCredentials::from_env()?,
        })
    }
}

/// SigV4 credentials for the CDN bucket.
#[derive(Clone)]
pub struct CdnCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for CdnCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdnCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl CdnCredentials {
    /// Load `CDN_ACCESS_KEY_ID`, `CDN_SECRET_ACCESS_KEY` and optionally
    /// `CDN_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            access_key_id: required_env("CDN_ACCESS_KEY_ID")?,
            secret_access_key: required_env("CDN_SECRET_ACCESS_KEY")?,
            session_token: std::env::var("CDN_SESSION_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
        })
    }
}

/// Read a required, non-empty environment variable; absence is fatal.
pub fn required_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(fatal(format!("{} environment variable not set", name))),
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate cdn
    if config.cdn.bucket.trim().is_empty() {
        anyhow::bail!("cdn.bucket must not be empty");
    }
    for (name, url) in [
        ("cdn.base_url", &config.cdn.base_url),
        ("cdn.endpoint", &config.cdn.endpoint),
        ("ai.base_url", &config.ai.base_url),
    ] {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            anyhow::bail!("{} must be an http(s) URL, got '{}'", name, url);
        }
    }

    if config.cdn.timeout_secs == 0 {
        anyhow::bail!("cdn.timeout_secs must be > 0");
    }

    // Validate generation
    if config.ai.timeout_secs == 0 {
        anyhow::bail!("ai.timeout_secs must be > 0");
    }
    if config.ai.max_image_attempts == 0 {
        anyhow::bail!("ai.max_image_attempts must be >= 1");
    }
    if config.words.max_attempts == 0 {
        anyhow::bail!("words.max_attempts must be >= 1");
    }
    if config.images.max_dimension == 0 {
        anyhow::bail!("images.max_dimension must be > 0");
    }

    // Validate retry
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }

    Ok(config)
}
