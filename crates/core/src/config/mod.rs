//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (PAGESIFT_*)
//! 2. TOML config file (if PAGESIFT_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// How cache keys are derived for a parse request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeyMode {
    /// Key on the requested URL plus its request variant; a hit skips rendering.
    #[default]
    Url,
    /// Key on the cleaned page content; a hit skips extraction.
    Content,
}

/// Which extraction strategy the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Ask the completion service for the record directly.
    #[default]
    Direct,
    /// Ask the completion service for an extraction program and run it in the sandbox.
    Codegen,
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (PAGESIFT_*)
/// 2. TOML config file (if PAGESIFT_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite persistence file.
    ///
    /// Set via PAGESIFT_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Whether cache entries are persisted to `db_path`.
    #[serde(default)]
    pub cache_persistent: bool,

    /// Cache entry time-to-live in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Flush to disk after every Nth successful cache write.
    #[serde(default = "default_cache_flush_every")]
    pub cache_flush_every: u64,

    /// Cache keying strategy.
    #[serde(default)]
    pub cache_key_mode: CacheKeyMode,

    /// Maximum number of concurrently open render sessions.
    ///
    /// Set via PAGESIFT_MAX_CONCURRENCY environment variable.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Budget for the strict (network idle) wait condition.
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    /// Budget for the loose (DOM constructed) wait condition.
    #[serde(default = "default_fallback_wait_ms")]
    pub fallback_wait_ms: u64,

    /// Fixed delay after the loose wait condition succeeds or times out.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Number of synthetic scrolls used to trigger lazy content (1-3).
    #[serde(default = "default_scroll_iterations")]
    pub scroll_iterations: u32,

    /// Delay between synthetic scrolls.
    #[serde(default = "default_scroll_delay_ms")]
    pub scroll_delay_ms: u64,

    /// Global deadline for one parse request.
    ///
    /// Set via PAGESIFT_DEADLINE_MS environment variable.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// Cleaned content is truncated to this many characters.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Extraction strategy.
    #[serde(default)]
    pub extraction_mode: ExtractionMode,

    /// Evaluation steps a generated program may consume.
    #[serde(default = "default_sandbox_step_budget")]
    pub sandbox_step_budget: u64,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_completion_base_url")]
    pub completion_base_url: String,

    /// API key for the completion service.
    ///
    /// Set via PAGESIFT_COMPLETION_API_KEY environment variable.
    /// Required only when a completion call is made.
    #[serde(default)]
    pub completion_api_key: Option<String>,

    /// Model identifier sent to the completion service.
    #[serde(default = "default_completion_model")]
    pub completion_model: String,

    /// User-Agent string for the rendering browser.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Explicit browser binary; autodetected when unset.
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,

    /// Allow rendering URLs whose host is a private/reserved IP literal.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./pagesift-cache.sqlite")
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_flush_every() -> u64 {
    10
}

fn default_max_concurrency() -> usize {
    4
}

fn default_navigation_timeout_ms() -> u64 {
    15_000
}

fn default_fallback_wait_ms() -> u64 {
    10_000
}

fn default_settle_delay_ms() -> u64 {
    1_500
}

fn default_scroll_iterations() -> u32 {
    2
}

fn default_scroll_delay_ms() -> u64 {
    400
}

fn default_deadline_ms() -> u64 {
    90_000
}

fn default_max_content_chars() -> usize {
    100_000
}

fn default_sandbox_step_budget() -> u64 {
    200_000
}

fn default_completion_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_completion_model() -> String {
    "gpt-4o-mini".into()
}

fn default_user_agent() -> String {
    "pagesift/0.1".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            cache_persistent: false,
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_flush_every: default_cache_flush_every(),
            cache_key_mode: CacheKeyMode::Url,
            max_concurrency: default_max_concurrency(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            fallback_wait_ms: default_fallback_wait_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            scroll_iterations: default_scroll_iterations(),
            scroll_delay_ms: default_scroll_delay_ms(),
            deadline_ms: default_deadline_ms(),
            max_content_chars: default_max_content_chars(),
            extraction_mode: ExtractionMode::Direct,
            sandbox_step_budget: default_sandbox_step_budget(),
            completion_base_url: default_completion_base_url(),
            completion_api_key: None,
            completion_model: default_completion_model(),
            user_agent: default_user_agent(),
            chrome_executable: None,
            allow_private_hosts: false,
        }
    }
}

impl AppConfig {
    /// Global deadline as Duration.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Cache TTL as Duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `PAGESIFT_`
    /// 2. TOML file from `PAGESIFT_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("PAGESIFT_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("PAGESIFT_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Check if the completion API key is available (for deferred validation).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the key is not set.
    pub fn require_completion_api_key(&self) -> Result<&str, ConfigError> {
        self.completion_api_key.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "completion_api_key".into(),
            hint: "Set PAGESIFT_COMPLETION_API_KEY environment variable".into(),
        })
    }
}
