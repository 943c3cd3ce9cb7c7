//! Application configuration for Code Check.
//!
//! User config lives at `~/.codecheck/codecheck.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets never live in the file: each provider section names the
//! environment variable that holds its key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CodeCheckError, Result};
use crate::types::LlmProvider;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "codecheck.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".codecheck";

// ---------------------------------------------------------------------------
// Config structs (matching codecheck.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Job API credential settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Search provider settings.
    #[serde(default)]
    pub perplexity: PerplexityConfig,

    /// OpenAI extraction backend settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Gemini extraction backend settings.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Background worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Extraction backend used when a request does not name one.
    #[serde(default)]
    pub llm_provider: LlmProvider,

    /// Job database location.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            llm_provider: LlmProvider::default(),
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "~/.codecheck/jobs.db".into()
}

/// `[api]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Name of the env var holding the pre-shared job API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_api_key_env() -> String {
    "API_KEY".into()
}

/// `[perplexity]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerplexityConfig {
    #[serde(default = "default_perplexity_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_perplexity_model")]
    pub model: String,
    #[serde(default = "default_perplexity_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PerplexityConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_perplexity_key_env(),
            model: default_perplexity_model(),
            base_url: default_perplexity_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_perplexity_key_env() -> String {
    "PERPLEXITY_API_KEY".into()
}
fn default_perplexity_model() -> String {
    "sonar-pro".into()
}
fn default_perplexity_base_url() -> String {
    "https://api.perplexity.ai".into()
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_key_env(),
            model: default_openai_model(),
            base_url: default_openai_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_openai_model() -> String {
    "gpt-4o".into()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".into()
}

/// `[gemini]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_gemini_key_env(),
            model: default_gemini_model(),
            base_url: default_gemini_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_gemini_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_gemini_model() -> String {
    "gemini-1.5-pro-latest".into()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}

fn default_timeout_secs() -> u64 {
    120
}

/// `[worker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Delay between polls when the queue is empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Jobs processed in parallel (each job's pipeline stays sequential).
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Hard limit on one pipeline run; expiry marks the job failed.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// `processing` jobs started longer ago than this are failed by the watchdog.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout_secs: default_job_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_max_concurrent_jobs() -> usize {
    2
}
fn default_job_timeout_secs() -> u64 {
    600
}
fn default_stale_after_secs() -> u64 {
    900
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.codecheck/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CodeCheckError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.codecheck/codecheck.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CodeCheckError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        CodeCheckError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CodeCheckError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CodeCheckError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CodeCheckError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check values that serde cannot: base URLs parse, limits are non-zero,
/// and the stale sweep only fires after the job timeout.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    for (section, base_url) in [
        ("perplexity", &config.perplexity.base_url),
        ("openai", &config.openai.base_url),
        ("gemini", &config.gemini.base_url),
    ] {
        Url::parse(base_url).map_err(|e| {
            CodeCheckError::config(format!("[{section}] base_url '{base_url}' is invalid: {e}"))
        })?;
    }
    if config.worker.max_concurrent_jobs == 0 {
        return Err(CodeCheckError::config(
            "[worker] max_concurrent_jobs must be at least 1",
        ));
    }
    if config.worker.stale_after_secs <= config.worker.job_timeout_secs {
        return Err(CodeCheckError::config(format!(
            "[worker] stale_after_secs ({}) must exceed job_timeout_secs ({})",
            config.worker.stale_after_secs, config.worker.job_timeout_secs
        )));
    }
    Ok(())
}

/// Expand a leading `~/` in a configured path.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| CodeCheckError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Read a secret from the named env var, failing eagerly when it is unset or empty.
pub fn resolve_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(CodeCheckError::config(format!(
            "{var_name} environment variable not set"
        ))),
    }
}

/// Whether the named env var holds a non-empty value.
pub fn secret_present(var_name: &str) -> bool {
    resolve_secret(var_name).is_ok()
}

/// Check a presented job API credential against the configured pre-shared key.
pub fn validate_api_key(config: &AppConfig, presented: Option<&str>) -> Result<()> {
    let expected = resolve_secret(&config.api.api_key_env).map_err(|_| {
        CodeCheckError::config(format!(
            "{} not configured on server",
            config.api.api_key_env
        ))
    })?;

    match presented {
        None | Some("") => Err(CodeCheckError::Unauthorized(
            "API key required".into(),
        )),
        Some(key) if key == expected => Ok(()),
        Some(_) => Err(CodeCheckError::Unauthorized("Invalid API key".into())),
    }
}
