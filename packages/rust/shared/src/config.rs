//! Application configuration for finsource.
//!
//! User config lives at `~/.finsource/finsource.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FinSourceError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "finsource.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".finsource";

/// Upper bound on transport retries per model call.
pub const MAX_TRANSPORT_RETRIES: u32 = 10;

// ---------------------------------------------------------------------------
// Config structs (matching finsource.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Batch and loop defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Model endpoint settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Reference scraper settings.
    #[serde(default)]
    pub scraper: ScraperConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Maximum search/judge iterations per company.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Companies processed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Timeout applied to every model and scraper call, in seconds.
    #[serde(default = "default_per_call_timeout_secs")]
    pub per_call_timeout_secs: u64,

    /// Extra attempts after a transport failure.
    #[serde(default = "default_max_transport_retries")]
    pub max_transport_retries: u32,

    /// Kind of disclosure document to look for.
    #[serde(default = "default_source_type")]
    pub source_type: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            concurrency: default_concurrency(),
            per_call_timeout_secs: default_per_call_timeout_secs(),
            max_transport_retries: default_max_transport_retries(),
            source_type: default_source_type(),
        }
    }
}

fn default_max_iterations() -> u32 {
    3
}
fn default_concurrency() -> usize {
    4
}
fn default_per_call_timeout_secs() -> u64 {
    90
}
fn default_max_transport_retries() -> u32 {
    2
}
fn default_source_type() -> String {
    "Annual Report".into()
}

/// `[model]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible chat completions base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used to search for answers and rewrite prompts.
    #[serde(default = "default_search_model")]
    pub search_model: String,

    /// Model used to judge answers.
    #[serde(default = "default_judge_model")]
    pub judge_model: String,

    /// Sampling temperature for the search model.
    #[serde(default = "default_search_temperature")]
    pub search_temperature: f32,

    /// Sampling temperature for the judge model.
    #[serde(default = "default_judge_temperature")]
    pub judge_temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            search_model: default_search_model(),
            judge_model: default_judge_model(),
            search_temperature: default_search_temperature(),
            judge_temperature: default_judge_temperature(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_search_model() -> String {
    "perplexity/sonar".into()
}
fn default_judge_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_search_temperature() -> f32 {
    0.2
}
fn default_judge_temperature() -> f32 {
    0.0
}

/// `[scraper]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Whether to scrape reference context at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// User agent sent with scraping requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout for scraping, in seconds.
    #[serde(default = "default_scraper_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum number of candidate report links kept per company.
    #[serde(default = "default_max_candidate_links")]
    pub max_candidate_links: usize,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_agent: default_user_agent(),
            request_timeout_secs: default_scraper_timeout_secs(),
            max_candidate_links: default_max_candidate_links(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_user_agent() -> String {
    concat!("finsource/", env!("CARGO_PKG_VERSION")).into()
}
fn default_scraper_timeout_secs() -> u64 {
    15
}
fn default_max_candidate_links() -> usize {
    10
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime options of the refinement loop and batch coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Iteration budget `N` per company.
    pub max_iterations: u32,
    /// Maximum number of loops in flight.
    pub concurrency: usize,
    /// Timeout for each model and scraper call.
    pub per_call_timeout: Duration,
    /// Extra attempts after a transport failure.
    pub max_transport_retries: u32,
}

impl RunConfig {
    /// Reject option values the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(FinSourceError::validation("max_iterations must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(FinSourceError::validation("concurrency must be at least 1"));
        }
        if self.per_call_timeout.is_zero() {
            return Err(FinSourceError::validation(
                "per_call_timeout must be greater than zero",
            ));
        }
        if self.max_transport_retries > MAX_TRANSPORT_RETRIES {
            return Err(FinSourceError::validation(format!(
                "max_transport_retries must be at most {MAX_TRANSPORT_RETRIES}"
            )));
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_iterations: config.defaults.max_iterations,
            concurrency: config.defaults.concurrency,
            per_call_timeout: Duration::from_secs(config.defaults.per_call_timeout_secs),
            max_transport_retries: config.defaults.max_transport_retries,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.finsource/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FinSourceError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.finsource/finsource.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| FinSourceError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| FinSourceError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FinSourceError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FinSourceError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FinSourceError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the model API key from the env var named in config.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.model.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(FinSourceError::config(format!(
            "model API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}
