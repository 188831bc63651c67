//! Application configuration for PostHarvest.
//!
//! User config lives at `~/.postharvest/postharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "postharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".postharvest";

// ---------------------------------------------------------------------------
// Config structs (matching postharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Listing endpoint and retry policy.
    #[serde(default)]
    pub fetch: FetchSection,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Sources harvested when none are given on the command line.
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Append-only activity log.
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Upper bound on one source's fetch, including all waits. Unset means
    /// no bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timeout_secs: Option<u64>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            db_path: default_db_path(),
            log_file: default_log_file(),
            source_timeout_secs: None,
        }
    }
}

fn default_sources() -> Vec<String> {
    vec!["computerscience".into(), "pics".into(), "brazil".into()]
}
fn default_db_path() -> String {
    "db/postharvest.db".into()
}
fn default_log_file() -> String {
    "db/activity.log".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    /// Listing root; `{base_url}/{source}.json` is requested.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Posts requested per page (`limit` query parameter).
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Wait applied when a rate-limit response carries no reset hint.
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_default_secs: u64,

    /// Ceiling for exponential backoff after 5xx or network errors.
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            page_limit: default_page_limit(),
            request_timeout_secs: default_request_timeout(),
            rate_limit_default_secs: default_rate_limit_wait(),
            backoff_cap_secs: default_backoff_cap(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.reddit.com/r".into()
}
fn default_user_agent() -> String {
    concat!("PostHarvest/", env!("CARGO_PKG_VERSION")).into()
}
fn default_page_limit() -> u32 {
    100
}
fn default_request_timeout() -> u64 {
    30
}
fn default_rate_limit_wait() -> u64 {
    60
}
fn default_backoff_cap() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Fetch config (runtime, validated)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration, validated from the `[fetch]` section.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Listing root URL (no trailing slash).
    pub base_url: Url,
    /// User-Agent header value.
    pub user_agent: String,
    /// Page size, clamped to 1..=100.
    pub page_limit: u32,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Fallback wait for 429s without a reset hint.
    pub rate_limit_default: Duration,
    /// Exponential backoff ceiling.
    pub backoff_cap: Duration,
}

impl FetchConfig {
    /// Build a runtime config with defaults for everything but the base URL.
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let section = FetchSection {
            base_url: base_url.to_string(),
            ..FetchSection::default()
        };
        Self::try_from(&section)
    }
}

impl TryFrom<&FetchSection> for FetchConfig {
    type Error = HarvestError;

    fn try_from(section: &FetchSection) -> Result<Self> {
        let trimmed = section.base_url.trim_end_matches('/');
        let base_url = Url::parse(trimmed).map_err(|e| {
            HarvestError::config(format!("invalid fetch.base_url '{}': {e}", section.base_url))
        })?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(HarvestError::config(format!(
                "fetch.base_url must be http or https, got '{}'",
                base_url.scheme()
            )));
        }

        Ok(Self {
            base_url,
            user_agent: section.user_agent.clone(),
            page_limit: section.page_limit.clamp(1, 100),
            request_timeout: Duration::from_secs(section.request_timeout_secs.max(1)),
            rate_limit_default: Duration::from_secs(section.rate_limit_default_secs),
            backoff_cap: Duration::from_secs(section.backoff_cap_secs.max(1)),
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.postharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.postharvest/postharvest.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    init_config_at(&config_file_path()?)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| HarvestError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config)
        .map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| HarvestError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("computerscience"));
        assert!(toml_str.contains("base_url"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(
            parsed.defaults.sources,
            vec!["computerscience", "pics", "brazil"]
        );
        assert_eq!(parsed.fetch.rate_limit_default_secs, 60);
        assert_eq!(parsed.fetch.backoff_cap_secs, 60);
    }

    #[test]
    fn init_config_at_creates_parents() {
        let path = std::env::temp_dir()
            .join(format!("ph_config_{}", uuid::Uuid::now_v7()))
            .join("nested")
            .join("postharvest.toml");

        let written = init_config_at(&path).expect("init");
        assert_eq!(written, path);
        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded.defaults.db_path, "db/postharvest.db");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
sources = ["rust", "programming"]
source_timeout_secs = 600

[fetch]
base_url = "http://localhost:8080/r/"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.sources.len(), 2);
        assert_eq!(config.defaults.db_path, "db/postharvest.db");
        assert_eq!(config.defaults.source_timeout_secs, Some(600));
        assert_eq!(config.fetch.page_limit, 100);
    }

    #[test]
    fn fetch_config_from_section() {
        let section = FetchSection {
            base_url: "https://www.reddit.com/r/".into(),
            page_limit: 500,
            ..FetchSection::default()
        };
        let fetch = FetchConfig::try_from(&section).expect("valid");
        assert_eq!(fetch.base_url.as_str(), "https://www.reddit.com/r");
        assert_eq!(fetch.page_limit, 100);
        assert_eq!(fetch.rate_limit_default, Duration::from_secs(60));
        assert_eq!(fetch.backoff_cap, Duration::from_secs(60));
    }

    #[test]
    fn fetch_config_rejects_bad_url() {
        let section = FetchSection {
            base_url: "ftp://example.com/r".into(),
            ..FetchSection::default()
        };
        let err = FetchConfig::try_from(&section).unwrap_err();
        assert!(err.to_string().contains("http or https"));

        assert!(FetchConfig::with_base_url("not a url").is_err());
    }
}
