//! Application configuration for tenderwatch.
//!
//! User config lives at `~/.tenderwatch/tenderwatch.toml`.
//! CLI flags override config file values, which override defaults.
//! Runs never read this file directly: they receive a [`SourceRegistry`],
//! [`TagRules`] and [`FetchOptions`] snapshot built from it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TenderwatchError};
use crate::types::{SourceDescriptor, TagRule, TagRules};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "tenderwatch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tenderwatch";

/// Browser-like identity sent with every listing request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

// ---------------------------------------------------------------------------
// Config structs (matching tenderwatch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Listing sources, in run order.
    #[serde(default)]
    pub sources: Vec<SourceEntry>,

    /// Tag rules, in output order.
    #[serde(default)]
    pub tags: Vec<TagRule>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            sources: default_sources(),
            tags: default_tags(),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path to the libSQL database file (`~/` is expanded).
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Source used when a run names none. Falls back to the first source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_source: Option<String>,

    /// Upper bound on listing pages fetched per run.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// `User-Agent` header for listing requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            default_source: None,
            max_pages: default_max_pages(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_database_path() -> String {
    "~/.tenderwatch/tenderwatch.db".into()
}
fn default_max_pages() -> u32 {
    25
}
fn default_request_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

/// `[[sources]]` entry, validated into a [`SourceDescriptor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub key: String,
    pub label: String,
    pub listing_url: String,
    pub base_url: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_strategy() -> String {
    "card".into()
}

fn default_sources() -> Vec<SourceEntry> {
    vec![SourceEntry {
        key: "find-tender".into(),
        label: "Find a Tender".into(),
        listing_url: "https://www.find-tender.service.gov.uk/Search/Results".into(),
        base_url: "https://www.find-tender.service.gov.uk/".into(),
        strategy: default_strategy(),
    }]
}

fn default_tags() -> Vec<TagRule> {
    [
        ("it", &["software", "digital", "cloud", "cyber", "data"][..]),
        ("construction", &["construction", "building works", "refurbishment"][..]),
        ("health", &["health", "clinical", "nhs", "medical"][..]),
        ("consultancy", &["consultancy", "advisory", "professional services"][..]),
    ]
    .into_iter()
    .map(|(name, keywords)| TagRule {
        name: name.into(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    })
    .collect()
}

impl AppConfig {
    /// Resolved database path with `~/` expanded.
    pub fn database_path(&self) -> Result<PathBuf> {
        expand_home(&self.defaults.database_path)
    }

    /// Tag rule snapshot.
    pub fn tag_rules(&self) -> TagRules {
        TagRules(self.tags.clone())
    }
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| TenderwatchError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

// ---------------------------------------------------------------------------
// Runtime snapshots
// ---------------------------------------------------------------------------

/// Runtime fetch configuration, derived from `[defaults]`.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_pages: u32,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FetchOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_pages: config.defaults.max_pages.max(1),
            timeout: Duration::from_secs(config.defaults.request_timeout_secs.max(1)),
            user_agent: config.defaults.user_agent.clone(),
        }
    }
}

/// Validated, ordered snapshot of the configured sources.
///
/// Entries that fail validation are kept aside with their reason so a run of
/// that source can fail on its own without taking the others down.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<SourceDescriptor>,
    rejected: Vec<RejectedSource>,
    default_key: Option<String>,
}

/// A `[[sources]]` entry that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSource {
    pub key: String,
    pub reason: String,
}

impl SourceRegistry {
    /// Build a registry from descriptors; the first one is the default.
    pub fn new(sources: Vec<SourceDescriptor>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for source in &sources {
            if !seen.insert(source.key()) {
                return Err(TenderwatchError::config(format!(
                    "duplicate source key '{}'",
                    source.key()
                )));
            }
        }
        Ok(Self {
            sources,
            rejected: Vec::new(),
            default_key: None,
        })
    }

    /// Validate every `[[sources]]` entry and honor `defaults.default_source`.
    ///
    /// Invalid entries are logged and recorded as rejected; duplicate keys and
    /// an unknown default are configuration errors.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        let mut sources = Vec::new();
        let mut rejected = Vec::new();

        for entry in &config.sources {
            if !seen.insert(entry.key.as_str()) {
                return Err(TenderwatchError::config(format!(
                    "duplicate source key '{}'",
                    entry.key
                )));
            }
            match SourceDescriptor::new(
                &entry.key,
                &entry.label,
                &entry.listing_url,
                &entry.base_url,
                &entry.strategy,
            ) {
                Ok(source) => sources.push(source),
                Err(e) => {
                    tracing::error!(source = %entry.key, error = %e, "invalid source entry");
                    rejected.push(RejectedSource {
                        key: entry.key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut registry = Self::new(sources)?;
        registry.rejected = rejected;
        if let Some(key) = &config.defaults.default_source {
            registry = registry.with_default(key)?;
        }
        Ok(registry)
    }

    /// Set which source answers [`SourceRegistry::default_source`].
    pub fn with_default(mut self, key: &str) -> Result<Self> {
        if self.get(key).is_none() && self.rejection(key).is_none() {
            return Err(TenderwatchError::config(format!(
                "default_source '{key}' is not a configured source"
            )));
        }
        self.default_key = Some(key.to_string());
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.key() == key)
    }

    pub fn default_source(&self) -> Option<&SourceDescriptor> {
        self.default_key().and_then(|key| self.get(key))
    }

    /// Key of the default source: the configured one, else the first valid one.
    pub fn default_key(&self) -> Option<&str> {
        self.default_key
            .as_deref()
            .or_else(|| self.sources.first().map(|s| s.key()))
    }

    /// Why `key` was rejected, if its entry failed validation.
    pub fn rejection(&self, key: &str) -> Option<&str> {
        self.rejected
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.reason.as_str())
    }

    pub fn rejected(&self) -> &[RejectedSource] {
        &self.rejected
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.tenderwatch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TenderwatchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.tenderwatch/tenderwatch.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| TenderwatchError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        TenderwatchError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| TenderwatchError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| TenderwatchError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| TenderwatchError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(())
}
