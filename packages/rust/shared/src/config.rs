//! Application configuration for cryptfeed.
//!
//! User config lives at `~/.cryptfeed/cryptfeed.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets never live in the file; only the names of the env vars that
//! hold them do.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CryptfeedError, Result};
use crate::types::CollectionName;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "cryptfeed.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".cryptfeed";

// ---------------------------------------------------------------------------
// Config structs (matching cryptfeed.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Document store location.
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP and timeout settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Newscatcher search API source.
    #[serde(default)]
    pub newscatcher: NewscatcherConfig,

    /// RSS feeds, one per destination collection.
    #[serde(default = "default_feeds")]
    pub feeds: Vec<FeedConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            http: HttpConfig::default(),
            newscatcher: NewscatcherConfig::default(),
            feeds: default_feeds(),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Local database file. Ignored when `url` is set.
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Remote libSQL database URL (e.g. `libsql://crypt-<org>.turso.io`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Name of the env var holding the remote auth token.
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            url: None,
            auth_token_env: default_auth_token_env(),
        }
    }
}

fn default_store_path() -> String {
    "~/.cryptfeed/cryptfeed.db".into()
}
fn default_auth_token_env() -> String {
    "CRYPTFEED_DB_TOKEN".into()
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Upper bound for a single source fetch.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Upper bound for a single store call (distinct or insert).
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
            store_timeout_secs: default_store_timeout(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_store_timeout() -> u64 {
    15
}

/// `[newscatcher]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewscatcherConfig {
    /// Whether the source takes part in runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Destination collection.
    #[serde(default = "default_newscatcher_collection")]
    pub collection: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_news_api_env")]
    pub api_key_env: String,

    /// API base URL.
    #[serde(default = "default_newscatcher_base_url")]
    pub base_url: String,

    /// Search query.
    #[serde(default = "default_newscatcher_query")]
    pub query: String,

    /// Fields the query is matched against.
    #[serde(default = "default_newscatcher_search_in")]
    pub search_in: String,

    /// How far back to search, in days.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Comma-separated language codes to restrict results to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    /// Comma-separated ISO country codes to restrict results to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countries: Option<String>,
}

impl Default for NewscatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collection: default_newscatcher_collection(),
            api_key_env: default_news_api_env(),
            base_url: default_newscatcher_base_url(),
            query: default_newscatcher_query(),
            search_in: default_newscatcher_search_in(),
            lookback_days: default_lookback_days(),
            lang: None,
            countries: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_newscatcher_collection() -> String {
    "newscatcher_news".into()
}
fn default_news_api_env() -> String {
    "NEWS_API".into()
}
fn default_newscatcher_base_url() -> String {
    "https://v3-api.newscatcherapi.com".into()
}
fn default_newscatcher_query() -> String {
    "DeFi, Cryptocurrency, NFTs".into()
}
fn default_newscatcher_search_in() -> String {
    "content, summary, title".into()
}
fn default_lookback_days() -> u32 {
    30
}

/// `[[feeds]]` entry: an RSS feed and the collection it fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Destination collection.
    pub collection: String,
    /// RSS 2.0 feed URL.
    pub url: String,
}

fn default_feeds() -> Vec<FeedConfig> {
    vec![
        FeedConfig {
            collection: "rekt_news".into(),
            url: "https://rekt.news/rss/feed.xml".into(),
        },
        FeedConfig {
            collection: "crypto_news".into(),
            url: "https://crypto.news/feed/".into(),
        },
    ]
}

// ---------------------------------------------------------------------------
// Resolved runtime settings
// ---------------------------------------------------------------------------

/// Where the document store lives, with secrets resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreTarget {
    /// Local libSQL file.
    Local(PathBuf),
    /// Hosted libSQL database.
    Remote { url: String, auth_token: String },
}

impl StoreConfig {
    /// Resolve the configured store into a concrete target.
    pub fn target(&self) -> Result<StoreTarget> {
        match &self.url {
            Some(url) => Ok(StoreTarget::Remote {
                url: url.clone(),
                auth_token: resolve_secret(&self.auth_token_env)?,
            }),
            None => Ok(StoreTarget::Local(expand_home(&self.path)?)),
        }
    }
}

/// Runtime ingestion settings, derived from the config file.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Time budget for one fetcher call.
    pub fetch_timeout: Duration,
    /// Time budget for one store call.
    pub store_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(config.http.fetch_timeout_secs),
            store_timeout: Duration::from_secs(config.http.store_timeout_secs),
        }
    }
}

impl AppConfig {
    /// Check cross-field constraints not expressible in serde.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        let newscatcher = self
            .newscatcher
            .enabled
            .then_some(self.newscatcher.collection.as_str());
        for name in self
            .feeds
            .iter()
            .map(|f| f.collection.as_str())
            .chain(newscatcher)
        {
            CollectionName::new(name)?;
            if !seen.insert(name) {
                return Err(CryptfeedError::config(format!(
                    "collection '{name}' is configured more than once"
                )));
            }
        }
        if self.http.fetch_timeout_secs == 0 || self.http.store_timeout_secs == 0 {
            return Err(CryptfeedError::config("timeouts must be at least 1 second"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.cryptfeed/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CryptfeedError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.cryptfeed/cryptfeed.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| CryptfeedError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        CryptfeedError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CryptfeedError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CryptfeedError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CryptfeedError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the named env var, rejecting unset or empty values.
pub fn resolve_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(CryptfeedError::config(format!(
            "secret not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| CryptfeedError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
