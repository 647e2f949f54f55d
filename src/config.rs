//! Configuration file parser for refeed.toml.
//!
//! Unlike an interactive reader, a proxy cannot guess its feeds: a missing
//! config file is an error. Unknown top-level keys are accepted by serde but
//! logged as potential typos.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified;
/// missing keys fall back to `Default::default()`. Feed descriptors are
/// validated separately and eagerly at construction, not here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the SQLite cache database.
    pub cache_db: String,

    /// Directory where enclosure and image files are written.
    pub storage_dir: PathBuf,

    /// Public base URL under which files in `storage_dir` are served.
    pub public_base_url: String,

    /// User-Agent sent on every outbound request.
    pub user_agent: String,

    /// Extra request headers applied to every fetch.
    pub headers: HashMap<String, String>,

    /// Outbound addresses to bind, chosen uniformly at random per fetch.
    /// Empty means the OS default address.
    pub outbound_ips: Vec<String>,

    /// External enclosure downloader, invoked as `<downloader> -q -O <file> <url>`.
    pub downloader: String,

    /// External media prober, invoked as
    /// `<prober> -v quiet -print_format json -show_format -show_streams <file>`.
    pub prober: String,

    /// Per-feed descriptor tables.
    #[serde(rename = "feed")]
    pub feeds: Vec<FeedConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_db: "refeed.db".to_string(),
            storage_dir: PathBuf::from("public"),
            public_base_url: "http://localhost/public".to_string(),
            user_agent: concat!("refeed/", env!("CARGO_PKG_VERSION")).to_string(),
            headers: HashMap::new(),
            outbound_ips: Vec::new(),
            downloader: "wget".to_string(),
            prober: "ffprobe".to_string(),
            feeds: Vec::new(),
        }
    }
}

/// Raw per-feed configuration as read from TOML.
///
/// This is the unvalidated shape; [`crate::feed::FeedDescriptor::new`] turns
/// it into a validated, read-only descriptor and fails fast on missing or
/// invalid required fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Unique feed name; also the cache partition key.
    pub name: String,

    /// Source kind: "feed", "page", or "json".
    pub kind: String,

    /// Source URL.
    pub url: String,

    /// Item location: an element path like "rss/channel/item" for feed
    /// sources, a CSS selector for page sources. Unused for JSON sources
    /// (items come from the registered enumerator hook).
    pub item_selector: Option<String>,

    /// Link location relative to an item: a child element name (feed), a CSS
    /// sub-selector (page), or a JSON pointer like "/url" (json).
    pub link_selector: Option<String>,

    /// Optional title location relative to an item (same convention as
    /// `link_selector`).
    pub title_selector: Option<String>,

    /// Optional content location relative to an item.
    pub content_selector: Option<String>,

    /// Optional publication-time location relative to an item.
    pub time_selector: Option<String>,

    /// JSON pointer to a distinct per-item fetch endpoint (json sources only).
    pub fetch_url_selector: Option<String>,

    /// Prefix joined onto relative item links before validation.
    pub link_prefix: Option<String>,

    /// Channel title for synthesized output (defaults to the feed name).
    pub channel_title: Option<String>,

    /// Channel description for synthesized output.
    pub channel_description: Option<String>,

    /// Run the readability extractor on fetched item pages.
    pub use_extractor: bool,

    /// Whether the cache key strips the URL query string. Off by default;
    /// flip only for sources whose links carry volatile tracking parameters.
    pub strip_query: bool,

    /// Podcast feed: items get enclosures and cover images.
    pub podcast: bool,

    /// itunes:category for podcast channels.
    pub podcast_category: Option<String>,

    /// itunes:owner name for podcast channels.
    pub podcast_owner_name: Option<String>,

    /// itunes:owner email for podcast channels.
    pub podcast_owner_email: Option<String>,

    /// itunes:block flag for podcast channels.
    pub podcast_block: bool,

    /// Cache retention in seconds; rows untouched for longer are evicted by
    /// the janitor. Defaults to 7 days.
    pub retention_secs: Option<i64>,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Err(ConfigError::NotFound)` (feeds cannot be guessed)
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion from a
        // corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;

        // Parse as a raw table first to flag probable typos.
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "cache_db",
                "storage_dir",
                "public_base_url",
                "user_agent",
                "headers",
                "outbound_ips",
                "downloader",
                "prober",
                "feed",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Look up a feed table by name.
    pub fn feed(&self, name: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.name == name)
    }
}

// ============================================================================
// Tests
// ============================================================================
