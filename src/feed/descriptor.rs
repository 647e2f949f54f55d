use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::config::FeedConfig;
use crate::content::ItemFields;

/// Default cache retention when a feed does not configure one: 7 days.
pub const DEFAULT_RETENTION_SECS: i64 = 7 * 24 * 60 * 60;

/// What kind of document a feed's source URL serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// An existing RSS/XML feed, rewritten in place.
    Feed,
    /// An HTML page scraped into a synthesized feed.
    Page,
    /// A JSON API enumerated into a synthesized feed.
    Json,
}

impl SourceKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "feed" => Some(Self::Feed),
            "page" => Some(Self::Page),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Page => "page",
            Self::Json => "json",
        }
    }
}

// ============================================================================
// Hook Contracts
// ============================================================================
//
// Per-feed customization is a small set of named transform contracts a feed
// optionally binds to concrete implementations. Everything here is plain
// interface polymorphism: `Send + Sync` trait objects shared via `Arc`.

/// Post-extraction rewrite of an item's fields, given the raw fetched body.
pub trait ItemTransform: Send + Sync {
    fn transform(&self, raw_body: &str, fields: &mut ItemFields);
}

/// Enumerates the item list inside a JSON source document.
pub trait JsonItemsEnumerator: Send + Sync {
    fn items(&self, doc: &serde_json::Value) -> Vec<serde_json::Value>;
}

/// Maps a fetched per-item JSON document onto the item's fields.
pub trait JsonItemTransform: Send + Sync {
    fn transform(&self, item: &serde_json::Value, fields: &mut ItemFields);
}

/// Parsed source context handed to podcast image hooks, matching the feed's
/// source kind.
pub enum SourceContext<'a> {
    Html(&'a str),
    Json(&'a serde_json::Value),
}

/// Supplies the channel-level cover image source URL.
pub trait PodcastImageResolver: Send + Sync {
    fn image_url(&self, doc: &SourceContext<'_>) -> Option<String>;
}

/// Supplies a per-item cover image source URL.
pub trait PodcastItemImageResolver: Send + Sync {
    fn image_url(&self, item: &SourceContext<'_>) -> Option<String>;
}

/// Second-chance enclosure download when the external tool fails.
#[async_trait]
pub trait EnclosureFallbackDownloader: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> anyhow::Result<()>;
}

/// The full optional hook set of one feed. `Default` is "no hooks".
#[derive(Clone, Default)]
pub struct Hooks {
    pub item_transform: Option<Arc<dyn ItemTransform>>,
    pub json_items: Option<Arc<dyn JsonItemsEnumerator>>,
    pub json_item_transform: Option<Arc<dyn JsonItemTransform>>,
    pub podcast_image: Option<Arc<dyn PodcastImageResolver>>,
    pub podcast_item_image: Option<Arc<dyn PodcastItemImageResolver>>,
    pub enclosure_fallback: Option<Arc<dyn EnclosureFallbackDownloader>>,
}

/// Shipped JSON enumerator: the item array lives at a fixed JSON pointer.
pub struct PointerItemsEnumerator {
    pointer: String,
}

impl PointerItemsEnumerator {
    pub fn new(pointer: &str) -> Self {
        Self {
            pointer: pointer.to_string(),
        }
    }
}

impl JsonItemsEnumerator for PointerItemsEnumerator {
    fn items(&self, doc: &serde_json::Value) -> Vec<serde_json::Value> {
        doc.pointer(&self.pointer)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    }
}

/// Binds hook sets to feed names so configuration stays declarative: the TOML
/// names the feed, the registry supplies its code.
#[derive(Default)]
pub struct HookRegistry {
    by_feed: HashMap<String, Hooks>,
}

impl HookRegistry {
    pub fn bind(&mut self, feed: &str, hooks: Hooks) {
        self.by_feed.insert(feed.to_string(), hooks);
    }

    /// Hooks for a feed; unknown feeds get the empty set.
    pub fn hooks_for(&self, feed: &str) -> Hooks {
        self.by_feed.get(feed).cloned().unwrap_or_default()
    }
}

// ============================================================================
// FeedDescriptor
// ============================================================================

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Feed name must not be empty")]
    EmptyName,

    #[error("Feed '{0}': unknown source kind '{1}' (expected feed, page, or json)")]
    UnknownKind(String, String),

    #[error("Feed '{0}': invalid source URL '{1}'")]
    InvalidUrl(String, String),

    #[error("Feed '{0}': item_selector is required for {1} sources")]
    MissingItemSelector(String, &'static str),

    #[error("Feed '{0}': json sources require a registered items-enumerator hook")]
    MissingJsonEnumerator(String),

    #[error("Feed '{0}': json sources require link_selector (a JSON pointer)")]
    MissingJsonLink(String),

    #[error("Feed '{0}': retention must be positive, got {1}")]
    InvalidRetention(String, i64),
}

/// Validated, read-only per-feed configuration plus its bound hooks.
///
/// Constructed once per run from [`FeedConfig`]; missing or invalid required
/// fields fail construction immediately rather than surfacing mid-assembly.
pub struct FeedDescriptor {
    /// Unique name, also the cache partition key.
    pub name: String,
    pub kind: SourceKind,
    pub url: String,

    /// Element path (feed) or CSS selector (page) locating items.
    pub item_selector: Option<String>,
    /// Child element name (feed), CSS sub-selector (page), or JSON pointer.
    pub link_selector: Option<String>,
    pub title_selector: Option<String>,
    pub content_selector: Option<String>,
    pub time_selector: Option<String>,
    /// JSON pointer to a distinct per-item fetch endpoint.
    pub fetch_url_selector: Option<String>,
    pub link_prefix: Option<String>,

    pub channel_title: String,
    pub channel_description: String,

    pub use_extractor: bool,
    pub strip_query: bool,

    pub podcast: bool,
    pub podcast_category: Option<String>,
    pub podcast_owner_name: Option<String>,
    pub podcast_owner_email: Option<String>,
    pub podcast_block: bool,

    pub retention_secs: i64,
    pub hooks: Hooks,
}

impl FeedDescriptor {
    pub fn new(config: FeedConfig, hooks: Hooks) -> Result<Self, DescriptorError> {
        if config.name.trim().is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        let name = config.name;

        let kind = SourceKind::parse(&config.kind)
            .ok_or_else(|| DescriptorError::UnknownKind(name.clone(), config.kind.clone()))?;

        let parsed = Url::parse(&config.url)
            .map_err(|_| DescriptorError::InvalidUrl(name.clone(), config.url.clone()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(DescriptorError::InvalidUrl(name.clone(), config.url));
        }

        match kind {
            SourceKind::Feed | SourceKind::Page => {
                if config.item_selector.as_deref().unwrap_or("").is_empty() {
                    return Err(DescriptorError::MissingItemSelector(name, kind.as_str()));
                }
            }
            SourceKind::Json => {
                if hooks.json_items.is_none() {
                    return Err(DescriptorError::MissingJsonEnumerator(name));
                }
                if config.link_selector.as_deref().unwrap_or("").is_empty() {
                    return Err(DescriptorError::MissingJsonLink(name));
                }
            }
        }

        let retention_secs = config.retention_secs.unwrap_or(DEFAULT_RETENTION_SECS);
        if retention_secs <= 0 {
            return Err(DescriptorError::InvalidRetention(name, retention_secs));
        }

        Ok(Self {
            channel_title: config.channel_title.unwrap_or_else(|| name.clone()),
            channel_description: config.channel_description.unwrap_or_default(),
            name,
            kind,
            url: config.url,
            item_selector: config.item_selector,
            link_selector: config.link_selector,
            title_selector: config.title_selector,
            content_selector: config.content_selector,
            time_selector: config.time_selector,
            fetch_url_selector: config.fetch_url_selector,
            link_prefix: config.link_prefix,
            use_extractor: config.use_extractor,
            strip_query: config.strip_query,
            podcast: config.podcast,
            podcast_category: config.podcast_category,
            podcast_owner_name: config.podcast_owner_name,
            podcast_owner_email: config.podcast_owner_email,
            podcast_block: config.podcast_block,
            retention_secs,
            hooks,
        })
    }
}
