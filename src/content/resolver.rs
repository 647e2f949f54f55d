use std::sync::Arc;

use crate::fetch::ContentFetcher;
use crate::feed::FeedDescriptor;
use crate::feed::SourceKind;
use crate::storage::Database;

use super::extractor::ReadabilityExtractor;
use super::normalize::{decode_body, normalize_text};

/// Title prefix for items whose fetch was refused with HTTP 403.
pub const MARK_ACCESS_DENIED: &str = "⛔";
/// Title prefix for any other fetch failure (non-200, network error).
pub const MARK_FETCH_FAILED: &str = "⚠";

/// How an item's content was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    /// Served from the cache.
    Cache,
    /// Freshly fetched, extracted, and persisted.
    New,
    /// Resolution failed; fallback values returned, nothing cached.
    Error,
}

/// The three per-item fields the pipeline resolves. Also the shape of the
/// fallback values a source document supplies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemFields {
    pub title: String,
    pub content: String,
    /// Publication time as a Unix timestamp.
    pub time: Option<i64>,
}

/// Result of resolving one item.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub status: ResolveStatus,
    pub fields: ItemFields,
}

/// The central cache-or-fetch orchestrator (one state machine per item):
///
/// `CACHE_LOOKUP → {hit | FETCH → EXTRACT → TRANSFORM → NORMALIZE → PERSIST}`
///
/// Failures short-circuit to an `Error` result carrying the fallback fields;
/// they never raise and never abort the surrounding feed assembly.
pub struct ContentResolver {
    db: Database,
    fetcher: Arc<ContentFetcher>,
    extractor: Arc<dyn ReadabilityExtractor>,
}

impl ContentResolver {
    pub fn new(
        db: Database,
        fetcher: Arc<ContentFetcher>,
        extractor: Arc<dyn ReadabilityExtractor>,
    ) -> Self {
        Self {
            db,
            fetcher,
            extractor,
        }
    }

    /// Resolve one item to its canonical title/content/time.
    ///
    /// `fallback` holds the source document's own title/content/time for the
    /// item; non-empty fallback values win over empty pipeline output at
    /// every stage (after extraction AND again after the transform hook,
    /// since a hook may clear a field it could not improve).
    ///
    /// `alt_fetch_url` substitutes a distinct endpoint for the fetch (JSON
    /// sources with per-item API URLs) while the cache stays keyed by the
    /// item's canonical `url`.
    pub async fn resolve(
        &self,
        feed: &FeedDescriptor,
        url: &str,
        fallback: &ItemFields,
        alt_fetch_url: Option<&str>,
    ) -> Resolved {
        let key = cache_key(url, feed.strip_query);

        // CACHE_LOOKUP. A cache failure is a forced miss, never fatal.
        match self.db.get_article(&feed.name, &key).await {
            Ok(Some(entry)) => {
                if let Err(e) = self.db.touch_article(&feed.name, &key).await {
                    tracing::warn!(feed = %feed.name, error = %e, "Failed to touch cache row");
                }
                return Resolved {
                    status: ResolveStatus::Cache,
                    fields: ItemFields {
                        title: entry.title,
                        content: entry.content,
                        time: entry.published,
                    },
                };
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(feed = %feed.name, error = %e, "Article cache unavailable, resolving without it");
            }
        }

        // FETCH
        let target = alt_fetch_url.unwrap_or(url);
        let outcome = self.fetcher.fetch(target).await;
        if !outcome.is_ok() {
            let marker = if outcome.status == 403 {
                MARK_ACCESS_DENIED
            } else {
                MARK_FETCH_FAILED
            };
            tracing::warn!(feed = %feed.name, url = %target, status = outcome.status, "Item fetch failed");
            return Resolved {
                status: ResolveStatus::Error,
                fields: ItemFields {
                    title: format!("{marker} {}", fallback.title).trim().to_string(),
                    content: fallback.content.clone(),
                    time: fallback.time,
                },
            };
        }

        let mut status = ResolveStatus::New;
        let mut fields = fallback.clone();

        if feed.kind == SourceKind::Json {
            // JSON items skip readability entirely; the feed's JSON transform
            // hook maps decoded fields over the fallback values.
            match serde_json::from_slice::<serde_json::Value>(&outcome.body) {
                Ok(value) => {
                    if let Some(hook) = &feed.hooks.json_item_transform {
                        hook.transform(&value, &mut fields);
                        apply_fallback(&mut fields, fallback);
                    }
                }
                Err(e) => {
                    tracing::warn!(feed = %feed.name, url = %target, error = %e, "Item body is not valid JSON, passing fallback through");
                }
            }
        } else {
            // EXTRACT. The body may arrive in any encoding; transcode first.
            let body = decode_body(&outcome.body, outcome.content_type.as_deref());

            if feed.use_extractor {
                match self.extractor.extract(&body) {
                    Ok(extracted) => {
                        fields.title = extracted.title;
                        fields.content = extracted.content;
                        apply_fallback(&mut fields, fallback);
                    }
                    Err(e) => {
                        tracing::warn!(feed = %feed.name, url = %target, error = %e, "Readability extraction failed");
                        status = ResolveStatus::Error;
                    }
                }
            }

            // TRANSFORM: the feed's hook may override any field and may clear
            // one, so the fallback rule applies once more after it.
            if let Some(hook) = &feed.hooks.item_transform {
                hook.transform(&body, &mut fields);
                apply_fallback(&mut fields, fallback);
            }
        }

        // NORMALIZE
        fields.title = normalize_text(&fields.title);
        fields.content = normalize_text(&fields.content);

        // An extracted-but-empty result is a failure for caching purposes:
        // nothing useful, don't cache nothing.
        if fields.title.is_empty() && fields.content.is_empty() {
            tracing::warn!(feed = %feed.name, url = %url, "Resolution produced no usable title or content");
            status = ResolveStatus::Error;
        }

        // PERSIST, fire-and-forget. Cache-unavailable degrades gracefully.
        if status == ResolveStatus::New {
            if let Err(e) = self
                .db
                .put_article(&feed.name, &key, &fields.title, &fields.content, fields.time)
                .await
            {
                tracing::warn!(feed = %feed.name, url = %key, error = %e, "Failed to persist resolved item");
            }
        }

        Resolved { status, fields }
    }

    /// Record fields that arrived complete from the source document, without
    /// fetching anything.
    ///
    /// Podcast assembly calls this for items that never needed resolution, so
    /// the retention window still has an article row to age; the janitor's
    /// media cascade is keyed off expired article rows. Existing rows are
    /// kept (first write wins) but their last access is refreshed.
    pub async fn record(&self, feed: &FeedDescriptor, url: &str, fields: &ItemFields) {
        let key = cache_key(url, feed.strip_query);
        if let Err(e) = self
            .db
            .put_article(&feed.name, &key, &fields.title, &fields.content, fields.time)
            .await
        {
            tracing::warn!(feed = %feed.name, url = %key, error = %e, "Failed to record item");
            return;
        }
        if let Err(e) = self.db.touch_article(&feed.name, &key).await {
            tracing::warn!(feed = %feed.name, url = %key, error = %e, "Failed to touch recorded item");
        }
    }
}

/// Cache key for an item URL. Query-string stripping is an explicit per-feed
/// policy (off by default), never silent behavior.
fn cache_key(url: &str, strip_query: bool) -> String {
    if strip_query {
        url.split('?').next().unwrap_or(url).to_string()
    } else {
        url.to_string()
    }
}

/// Non-empty fallback wins over empty pipeline output.
fn apply_fallback(fields: &mut ItemFields, fallback: &ItemFields) {
    if fields.title.trim().is_empty() && !fallback.title.is_empty() {
        fields.title = fallback.title.clone();
    }
    if fields.content.trim().is_empty() && !fallback.content.is_empty() {
        fields.content = fallback.content.clone();
    }
    if fields.time.is_none() {
        fields.time = fallback.time;
    }
}
