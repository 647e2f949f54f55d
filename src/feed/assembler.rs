//! Feed assembly: enumerate source items, resolve each through the content
//! pipeline, and emit the output document.
//!
//! Feed sources are rewritten in place (event-stream copy with resolved
//! title/content nodes replaced as CDATA); page and JSON sources synthesize a
//! fresh RSS document. Per-item failures degrade to fallback values or a
//! skipped item; assembly itself only fails when the source document cannot
//! be fetched or parsed at all.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures::stream::{self, StreamExt};
use quick_xml::events::{BytesCData, BytesEnd, Event};
use quick_xml::{Reader, Writer};
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

use super::descriptor::{FeedDescriptor, SourceContext, SourceKind};
use super::rss::{self, RssChannel, RssEnclosure, RssItem};
use crate::content::{decode_body, ContentResolver, ItemFields, ResolveStatus};
use crate::fetch::ContentFetcher;
use crate::media::PodcastResolver;
use crate::storage::ImageKind;

/// Items resolved in flight per feed. Items are independent; the cache layer
/// tolerates concurrent writes on the same key.
const RESOLVE_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("Failed to fetch source for feed '{feed}' (HTTP {status})")]
    SourceFetch { feed: String, status: u16 },

    #[error("Feed '{feed}': source document is not valid XML: {message}")]
    Xml { feed: String, message: String },

    #[error("Feed '{feed}': source document is not valid JSON: {message}")]
    Json { feed: String, message: String },

    #[error("Feed '{feed}': invalid CSS selector '{selector}'")]
    Selector { feed: String, selector: String },

    #[error("Failed to serialize output for feed '{feed}': {message}")]
    Serialize { feed: String, message: String },
}

/// Orchestrates one feed-generation run.
pub struct FeedAssembler {
    resolver: ContentResolver,
    podcast: PodcastResolver,
    fetcher: Arc<ContentFetcher>,
}

impl FeedAssembler {
    pub fn new(
        resolver: ContentResolver,
        podcast: PodcastResolver,
        fetcher: Arc<ContentFetcher>,
    ) -> Self {
        Self {
            resolver,
            podcast,
            fetcher,
        }
    }

    /// Produce the output XML for one feed.
    pub async fn assemble(&self, feed: &FeedDescriptor) -> Result<String, AssembleError> {
        let outcome = self.fetcher.fetch(&feed.url).await;
        if !outcome.is_ok() {
            return Err(AssembleError::SourceFetch {
                feed: feed.name.clone(),
                status: outcome.status,
            });
        }

        match feed.kind {
            SourceKind::Feed => {
                let body = decode_body(&outcome.body, outcome.content_type.as_deref());
                self.assemble_feed(feed, &body).await
            }
            SourceKind::Page => {
                let body = decode_body(&outcome.body, outcome.content_type.as_deref());
                self.assemble_page(feed, &body).await
            }
            SourceKind::Json => self.assemble_json(feed, &outcome.body).await,
        }
    }

    // ========================================================================
    // FEED sources: in-place rewrite
    // ========================================================================

    async fn assemble_feed(
        &self,
        feed: &FeedDescriptor,
        body: &str,
    ) -> Result<String, AssembleError> {
        let items = scan_feed_items(feed, body)?;

        let resolved: Vec<Option<ItemFields>> = stream::iter(items.iter())
            .map(|item| async move {
                match &item.link {
                    Some(link) => Some(
                        self.resolver
                            .resolve(feed, link, &item.fallback, None)
                            .await
                            .fields,
                    ),
                    None => {
                        tracing::warn!(feed = %feed.name, "Feed item has no resolvable link, leaving it untouched");
                        None
                    }
                }
            })
            .buffered(RESOLVE_CONCURRENCY)
            .collect()
            .await;

        // Only nodes whose resolved value differs from the original change.
        let mut replacements: HashMap<usize, ItemFields> = HashMap::new();
        for (index, (item, fields)) in items.iter().zip(resolved).enumerate() {
            if let Some(fields) = fields {
                if fields.title != item.fallback.title || fields.content != item.fallback.content {
                    replacements.insert(index, fields);
                }
            }
        }

        rewrite_feed(feed, body, &replacements)
    }

    // ========================================================================
    // PAGE sources: scrape and synthesize
    // ========================================================================

    async fn assemble_page(
        &self,
        feed: &FeedDescriptor,
        body: &str,
    ) -> Result<String, AssembleError> {
        // scraper's DOM is not Send: all selection happens synchronously here,
        // before any await.
        let items = scan_page_items(feed, body)?;

        let channel_image = self
            .resolve_channel_image(feed, &SourceContext::Html(body))
            .await;

        let out_items: Vec<Option<RssItem>> = stream::iter(items.into_iter())
            .map(|item| {
                let context_html = item.item_html;
                let link = item.link;
                let fallback = item.fallback;
                async move {
                    self.build_item(feed, link, fallback, SourceContext::Html(&context_html), None)
                        .await
                }
            })
            .buffered(RESOLVE_CONCURRENCY)
            .collect()
            .await;

        self.render_synthesized(feed, channel_image, out_items)
    }

    // ========================================================================
    // JSON sources: enumerate and synthesize
    // ========================================================================

    async fn assemble_json(
        &self,
        feed: &FeedDescriptor,
        body: &[u8],
    ) -> Result<String, AssembleError> {
        let doc: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| AssembleError::Json {
                feed: feed.name.clone(),
                message: e.to_string(),
            })?;

        let channel_image = self
            .resolve_channel_image(feed, &SourceContext::Json(&doc))
            .await;

        // Descriptor validation guarantees the enumerator hook is present.
        let values = match &feed.hooks.json_items {
            Some(hook) => hook.items(&doc),
            None => Vec::new(),
        };

        let link_pointer = feed.link_selector.as_deref().unwrap_or("");
        let out_items: Vec<Option<RssItem>> = stream::iter(values.into_iter())
            .map(|value| async move {
                let Some(link) = value
                    .pointer(link_pointer)
                    .and_then(|v| v.as_str())
                    .and_then(|raw| qualify_link(feed, raw))
                else {
                    tracing::warn!(feed = %feed.name, "JSON item has no resolvable link, skipping");
                    return None;
                };

                let fallback = json_fallback(feed, &value);
                let alt = feed
                    .fetch_url_selector
                    .as_deref()
                    .and_then(|p| value.pointer(p))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);

                self.build_item(feed, link, fallback, SourceContext::Json(&value), alt)
                    .await
            })
            .buffered(RESOLVE_CONCURRENCY)
            .collect()
            .await;

        self.render_synthesized(feed, channel_image, out_items)
    }

    // ========================================================================
    // Shared synthesis steps
    // ========================================================================

    /// Resolve one synthesized item: fill title/content gaps through the
    /// content pipeline, then attach podcast media. Returns `None` only when
    /// the caller already decided to skip (link resolution happens upstream).
    async fn build_item(
        &self,
        feed: &FeedDescriptor,
        link: String,
        fallback: ItemFields,
        context: SourceContext<'_>,
        alt_fetch_url: Option<String>,
    ) -> Option<RssItem> {
        let fields = if fallback.title.is_empty() || fallback.content.is_empty() {
            self.resolver
                .resolve(feed, &link, &fallback, alt_fetch_url.as_deref())
                .await
                .fields
        } else {
            // Complete items skip resolution, but podcast retention is keyed
            // off article rows, so the item is still recorded.
            if feed.podcast {
                self.resolver.record(feed, &link, &fallback).await;
            }
            fallback
        };

        let mut item = RssItem {
            title: fields.title,
            link: link.clone(),
            content: fields.content,
            time: fields.time,
            enclosure: None,
            image_url: String::new(),
        };

        if feed.podcast {
            let enclosure = self.podcast.resolve_enclosure(feed, &link).await;
            if enclosure.status != ResolveStatus::Error {
                item.enclosure = Some(RssEnclosure {
                    url: enclosure.url,
                    length: enclosure.length,
                    mime: enclosure.mime,
                    duration: enclosure.duration,
                });
            }

            if let Some(hook) = &feed.hooks.podcast_item_image {
                if let Some(source) = hook.image_url(&context) {
                    item.image_url = self
                        .podcast
                        .resolve_image(&feed.name, ImageKind::Entry, &link, &source)
                        .await;
                }
            }
        }

        Some(item)
    }

    /// Channel-level podcast cover image, empty when not a podcast or the
    /// hook yields nothing.
    async fn resolve_channel_image(
        &self,
        feed: &FeedDescriptor,
        context: &SourceContext<'_>,
    ) -> String {
        if !feed.podcast {
            return String::new();
        }
        let Some(hook) = &feed.hooks.podcast_image else {
            return String::new();
        };
        let Some(source) = hook.image_url(context) else {
            return String::new();
        };
        self.podcast
            .resolve_image(&feed.name, ImageKind::Feed, "", &source)
            .await
    }

    fn render_synthesized(
        &self,
        feed: &FeedDescriptor,
        channel_image: String,
        items: Vec<Option<RssItem>>,
    ) -> Result<String, AssembleError> {
        let items: Vec<RssItem> = items.into_iter().flatten().collect();
        let channel = RssChannel {
            title: feed.channel_title.clone(),
            link: feed.url.clone(),
            description: feed.channel_description.clone(),
            image_url: channel_image,
        };
        tracing::info!(feed = %feed.name, items = items.len(), "Assembled feed");
        rss::render(feed, &channel, &items).map_err(|e| AssembleError::Serialize {
            feed: feed.name.clone(),
            message: e.to_string(),
        })
    }
}

// ============================================================================
// FEED source scanning and rewriting
// ============================================================================

struct FeedSourceItem {
    link: Option<String>,
    fallback: ItemFields,
}

fn element_path(feed: &FeedDescriptor) -> Vec<&str> {
    feed.item_selector
        .as_deref()
        .unwrap_or("")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

fn feed_child_selectors(feed: &FeedDescriptor) -> (&str, &str, &str, &str) {
    (
        feed.link_selector.as_deref().unwrap_or("link"),
        feed.title_selector.as_deref().unwrap_or("title"),
        feed.content_selector.as_deref().unwrap_or("description"),
        feed.time_selector.as_deref().unwrap_or("pubDate"),
    )
}

/// First pass over a feed document: collect each item's link and fallback
/// title/content/time by element path.
fn scan_feed_items(
    feed: &FeedDescriptor,
    body: &str,
) -> Result<Vec<FeedSourceItem>, AssembleError> {
    let item_path = element_path(feed);
    let (link_sel, title_sel, content_sel, time_sel) = feed_child_selectors(feed);

    let mut reader = Reader::from_str(body);
    let mut path: Vec<String> = Vec::new();
    let mut items = Vec::new();
    let mut current: Option<FeedSourceItem> = None;
    // (child element name, accumulated text) while inside a tracked child
    let mut capture: Option<(String, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                path.push(name.clone());
                if path == item_path {
                    current = Some(FeedSourceItem {
                        link: None,
                        fallback: ItemFields::default(),
                    });
                } else if current.is_some()
                    && path.len() == item_path.len() + 1
                    && (name == link_sel || name == title_sel || name == content_sel || name == time_sel)
                {
                    capture = Some((name, String::new()));
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((_, buf)) = capture.as_mut() {
                    match t.unescape() {
                        Ok(text) => buf.push_str(&text),
                        Err(e) => {
                            return Err(AssembleError::Xml {
                                feed: feed.name.clone(),
                                message: e.to_string(),
                            })
                        }
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if let Some((_, buf)) = capture.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if let Some((name, buf)) = capture.take() {
                    // End of a tracked child at item depth + 1
                    if path.len() == item_path.len() + 1 {
                        if let Some(item) = current.as_mut() {
                            let text = buf.trim().to_string();
                            if name == link_sel && item.link.is_none() {
                                item.link = qualify_link(feed, &text);
                            }
                            if name == title_sel {
                                item.fallback.title = text.clone();
                            }
                            if name == content_sel {
                                item.fallback.content = text.clone();
                            }
                            if name == time_sel {
                                item.fallback.time = parse_time(&text);
                            }
                        }
                    } else {
                        capture = Some((name, buf));
                    }
                }
                if path == item_path {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(AssembleError::Xml {
                    feed: feed.name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    Ok(items)
}

/// Second pass: copy the document event-for-event, substituting a CDATA leaf
/// for the title/content children of items that resolved differently. The
/// surrounding structure, attributes, and unrelated nodes pass through
/// untouched.
fn rewrite_feed(
    feed: &FeedDescriptor,
    body: &str,
    replacements: &HashMap<usize, ItemFields>,
) -> Result<String, AssembleError> {
    let item_path = element_path(feed);
    let (_, title_sel, content_sel, _) = feed_child_selectors(feed);

    let xml_err = |e: String| AssembleError::Xml {
        feed: feed.name.clone(),
        message: e,
    };
    fn ser_err(feed: &FeedDescriptor, e: impl std::fmt::Display) -> AssembleError {
        AssembleError::Serialize {
            feed: feed.name.clone(),
            message: e.to_string(),
        }
    }

    let mut reader = Reader::from_str(body);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut path: Vec<String> = Vec::new();
    let mut item_index: usize = 0;
    let mut inside_item = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                path.push(name.clone());
                if path == item_path {
                    inside_item = true;
                }

                let replacement = if inside_item && path.len() == item_path.len() + 1 {
                    replacements.get(&item_index).and_then(|fields| {
                        if name == title_sel {
                            Some(&fields.title)
                        } else if name == content_sel {
                            Some(&fields.content)
                        } else {
                            None
                        }
                    })
                } else {
                    None
                };

                match replacement {
                    Some(text) => {
                        // Write the element with a single CDATA child, then
                        // drop the original children from the input stream.
                        writer.write_event(Event::Start(e.to_owned())).map_err(|e| ser_err(feed, e))?;
                        writer
                            .write_event(Event::CData(BytesCData::new(rss::sanitize_cdata(text))))
                            .map_err(|e| ser_err(feed, e))?;
                        skip_subtree(&mut reader).map_err(xml_err)?;
                        writer
                            .write_event(Event::End(BytesEnd::new(&name)))
                            .map_err(|e| ser_err(feed, e))?;
                        path.pop();
                    }
                    None => {
                        writer.write_event(Event::Start(e)).map_err(|e| ser_err(feed, e))?;
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                // A self-closing tracked child (e.g. <description/>) cannot
                // carry CDATA; expand it to an open/close pair when its item
                // resolved differently.
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let replacement = if inside_item && path.len() == item_path.len() {
                    replacements.get(&item_index).and_then(|fields| {
                        if name == title_sel {
                            Some(&fields.title)
                        } else if name == content_sel {
                            Some(&fields.content)
                        } else {
                            None
                        }
                    })
                } else {
                    None
                };

                match replacement {
                    Some(text) => {
                        writer.write_event(Event::Start(e.to_owned())).map_err(|e| ser_err(feed, e))?;
                        writer
                            .write_event(Event::CData(BytesCData::new(rss::sanitize_cdata(text))))
                            .map_err(|e| ser_err(feed, e))?;
                        writer
                            .write_event(Event::End(BytesEnd::new(&name)))
                            .map_err(|e| ser_err(feed, e))?;
                    }
                    None => {
                        writer.write_event(Event::Empty(e)).map_err(|e| ser_err(feed, e))?;
                    }
                }
            }
            Ok(Event::End(e)) => {
                if path == item_path {
                    inside_item = false;
                    item_index += 1;
                }
                path.pop();
                writer.write_event(Event::End(e)).map_err(|e| ser_err(feed, e))?;
            }
            Ok(Event::Eof) => break,
            Ok(event) => {
                writer.write_event(event).map_err(|e| ser_err(feed, e))?;
            }
            Err(e) => return Err(xml_err(e.to_string())),
        }
    }

    let bytes = writer.into_inner().into_inner();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Consume events up to and including the end tag matching the element whose
/// start tag was just read.
fn skip_subtree(reader: &mut Reader<&[u8]>) -> Result<(), String> {
    let mut depth: usize = 0;
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Event::Eof => return Err("unexpected EOF while skipping element".to_string()),
            _ => {}
        }
    }
}

// ============================================================================
// PAGE source scanning
// ============================================================================

struct PageItem {
    link: String,
    fallback: ItemFields,
    /// The item element's own markup, handed to image hooks as context.
    item_html: String,
}

fn scan_page_items(feed: &FeedDescriptor, body: &str) -> Result<Vec<PageItem>, AssembleError> {
    let parse_selector = |raw: &str| {
        Selector::parse(raw).map_err(|_| AssembleError::Selector {
            feed: feed.name.clone(),
            selector: raw.to_string(),
        })
    };

    let item_selector = parse_selector(feed.item_selector.as_deref().unwrap_or(""))?;
    let link_selector = parse_selector(feed.link_selector.as_deref().unwrap_or("a"))?;
    let title_selector = feed.title_selector.as_deref().map(parse_selector).transpose()?;
    let content_selector = feed.content_selector.as_deref().map(parse_selector).transpose()?;
    let time_selector = feed.time_selector.as_deref().map(parse_selector).transpose()?;

    let doc = Html::parse_document(body);
    let mut items = Vec::new();

    for element in doc.select(&item_selector) {
        let raw_link = element
            .select(&link_selector)
            .next()
            .and_then(|a| {
                a.value()
                    .attr("href")
                    .map(str::to_string)
                    .or_else(|| Some(a.text().collect::<String>()))
            })
            .unwrap_or_default();

        let Some(link) = qualify_link(feed, &raw_link) else {
            tracing::warn!(feed = %feed.name, link = %raw_link, "Page item has no resolvable link, skipping");
            continue;
        };

        let text_of = |sel: &Option<Selector>| -> String {
            sel.as_ref()
                .and_then(|s| element.select(s).next())
                .map(|el| el.text().collect::<String>().trim().to_string())
                .unwrap_or_default()
        };

        let content = content_selector
            .as_ref()
            .and_then(|s| element.select(s).next())
            .map(|el| el.inner_html())
            .unwrap_or_default();

        items.push(PageItem {
            link,
            fallback: ItemFields {
                title: text_of(&title_selector),
                content,
                time: parse_time(&text_of(&time_selector)),
            },
            item_html: element.html(),
        });
    }

    Ok(items)
}

// ============================================================================
// Shared helpers
// ============================================================================

fn json_fallback(feed: &FeedDescriptor, value: &serde_json::Value) -> ItemFields {
    let text_at = |pointer: &Option<String>| -> String {
        pointer
            .as_deref()
            .and_then(|p| value.pointer(p))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let time = feed
        .time_selector
        .as_deref()
        .and_then(|p| value.pointer(p))
        .and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => parse_time(s),
            _ => None,
        });

    ItemFields {
        title: text_at(&feed.title_selector),
        content: text_at(&feed.content_selector),
        time,
    }
}

/// Turn a raw extracted link into a validated absolute http(s) URL, joining
/// the feed's link prefix onto relative links.
fn qualify_link(feed: &FeedDescriptor, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let candidate = if Url::parse(raw).is_ok() {
        raw.to_string()
    } else if let Some(prefix) = &feed.link_prefix {
        format!("{prefix}{raw}")
    } else {
        raw.to_string()
    };

    match Url::parse(&candidate) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(candidate),
        _ => None,
    }
}

/// Lenient timestamp parsing for the formats feeds actually carry.
fn parse_time(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp());
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }
    None
}
