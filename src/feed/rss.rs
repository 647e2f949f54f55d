//! RSS 2.0 synthesis for page and JSON sources.
//!
//! Feed sources rewrite their original document instead (see the assembler);
//! this writer builds a fresh document from resolved items.

use std::io::Cursor;

use chrono::{TimeZone, Utc};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::descriptor::FeedDescriptor;

pub const ITUNES_NS: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";

/// One fully-resolved output item.
#[derive(Debug, Clone, Default)]
pub struct RssItem {
    pub title: String,
    pub link: String,
    pub content: String,
    /// Unix timestamp; omitted from output when `None`.
    pub time: Option<i64>,
    pub enclosure: Option<RssEnclosure>,
    /// Public cover-image URL; empty means no image element.
    pub image_url: String,
}

#[derive(Debug, Clone)]
pub struct RssEnclosure {
    pub url: String,
    pub length: i64,
    pub mime: String,
    pub duration: i64,
}

/// Channel-level data for a synthesized document.
#[derive(Debug, Clone, Default)]
pub struct RssChannel {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Public channel cover-image URL (podcasts only; empty means none).
    pub image_url: String,
}

/// Render a complete RSS 2.0 document.
///
/// Podcast feeds get the itunes namespace plus channel category/owner/block
/// metadata and per-item enclosure/image/duration elements.
pub fn render(
    feed: &FeedDescriptor,
    channel: &RssChannel,
    items: &[RssItem],
) -> Result<String, quick_xml::Error> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    if feed.podcast {
        rss.push_attribute(("xmlns:itunes", ITUNES_NS));
    }
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    write_text(&mut writer, "title", &channel.title)?;
    write_text(&mut writer, "link", &channel.link)?;
    write_text(&mut writer, "description", &channel.description)?;

    if feed.podcast {
        write_podcast_channel(&mut writer, feed, channel)?;
    }

    for item in items {
        write_item(&mut writer, feed, item)?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    let bytes = writer.into_inner().into_inner();
    // The writer only ever receives UTF-8 strings.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_podcast_channel(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    feed: &FeedDescriptor,
    channel: &RssChannel,
) -> Result<(), quick_xml::Error> {
    if let Some(category) = &feed.podcast_category {
        let mut el = BytesStart::new("itunes:category");
        el.push_attribute(("text", category.as_str()));
        writer.write_event(Event::Empty(el))?;
    }

    if feed.podcast_owner_name.is_some() || feed.podcast_owner_email.is_some() {
        writer.write_event(Event::Start(BytesStart::new("itunes:owner")))?;
        if let Some(name) = &feed.podcast_owner_name {
            write_text(writer, "itunes:name", name)?;
        }
        if let Some(email) = &feed.podcast_owner_email {
            write_text(writer, "itunes:email", email)?;
        }
        writer.write_event(Event::End(BytesEnd::new("itunes:owner")))?;
    }

    if feed.podcast_block {
        write_text(writer, "itunes:block", "Yes")?;
    }

    if !channel.image_url.is_empty() {
        let mut el = BytesStart::new("itunes:image");
        el.push_attribute(("href", channel.image_url.as_str()));
        writer.write_event(Event::Empty(el))?;
    }

    Ok(())
}

fn write_item(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    feed: &FeedDescriptor,
    item: &RssItem,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new("item")))?;

    write_cdata(writer, "title", &item.title)?;
    write_text(writer, "link", &item.link)?;
    write_text(writer, "guid", &item.link)?;
    write_cdata(writer, "description", &item.content)?;

    if let Some(time) = item.time {
        if let chrono::LocalResult::Single(dt) = Utc.timestamp_opt(time, 0) {
            write_text(writer, "pubDate", &dt.to_rfc2822())?;
        }
    }

    if feed.podcast {
        if let Some(enclosure) = &item.enclosure {
            let mut el = BytesStart::new("enclosure");
            el.push_attribute(("url", enclosure.url.as_str()));
            el.push_attribute(("length", enclosure.length.to_string().as_str()));
            el.push_attribute(("type", enclosure.mime.as_str()));
            writer.write_event(Event::Empty(el))?;
            write_text(writer, "itunes:duration", &format_duration(enclosure.duration))?;
        }
        if !item.image_url.is_empty() {
            let mut el = BytesStart::new("itunes:image");
            el.push_attribute(("href", item.image_url.as_str()));
            writer.write_event(Event::Empty(el))?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

fn write_text(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    text: &str,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_cdata(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    text: &str,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::CData(BytesCData::new(sanitize_cdata(text))))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// A literal `]]>` inside CDATA would terminate the section early; the
/// standard fix splits it across two adjacent sections.
pub(crate) fn sanitize_cdata(text: &str) -> String {
    text.replace("]]>", "]]]]><![CDATA[>")
}

/// itunes:duration as `H:MM:SS` (or `M:SS` under an hour).
fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::feed::Hooks;

    fn descriptor(podcast: bool) -> FeedDescriptor {
        FeedDescriptor::new(
            FeedConfig {
                name: "example".to_string(),
                kind: "page".to_string(),
                url: "https://example.org/".to_string(),
                item_selector: Some("div".to_string()),
                podcast,
                podcast_category: podcast.then(|| "Technology".to_string()),
                podcast_owner_name: podcast.then(|| "Owner".to_string()),
                podcast_owner_email: podcast.then(|| "owner@example.org".to_string()),
                podcast_block: podcast,
                ..Default::default()
            },
            Hooks::default(),
        )
        .unwrap()
    }

    fn channel() -> RssChannel {
        RssChannel {
            title: "Example".to_string(),
            link: "https://example.org/".to_string(),
            description: "Test channel".to_string(),
            image_url: String::new(),
        }
    }

    #[test]
    fn test_plain_feed_structure() {
        let items = vec![RssItem {
            title: "First".to_string(),
            link: "https://example.org/1".to_string(),
            content: "<p>Body</p>".to_string(),
            time: Some(1704067200),
            ..Default::default()
        }];
        let xml = render(&descriptor(false), &channel(), &items).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("<rss version=\"2.0\">"));
        assert!(!xml.contains("xmlns:itunes"));
        assert!(xml.contains("<title><![CDATA[First]]></title>"));
        assert!(xml.contains("<link>https://example.org/1</link>"));
        assert!(xml.contains("<description><![CDATA[<p>Body</p>]]></description>"));
        assert!(xml.contains("<pubDate>Mon, 1 Jan 2024 00:00:00 +0000</pubDate>"));
    }

    #[test]
    fn test_item_without_time_omits_pubdate() {
        let items = vec![RssItem {
            title: "No date".to_string(),
            link: "https://example.org/1".to_string(),
            ..Default::default()
        }];
        let xml = render(&descriptor(false), &channel(), &items).unwrap();
        assert!(!xml.contains("pubDate"));
    }

    #[test]
    fn test_podcast_channel_and_item_elements() {
        let mut ch = channel();
        ch.image_url = "https://cdn.example.org/cover.png".to_string();
        let items = vec![RssItem {
            title: "Episode 1".to_string(),
            link: "https://example.org/ep1".to_string(),
            content: "Show notes".to_string(),
            enclosure: Some(RssEnclosure {
                url: "https://cdn.example.org/ep1.mp3".to_string(),
                length: 1234,
                mime: "audio/mpeg".to_string(),
                duration: 3725,
            }),
            image_url: "https://cdn.example.org/ep1.png".to_string(),
            ..Default::default()
        }];
        let xml = render(&descriptor(true), &ch, &items).unwrap();

        assert!(xml.contains(&format!("xmlns:itunes=\"{ITUNES_NS}\"")));
        assert!(xml.contains("<itunes:category text=\"Technology\"/>"));
        assert!(xml.contains("<itunes:name>Owner</itunes:name>"));
        assert!(xml.contains("<itunes:block>Yes</itunes:block>"));
        assert!(xml.contains("href=\"https://cdn.example.org/cover.png\""));
        assert!(xml.contains(
            "<enclosure url=\"https://cdn.example.org/ep1.mp3\" length=\"1234\" type=\"audio/mpeg\"/>"
        ));
        assert!(xml.contains("<itunes:duration>1:02:05</itunes:duration>"));
        assert!(xml.contains("href=\"https://cdn.example.org/ep1.png\""));
    }

    #[test]
    fn test_cdata_terminator_is_split() {
        assert_eq!(sanitize_cdata("a]]>b"), "a]]]]><![CDATA[>b");
        let items = vec![RssItem {
            title: "x".to_string(),
            link: "https://example.org/1".to_string(),
            content: "code ]]> more".to_string(),
            ..Default::default()
        }];
        let xml = render(&descriptor(false), &channel(), &items).unwrap();
        assert!(!xml.contains("code ]]> more"));
    }

    #[test]
    fn test_duration_formats() {
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(95), "1:35");
        assert_eq!(format_duration(3600), "1:00:00");
        assert_eq!(format_duration(-5), "0:00");
    }
}
