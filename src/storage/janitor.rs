//! Cache eviction by last-access age, with podcast media cascade.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;

use super::{Database, ImageKind};
use crate::feed::FeedDescriptor;
use crate::media::MediaStore;

/// Per-feed eviction counts.
#[derive(Debug, Clone, Default)]
pub struct JanitorFeedReport {
    pub feed: String,
    pub articles_evicted: u64,
    pub enclosures_deleted: u64,
    pub images_deleted: u64,
}

/// Result of one janitor run.
#[derive(Debug, Clone, Default)]
pub struct JanitorReport {
    pub feeds: Vec<JanitorFeedReport>,
    pub db_bytes_before: u64,
    pub db_bytes_after: u64,
}

impl JanitorReport {
    pub fn total_articles(&self) -> u64 {
        self.feeds.iter().map(|f| f.articles_evicted).sum()
    }
}

/// Evict cache rows whose last access is older than each feed's retention.
///
/// For podcast feeds the cascade per expired URL is strictly ordered: delete
/// the backing media file, then the enclosure/image row, then the article
/// row. A row pointing at an already-deleted file would self-heal, but a file
/// without a row would leak, so the file always goes first. Storage is
/// compacted afterward.
pub async fn run(
    db: &Database,
    store: &MediaStore,
    feeds: &[FeedDescriptor],
    db_path: &Path,
) -> Result<JanitorReport> {
    let mut report = JanitorReport {
        db_bytes_before: file_size(db_path),
        ..Default::default()
    };

    let now = Utc::now().timestamp();
    for feed in feeds {
        let cutoff = now - feed.retention_secs;
        let mut feed_report = JanitorFeedReport {
            feed: feed.name.clone(),
            ..Default::default()
        };

        if feed.podcast {
            for url in db.expired_article_urls(&feed.name, cutoff).await? {
                if let Some(enclosure) = db.get_enclosure(&feed.name, &url).await? {
                    store.delete(&enclosure.file).await;
                    db.delete_enclosure(&feed.name, &url).await?;
                    feed_report.enclosures_deleted += 1;
                }
                if let Some(image) = db.get_image(&feed.name, ImageKind::Entry, &url).await? {
                    store.delete(&image.file).await;
                    db.delete_image(&feed.name, ImageKind::Entry, &url).await?;
                    feed_report.images_deleted += 1;
                }
                db.delete_article(&feed.name, &url).await?;
                feed_report.articles_evicted += 1;
            }
        } else {
            feed_report.articles_evicted = db.evict_articles(&feed.name, cutoff).await?;
        }

        tracing::info!(
            feed = %feed.name,
            articles = feed_report.articles_evicted,
            enclosures = feed_report.enclosures_deleted,
            images = feed_report.images_deleted,
            "Janitor swept feed"
        );
        report.feeds.push(feed_report);
    }

    db.vacuum().await?;
    report.db_bytes_after = file_size(db_path);

    tracing::info!(
        articles = report.total_articles(),
        bytes_before = report.db_bytes_before,
        bytes_after = report.db_bytes_after,
        "Janitor run complete"
    );
    Ok(report)
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
