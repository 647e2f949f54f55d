use anyhow::Result;

use super::db::Database;

/// One cached podcast enclosure: created on first successful download,
/// immutable afterward. `file` names the backing blob in the media store.
#[derive(Debug, Clone, PartialEq)]
pub struct EnclosureEntry {
    pub feed: String,
    pub url: String,
    pub file: String,
    pub length: i64,
    pub mime: String,
    pub duration: i64,
}

impl Database {
    // ========================================================================
    // Enclosure Cache Operations
    // ========================================================================

    pub async fn get_enclosure(&self, feed: &str, url: &str) -> Result<Option<EnclosureEntry>> {
        let row: Option<(String, i64, String, i64)> = sqlx::query_as(
            r#"
            SELECT file, length, mime, duration
            FROM enclosures
            WHERE feed = ? AND url = ?
        "#,
        )
        .bind(feed)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(file, length, mime, duration)| EnclosureEntry {
            feed: feed.to_string(),
            url: url.to_string(),
            file,
            length,
            mime,
            duration,
        }))
    }

    pub async fn put_enclosure(
        &self,
        feed: &str,
        url: &str,
        file: &str,
        length: i64,
        mime: &str,
        duration: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO enclosures (feed, url, file, length, mime, duration)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(feed)
        .bind(url)
        .bind(file)
        .bind(length)
        .bind(mime)
        .bind(duration)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_enclosure(&self, feed: &str, url: &str) -> Result<()> {
        sqlx::query("DELETE FROM enclosures WHERE feed = ? AND url = ?")
            .bind(feed)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enclosure_roundtrip() {
        let db = Database::open(":memory:").await.unwrap();
        db.put_enclosure("pod", "https://example.org/ep.mp3", "abc123.mp3", 4096, "audio/mpeg", 1800)
            .await
            .unwrap();

        let entry = db
            .get_enclosure("pod", "https://example.org/ep.mp3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.file, "abc123.mp3");
        assert_eq!(entry.length, 4096);
        assert_eq!(entry.mime, "audio/mpeg");
        assert_eq!(entry.duration, 1800);

        db.delete_enclosure("pod", "https://example.org/ep.mp3").await.unwrap();
        assert!(db
            .get_enclosure("pod", "https://example.org/ep.mp3")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_enclosure_is_immutable_after_first_write() {
        let db = Database::open(":memory:").await.unwrap();
        db.put_enclosure("pod", "https://example.org/ep.mp3", "first.mp3", 1, "audio/mpeg", 10)
            .await
            .unwrap();
        db.put_enclosure("pod", "https://example.org/ep.mp3", "second.mp3", 2, "audio/mp4", 20)
            .await
            .unwrap();

        let entry = db
            .get_enclosure("pod", "https://example.org/ep.mp3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.file, "first.mp3");
    }
}
