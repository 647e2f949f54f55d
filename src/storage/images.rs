use anyhow::Result;

use super::db::Database;

/// Discriminates channel-level cover art from per-item art.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Feed-level image; the row id is empty.
    Feed,
    /// Entry-level image; the row id is the item URL.
    Entry,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Feed => "feed",
            ImageKind::Entry => "entry",
        }
    }
}

/// One cached image row. The row is the index; the file is the payload.
/// A row whose file has vanished is self-healing: deleted and re-resolved
/// on next access.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEntry {
    pub feed: String,
    pub kind: String,
    pub id: String,
    pub file: String,
}

impl Database {
    // ========================================================================
    // Image Cache Operations
    // ========================================================================

    pub async fn get_image(
        &self,
        feed: &str,
        kind: ImageKind,
        id: &str,
    ) -> Result<Option<ImageEntry>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT file FROM images WHERE feed = ? AND kind = ? AND id = ?")
                .bind(feed)
                .bind(kind.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(file,)| ImageEntry {
            feed: feed.to_string(),
            kind: kind.as_str().to_string(),
            id: id.to_string(),
            file,
        }))
    }

    pub async fn put_image(&self, feed: &str, kind: ImageKind, id: &str, file: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO images (feed, kind, id, file)
            VALUES (?, ?, ?, ?)
        "#,
        )
        .bind(feed)
        .bind(kind.as_str())
        .bind(id)
        .bind(file)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_image(&self, feed: &str, kind: ImageKind, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM images WHERE feed = ? AND kind = ? AND id = ?")
            .bind(feed)
            .bind(kind.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_image_roundtrip_and_kind_separation() {
        let db = Database::open(":memory:").await.unwrap();
        db.put_image("pod", ImageKind::Feed, "", "cover.png").await.unwrap();
        db.put_image("pod", ImageKind::Entry, "https://example.org/ep1", "ep1.jpg")
            .await
            .unwrap();

        let feed_img = db.get_image("pod", ImageKind::Feed, "").await.unwrap().unwrap();
        assert_eq!(feed_img.file, "cover.png");

        let entry_img = db
            .get_image("pod", ImageKind::Entry, "https://example.org/ep1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry_img.file, "ep1.jpg");

        // Same id under a different kind is a distinct key.
        assert!(db.get_image("pod", ImageKind::Entry, "").await.unwrap().is_none());

        db.delete_image("pod", ImageKind::Feed, "").await.unwrap();
        assert!(db.get_image("pod", ImageKind::Feed, "").await.unwrap().is_none());
    }
}
