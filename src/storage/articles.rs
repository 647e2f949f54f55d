use anyhow::Result;
use chrono::Utc;

use super::db::Database;

/// One cached article resolution.
///
/// The row is the durable record of previously-extracted content: written
/// once, then only `last_access` moves, until the janitor evicts it.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleEntry {
    pub feed: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub published: Option<i64>,
    pub last_access: i64,
}

impl Database {
    // ========================================================================
    // Article Cache Operations
    // ========================================================================

    /// Look up a cached article by (feed, url).
    ///
    /// A hit does NOT refresh `last_access`; callers that want read-refresh
    /// semantics follow up with [`Database::touch_article`].
    pub async fn get_article(&self, feed: &str, url: &str) -> Result<Option<ArticleEntry>> {
        let row: Option<(String, String, Option<i64>, i64)> = sqlx::query_as(
            r#"
            SELECT title, content, published, last_access
            FROM articles
            WHERE feed = ? AND url = ?
        "#,
        )
        .bind(feed)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(title, content, published, last_access)| ArticleEntry {
            feed: feed.to_string(),
            url: url.to_string(),
            title,
            content,
            published,
            last_access,
        }))
    }

    /// Insert a resolved article with `last_access = now`.
    ///
    /// `INSERT OR IGNORE`: if two concurrent resolutions race on the same
    /// key, the first write wins and the loser's identical content is
    /// dropped. The key stays unique either way.
    pub async fn put_article(
        &self,
        feed: &str,
        url: &str,
        title: &str,
        content: &str,
        published: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO articles (feed, url, title, content, published, last_access)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(feed)
        .bind(url)
        .bind(title)
        .bind(content)
        .bind(published)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Refresh `last_access` for a cached article (read-hit touch-up).
    pub async fn touch_article(&self, feed: &str, url: &str) -> Result<()> {
        sqlx::query("UPDATE articles SET last_access = ? WHERE feed = ? AND url = ?")
            .bind(Utc::now().timestamp())
            .bind(feed)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a single article row.
    pub async fn delete_article(&self, feed: &str, url: &str) -> Result<()> {
        sqlx::query("DELETE FROM articles WHERE feed = ? AND url = ?")
            .bind(feed)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// URLs of articles in a feed whose last access is strictly older than
    /// `cutoff`. The janitor walks this list for podcast feeds so associated
    /// media rows can be deleted before the article rows.
    pub async fn expired_article_urls(&self, feed: &str, cutoff: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT url FROM articles WHERE feed = ? AND last_access < ?")
                .bind(feed)
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    /// Bulk-delete articles in a feed older than `cutoff`.
    ///
    /// Returns the number of rows evicted.
    pub async fn evict_articles(&self, feed: &str, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM articles WHERE feed = ? AND last_access < ?")
            .bind(feed)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let db = test_db().await;
        db.put_article("example", "https://example.org/a", "Title", "Body", Some(1704067200))
            .await
            .unwrap();

        let entry = db
            .get_article("example", "https://example.org/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.title, "Title");
        assert_eq!(entry.content, "Body");
        assert_eq!(entry.published, Some(1704067200));
    }

    #[tokio::test]
    async fn test_get_miss_returns_none() {
        let db = test_db().await;
        let entry = db.get_article("example", "https://example.org/missing").await.unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn test_keys_are_feed_partitioned() {
        let db = test_db().await;
        db.put_article("one", "https://example.org/a", "A", "in one", None)
            .await
            .unwrap();

        assert!(db.get_article("one", "https://example.org/a").await.unwrap().is_some());
        assert!(db.get_article("two", "https://example.org/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_keeps_first_row() {
        let db = test_db().await;
        db.put_article("example", "https://example.org/a", "First", "first body", None)
            .await
            .unwrap();
        // Second write on the same key is ignored, not an error.
        db.put_article("example", "https://example.org/a", "Second", "second body", None)
            .await
            .unwrap();

        let entry = db
            .get_article("example", "https://example.org/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.title, "First");
    }

    #[tokio::test]
    async fn test_touch_refreshes_last_access() {
        let db = test_db().await;
        db.put_article("example", "https://example.org/a", "T", "C", None)
            .await
            .unwrap();

        // Backdate the row, then touch it.
        sqlx::query("UPDATE articles SET last_access = 1000 WHERE feed = 'example'")
            .execute(&db.pool)
            .await
            .unwrap();
        db.touch_article("example", "https://example.org/a").await.unwrap();

        let entry = db
            .get_article("example", "https://example.org/a")
            .await
            .unwrap()
            .unwrap();
        assert!(entry.last_access > 1000);
    }

    #[tokio::test]
    async fn test_eviction_boundary() {
        let db = test_db().await;
        db.put_article("example", "https://example.org/old", "Old", "old", None)
            .await
            .unwrap();
        db.put_article("example", "https://example.org/new", "New", "new", None)
            .await
            .unwrap();

        let now = Utc::now().timestamp();
        let retention = 3600;
        // Old row: one second past retention. New row: one second inside it.
        sqlx::query("UPDATE articles SET last_access = ? WHERE url LIKE '%/old'")
            .bind(now - retention - 1)
            .execute(&db.pool)
            .await
            .unwrap();
        sqlx::query("UPDATE articles SET last_access = ? WHERE url LIKE '%/new'")
            .bind(now - retention + 1)
            .execute(&db.pool)
            .await
            .unwrap();

        let evicted = db.evict_articles("example", now - retention).await.unwrap();
        assert_eq!(evicted, 1);
        assert!(db.get_article("example", "https://example.org/old").await.unwrap().is_none());
        assert!(db.get_article("example", "https://example.org/new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_urls_lists_only_stale_rows() {
        let db = test_db().await;
        db.put_article("pod", "https://example.org/ep1", "E1", "c", None)
            .await
            .unwrap();
        db.put_article("pod", "https://example.org/ep2", "E2", "c", None)
            .await
            .unwrap();
        sqlx::query("UPDATE articles SET last_access = 1 WHERE url LIKE '%/ep1'")
            .execute(&db.pool)
            .await
            .unwrap();

        let urls = db.expired_article_urls("pod", 100).await.unwrap();
        assert_eq!(urls, vec!["https://example.org/ep1".to_string()]);
    }
}
