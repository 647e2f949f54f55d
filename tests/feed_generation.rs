//! End-to-end feed generation: scrape or rewrite a source, resolve items
//! through the cache-or-fetch pipeline, and emit RSS.
//!
//! Each test runs against its own in-memory SQLite database and a wiremock
//! server standing in for the remote site.

use std::path::Path;
use std::sync::Arc;

use refeed::config::FeedConfig;
use refeed::content::{ContentResolver, SelectorExtractor};
use refeed::feed::{FeedAssembler, FeedDescriptor, Hooks};
use refeed::fetch::{ContentFetcher, Identity};
use refeed::media::{MediaStore, MediaTools, PodcastResolver};
use refeed::storage::Database;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn assembler(db: &Database, dir: &Path) -> FeedAssembler {
    let fetcher = Arc::new(ContentFetcher::new(&Identity::default(), &[]).unwrap());
    let resolver = ContentResolver::new(db.clone(), fetcher.clone(), Arc::new(SelectorExtractor));
    let store = MediaStore::new(dir.to_path_buf(), "https://cdn.example.org/public");
    let podcast = PodcastResolver::new(db.clone(), store, fetcher.clone(), MediaTools::default());
    FeedAssembler::new(resolver, podcast, fetcher)
}

fn article_page(title: &str, body: &str) -> String {
    format!(
        r#"<html><head>
        <meta property="og:title" content="{title}">
        <title>{title} - Site</title></head>
        <body><nav>navigation</nav>
        <article><p>{body} This paragraph carries enough text for the selector
        heuristic to accept the container as the article body.</p></article>
        </body></html>"#
    )
}

fn page_feed(name: &str, url: &str) -> FeedDescriptor {
    FeedDescriptor::new(
        FeedConfig {
            name: name.to_string(),
            kind: "page".to_string(),
            url: url.to_string(),
            item_selector: Some("div.story".to_string()),
            link_selector: Some("a".to_string()),
            title_selector: Some("a".to_string()),
            use_extractor: true,
            channel_title: Some("Integration Channel".to_string()),
            channel_description: Some("Scraped stories".to_string()),
            ..Default::default()
        },
        Hooks::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_page_pipeline_extracts_and_caches() {
    let server = MockServer::start().await;
    let index = format!(
        r#"<html><body>
        <div class="story"><a href="{0}/story/1">Teaser One</a></div>
        <div class="story"><a href="{0}/story/2">Teaser Two</a></div>
        </body></html>"#,
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/index"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index))
        .expect(2)
        .mount(&server)
        .await;
    // Cache idempotence across runs: each article may be fetched exactly once.
    Mock::given(method("GET"))
        .and(path("/story/1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(article_page("Story One", "First body.")),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/story/2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(article_page("Story Two", "Second body.")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let a = assembler(&db, dir.path()).await;
    let feed = page_feed("stories", &format!("{}/index", server.uri()));

    let first = a.assemble(&feed).await.unwrap();
    assert_eq!(first.matches("<item>").count(), 2);
    assert!(first.contains("Story One"));
    assert!(first.contains("First body."));
    assert!(first.contains("<title>Integration Channel</title>"));

    // Second run: articles come from the cache, output is identical.
    let second = a.assemble(&feed).await.unwrap();
    assert_eq!(first, second);

    let cached = db
        .get_article("stories", &format!("{}/story/1", server.uri()))
        .await
        .unwrap();
    assert!(cached.is_some());
}

#[tokio::test]
async fn test_partial_failure_never_aborts_the_feed() {
    let server = MockServer::start().await;
    let index = format!(
        r#"<html><body>
        <div class="story"><a href="{0}/ok">Good</a></div>
        <div class="story"><a href="{0}/broken">Broken</a></div>
        <div class="story"><a href="{0}/forbidden">Walled</a></div>
        </body></html>"#,
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/index"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article_page("Good", "Works.")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/forbidden"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let a = assembler(&db, dir.path()).await;
    let feed = page_feed("mixed", &format!("{}/index", server.uri()));

    let output = a.assemble(&feed).await.unwrap();

    // All three items are emitted; the failing ones carry their fallback
    // title behind a distinguishable marker.
    assert_eq!(output.matches("<item>").count(), 3);
    assert!(output.contains("Good"));
    assert!(output.contains("⚠ Broken"));
    assert!(output.contains("⛔ Walled"));

    // Failed resolutions are never cached; only the good article persisted.
    assert!(db
        .get_article("mixed", &format!("{}/ok", server.uri()))
        .await
        .unwrap()
        .is_some());
    assert!(db
        .get_article("mixed", &format!("{}/broken", server.uri()))
        .await
        .unwrap()
        .is_none());
    assert!(db
        .get_article("mixed", &format!("{}/forbidden", server.uri()))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_feed_source_rewrite_preserves_structure() {
    let server = MockServer::start().await;
    let article_url = format!("{}/article", server.uri());
    let source = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <rss version=\"2.0\"><channel>\
         <title>Original Channel</title>\
         <link>https://example.org/</link>\
         <item><title>Teaser</title><link>{article_url}</link>\
         <description>Short teaser text</description>\
         <pubDate>Mon, 1 Jan 2024 00:00:00 +0000</pubDate></item>\
         </channel></rss>"
    );
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(source))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(article_page("Full Headline", "Complete article.")),
        )
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let a = assembler(&db, dir.path()).await;
    let feed = FeedDescriptor::new(
        FeedConfig {
            name: "rewritten".to_string(),
            kind: "feed".to_string(),
            url: format!("{}/feed.xml", server.uri()),
            item_selector: Some("rss/channel/item".to_string()),
            use_extractor: true,
            ..Default::default()
        },
        Hooks::default(),
    )
    .unwrap();

    let output = a.assemble(&feed).await.unwrap();

    // Resolved nodes became CDATA; everything else survives verbatim.
    assert!(output.contains("<title><![CDATA[Full Headline]]></title>"));
    assert!(output.contains("Complete article."));
    assert!(output.contains("<title>Original Channel</title>"));
    assert!(output.contains("<link>https://example.org/</link>"));
    assert!(output.contains(&format!("<link>{article_url}</link>")));
    assert!(output.contains("<pubDate>Mon, 1 Jan 2024 00:00:00 +0000</pubDate>"));
}
