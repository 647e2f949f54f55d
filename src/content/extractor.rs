use scraper::{Html, Selector};
use thiserror::Error;

/// Best-effort (title, content) pair from a raw HTML page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub title: String,
    /// Extracted main content as an HTML fragment.
    pub content: String,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("No article content found in page")]
    NoContent,
}

/// Readability capability: HTML in, `{title, content}` or failure out.
///
/// The extraction algorithm itself is a collaborator, not part of this crate's
/// contract; swap in anything that satisfies this trait (tests use a counting
/// stub).
pub trait ReadabilityExtractor: Send + Sync {
    fn extract(&self, html: &str) -> Result<Extracted, ExtractError>;
}

/// CSS selectors targeting main article content across common platforms.
/// Order matters: more specific selectors first, generic fallbacks last.
const TARGET_SELECTORS: &[&str] = &[
    "article",
    ".entry-content",
    ".post-content",
    ".article-content",
    ".post-body",
    "main .content",
    "main",
];

/// Minimum text length (in bytes) for a candidate container to count as the
/// article body; shorter matches are navigation remnants.
const MIN_CONTENT_LEN: usize = 80;

/// Shipped extractor: selector-heuristic readability.
///
/// Title comes from `og:title` falling back to `<title>`; content is the
/// first target-selector match with enough text.
#[derive(Debug, Default)]
pub struct SelectorExtractor;

impl ReadabilityExtractor for SelectorExtractor {
    fn extract(&self, html: &str) -> Result<Extracted, ExtractError> {
        let doc = Html::parse_document(html);

        let title = og_title(&doc)
            .or_else(|| page_title(&doc))
            .unwrap_or_default();

        let mut content = String::new();
        for raw in TARGET_SELECTORS {
            // Static selectors: parse failure would be a programming error,
            // but degrade rather than panic in non-test code.
            let Ok(selector) = Selector::parse(raw) else {
                continue;
            };
            if let Some(element) = doc.select(&selector).next() {
                let text_len: usize = element.text().map(str::len).sum();
                if text_len >= MIN_CONTENT_LEN {
                    content = element.inner_html();
                    break;
                }
            }
        }

        if content.trim().is_empty() {
            return Err(ExtractError::NoContent);
        }

        Ok(Extracted {
            title: title.trim().to_string(),
            content,
        })
    }
}

fn og_title(doc: &Html) -> Option<String> {
    let selector = Selector::parse(r#"meta[property="og:title"]"#).ok()?;
    doc.select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string)
        .filter(|t| !t.trim().is_empty())
}

fn page_title(doc: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    doc.select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .filter(|t| !t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE_PAGE: &str = r#"<html>
<head>
  <title>Fallback Title - Site Name</title>
  <meta property="og:title" content="The Real Headline">
</head>
<body>
  <nav>Home | About | Contact</nav>
  <article>
    <p>This is the main article body with enough text to clear the minimum
    content-length threshold used by the extractor heuristic.</p>
  </article>
  <footer>Copyright</footer>
</body>
</html>"#;

    #[test]
    fn test_extracts_article_and_og_title() {
        let extracted = SelectorExtractor.extract(ARTICLE_PAGE).unwrap();
        assert_eq!(extracted.title, "The Real Headline");
        assert!(extracted.content.contains("main article body"));
        assert!(!extracted.content.contains("Copyright"));
    }

    #[test]
    fn test_falls_back_to_title_element() {
        let page = ARTICLE_PAGE.replace(r#"<meta property="og:title" content="The Real Headline">"#, "");
        let extracted = SelectorExtractor.extract(&page).unwrap();
        assert_eq!(extracted.title, "Fallback Title - Site Name");
    }

    #[test]
    fn test_no_content_is_an_error() {
        let page = "<html><body><nav>Just navigation</nav></body></html>";
        assert!(matches!(
            SelectorExtractor.extract(page),
            Err(ExtractError::NoContent)
        ));
    }

    #[test]
    fn test_short_container_is_skipped() {
        // <article> exists but is too short to be the body; <main> has the text.
        let page = r#"<html><body>
            <article>stub</article>
            <main><p>The actual long-form body of the page lives here and easily
            clears the extractor's minimum content-length threshold.</p></main>
        </body></html>"#;
        let extracted = SelectorExtractor.extract(page).unwrap();
        assert!(extracted.content.contains("actual long-form body"));
    }
}
