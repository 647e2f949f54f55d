//! Text normalization applied to every resolved title and content body.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use regex::Regex;
use std::sync::OnceLock;

/// Runs of two-or-more whitespace characters collapse to one space.
fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").unwrap())
}

fn meta_charset() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)charset\s*=\s*["']?([a-zA-Z0-9_\-]+)"#).unwrap())
}

/// Normalize resolved text: substitute literal CR/LF XML entities and the
/// UTF-8-as-Latin-1 mojibake right single quote, then collapse whitespace
/// runs. Idempotent: normalizing already-normalized text is a no-op.
pub fn normalize_text(s: &str) -> String {
    let s = s
        .replace("&#13;", "\r")
        .replace("&#10;", "\n")
        .replace("â€™", "'");
    whitespace_run().replace_all(&s, " ").trim().to_string()
}

/// Decode fetched body bytes to UTF-8.
///
/// Charset preference order: the Content-Type header, an HTML `<meta>`
/// charset in the first kilobyte, valid UTF-8 as-is, then a windows-1252
/// last resort (which cannot fail).
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    if let Some(enc) = content_type
        .and_then(charset_label)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
    {
        let (text, _, _) = enc.decode(bytes);
        return text.into_owned();
    }

    if let Some(enc) = sniff_meta_charset(bytes) {
        if enc != UTF_8 {
            let (text, _, _) = enc.decode(bytes);
            return text.into_owned();
        }
    }

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        // Plain byte mapping: `decode` would sniff a leading UTF-16 BOM and
        // switch encodings, losing the lossless-fallback guarantee.
        Err(_) => WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned(),
    }
}

fn charset_label(content_type: &str) -> Option<String> {
    meta_charset()
        .captures(content_type)
        .map(|c| c[1].to_string())
}

fn sniff_meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(1024)];
    let head = String::from_utf8_lossy(head);
    meta_charset()
        .captures(&head)
        .and_then(|c| Encoding::for_label(c[1].as_bytes()))
}
