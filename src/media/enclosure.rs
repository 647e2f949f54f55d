use std::process::Stdio;
use tokio::process::Command;

use super::store::extension_for_mime;
use super::PodcastResolver;
use crate::content::ResolveStatus;
use crate::feed::FeedDescriptor;

/// Result of resolving one enclosure. On `Error` the URL is empty and the
/// item is emitted without an enclosure element.
#[derive(Debug, Clone)]
pub struct ResolvedEnclosure {
    pub status: ResolveStatus,
    /// Fully-qualified public URL of the cached file.
    pub url: String,
    pub length: i64,
    pub mime: String,
    pub duration: i64,
}

impl ResolvedEnclosure {
    fn error() -> Self {
        Self {
            status: ResolveStatus::Error,
            url: String::new(),
            length: 0,
            mime: String::new(),
            duration: 0,
        }
    }
}

impl PodcastResolver {
    /// Resolve a podcast enclosure: cache hit, or download + probe + persist.
    ///
    /// The download goes through the configured external tool first and falls
    /// back to the feed's [`crate::feed::EnclosureFallbackDownloader`] hook if
    /// the tool fails. Tool failures are logged with captured output and
    /// degrade to `Error`, never abort the feed.
    pub async fn resolve_enclosure(&self, feed: &FeedDescriptor, url: &str) -> ResolvedEnclosure {
        match self.db.get_enclosure(&feed.name, url).await {
            Ok(Some(entry)) => {
                return ResolvedEnclosure {
                    status: ResolveStatus::Cache,
                    url: self.store.public_url(&entry.file),
                    length: entry.length,
                    mime: entry.mime,
                    duration: entry.duration,
                };
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(feed = %feed.name, error = %e, "Enclosure cache unavailable, forcing download");
            }
        }

        // Download into the store under a name with no extension yet; the
        // extension is appended after the MIME probe.
        let name = self.store.unique_name(&feed.name, url);
        let dest = self.store.path_for(&name);

        if !self.run_downloader(url, &dest).await {
            if let Some(fallback) = &feed.hooks.enclosure_fallback {
                tracing::info!(feed = %feed.name, url = %url, "Trying feed fallback downloader");
                if let Err(e) = fallback.download(url, &dest).await {
                    tracing::warn!(feed = %feed.name, url = %url, error = %e, "Fallback downloader failed");
                }
            }
        }

        let length = match tokio::fs::metadata(&dest).await {
            Ok(meta) if meta.len() > 0 => meta.len() as i64,
            _ => {
                tracing::warn!(feed = %feed.name, url = %url, "Enclosure download produced no file");
                return ResolvedEnclosure::error();
            }
        };

        let mime = self.probe_mime(&dest).await;
        let file = match extension_for_mime(&mime) {
            Some(ext) => {
                let renamed = format!("{name}.{ext}");
                match tokio::fs::rename(&dest, self.store.path_for(&renamed)).await {
                    Ok(()) => renamed,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to rename enclosure, keeping bare name");
                        name
                    }
                }
            }
            None => {
                tracing::warn!(feed = %feed.name, mime = %mime, "Unknown enclosure MIME type, keeping no extension");
                name
            }
        };

        let duration = self.probe_duration(&self.store.path_for(&file)).await;

        // Fire-and-forget persist: a cache write failure degrades to a
        // re-download next run, nothing more.
        if let Err(e) = self
            .db
            .put_enclosure(&feed.name, url, &file, length, &mime, duration)
            .await
        {
            tracing::warn!(feed = %feed.name, url = %url, error = %e, "Failed to persist enclosure row");
        }

        ResolvedEnclosure {
            status: ResolveStatus::New,
            url: self.store.public_url(&file),
            length,
            mime,
            duration,
        }
    }

    /// Invoke the external downloader. Returns true when the tool exited
    /// successfully; captured output is logged either way at the right level.
    async fn run_downloader(&self, url: &str, dest: &std::path::Path) -> bool {
        let output = Command::new(&self.tools.downloader)
            .arg("-q")
            .arg("-O")
            .arg(dest)
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => true,
            Ok(out) => {
                tracing::warn!(
                    tool = %self.tools.downloader,
                    url = %url,
                    stderr = %String::from_utf8_lossy(&out.stderr),
                    "Downloader exited nonzero"
                );
                false
            }
            Err(e) => {
                tracing::warn!(tool = %self.tools.downloader, error = %e, "Failed to execute downloader");
                false
            }
        }
    }

    /// Sniff the MIME type from the file's leading bytes.
    async fn probe_mime(&self, path: &std::path::Path) -> String {
        let mut buf = vec![0u8; 8192];
        let n = match tokio::fs::File::open(path).await {
            Ok(mut f) => tokio::io::AsyncReadExt::read(&mut f, &mut buf).await.unwrap_or(0),
            Err(_) => 0,
        };
        buf.truncate(n);
        infer::get(&buf)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }

    /// Probe media duration in seconds via the external prober's JSON output.
    /// Any failure logs and defaults to 0.
    async fn probe_duration(&self, path: &std::path::Path) -> i64 {
        let output = Command::new(&self.tools.prober)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let out = match output {
            Ok(out) if out.status.success() => out,
            Ok(out) => {
                tracing::warn!(
                    tool = %self.tools.prober,
                    stderr = %String::from_utf8_lossy(&out.stderr),
                    "Prober exited nonzero, duration defaults to 0"
                );
                return 0;
            }
            Err(e) => {
                tracing::warn!(tool = %self.tools.prober, error = %e, "Failed to execute prober");
                return 0;
            }
        };

        match serde_json::from_slice::<serde_json::Value>(&out.stdout) {
            Ok(value) => parse_probe_duration(&value),
            Err(e) => {
                tracing::warn!(error = %e, "Prober output was not valid JSON");
                0
            }
        }
    }
}

/// Extract a duration from prober JSON: the container format's duration if
/// present, else the first stream's.
fn parse_probe_duration(value: &serde_json::Value) -> i64 {
    let from_str = |v: &serde_json::Value| -> Option<f64> {
        match v {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_f64(),
            _ => None,
        }
    };

    value
        .pointer("/format/duration")
        .and_then(from_str)
        .or_else(|| value.pointer("/streams/0/duration").and_then(from_str))
        .map(|secs| secs.round() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duration_from_format_section() {
        let probe = json!({
            "format": { "duration": "1812.480000" },
            "streams": [ { "duration": "1.0" } ]
        });
        assert_eq!(parse_probe_duration(&probe), 1812);
    }

    #[test]
    fn test_duration_falls_back_to_first_stream() {
        let probe = json!({
            "streams": [ { "duration": "95.2" }, { "duration": "10.0" } ]
        });
        assert_eq!(parse_probe_duration(&probe), 95);
    }

    #[test]
    fn test_duration_defaults_to_zero() {
        assert_eq!(parse_probe_duration(&json!({})), 0);
        assert_eq!(parse_probe_duration(&json!({"format": {}})), 0);
        assert_eq!(parse_probe_duration(&json!({"format": {"duration": "junk"}})), 0);
    }
}
