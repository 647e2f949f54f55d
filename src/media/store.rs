use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// External tool names for enclosure handling.
#[derive(Debug, Clone)]
pub struct MediaTools {
    /// Downloader, invoked as `<downloader> -q -O <file> <url>`.
    pub downloader: String,
    /// Prober, invoked as
    /// `<prober> -v quiet -print_format json -show_format -show_streams <file>`.
    pub prober: String,
}

impl Default for MediaTools {
    fn default() -> Self {
        Self {
            downloader: "wget".to_string(),
            prober: "ffprobe".to_string(),
        }
    }
}

/// Filesystem store for enclosures and images, servable at a public base URL.
///
/// Files are addressed by a deterministic unique name (SHA-256 of the cache
/// key) plus a guessed extension. Cache rows reference files by name only;
/// deleting a row without its file is a leak, so deletion goes through
/// [`MediaStore::delete`] first.
#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
    public_base: String,
}

impl MediaStore {
    pub fn new(dir: PathBuf, public_base: &str) -> Self {
        Self {
            dir,
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }

    /// Deterministic file name for a cache key within a feed partition.
    pub fn unique_name(&self, feed: &str, key: &str) -> String {
        let hash = Sha256::digest(format!("{feed}|{key}").as_bytes());
        format!("{:x}", hash)
    }

    pub fn path_for(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn public_url(&self, file: &str) -> String {
        format!("{}/{}", self.public_base, file)
    }

    pub fn exists(&self, file: &str) -> bool {
        self.path_for(file).is_file()
    }

    /// Remove a backing file. A missing file is not an error (the row was
    /// already stale); other I/O failures are logged and swallowed so cleanup
    /// keeps going.
    pub async fn delete(&self, file: &str) {
        let path = self.path_for(file);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete media file");
            }
        }
    }
}

/// Map the small fixed set of expected enclosure/image MIME types to file
/// extensions. Unknown types keep no extension (callers log the warning).
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "audio/mpeg" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        _ => None,
    }
}
