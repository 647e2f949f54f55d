//! Black-box fetch capability: body + status, never an error.
//!
//! Every network-level failure (DNS, TLS, timeout) collapses into the same
//! channel HTTP errors use: a non-200 status with an empty body. Call sites
//! inspect one field instead of juggling two failure paths. Status `0` is the
//! reserved network-failure sentinel.

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Reserved status for failures below the HTTP layer (timeout, DNS, TLS).
pub const STATUS_NETWORK_FAILURE: u16 = 0;

/// Per-request timeout. The original design left fetches unbounded; an
/// explicit cap keeps one dead host from stalling a whole feed run.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies larger than this are treated as fetch failures.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Cap for streamed file downloads (enclosures).
const MAX_DOWNLOAD_SIZE: u64 = 512 * 1024 * 1024; // 512MB

/// Outbound identity applied to every request.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_agent: String,
    pub headers: HashMap<String, String>,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            user_agent: concat!("refeed/", env!("CARGO_PKG_VERSION")).to_string(),
            headers: HashMap::new(),
        }
    }
}

/// Errors constructing the fetcher. Fetching itself never errors.
#[derive(Debug, Error)]
pub enum FetcherBuildError {
    #[error("Invalid header in identity: {0}")]
    Identity(String),

    #[error("Invalid outbound address '{0}'")]
    Address(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result of a fetch: HTTP status plus body bytes.
///
/// `status == 200` with a body is the only success shape; everything else is
/// a degraded result the caller turns into fallback behavior.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: u16,
    pub body: Vec<u8>,
    /// Content-Type header, kept for charset detection downstream.
    pub content_type: Option<String>,
}

impl FetchOutcome {
    fn failure(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            content_type: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Optional request knobs; the zero value is a plain GET.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Body to POST instead of issuing a GET.
    pub post_body: Option<String>,
}

/// HTTP fetcher with cookie persistence and outbound-IP rotation.
///
/// reqwest binds the local address at client construction, so rotation is a
/// pool of clients, one per configured address, with a uniformly random pick
/// per call. An empty pool degenerates to a single default-bound client.
/// Cookies persist per client for the process lifetime.
pub struct ContentFetcher {
    clients: Vec<reqwest::Client>,
}

impl ContentFetcher {
    pub fn new(identity: &Identity, ip_pool: &[String]) -> Result<Self, FetcherBuildError> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in &identity.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetcherBuildError::Identity(format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetcherBuildError::Identity(format!("{name}: {e}")))?;
            default_headers.insert(name, value);
        }

        let build = |local: Option<IpAddr>| -> Result<reqwest::Client, reqwest::Error> {
            let mut builder = reqwest::Client::builder()
                .user_agent(identity.user_agent.clone())
                .default_headers(default_headers.clone())
                .cookie_store(true)
                .timeout(FETCH_TIMEOUT);
            if let Some(addr) = local {
                builder = builder.local_address(addr);
            }
            builder.build()
        };

        let mut clients = Vec::new();
        for raw in ip_pool {
            let addr: IpAddr = raw
                .parse()
                .map_err(|_| FetcherBuildError::Address(raw.clone()))?;
            clients.push(build(Some(addr))?);
        }
        if clients.is_empty() {
            clients.push(build(None)?);
        }

        Ok(Self { clients })
    }

    /// Pick a client uniformly at random. Nanosecond-clock indexing avoids a
    /// dedicated RNG dependency for a pool that is typically 1-4 entries.
    fn client(&self) -> &reqwest::Client {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as usize)
            .unwrap_or(0);
        &self.clients[nanos % self.clients.len()]
    }

    /// Plain GET of a URL.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        self.fetch_with(url, FetchOptions::default()).await
    }

    /// Fetch with options (POST body, etc.).
    pub async fn fetch_with(&self, url: &str, options: FetchOptions) -> FetchOutcome {
        let client = self.client();
        let request = match &options.post_body {
            Some(body) => client.post(url).body(body.clone()),
            None => client.get(url),
        };

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Fetch failed below HTTP layer");
                return FetchOutcome::failure(STATUS_NETWORK_FAILURE);
            }
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match read_limited_bytes(response, MAX_BODY_SIZE).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Failed to read response body");
                return FetchOutcome::failure(STATUS_NETWORK_FAILURE);
            }
        };

        FetchOutcome {
            status,
            body,
            content_type,
        }
    }

    /// Stream a URL directly to a file, returning the HTTP status.
    ///
    /// The file is written incrementally; on any failure the partial file is
    /// removed so callers can treat "file absent" as the single failure
    /// signal.
    pub async fn fetch_to_file(&self, url: &str, path: &Path) -> u16 {
        let response = match self.client().get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Fetch-to-file failed below HTTP layer");
                return STATUS_NETWORK_FAILURE;
            }
        };

        let status = response.status().as_u16();
        if status != 200 {
            return status;
        }

        let mut file = match tokio::fs::File::create(path).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to create download file");
                return STATUS_NETWORK_FAILURE;
            }
        };

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Download stream interrupted");
                    drop(file);
                    let _ = tokio::fs::remove_file(path).await;
                    return STATUS_NETWORK_FAILURE;
                }
            };
            written = written.saturating_add(chunk.len() as u64);
            if written > MAX_DOWNLOAD_SIZE {
                tracing::warn!(url = %url, "Download exceeds size cap, aborting");
                drop(file);
                let _ = tokio::fs::remove_file(path).await;
                return STATUS_NETWORK_FAILURE;
            }
            if let Err(e) = tokio::io::AsyncWriteExt::write_all(&mut file, &chunk).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write download chunk");
                drop(file);
                let _ = tokio::fs::remove_file(path).await;
                return STATUS_NETWORK_FAILURE;
            }
        }

        if let Err(e) = tokio::io::AsyncWriteExt::flush(&mut file).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to flush download file");
            let _ = tokio::fs::remove_file(path).await;
            return STATUS_NETWORK_FAILURE;
        }

        status
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, String> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(format!("response exceeds {limit} bytes"));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(format!("response exceeds {limit} bytes"));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
