use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

use crate::config::{Config, CrawlConfig};

/// Outcome of one download. Failures are values, never errors: transport
/// problems come back as `status == 0` with `error` set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Final URL after redirects (or the requested URL on failure)
    pub url: String,
    pub status: u16,
    pub raw_content: Option<Vec<u8>>,
    /// Header names are lower-cased
    pub headers: HashMap<String, String>,
    pub error: Option<String>,
}

impl Response {
    pub fn failed(url: &str, error: impl ToString) -> Self {
        Self {
            url: url.to_string(),
            status: 0,
            raw_content: None,
            headers: HashMap::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Body decoded lossily as UTF-8.
    pub fn text(&self) -> Option<String> {
        self.raw_content
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// The download collaborator. Implementations must absorb their own failures
/// into the returned `Response`.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str) -> Response;
}

/// reqwest-backed downloader, optionally routed through a caching proxy.
#[derive(Debug)]
pub struct HttpDownloader {
    client: reqwest::Client,
    timeout_duration: Duration,
    user_agent: String,
    cache_server: Option<Url>,
    max_content_size: usize,
}

impl HttpDownloader {
    pub fn new(config: &CrawlConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(Config::CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(Config::POOL_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(Config::MAX_REDIRECTS))
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

        let cache_server = match &config.cache_server {
            Some(cache) => Some(
                Url::parse(cache).map_err(|e| FetchError::ClientBuild(format!(
                    "invalid cache server '{}': {}",
                    cache, e
                )))?,
            ),
            None => None,
        };

        Ok(Self {
            client,
            timeout_duration: Duration::from_secs(config.timeout_secs),
            user_agent: config.user_agent.clone(),
            cache_server,
            max_content_size: config.max_content_length,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Where the request actually goes: the page itself, or the cache asked for it.
    pub fn request_url(&self, url: &str) -> String {
        match &self.cache_server {
            Some(cache) => {
                let mut proxied = cache.clone();
                proxied
                    .query_pairs_mut()
                    .append_pair("q", url)
                    .append_pair("u", &self.user_agent);
                proxied.to_string()
            }
            None => url.to_string(),
        }
    }

    /// Fetch with linear backoff on transient errors: 0ms, 500ms, 1000ms.
    pub async fn fetch(&self, url: &str) -> Result<Response, FetchError> {
        let mut last_error = None;

        for attempt in 0..=Config::MAX_RETRIES {
            if attempt > 0 {
                let backoff_ms = Config::RETRY_BACKOFF_MS * attempt as u64;
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }

            match self.fetch_once(url).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < Config::MAX_RETRIES => {
                    tracing::debug!("Retrying {} after attempt {}: {}", url, attempt + 1, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(FetchError::NetworkError("Max retries exceeded".to_string())))
    }

    async fn fetch_once(&self, url: &str) -> Result<Response, FetchError> {
        let target = self.request_url(url);
        let response = timeout(
            self.timeout_duration,
            self.client
                .get(&target)
                .header(
                    "Accept",
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                )
                .header("Accept-Language", "en-US,en;q=0.5")
                .send(),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(Self::classify_error)?;

        let status = response.status().as_u16();
        let final_url = if self.cache_server.is_some() {
            url.to_string()
        } else {
            response.url().to_string()
        };
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        // Declared too large: keep the headers so the caller can see why, skip the body
        if let Some(length) = headers
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
            && length > self.max_content_size
        {
            return Ok(Response {
                url: final_url,
                status,
                raw_content: None,
                headers,
                error: Some(FetchError::ContentTooLarge(length, self.max_content_size).to_string()),
            });
        }

        let body = timeout(self.timeout_duration, self.read_capped(response))
            .await
            .map_err(|_| FetchError::Timeout)??;

        Ok(Response {
            url: final_url,
            status,
            raw_content: Some(body),
            headers,
            error: None,
        })
    }

    /// Stream the body, giving up as soon as it passes the size cap.
    async fn read_capped(&self, response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::BodyError(e.to_string()))?;
            if body.len() + chunk.len() > self.max_content_size {
                return Err(FetchError::ContentTooLarge(
                    body.len() + chunk.len(),
                    self.max_content_size,
                ));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }

    /// Classify reqwest errors into our FetchError types
    fn classify_error(error: reqwest::Error) -> FetchError {
        let error_msg = error.to_string().to_lowercase();

        if error_msg.contains("connection refused") {
            return FetchError::ConnectionRefused;
        }
        if error_msg.contains("dns") || error_msg.contains("name resolution") {
            return FetchError::DnsError;
        }
        if error_msg.contains("ssl") || error_msg.contains("tls") || error_msg.contains("certificate") {
            return FetchError::SslError;
        }
        if error.is_timeout() {
            return FetchError::Timeout;
        }

        FetchError::NetworkError(error.to_string())
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str) -> Response {
        match self.fetch(url).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Download failed for {}: {}", url, e);
                Response::failed(url, e)
            }
        }
    }
}

/// Errors that can occur during HTTP fetching
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection refused - server not accepting connections")]
    ConnectionRefused,

    #[error("DNS resolution failed")]
    DnsError,

    #[error("SSL/TLS error - certificate or encryption issue")]
    SslError,

    #[error("Request timeout")]
    Timeout,

    #[error("Failed to read response body: {0}")]
    BodyError(String),

    #[error("Content too large: {0} bytes (max: {1} bytes)")]
    ContentTooLarge(usize, usize),
}

impl FetchError {
    /// Check if this error is retryable (transient) or permanent
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::NetworkError(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("broken pipe")
                    || msg_lower.contains("connection reset")
                    || msg_lower.contains("temporary")
            }
            FetchError::ClientBuild(_)
            | FetchError::ConnectionRefused
            | FetchError::DnsError
            | FetchError::SslError
            | FetchError::BodyError(_)
            | FetchError::ContentTooLarge(_, _) => false,
        }
    }
}
