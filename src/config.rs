//! Crawl configuration: compile-time constants plus the TOML-loadable run config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::scope::ScopePolicy;

// Global configuration constants - single source of truth

pub struct Config;

impl Config {
    // HTTP/Network config
    pub const MAX_RETRIES: u32 = 2;
    pub const RETRY_BACKOFF_MS: u64 = 500;
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const POOL_IDLE_PER_HOST: usize = 16;
    pub const MAX_REDIRECTS: usize = 5;

    // Crawler timing
    pub const IDLE_POLL_MS: u64 = 100;
    pub const PROGRESS_INTERVAL: usize = 100;

    // Page limits
    pub const MAX_CONTENT_LENGTH: usize = 5 * 1024 * 1024; // 5 MiB
    pub const TOP_WORDS: usize = 50;
}

pub const DEFAULT_USER_AGENT: &str = "RustCrawler/1.0";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Everything a crawl run needs. Read-only once the crawl starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// URLs queued when starting from scratch
    pub seed_urls: Vec<String>,
    /// Number of concurrent worker loops
    pub workers: usize,
    /// Per-worker wait after every fetch (seconds)
    pub politeness_delay_secs: f64,
    /// Hamming distance below which two pages count as near-duplicates
    pub similarity_threshold: u32,
    /// Location of the durable frontier store
    pub save_file: PathBuf,
    /// Where the end-of-crawl report is written
    pub report_file: PathBuf,
    /// Discard the save file and start again from the seeds
    pub restart: bool,
    pub user_agent: String,
    /// Optional caching proxy that fetches on our behalf
    pub cache_server: Option<String>,
    pub timeout_secs: u64,
    /// Size ceiling applied to the Content-Length header and the streamed body
    pub max_content_length: usize,
    /// Hosts under this suffix are tracked in the subdomain index
    pub subdomain_suffix: String,
    pub top_words: usize,
    pub log_dir: PathBuf,
    pub policy: ScopePolicy,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            seed_urls: vec![
                "https://www.ics.uci.edu".to_string(),
                "https://www.cs.uci.edu".to_string(),
                "https://www.informatics.uci.edu".to_string(),
                "https://www.stat.uci.edu".to_string(),
            ],
            workers: 1,
            politeness_delay_secs: 0.5,
            similarity_threshold: 4,
            save_file: PathBuf::from("./data/frontier.redb"),
            report_file: PathBuf::from("./report.txt"),
            restart: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cache_server: None,
            timeout_secs: 20,
            max_content_length: Config::MAX_CONTENT_LENGTH,
            subdomain_suffix: ".ics.uci.edu".to_string(),
            top_words: Config::TOP_WORDS,
            log_dir: PathBuf::from("./logs"),
            policy: ScopePolicy::default(),
        }
    }
}

impl CrawlConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CrawlConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all fields, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.seed_urls.is_empty() {
            errors.push("seed_urls must not be empty".to_string());
        }
        for seed in &self.seed_urls {
            match Url::parse(seed) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(_) => errors.push(format!("seed '{}' must be http or https", seed)),
                Err(e) => errors.push(format!("seed '{}' is not a valid URL: {}", seed, e)),
            }
        }

        if self.workers == 0 {
            errors.push("workers must be positive".to_string());
        }
        if !self.politeness_delay_secs.is_finite() || self.politeness_delay_secs < 0.0 {
            errors.push("politeness_delay_secs must be a non-negative number".to_string());
        }
        if self.similarity_threshold > 64 {
            errors.push("similarity_threshold must be <= 64".to_string());
        }
        if self.max_content_length == 0 {
            errors.push("max_content_length must be positive".to_string());
        }
        if self.policy.allowed_domains.is_empty() {
            errors.push("policy.allowed_domains must not be empty".to_string());
        }
        if self.policy.max_path_segments == 0 {
            errors.push("policy.max_path_segments must be positive".to_string());
        }
        if let Some(cache) = &self.cache_server
            && Url::parse(cache).is_err()
        {
            errors.push(format!("cache_server '{}' is not a valid URL", cache));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn politeness_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.politeness_delay_secs.max(0.0))
    }
}
