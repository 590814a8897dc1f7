use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::task::JoinSet;
use tokio::time::{Duration, sleep};
use tracing::Instrument;
use url::Url;

use crate::config::{Config, CrawlConfig};
use crate::dedup::NearDuplicateDetector;
use crate::frontier::Frontier;
use crate::network::{Downloader, Response};
use crate::parser;
use crate::scope::ScopePolicy;
use crate::state::StateError;
use crate::stats::{CrawlReport, StatsAggregator};
use crate::url_utils;

/// Why a fetched page was dropped without being processed. Discarded URLs
/// stay incomplete in the frontier and are not retried in the same run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscardReason {
    #[error("download failed: {0}")]
    FetchFailed(String),

    #[error("status {0}")]
    BadStatus(u16),

    #[error("missing or empty content")]
    EmptyBody,

    #[error("unwanted content type {0}")]
    ContentType(String),

    #[error("invalid Content-Length value {0:?}")]
    InvalidContentLength(String),

    #[error("too large: {0} bytes (max: {1} bytes)")]
    TooLarge(usize, usize),

    #[error("unwanted file extension")]
    Extension,

    #[error("near-duplicate content")]
    NearDuplicate,
}

/// What happened to one dequeued URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Processed { new_links: usize },
    Discarded(DiscardReason),
}

#[derive(Debug, Default)]
struct PoolCounters {
    processed: AtomicUsize,
    discarded: AtomicUsize,
    failed_writes: AtomicUsize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub processed: usize,
    pub discarded: usize,
    /// Pages whose frontier update failed in the store
    pub failed_writes: usize,
    pub duration_secs: u64,
    /// Set when the report file was written successfully
    pub report_file: Option<PathBuf>,
    pub report: CrawlReport,
}

/// Fixed pool of workers sharing one frontier, detector and stats aggregator.
///
/// Cheap to clone: every field is shared.
#[derive(Clone)]
pub struct WorkerPool {
    config: Arc<CrawlConfig>,
    policy: Arc<ScopePolicy>,
    frontier: Arc<Frontier>,
    detector: Arc<NearDuplicateDetector>,
    stats: Arc<StatsAggregator>,
    downloader: Arc<dyn Downloader>,
    running: Arc<AtomicBool>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    pub fn new(config: CrawlConfig, frontier: Arc<Frontier>, downloader: Arc<dyn Downloader>) -> Self {
        let policy = config.policy.clone().compiled();
        let detector = NearDuplicateDetector::new(config.similarity_threshold);
        let stats = StatsAggregator::new(config.subdomain_suffix.clone(), config.top_words);

        Self {
            config: Arc::new(config),
            policy: Arc::new(policy),
            frontier,
            detector: Arc::new(detector),
            stats: Arc::new(stats),
            downloader,
            running: Arc::new(AtomicBool::new(true)),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn detector(&self) -> &NearDuplicateDetector {
        &self.detector
    }

    /// Ask every worker to finish its current URL and exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run all workers to completion, then write the report once.
    pub async fn run(&self) -> CrawlSummary {
        let start = Instant::now();
        tracing::info!(
            "Starting {} workers ({})",
            self.config.workers,
            self.frontier
                .stats()
                .map(|s| s.to_string())
                .unwrap_or_else(|e| format!("frontier stats unavailable: {}", e))
        );

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let pool = self.clone();
            let span = tracing::info_span!("worker", worker = id);
            workers.spawn(async move { pool.worker_loop().await }.instrument(span));
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        let report = self.stats.report();
        let report_file = match report.write_to(&self.config.report_file) {
            Ok(()) => {
                tracing::info!("Report written to {}", self.config.report_file.display());
                Some(self.config.report_file.clone())
            }
            Err(e) => {
                tracing::error!(
                    "Error writing report to {}: {}",
                    self.config.report_file.display(),
                    e
                );
                None
            }
        };

        CrawlSummary {
            processed: self.counters.processed.load(Ordering::SeqCst),
            discarded: self.counters.discarded.load(Ordering::SeqCst),
            failed_writes: self.counters.failed_writes.load(Ordering::SeqCst),
            duration_secs: start.elapsed().as_secs(),
            report_file,
            report,
        }
    }

    async fn worker_loop(&self) {
        let delay = self.config.politeness_delay();

        loop {
            if !self.is_running() {
                tracing::info!("Stop requested. Stopping worker.");
                break;
            }

            let Some(lease) = self.frontier.next() else {
                if self.frontier.is_exhausted() {
                    tracing::info!("Frontier is empty. Stopping worker.");
                    break;
                }
                // Others are still in flight and may enqueue more
                sleep(Duration::from_millis(Config::IDLE_POLL_MS)).await;
                continue;
            };

            let url = lease.url().to_string();
            let response = match AssertUnwindSafe(self.downloader.download(&url))
                .catch_unwind()
                .await
            {
                Ok(response) => response,
                Err(_) => {
                    tracing::error!("Downloader panicked on {}", url);
                    Response::failed(&url, "downloader panicked")
                }
            };

            // Parsing and store commits block; keep them off the runtime threads.
            // The lease moves into the task so it is released even if handling panics.
            let pool = self.clone();
            let page = tokio::task::spawn_blocking(move || pool.handle(lease.url(), &response));
            if let Err(e) = page.await {
                tracing::error!("Handling {} failed: {}", url, e);
            }

            if !delay.is_zero() {
                sleep(delay).await;
            }
        }
    }

    fn handle(&self, url: &str, response: &Response) {
        match self.process(url, response) {
            Ok(PageOutcome::Processed { new_links }) => {
                let processed = self.counters.processed.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!(
                    "Downloaded {}, status <{}>, using cache {}, {} new links",
                    url,
                    response.status,
                    self.config.cache_server.as_deref().unwrap_or("none"),
                    new_links
                );
                if processed % Config::PROGRESS_INTERVAL == 0 {
                    match self.frontier.stats() {
                        Ok(stats) => tracing::info!("Progress: {} processed | {}", processed, stats),
                        Err(e) => tracing::warn!("Progress: {} processed | stats unavailable: {}", processed, e),
                    }
                }
            }
            Ok(PageOutcome::Discarded(reason)) => {
                self.counters.discarded.fetch_add(1, Ordering::SeqCst);
                match &reason {
                    DiscardReason::FetchFailed(_) | DiscardReason::BadStatus(_) => {
                        tracing::warn!("Skipping {}: {}", url, reason)
                    }
                    _ => tracing::info!("Skipping {}: {}", url, reason),
                }
            }
            Err(e) => {
                self.counters.failed_writes.fetch_add(1, Ordering::SeqCst);
                tracing::error!("Frontier update failed for {}: {}", url, e);
            }
        }
    }

    /// Filter, account for, and scrape one downloaded page.
    ///
    /// Discards return before anything is recorded. Only store failures are errors.
    pub fn process(&self, url: &str, response: &Response) -> Result<PageOutcome, StateError> {
        if let Err(reason) = self.filter_response(url, response) {
            return Ok(PageOutcome::Discarded(reason));
        }

        let body = response.text().unwrap_or_default();
        let base = Url::parse(&response.url).or_else(|_| Url::parse(url));
        let page = match base {
            Ok(base) => parser::parse_page(&base, &body),
            Err(e) => {
                tracing::warn!("Cannot resolve links for {}: {}", url, e);
                parser::ParsedPage {
                    links: Vec::new(),
                    tokens: parser::tokenize(&body),
                }
            }
        };

        if self.detector.is_duplicate(&page.tokens) {
            return Ok(PageOutcome::Discarded(DiscardReason::NearDuplicate));
        }

        self.stats.record_page(url, &page.tokens);
        if let Some(host) = url_utils::extract_host(url) {
            self.stats.record_subdomain_page(&host, url);
        }

        let mut new_links = 0;
        for link in &page.links {
            match self.policy.check(link) {
                Ok(()) => {
                    if self.frontier.add(link)? {
                        new_links += 1;
                    }
                }
                Err(rejection) => tracing::debug!("Rejected link {}: {:?}", link, rejection),
            }
        }

        self.frontier.complete(url)?;
        Ok(PageOutcome::Processed { new_links })
    }

    /// Response checks in order; the near-duplicate check needs the parsed page and runs later.
    fn filter_response(&self, url: &str, response: &Response) -> Result<(), DiscardReason> {
        if let Some(error) = &response.error
            && response.status == 0
        {
            return Err(DiscardReason::FetchFailed(error.clone()));
        }
        if !response.is_success() {
            return Err(DiscardReason::BadStatus(response.status));
        }
        match &response.raw_content {
            Some(body) if !body.is_empty() => {}
            _ => {
                // The downloader skips the body of an over-cap page; report the size, not emptiness
                self.check_content_length(response)?;
                return Err(DiscardReason::EmptyBody);
            }
        }

        if let Some(content_type) = response.content_type()
            && self.policy.is_disallowed_content_type(content_type)
        {
            return Err(DiscardReason::ContentType(content_type.to_string()));
        }

        self.check_content_length(response)?;

        let path = Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        if self.policy.has_disallowed_extension(&path) {
            return Err(DiscardReason::Extension);
        }

        Ok(())
    }

    /// A Content-Length must be plain ASCII digits within the cap. A blank header counts as absent.
    fn check_content_length(&self, response: &Response) -> Result<(), DiscardReason> {
        let Some(length) = response
            .header("content-length")
            .map(str::trim)
            .filter(|v| !v.is_empty())
        else {
            return Ok(());
        };

        if !length.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DiscardReason::InvalidContentLength(length.to_string()));
        }
        // All digits, so a parse failure is an overflow
        let declared = length.parse::<usize>().unwrap_or(usize::MAX);
        if declared > self.config.max_content_length {
            return Err(DiscardReason::TooLarge(declared, self.config.max_content_length));
        }
        Ok(())
    }
}
