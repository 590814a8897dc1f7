pub mod cli;
pub mod config;
pub mod dedup;
pub mod frontier;
pub mod logging;
pub mod network;
pub mod parser;
pub mod scope;
pub mod state;
pub mod stats;
pub mod url_utils;
pub mod worker;

// Re-export main types for library usage
pub use config::{ConfigError, CrawlConfig};
pub use dedup::{NearDuplicateDetector, SimHash};
pub use frontier::{Frontier, FrontierStats, InFlight};
pub use network::{Downloader, FetchError, HttpDownloader, Response};
pub use parser::{ParsedPage, extract_links, parse_page};
pub use scope::{Rejection, ScopePolicy};
pub use state::{CrawlerState, StateError, UrlRecord};
pub use stats::{CrawlReport, StatsAggregator};
pub use worker::{CrawlSummary, DiscardReason, PageOutcome, WorkerPool};
