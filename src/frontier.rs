use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::config::CrawlConfig;
use crate::scope::ScopePolicy;
use crate::state::{CompletionOutcome, CrawlerState, StateError, UrlRecord};
use crate::url_utils;

/// In-memory half of the frontier; rebuilt from the store on resume.
#[derive(Debug, Default)]
struct ReadyQueue {
    /// URLs waiting to be downloaded (popped LIFO; order is not a contract)
    pending: Vec<String>,
    /// Live `InFlight` leases
    in_flight: usize,
}

/// A URL handed out by `Frontier::next`.
///
/// The frontier counts it as in flight until the lease is dropped, including
/// when the worker holding it unwinds.
#[derive(Debug)]
pub struct InFlight {
    url: String,
    queue: Arc<Mutex<ReadyQueue>>,
}

impl InFlight {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut queue = self.queue.lock();
        queue.in_flight = queue.in_flight.saturating_sub(1);
    }
}

/// Persistent crawl frontier: the durable "ever discovered" map plus a ready-queue.
///
/// redb admits one write transaction at a time, which makes check-and-insert
/// atomic. A URL is pushed only after its insert commits, and the queue lock
/// is never held across a commit.
pub struct Frontier {
    state: CrawlerState,
    queue: Arc<Mutex<ReadyQueue>>,
}

impl Frontier {
    /// Open or recreate the store and rebuild the ready-queue.
    ///
    /// Store failures here are fatal: without the durable map the crawl has no ground truth.
    #[tracing::instrument(skip(config, policy), fields(save_file = %config.save_file.display()))]
    pub fn initialize(
        config: &CrawlConfig,
        policy: &ScopePolicy,
        restart: bool,
    ) -> Result<Self, StateError> {
        let save_file = &config.save_file;
        let exists = save_file.exists();

        if !exists && !restart {
            tracing::info!(
                "Did not find save file {}, starting from seed.",
                save_file.display()
            );
        } else if exists && restart {
            tracing::info!("Found save file {}, deleting it.", save_file.display());
            CrawlerState::destroy(save_file)?;
        }

        let frontier = Self {
            state: CrawlerState::open(save_file)?,
            queue: Arc::new(Mutex::new(ReadyQueue::default())),
        };

        if restart {
            frontier.add_seeds(&config.seed_urls)?;
        } else {
            let total = frontier.rebuild_queue(policy)?;
            if total == 0 {
                frontier.add_seeds(&config.seed_urls)?;
            }
        }

        Ok(frontier)
    }

    fn add_seeds(&self, seeds: &[String]) -> Result<(), StateError> {
        let mut added = 0;
        for seed in seeds {
            if self.add(seed)? {
                added += 1;
            }
        }
        tracing::info!("Queued {} seed urls", added);
        Ok(())
    }

    /// Re-enqueue every incomplete record that the current policy still accepts.
    /// Returns the total number of records in the store.
    fn rebuild_queue(&self, policy: &ScopePolicy) -> Result<usize, StateError> {
        let mut total = 0;
        let mut pending = Vec::new();
        let mut pruned = 0;

        self.state.for_each_record(|record| {
            total += 1;
            if !record.completed {
                if policy.is_valid(&record.url) {
                    pending.push(record.url);
                } else {
                    pruned += 1;
                }
            }
            Ok(())
        })?;

        let tbd_count = pending.len();
        self.queue.lock().pending.extend(pending);

        tracing::info!(
            "Found {} urls to be downloaded from {} total urls discovered.",
            tbd_count,
            total
        );
        if pruned > 0 {
            tracing::info!("Skipped {} pending urls no longer allowed by policy", pruned);
        }

        Ok(total)
    }

    /// Take one URL off the ready-queue, or None once it is drained.
    ///
    /// The URL stays in flight until the returned lease is dropped.
    pub fn next(&self) -> Option<InFlight> {
        let mut queue = self.queue.lock();
        let url = queue.pending.pop()?;
        queue.in_flight += 1;
        Some(InFlight {
            url,
            queue: Arc::clone(&self.queue),
        })
    }

    /// Register a URL. Returns true if it was new and is now queued.
    ///
    /// Already-discovered URLs (complete or not) are a no-op, so each normalized
    /// URL is queued at most once per store lifetime.
    pub fn add(&self, url: &str) -> Result<bool, StateError> {
        let (normalized, hash) = match url_utils::normalize_and_hash(url) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Ignoring unparseable url {}: {}", url, e);
                return Ok(false);
            }
        };

        let record = UrlRecord::new(normalized.clone());
        if !self.state.insert_if_absent(&hash, &record)? {
            return Ok(false);
        }
        self.queue.lock().pending.push(normalized);
        Ok(true)
    }

    /// Mark a URL as productively processed. Durable before returning.
    pub fn complete(&self, url: &str) -> Result<(), StateError> {
        let (normalized, hash) = match url_utils::normalize_and_hash(url) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!("Completed url {} cannot be parsed: {}", url, e);
                return Ok(());
            }
        };

        match self.state.mark_completed(&hash)? {
            CompletionOutcome::Completed | CompletionOutcome::AlreadyCompleted => {}
            CompletionOutcome::Missing => {
                tracing::error!(
                    "Completed url {} (hash {}), but have not seen it before.",
                    normalized,
                    hash
                );
            }
        }
        Ok(())
    }

    /// Nothing queued and nothing in flight: no worker can produce more work.
    pub fn is_exhausted(&self) -> bool {
        let queue = self.queue.lock();
        queue.pending.is_empty() && queue.in_flight == 0
    }

    pub fn pending_len(&self) -> usize {
        self.queue.lock().pending.len()
    }

    pub fn state(&self) -> &CrawlerState {
        &self.state
    }

    pub fn stats(&self) -> Result<FrontierStats, StateError> {
        let counts = self.state.counts()?;
        let queue = self.queue.lock();
        Ok(FrontierStats {
            discovered: counts.total,
            completed: counts.completed,
            pending: queue.pending.len(),
            in_flight: queue.in_flight,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontierStats {
    pub discovered: usize,
    pub completed: usize,
    pub pending: usize,
    pub in_flight: usize,
}

impl fmt::Display for FrontierStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frontier: {} discovered, {} completed, {} pending, {} in flight",
            self.discovered, self.completed, self.pending, self.in_flight
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url_utils::UrlHash;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn config(dir: &TempDir, seeds: &[&str]) -> CrawlConfig {
        CrawlConfig {
            seed_urls: seeds.iter().map(|s| s.to_string()).collect(),
            save_file: dir.path().join("frontier.redb"),
            ..Default::default()
        }
    }

    fn drain(frontier: &Frontier) -> HashSet<String> {
        let mut urls = HashSet::new();
        while let Some(lease) = frontier.next() {
            urls.insert(lease.url().to_string());
        }
        urls
    }

    #[test]
    fn test_fresh_start_queues_seeds() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["https://a.ics.uci.edu", "https://b.ics.uci.edu/#top"]);
        let frontier = Frontier::initialize(&cfg, &ScopePolicy::default(), false).unwrap();

        let urls = drain(&frontier);
        assert_eq!(
            urls,
            HashSet::from([
                "https://a.ics.uci.edu/".to_string(),
                "https://b.ics.uci.edu/".to_string(),
            ])
        );
        assert!(frontier.next().is_none());
    }

    #[test]
    fn test_idempotent_discovery() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["https://a.ics.uci.edu/"]);
        let frontier = Frontier::initialize(&cfg, &ScopePolicy::default(), true).unwrap();
        drain(&frontier);

        assert!(frontier.add("https://a.ics.uci.edu/page").unwrap());
        assert!(!frontier.add("https://a.ics.uci.edu/page").unwrap());
        assert!(!frontier.add("https://a.ics.uci.edu/page#frag").unwrap());

        assert_eq!(frontier.pending_len(), 1);
        assert_eq!(frontier.stats().unwrap().discovered, 2);
    }

    #[test]
    fn test_add_completed_url_is_noop() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["https://a.ics.uci.edu/"]);
        let frontier = Frontier::initialize(&cfg, &ScopePolicy::default(), true).unwrap();

        let lease = frontier.next().unwrap();
        frontier.complete(lease.url()).unwrap();
        let url = lease.url().to_string();
        drop(lease);

        assert!(!frontier.add(&url).unwrap());
        assert!(frontier.next().is_none());
    }

    #[test]
    fn test_completion_monotonicity() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["https://a.ics.uci.edu/"]);
        let frontier = Frontier::initialize(&cfg, &ScopePolicy::default(), true).unwrap();
        let lease = frontier.next().unwrap();

        frontier.complete(lease.url()).unwrap();
        frontier.complete(lease.url()).unwrap();

        let record = frontier.state().get(&UrlHash::of(lease.url())).unwrap().unwrap();
        assert!(record.completed);
    }

    #[test]
    fn test_complete_unknown_url_does_not_fail() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["https://a.ics.uci.edu/"]);
        let frontier = Frontier::initialize(&cfg, &ScopePolicy::default(), true).unwrap();

        assert!(frontier.complete("https://unknown.ics.uci.edu/").is_ok());
        assert!(frontier.complete("not a url").is_ok());
        assert!(
            !frontier
                .state()
                .contains(&UrlHash::of("https://unknown.ics.uci.edu/"))
                .unwrap()
        );
    }

    #[test]
    fn test_resumability() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["https://a.ics.uci.edu/"]);

        {
            let frontier = Frontier::initialize(&cfg, &ScopePolicy::default(), true).unwrap();
            frontier.add("https://b.ics.uci.edu/").unwrap();
            frontier.add("https://c.ics.uci.edu/").unwrap();
            frontier.complete("https://a.ics.uci.edu/").unwrap();
        }

        let frontier = Frontier::initialize(&cfg, &ScopePolicy::default(), false).unwrap();
        let urls = drain(&frontier);
        assert_eq!(
            urls,
            HashSet::from([
                "https://b.ics.uci.edu/".to_string(),
                "https://c.ics.uci.edu/".to_string(),
            ])
        );
    }

    #[test]
    fn test_resume_prunes_urls_outside_policy() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["https://a.ics.uci.edu/"]);

        {
            let frontier = Frontier::initialize(&cfg, &ScopePolicy::default(), true).unwrap();
            frontier.add("https://a.ics.uci.edu/private/page").unwrap();
        }

        let strict = ScopePolicy {
            blacklisted_path_prefixes: vec!["/private".to_string()],
            ..Default::default()
        };
        let frontier = Frontier::initialize(&cfg, &strict, false).unwrap();
        assert_eq!(
            drain(&frontier),
            HashSet::from(["https://a.ics.uci.edu/".to_string()])
        );
        // The pruned record is still known, so it is never re-queued
        assert!(!frontier.add("https://a.ics.uci.edu/private/page").unwrap());
    }

    #[test]
    fn test_restart_discards_store() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["https://a.ics.uci.edu/"]);

        {
            let frontier = Frontier::initialize(&cfg, &ScopePolicy::default(), true).unwrap();
            frontier.add("https://b.ics.uci.edu/").unwrap();
            frontier.complete("https://a.ics.uci.edu/").unwrap();
        }

        let frontier = Frontier::initialize(&cfg, &ScopePolicy::default(), true).unwrap();
        let stats = frontier.stats().unwrap();
        assert_eq!(stats.discovered, 1);
        assert_eq!(stats.completed, 0);
        assert_eq!(
            drain(&frontier),
            HashSet::from(["https://a.ics.uci.edu/".to_string()])
        );
    }

    #[test]
    fn test_exhaustion_tracks_in_flight() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["https://a.ics.uci.edu/"]);
        let frontier = Frontier::initialize(&cfg, &ScopePolicy::default(), true).unwrap();

        assert!(!frontier.is_exhausted());
        let lease = frontier.next().unwrap();
        assert!(frontier.next().is_none());
        assert!(!frontier.is_exhausted());
        assert_eq!(frontier.stats().unwrap().in_flight, 1);

        drop(lease);
        assert!(frontier.is_exhausted());
    }

    #[test]
    fn test_lease_released_when_holder_panics() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["https://a.ics.uci.edu/"]);
        let frontier =
            std::sync::Arc::new(Frontier::initialize(&cfg, &ScopePolicy::default(), true).unwrap());

        let worker = {
            let frontier = std::sync::Arc::clone(&frontier);
            std::thread::spawn(move || {
                let lease = frontier.next().unwrap();
                panic!("page handler crashed on {}", lease.url());
            })
        };
        assert!(worker.join().is_err());

        assert!(frontier.is_exhausted());
        assert_eq!(frontier.stats().unwrap().in_flight, 0);
    }

    #[test]
    fn test_corrupt_store_is_fatal() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["https://a.ics.uci.edu/"]);
        std::fs::write(&cfg.save_file, b"this is not a redb database file").unwrap();

        let result = Frontier::initialize(&cfg, &ScopePolicy::default(), false);
        assert!(matches!(result, Err(StateError::RedbCreate(_))));
    }

    #[test]
    fn test_concurrent_adds_queue_once() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["https://a.ics.uci.edu/"]);
        let frontier =
            std::sync::Arc::new(Frontier::initialize(&cfg, &ScopePolicy::default(), true).unwrap());
        drain(&frontier);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let frontier = std::sync::Arc::clone(&frontier);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        frontier
                            .add(&format!("https://a.ics.uci.edu/p{}", i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(drain(&frontier).len(), 10);
    }
}
