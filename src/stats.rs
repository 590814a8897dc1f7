//! Corpus statistics gathered while crawling, and the end-of-crawl report.

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "aren't", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can't", "cannot", "could", "couldn't", "did", "didn't", "do", "does", "doesn't",
    "doing", "don't", "down", "during", "each", "few", "for", "from", "further", "had", "hadn't",
    "has", "hasn't", "have", "haven't", "having", "he", "he'd", "he'll", "he's", "her", "here",
    "here's", "hers", "herself", "him", "himself", "his", "how", "how's", "i", "i'd", "i'll",
    "i'm", "i've", "if", "in", "into", "is", "isn't", "it", "it's", "its", "itself", "let's", "me",
    "more", "most", "mustn't", "my", "myself", "no", "nor", "not", "of", "off", "on", "once",
    "only", "or", "other", "ought", "our", "ours", "ourselves", "out", "over", "own", "same",
    "shan't", "she", "she'd", "she'll", "she's", "should", "shouldn't", "so", "some", "such",
    "than", "that", "that's", "the", "their", "theirs", "them", "themselves", "then", "there",
    "there's", "these", "they", "they'd", "they'll", "they're", "they've", "this", "those",
    "through", "to", "too", "under", "until", "up", "very", "was", "wasn't", "we", "we'd",
    "we'll", "we're", "we've", "were", "weren't", "what", "what's", "when", "when's", "where",
    "where's", "which", "while", "who", "who's", "whom", "why", "why's", "with", "won't", "would",
    "wouldn't", "you", "you'd", "you'll", "you're", "you've", "your", "yours", "yourself",
    "yourselves",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LongestPage {
    pub url: String,
    pub word_count: usize,
}

/// Thread-safe accumulator shared by every worker.
///
/// Word counts and the subdomain index are sharded maps; the longest-page
/// record is a compare-and-replace under its own lock.
pub struct StatsAggregator {
    word_counts: DashMap<String, u64>,
    unique_pages: DashSet<String>,
    subdomains: DashMap<String, HashSet<String>>,
    longest: Mutex<LongestPage>,
    stop_words: HashSet<&'static str>,
    subdomain_suffix: String,
    top_n: usize,
}

impl StatsAggregator {
    pub fn new(subdomain_suffix: impl Into<String>, top_n: usize) -> Self {
        Self {
            word_counts: DashMap::new(),
            unique_pages: DashSet::new(),
            subdomains: DashMap::new(),
            longest: Mutex::new(LongestPage::default()),
            stop_words: STOP_WORDS.iter().copied().collect(),
            subdomain_suffix: subdomain_suffix.into().to_ascii_lowercase(),
            top_n,
        }
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(word)
    }

    /// Count a processed page's words and offer it as the longest page.
    ///
    /// Length is measured over all tokens; frequencies skip stop words.
    pub fn record_page<S: AsRef<str>>(&self, url: &str, tokens: &[S]) {
        self.unique_pages.insert(url.to_string());

        for token in tokens {
            let word = token.as_ref();
            if self.is_stop_word(word) {
                continue;
            }
            *self.word_counts.entry(word.to_string()).or_insert(0) += 1;
        }

        let mut longest = self.longest.lock();
        if tokens.len() > longest.word_count {
            *longest = LongestPage {
                url: url.to_string(),
                word_count: tokens.len(),
            };
        }
    }

    /// Add a page to its host's entry in the subdomain index.
    /// Hosts outside the tracked suffix are ignored.
    pub fn record_subdomain_page(&self, host: &str, url: &str) {
        let host = host.to_ascii_lowercase();
        if !self.tracks_host(&host) {
            return;
        }
        self.subdomains
            .entry(host)
            .or_default()
            .insert(crate::url_utils::defragment(url));
    }

    fn tracks_host(&self, host: &str) -> bool {
        let suffix = &self.subdomain_suffix;
        let bare = suffix.trim_start_matches('.');
        if suffix.starts_with('.') {
            host == bare || host.ends_with(suffix.as_str())
        } else {
            host == bare
        }
    }

    pub fn unique_page_count(&self) -> usize {
        self.unique_pages.len()
    }

    pub fn word_count(&self, word: &str) -> u64 {
        self.word_counts.get(word).map(|c| *c).unwrap_or(0)
    }

    pub fn subdomain_pages(&self, host: &str) -> Option<HashSet<String>> {
        self.subdomains.get(host).map(|pages| pages.clone())
    }

    /// Snapshot the counters into a report.
    pub fn report(&self) -> CrawlReport {
        let mut top_words: Vec<(String, u64)> = self
            .word_counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        top_words.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_words.truncate(self.top_n);

        let subdomains: BTreeMap<String, usize> = self
            .subdomains
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect();

        CrawlReport {
            unique_pages: self.unique_pages.len(),
            longest_page: self.longest.lock().clone(),
            top_words,
            subdomains,
        }
    }
}

/// Immutable end-of-crawl summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub unique_pages: usize,
    pub longest_page: LongestPage,
    /// Descending count, ties broken by word
    pub top_words: Vec<(String, u64)>,
    /// Host -> unique page count, sorted by host
    pub subdomains: BTreeMap<String, usize>,
}

impl CrawlReport {
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_string())
    }
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of unique pages: {}", self.unique_pages)?;
        writeln!(
            f,
            "Longest page: {}, word count: {}",
            self.longest_page.url, self.longest_page.word_count
        )?;
        writeln!(f)?;
        writeln!(f, "{} most common words:", self.top_words.len())?;
        for (word, count) in &self.top_words {
            writeln!(f, "{}: {}", word, count)?;
        }
        writeln!(f)?;
        writeln!(f, "Number of subdomains: {}", self.subdomains.len())?;
        for (host, count) in &self.subdomains {
            writeln!(f, "{}: {}", host, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn tokens(text: &str) -> Vec<String> {
        text.split_whitespace().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_stop_words_excluded_from_counts() {
        let stats = StatsAggregator::new(".ics.uci.edu", 50);
        stats.record_page("https://a.ics.uci.edu/", &tokens("the crawler and the index"));

        assert_eq!(stats.word_count("the"), 0);
        assert_eq!(stats.word_count("and"), 0);
        assert_eq!(stats.word_count("crawler"), 1);
        assert_eq!(stats.word_count("index"), 1);
    }

    #[test]
    fn test_longest_page_counts_all_tokens() {
        let stats = StatsAggregator::new(".ics.uci.edu", 50);
        stats.record_page("https://a.ics.uci.edu/short", &tokens("one two"));
        stats.record_page("https://a.ics.uci.edu/long", &tokens("the a an of it"));
        stats.record_page("https://a.ics.uci.edu/tie", &tokens("x y z w v"));

        let report = stats.report();
        assert_eq!(report.longest_page.url, "https://a.ics.uci.edu/long");
        assert_eq!(report.longest_page.word_count, 5);
        assert_eq!(report.unique_pages, 3);
    }

    #[test]
    fn test_top_words_deterministic_tie_break() {
        let stats = StatsAggregator::new(".ics.uci.edu", 3);
        stats.record_page("u1", &tokens("zeta alpha beta beta gamma gamma delta"));

        let report = stats.report();
        assert_eq!(
            report.top_words,
            vec![
                ("beta".to_string(), 2),
                ("gamma".to_string(), 2),
                ("alpha".to_string(), 1),
            ]
        );
        assert_eq!(report, stats.report());
    }

    #[test]
    fn test_subdomain_index() {
        let stats = StatsAggregator::new(".ics.uci.edu", 50);
        stats.record_subdomain_page("vision.ics.uci.edu", "https://vision.ics.uci.edu/a#x");
        stats.record_subdomain_page("vision.ics.uci.edu", "https://vision.ics.uci.edu/a");
        stats.record_subdomain_page("Vision.ICS.uci.edu", "https://vision.ics.uci.edu/b");
        stats.record_subdomain_page("ics.uci.edu", "https://ics.uci.edu/");
        stats.record_subdomain_page("www.cs.uci.edu", "https://www.cs.uci.edu/");
        stats.record_subdomain_page("physics.uci.edu", "https://physics.uci.edu/");

        let report = stats.report();
        let hosts: Vec<_> = report.subdomains.iter().map(|(h, c)| (h.as_str(), *c)).collect();
        assert_eq!(hosts, vec![("ics.uci.edu", 1), ("vision.ics.uci.edu", 2)]);
    }

    #[test]
    fn test_report_format() {
        let stats = StatsAggregator::new(".ics.uci.edu", 50);
        stats.record_page("https://a.ics.uci.edu/", &tokens("informatics research research"));
        stats.record_subdomain_page("a.ics.uci.edu", "https://a.ics.uci.edu/");

        let text = stats.report().to_string();
        assert!(text.starts_with("Number of unique pages: 1\n"));
        assert!(text.contains("Longest page: https://a.ics.uci.edu/, word count: 3\n"));
        assert!(text.contains("research: 2\ninformatics: 1\n"));
        assert!(text.contains("Number of subdomains: 1\na.ics.uci.edu: 1\n"));
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let stats = Arc::new(StatsAggregator::new(".ics.uci.edu", 50));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        stats.record_page(&format!("u{}-{}", i, j), &tokens("crawler"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.word_count("crawler"), 800);
        assert_eq!(stats.unique_page_count(), 800);
    }

    #[test]
    fn test_write_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("report.txt");
        let stats = StatsAggregator::new(".ics.uci.edu", 50);
        stats.record_page("https://a.ics.uci.edu/", &tokens("hello"));

        stats.report().write_to(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, stats.report().to_string());
    }
}
