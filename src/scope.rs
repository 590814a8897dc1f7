//! Crawl scope and trap avoidance.
//!
//! A single rule table decides whether a URL may enter the frontier:
//! - scheme and host sanity
//! - allowed-domain patterns
//! - blacklisted paths (known infinite-generation paths)
//! - disallowed file extensions
//! - length/depth limits and repetition heuristics
//! - calendar traps (date stamps in queries, date-shaped path runs)

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

lazy_static! {
    static ref DATE_STAMP: Regex = Regex::new(r"\d{4}-\d{2}-\d{2}").expect("static regex");
}

/// One entry of the allowed-domain list, parsed from its string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainPattern {
    /// `*.ics.uci.edu`: the suffix host itself or any subdomain of it
    Suffix(String),
    /// `today.uci.edu/department/x`: exact host, path prefix
    HostPath { host: String, path_prefix: String },
    /// `example.edu`: exact host
    Exact(String),
}

impl DomainPattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();
        if let Some(suffix) = pattern.strip_prefix("*.") {
            return DomainPattern::Suffix(suffix.to_string());
        }
        if let Some(suffix) = pattern.strip_prefix('.') {
            return DomainPattern::Suffix(suffix.to_string());
        }
        match pattern.split_once('/') {
            Some((host, path)) => DomainPattern::HostPath {
                host: host.to_string(),
                path_prefix: format!("/{}", path.trim_start_matches('/')),
            },
            None => DomainPattern::Exact(pattern),
        }
    }

    pub fn matches(&self, host: &str, path: &str) -> bool {
        match self {
            DomainPattern::Suffix(suffix) => {
                host == suffix
                    || (host.len() > suffix.len()
                        && host.ends_with(suffix.as_str())
                        && host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
            }
            DomainPattern::HostPath { host: h, path_prefix } => {
                host == h && path.starts_with(path_prefix.as_str())
            }
            DomainPattern::Exact(h) => host == h,
        }
    }
}

/// Why a URL was kept out of the frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Unparseable,
    Scheme,
    MissingHost,
    OutOfScope,
    BlacklistedPath,
    DisallowedExtension,
    TooLong,
    TooDeep,
    RepetitivePath,
    CalendarTrap,
}

/// Tunable allow/deny rules. Read-only once the crawl starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopePolicy {
    pub allowed_domains: Vec<String>,
    pub blacklisted_path_prefixes: Vec<String>,
    pub blacklisted_paths: Vec<String>,
    pub disallowed_extensions: Vec<String>,
    /// Exact media types, or `type/` prefixes
    pub disallowed_content_types: Vec<String>,
    pub max_path_segments: usize,
    pub max_url_length: usize,
    /// 0 disables the check
    pub max_repeated_segments: usize,
    /// Consecutive numeric path segments treated as a calendar; 0 disables
    pub max_numeric_run: usize,
    #[serde(skip)]
    pub(crate) patterns: Vec<DomainPattern>,
}

const DEFAULT_EXTENSIONS: &[&str] = &[
    "css", "js", "bmp", "gif", "jpg", "jpeg", "ico", "png", "tif", "tiff", "mid", "mp2", "mp3",
    "mp4", "wav", "avi", "mov", "mpeg", "ram", "m4v", "mkv", "ogg", "ogv", "pdf", "ps", "eps",
    "tex", "ppt", "pptx", "doc", "docx", "xls", "xlsx", "names", "data", "dat", "exe", "bz2",
    "tar", "msi", "bin", "7z", "psd", "dmg", "iso", "epub", "dll", "cnf", "tgz", "sha1", "thmx",
    "mso", "arff", "rtf", "jar", "csv", "rm", "smil", "wmv", "swf", "wma", "zip", "rar", "gz",
    "svg", "apk", "odc", "sql", "war", "img", "bam", "ppsx", "pps", "mat", "lif", "nb",
];

impl Default for ScopePolicy {
    fn default() -> Self {
        Self {
            allowed_domains: vec![
                "*.ics.uci.edu".to_string(),
                "*.cs.uci.edu".to_string(),
                "*.informatics.uci.edu".to_string(),
                "*.stat.uci.edu".to_string(),
                "today.uci.edu/department/information_computer_sciences".to_string(),
            ],
            blacklisted_path_prefixes: vec![
                "/~eppstein/pix".to_string(),
                "/doku.php".to_string(),
                "/ml/datasets".to_string(),
                "/calendar".to_string(),
                "/events/".to_string(),
                "/wp-json".to_string(),
                "/wp-login.php".to_string(),
                "/login".to_string(),
                "/logout".to_string(),
            ],
            blacklisted_paths: vec!["/events".to_string(), "/search".to_string()],
            disallowed_extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            disallowed_content_types: vec![
                "image/".to_string(),
                "video/".to_string(),
                "audio/".to_string(),
                "font/".to_string(),
                "application/zip".to_string(),
                "application/pdf".to_string(),
                "application/octet-stream".to_string(),
                "application/x-tar".to_string(),
                "application/gzip".to_string(),
                "application/x-gzip".to_string(),
                "application/vnd.ms-powerpoint".to_string(),
                "application/msword".to_string(),
            ],
            max_path_segments: 20,
            max_url_length: 2048,
            max_repeated_segments: 3,
            max_numeric_run: 3,
            patterns: Vec::new(),
        }
    }
}

impl ScopePolicy {
    /// Pre-parse the domain patterns so `check` doesn't redo it per URL.
    pub fn compiled(mut self) -> Self {
        self.patterns = self
            .allowed_domains
            .iter()
            .map(|p| DomainPattern::parse(p))
            .collect();
        self
    }

    pub fn is_valid(&self, url: &str) -> bool {
        self.check(url).is_ok()
    }

    /// Run the validation pipeline, stopping at the first failed rule.
    pub fn check(&self, url: &str) -> Result<(), Rejection> {
        let parsed = Url::parse(url).map_err(|_| Rejection::Unparseable)?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Rejection::Scheme);
        }

        let host = match parsed.host_str() {
            Some(h) if !h.is_empty() => h.to_ascii_lowercase(),
            _ => return Err(Rejection::MissingHost),
        };

        let path = parsed.path();
        if !self.in_scope(&host, path) {
            return Err(Rejection::OutOfScope);
        }

        if self.is_blacklisted_path(path) {
            return Err(Rejection::BlacklistedPath);
        }

        if self.has_disallowed_extension(path) {
            return Err(Rejection::DisallowedExtension);
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() > self.max_path_segments {
            return Err(Rejection::TooDeep);
        }
        if url.len() > self.max_url_length {
            return Err(Rejection::TooLong);
        }
        if has_repetitive_pattern(&segments, self.max_repeated_segments) {
            return Err(Rejection::RepetitivePath);
        }

        if let Some(query) = parsed.query()
            && DATE_STAMP.is_match(query)
        {
            return Err(Rejection::CalendarTrap);
        }
        if has_numeric_run(&segments, self.max_numeric_run) {
            return Err(Rejection::CalendarTrap);
        }

        Ok(())
    }

    pub fn in_scope(&self, host: &str, path: &str) -> bool {
        // Config-loaded policies that were never compiled parse on the fly
        if self.patterns.is_empty() {
            return self
                .allowed_domains
                .iter()
                .any(|p| DomainPattern::parse(p).matches(host, path));
        }
        self.patterns.iter().any(|pattern| pattern.matches(host, path))
    }

    fn is_blacklisted_path(&self, path: &str) -> bool {
        let path = path.to_ascii_lowercase();
        self.blacklisted_paths
            .iter()
            .any(|p| path == p.to_ascii_lowercase())
            || self
                .blacklisted_path_prefixes
                .iter()
                .any(|p| path.starts_with(&p.to_ascii_lowercase()))
    }

    pub fn has_disallowed_extension(&self, path: &str) -> bool {
        let last_segment = path.rsplit('/').next().unwrap_or_default();
        match last_segment.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.disallowed_extensions
                    .iter()
                    .any(|d| d.trim_start_matches('.').eq_ignore_ascii_case(&ext))
            }
            _ => false,
        }
    }

    /// Match a Content-Type header value (parameters ignored) against the deny list.
    pub fn is_disallowed_content_type(&self, content_type: &str) -> bool {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if media_type.is_empty() {
            return false;
        }
        self.disallowed_content_types.iter().any(|rule| {
            let rule = rule.to_ascii_lowercase();
            if rule.ends_with('/') {
                media_type.starts_with(&rule)
            } else {
                media_type == rule
            }
        })
    }
}

fn has_repetitive_pattern(segments: &[&str], max_repeats: usize) -> bool {
    if max_repeats == 0 || segments.len() < 4 {
        return false;
    }

    for window_size in 1..=segments.len() / 2 {
        let mut repeat_count = 0;
        for i in 0..segments.len().saturating_sub(window_size) {
            if segments[i] == segments[i + window_size] {
                repeat_count += 1;
                if repeat_count >= max_repeats {
                    return true;
                }
            }
        }
    }

    false
}

// Matches /2024/01/15-style runs
fn has_numeric_run(segments: &[&str], max_run: usize) -> bool {
    if max_run == 0 {
        return false;
    }
    let mut run = 0;
    for segment in segments {
        if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
            run += 1;
            if run >= max_run {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}
