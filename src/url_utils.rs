//! URL utilities for consistent crawling behavior across modules.

use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Fixed-width identity of a normalized URL, used as the durable store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UrlHash([u8; 32]);

impl UrlHash {
    /// Hash an already-normalized URL.
    pub fn of(normalized_url: &str) -> Self {
        let digest = Sha256::digest(normalized_url.as_bytes());
        Self(digest.into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for UrlHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Canonical form used for frontier identity.
///
/// Parsing case-folds scheme and host, resolves `.`/`..` segments and drops
/// default ports; the fragment is stripped on top of that.
pub fn normalize(url: &str) -> Result<String, url::ParseError> {
    let mut parsed = Url::parse(url.trim())?;
    parsed.set_fragment(None);
    Ok(parsed.into())
}

/// Normalize and hash in one step.
pub fn normalize_and_hash(url: &str) -> Result<(String, UrlHash), url::ParseError> {
    let normalized = normalize(url)?;
    let hash = UrlHash::of(&normalized);
    Ok((normalized, hash))
}

/// Strip the fragment without any other canonicalization; unparseable input is cut at '#'.
pub fn defragment(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => url.split('#').next().unwrap_or(url).to_string(),
    }
}

pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_string()))
}

pub fn convert_to_absolute_url(link: &str, base_url: &Url) -> Result<String, String> {
    let mut absolute_url = base_url.join(link).map_err(|e| e.to_string())?;
    absolute_url.set_fragment(None);
    Ok(absolute_url.to_string())
}

/// Add https:// prefix for bare domains (CLI convenience).
pub fn normalize_url_for_cli(url: &str) -> String {
    let trimmed = url.trim();

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.to_string();
    }

    format!("https://{}", trimmed)
}
