//! Near-duplicate page detection.
//!
//! Pages are fingerprinted with a 64-bit SimHash over word 3-gram shingles.
//! A page is a near-duplicate when its fingerprint lies within the configured
//! Hamming distance of any page seen earlier in this run.

use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

/// SimHash for content similarity detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimHash(pub u64);

impl SimHash {
    /// Fingerprint an already tokenized page.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
        let words: Vec<&str> = tokens.iter().map(|t| t.as_ref()).collect();
        if words.len() < 3 {
            return Self(compute_simhash(words.iter().copied()));
        }
        let features: Vec<String> = words.windows(3).map(|w| w.join(" ")).collect();
        Self(compute_simhash(features.iter().map(|s| s.as_str())))
    }

    /// Fingerprint raw text split on whitespace.
    pub fn compute(text: &str) -> Self {
        let words: Vec<&str> = text.split_whitespace().collect();
        Self::from_tokens(&words)
    }

    pub fn hamming_distance(&self, other: &SimHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// Classic SimHash: every feature votes +1/-1 on each bit of its hash.
fn compute_simhash<'a>(features: impl Iterator<Item = &'a str>) -> u64 {
    let mut weights = [0i32; 64];
    let mut any = false;

    for feature in features {
        any = true;
        let hash = xxh3_64(feature.as_bytes());
        for (bit, weight) in weights.iter_mut().enumerate() {
            if hash & (1 << bit) != 0 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }

    if !any {
        return 0;
    }

    weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1 << bit))
}

/// Fingerprints of every unique page seen so far, shared by all workers.
///
/// Check-and-insert happens under one lock so two workers can never both
/// admit copies of the same page.
pub struct NearDuplicateDetector {
    fingerprints: Mutex<Vec<SimHash>>,
    threshold: u32,
}

impl NearDuplicateDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            fingerprints: Mutex::new(Vec::new()),
            threshold,
        }
    }

    /// True if the page is within `threshold` bits of a page already seen.
    /// Otherwise its fingerprint is recorded and false is returned.
    ///
    /// A page without text has nothing to compare and is never a duplicate.
    pub fn is_duplicate<S: AsRef<str>>(&self, tokens: &[S]) -> bool {
        if tokens.is_empty() {
            return false;
        }
        self.check_fingerprint(SimHash::from_tokens(tokens))
    }

    pub fn check_fingerprint(&self, fingerprint: SimHash) -> bool {
        let mut seen = self.fingerprints.lock();
        if self.any_within(&seen, fingerprint) {
            return true;
        }
        seen.push(fingerprint);
        false
    }

    /// Read-only probe: would this fingerprint be flagged right now?
    pub fn matches_existing(&self, fingerprint: SimHash) -> bool {
        let seen = self.fingerprints.lock();
        self.any_within(&seen, fingerprint)
    }

    // Linear scan; fine for tens of thousands of pages
    fn any_within(&self, seen: &[SimHash], fingerprint: SimHash) -> bool {
        seen.iter()
            .any(|prior| prior.hamming_distance(&fingerprint) < self.threshold)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.fingerprints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace().map(|s| s.to_string()).collect()
    }

    const PAGE: &str = "the quick brown fox jumps over the lazy dog while the \
        farmer watches from the porch and drinks his morning coffee slowly \
        before walking down to the barn to feed the animals and fix the fence";

    #[test]
    fn test_identical_text_same_hash() {
        assert_eq!(SimHash::compute(PAGE), SimHash::compute(PAGE));
        assert_eq!(SimHash::compute(PAGE), SimHash::from_tokens(&words(PAGE)));
    }

    #[test]
    fn test_small_edit_small_distance() {
        let edited = PAGE.replace("coffee", "tea");
        let unrelated = "students enrolled in the graduate program must submit \
            their thesis proposal to the committee by the end of the second year";

        let base = SimHash::compute(PAGE);
        let near = base.hamming_distance(&SimHash::compute(&edited));
        let far = base.hamming_distance(&SimHash::compute(unrelated));
        assert!(near < far, "near={} far={}", near, far);
    }

    #[test]
    fn test_order_sensitive() {
        let reversed: Vec<&str> = PAGE.split_whitespace().rev().collect();
        assert_ne!(
            SimHash::compute(PAGE),
            SimHash::compute(&reversed.join(" "))
        );
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(SimHash(0).hamming_distance(&SimHash(0)), 0);
        assert_eq!(SimHash(0b1011).hamming_distance(&SimHash(0)), 3);
        assert_eq!(SimHash(u64::MAX).hamming_distance(&SimHash(0)), 64);
    }

    #[test]
    fn test_threshold_is_strict() {
        let detector = NearDuplicateDetector::new(3);
        assert!(!detector.check_fingerprint(SimHash(0)));
        // distance 2 < 3: duplicate
        assert!(detector.check_fingerprint(SimHash(0b11)));
        // distance 3 is not below the threshold
        assert!(!detector.check_fingerprint(SimHash(0b111 << 8)));
        assert_eq!(detector.len(), 2);

        assert!(detector.matches_existing(SimHash(0b1)));
        assert!(!detector.matches_existing(SimHash(u64::MAX)));
        assert_eq!(detector.len(), 2);
    }

    #[test]
    fn test_no_self_duplicate() {
        let detector = NearDuplicateDetector::new(4);
        assert!(!detector.is_duplicate(&words(PAGE)));
        assert!(detector.is_duplicate(&words(PAGE)));
        // Duplicates are not added to the set
        assert_eq!(detector.len(), 1);
    }

    #[test]
    fn test_textless_pages_are_never_duplicates() {
        let detector = NearDuplicateDetector::new(4);
        let empty: Vec<String> = Vec::new();
        assert!(!detector.is_duplicate(&empty));
        assert!(!detector.is_duplicate(&empty));
        assert!(detector.is_empty());

        // An empty page does not shadow a later page with text either
        assert!(!detector.is_duplicate(&words("a b")));
    }

    #[test]
    fn test_zero_threshold_never_flags() {
        let detector = NearDuplicateDetector::new(0);
        assert!(!detector.is_duplicate(&words(PAGE)));
        assert!(!detector.is_duplicate(&words(PAGE)));
        assert_eq!(detector.len(), 2);
    }

    #[test]
    fn test_concurrent_checks_admit_one_copy() {
        let detector = Arc::new(NearDuplicateDetector::new(4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let detector = Arc::clone(&detector);
                std::thread::spawn(move || detector.is_duplicate(&words(PAGE)))
            })
            .collect();

        let unique = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|dup| !dup)
            .count();
        assert_eq!(unique, 1);
        assert_eq!(detector.len(), 1);
    }
}
