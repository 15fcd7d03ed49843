//! Identifier-based deduplication for occurrence records.

use std::collections::HashSet;

/// Tracks occurrence keys already observed during one run.
///
/// A single instance is scoped to one fetch (or one filter pass); call
/// [`Deduplicator::reset`] before reusing it for an independent run.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    seen: HashSet<u64>,
}

impl Deduplicator {
    /// Create an empty deduplicator
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` was already marked as seen
    pub fn seen(&self, key: u64) -> bool {
        self.seen.contains(&key)
    }

    /// Mark `key` as seen
    pub fn mark_seen(&mut self, key: u64) {
        self.seen.insert(key);
    }

    /// Mark `key` as seen, returning `true` if it was new
    pub fn check_and_mark(&mut self, key: u64) -> bool {
        self.seen.insert(key)
    }

    /// Forget every key
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    /// Number of unique keys seen
    pub fn unique_count(&self) -> usize {
        self.seen.len()
    }
}
