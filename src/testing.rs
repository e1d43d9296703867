//! Testing utilities for hostq
//!
//! This module provides a `TestIndex` builder for in-memory tag indexes
//! populated from a `MemorySource`.
//!
//! Only available when compiled with `cfg(test)`.

use crate::db::{IndexOptions, TagIndex};
use crate::source::MemorySource;

/// Builder for a populated in-memory tag index
///
/// # Examples
/// ```ignore
/// let index = TestIndex::new()
///     .with_tag("role:web", &["web-01", "web-02"])
///     .build();
/// assert_eq!(index.count_hosts().unwrap(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct TestIndex {
    source: MemorySource,
    options: IndexOptions,
}

impl Default for TestIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TestIndex {
    #[must_use]
    pub fn new() -> Self {
        Self { source: MemorySource::new("test"), options: IndexOptions::default() }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: &str, hosts: &[&str]) -> Self {
        self.source = self.source.with_tag(tag, hosts.iter().copied());
        self
    }

    #[must_use]
    pub fn with_max_terms(mut self, max_terms: usize) -> Self {
        self.options.max_terms = max_terms;
        self
    }

    /// The source the index is built from
    #[must_use]
    pub const fn source(&self) -> &MemorySource {
        &self.source
    }

    /// Open an in-memory index and rebuild it from the source
    ///
    /// # Panics
    /// Panics if the index cannot be opened or rebuilt.
    #[must_use]
    pub fn build(&self) -> TagIndex {
        let mut index = TagIndex::open_in_memory(self.options.clone()).expect("Failed to open test index");
        index.rebuild(&self.source).expect("Failed to rebuild test index");
        index
    }
}

/// Host names of `ids`, in the same order
///
/// # Panics
/// Panics if the hosts cannot be read.
#[must_use]
pub fn names(index: &TagIndex, ids: &[i64]) -> Vec<String> {
    index
        .hosts(ids)
        .expect("Failed to read hosts")
        .into_iter()
        .map(|host| host.name)
        .collect()
}
