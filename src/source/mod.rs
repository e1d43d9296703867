//! Tag source providers
//!
//! A tag source supplies the ground truth the local tag index is rebuilt
//! from: every `name:value` tag with the hosts carrying it, and the list of
//! scheduled downtimes. Sources are only consulted during a rebuild.
//!
//! # Implementations
//!
//! - [`MemorySource`]: in-memory data, handy for tests and embedding
//! - [`JsonFileSource`]: reads a JSON dump of tags and downtimes from disk

mod json;
mod memory;

pub mod error;

pub use error::SourceError;
pub use json::{JsonFileSource, SourceDump};
pub use memory::MemorySource;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mapping from a `name:value` tag (or a bare `name`) to the host names carrying it
pub type TagMap = HashMap<String, Vec<String>>;

/// Pull-based provider of hosts, tags and downtimes
pub trait TagSource {
    /// Name recorded as the `@source` virtual tag of every host this source populates
    fn name(&self) -> &str;

    /// Fetch every tag with the hosts carrying it
    ///
    /// # Errors
    /// Returns `SourceError` on transport or decoding failures.
    fn get_all_tags(&self) -> Result<TagMap, SourceError>;

    /// Fetch every scheduled downtime
    ///
    /// # Errors
    /// Returns `SourceError` on transport or decoding failures.
    fn get_all_downtimes(&self) -> Result<Vec<Downtime>, SourceError>;
}

/// A scheduled downtime as reported by a tag source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downtime {
    #[serde(default)]
    pub active: bool,
    /// Start time in epoch seconds
    #[serde(default)]
    pub start: Option<i64>,
    /// End time in epoch seconds, `None` for open-ended downtimes
    #[serde(default)]
    pub end: Option<i64>,
    /// Scopes like `host:web-01`; only host scopes are honoured
    #[serde(default)]
    pub scope: Vec<String>,
}

impl Downtime {
    /// Whether the downtime is in effect at `now` (epoch seconds)
    #[must_use]
    pub fn is_active_at(&self, now: i64) -> bool {
        self.active
            && self.start.is_none_or(|start| start <= now)
            && self.end.is_none_or(|end| now < end)
    }

    /// Host names covered by this downtime's `host:` scopes
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.scope.iter().filter_map(|scope| scope.strip_prefix("host:"))
    }
}

/// Split a tag key into its name and value; a bare name has an empty value
#[must_use]
pub fn split_tag(tag: &str) -> (&str, &str) {
    tag.split_once(':').unwrap_or((tag, ""))
}
