use super::{Downtime, SourceError, TagMap, TagSource};

/// Tag source backed by in-memory data
///
/// # Examples
/// ```
/// use hostq::source::{MemorySource, TagSource};
///
/// let source = MemorySource::new("static")
///     .with_tag("role:web", ["web-01", "web-02"])
///     .with_tag("env:prod", ["web-01"]);
/// assert_eq!(source.get_all_tags().unwrap().len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    tags: TagMap,
    downtimes: Vec<Downtime>,
}

impl MemorySource {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Attach `tag` to each of `hosts`
    #[must_use]
    pub fn with_tag<I, S>(mut self, tag: &str, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(tag.to_string())
            .or_default()
            .extend(hosts.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_downtime(mut self, downtime: Downtime) -> Self {
        self.downtimes.push(downtime);
        self
    }
}

impl TagSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_all_tags(&self) -> Result<TagMap, SourceError> {
        Ok(self.tags.clone())
    }

    fn get_all_downtimes(&self) -> Result<Vec<Downtime>, SourceError> {
        Ok(self.downtimes.clone())
    }
}
