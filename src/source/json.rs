use super::{Downtime, SourceError, TagMap, TagSource};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk layout read by [`JsonFileSource`]
///
/// ```json
/// {
///   "tags": { "role:web": ["web-01", "web-02"], "monitored": ["web-01"] },
///   "downtimes": [ { "active": true, "scope": ["host:web-02"] } ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceDump {
    #[serde(default)]
    pub tags: TagMap,
    #[serde(default)]
    pub downtimes: Vec<Downtime>,
}

/// Tag source reading a [`SourceDump`] from a JSON file on every fetch
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    name: String,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("json")
            .to_string();
        Self { path, name }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<SourceDump, SourceError> {
        let content = fs::read_to_string(&self.path)?;
        let dump: SourceDump = serde_json::from_str(&content)?;
        if dump.tags.keys().any(String::is_empty) {
            return Err(SourceError::InvalidData(format!(
                "empty tag key in {}",
                self.path.display()
            )));
        }
        log::debug!(
            "loaded {} tags and {} downtimes from {}",
            dump.tags.len(),
            dump.downtimes.len(),
            self.path.display()
        );
        Ok(dump)
    }
}

impl TagSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_all_tags(&self) -> Result<TagMap, SourceError> {
        Ok(self.load()?.tags)
    }

    fn get_all_downtimes(&self) -> Result<Vec<Downtime>, SourceError> {
        Ok(self.load()?.downtimes)
    }
}
