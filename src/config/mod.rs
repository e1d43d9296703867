//! Configuration module for hostq
//!
//! Manages the cache location, tag source, freshness and query defaults.
//! Configuration is read from `config.toml` in the user's config directory
//! and layered with `HOSTQ_*` environment variables; command-line flags
//! override both.

use crate::db::{IndexOptions, MAX_TERMS, RetryPolicy};
use crate::query::{DEFAULT_ITERATIONS, QueryOptions};
use clap::ValueEnum;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Keys accepted by [`HostqConfig::get`] and [`HostqConfig::set`]
pub const KEYS: [&str; 10] = [
    "cache_path",
    "source_file",
    "expiry_secs",
    "offline",
    "fixed_string",
    "max_terms",
    "optimize_iterations",
    "busy_retries",
    "format",
    "quiet",
];

/// Result output format
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Space separated fields, one host per line
    #[default]
    Plain,
    /// Comma separated values
    Csv,
    /// Tab separated values
    Tsv,
    /// One JSON array of objects
    Json,
}

impl OutputFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Json => "json",
        }
    }
}

/// Application configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HostqConfig {
    /// Cache file; defaults to `hostq/cache.db` in the user's cache directory
    pub cache_path: Option<PathBuf>,

    /// JSON dump the cache is rebuilt from
    pub source_file: Option<PathBuf>,

    /// Seconds a cache generation stays fresh
    pub expiry_secs: u64,

    /// Never rebuild the cache
    pub offline: bool,

    /// Match literals exactly, without glob fallbacks
    pub fixed_string: bool,

    /// Most values bound by one SQL statement
    pub max_terms: usize,

    /// Bound of optimizer passes
    pub optimize_iterations: usize,

    /// Give up on a busy cache after this many attempts; unset retries forever
    pub busy_retries: Option<u32>,

    /// Default output format
    pub format: OutputFormat,

    /// Suppress informational output by default
    pub quiet: bool,
}

impl Default for HostqConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            source_file: None,
            expiry_secs: 3600,
            offline: false,
            fixed_string: false,
            max_terms: MAX_TERMS,
            optimize_iterations: DEFAULT_ITERATIONS,
            busy_retries: None,
            format: OutputFormat::Plain,
            quiet: false,
        }
    }
}

impl HostqConfig {
    /// Get the path to the config file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the system config directory cannot be determined.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfigError::Message("Could not determine config directory".to_string()))?;
        Ok(config_dir.join("hostq").join("config.toml"))
    }

    /// Load configuration from the default location
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, layered with `HOSTQ_*` environment variables
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix("HOSTQ").try_parsing(true))
            .build()?;
        settings.try_deserialize()
    }

    /// Save configuration to the default location
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the config directory cannot be determined or written.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path` as TOML
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the directory cannot be created, the configuration
    /// cannot be serialized to TOML, or the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Message(format!("Failed to create config directory: {e}")))?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Message(format!("Failed to serialize config: {e}")))?;

        fs::write(path, toml_string)
            .map_err(|e| ConfigError::Message(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// The configured cache file, or the default one
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if no path is configured and the system cache
    /// directory cannot be determined.
    pub fn cache_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.cache_path {
            return Ok(path.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| ConfigError::Message("Could not determine cache directory".to_string()))?;
        Ok(cache_dir.join("hostq").join("cache.db"))
    }

    #[must_use]
    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            expiry: Duration::from_secs(self.expiry_secs),
            offline: self.offline,
            max_terms: self.max_terms,
            retry: RetryPolicy { max_attempts: self.busy_retries, ..RetryPolicy::default() },
        }
    }

    #[must_use]
    pub const fn query_options(&self) -> QueryOptions {
        QueryOptions { fixed_string: self.fixed_string, optimize_iterations: self.optimize_iterations }
    }

    /// Render one setting as text; unset values are empty
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unknown keys.
    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        let path = |path: &Option<PathBuf>| path.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
        let value = match key {
            "cache_path" => path(&self.cache_path),
            "source_file" => path(&self.source_file),
            "expiry_secs" => self.expiry_secs.to_string(),
            "offline" => self.offline.to_string(),
            "fixed_string" => self.fixed_string.to_string(),
            "max_terms" => self.max_terms.to_string(),
            "optimize_iterations" => self.optimize_iterations.to_string(),
            "busy_retries" => self.busy_retries.map(|n| n.to_string()).unwrap_or_default(),
            "format" => self.format.as_str().to_string(),
            "quiet" => self.quiet.to_string(),
            _ => return Err(unknown_key(key)),
        };
        Ok(value)
    }

    /// Change one setting from text; an empty value unsets optional settings
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unknown keys and values that do not parse.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let optional_path = |value: &str| (!value.is_empty()).then(|| PathBuf::from(value));
        match key {
            "cache_path" => self.cache_path = optional_path(value),
            "source_file" => self.source_file = optional_path(value),
            "expiry_secs" => self.expiry_secs = parse(key, value)?,
            "offline" => self.offline = parse(key, value)?,
            "fixed_string" => self.fixed_string = parse(key, value)?,
            "max_terms" => self.max_terms = parse(key, value)?,
            "optimize_iterations" => self.optimize_iterations = parse(key, value)?,
            "busy_retries" => {
                self.busy_retries = if value.is_empty() { None } else { Some(parse(key, value)?) };
            }
            "format" => {
                self.format = OutputFormat::from_str(value, true)
                    .map_err(|_| ConfigError::Message(format!("Invalid value for format: '{value}'")))?;
            }
            "quiet" => self.quiet = parse(key, value)?,
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Message(format!("Invalid value for {key}: '{value}'")))
}

fn unknown_key(key: &str) -> ConfigError {
    ConfigError::Message(format!("Unknown configuration key: '{key}'. Available keys: {}", KEYS.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = HostqConfig::default();
        assert!(config.cache_path.is_none());
        assert_eq!(config.expiry_secs, 3600);
        assert_eq!(config.max_terms, 500);
        assert_eq!(config.format, OutputFormat::Plain);
        assert_eq!(config.index_options().retry.max_attempts, None);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = HostqConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.optimize_iterations, HostqConfig::default().optimize_iterations);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = HostqConfig::default();
        config.set("source_file", "/srv/tags.json").unwrap();
        config.set("expiry_secs", "60").unwrap();
        config.set("format", "JSON").unwrap();
        config.set("busy_retries", "5").unwrap();
        config.save_to(&path).unwrap();

        let loaded = HostqConfig::load_from(&path).unwrap();
        assert_eq!(loaded.source_file, Some(PathBuf::from("/srv/tags.json")));
        assert_eq!(loaded.expiry_secs, 60);
        assert_eq!(loaded.format, OutputFormat::Json);
        assert_eq!(loaded.index_options().retry.max_attempts, Some(5));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "offline = true\n").unwrap();

        let config = HostqConfig::load_from(&path).unwrap();
        assert!(config.offline);
        assert_eq!(config.max_terms, MAX_TERMS);
    }

    #[test]
    fn test_get_and_set() {
        let mut config = HostqConfig::default();
        config.set("fixed_string", "true").unwrap();
        assert_eq!(config.get("fixed_string").unwrap(), "true");
        assert!(config.query_options().fixed_string);

        config.set("cache_path", "/tmp/cache.db").unwrap();
        assert_eq!(config.cache_path().unwrap(), PathBuf::from("/tmp/cache.db"));
        config.set("cache_path", "").unwrap();
        assert!(config.cache_path.is_none());
        assert_eq!(config.get("busy_retries").unwrap(), "");
    }

    #[test]
    fn test_invalid_settings() {
        let mut config = HostqConfig::default();
        assert!(config.set("offline", "maybe").is_err());
        assert!(config.set("max_terms", "-1").is_err());
        assert!(config.set("format", "xml").is_err());
        assert!(config.set("colour", "on").is_err());
        assert!(config.get("colour").is_err());
    }

    #[test]
    fn test_every_key_is_readable() {
        let config = HostqConfig::default();
        for key in KEYS {
            assert!(config.get(key).is_ok(), "{key}");
        }
    }
}
