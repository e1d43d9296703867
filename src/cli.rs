//! Command-line interface definitions and parsing
//!
//! This module defines the CLI structure for hostq using the `clap` crate.
//!
//! # Commands
//!
//! - **search**: Evaluate a query and print the matching hosts (default)
//! - **update**: Rebuild the cache from the tag source
//! - **parse**: Show how a query is parsed and optimized
//! - **config**: Read and change configuration settings
//!
//! Global flags override the configuration file for one invocation.
//!
//! # Examples
//!
//! ```
//! use hostq::cli::{Cli, Commands};
//! use clap::Parser;
//!
//! let cli = Cli::parse_from(["hostq", "search", "role:web and env:prod", "-a", "zone"]);
//! assert!(matches!(cli.command, Commands::Search { .. }));
//! ```

use crate::config::{HostqConfig, OutputFormat};
use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set {
        /// Configuration key=value (e.g., offline=true)
        #[arg(value_name = "KEY=VALUE")]
        setting: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key to retrieve (e.g., expiry_secs)
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// Print the configuration file location
    Path,
}

/// Main CLI structure for parsing command-line arguments
#[derive(Parser, Debug)]
#[command(name = "hostq")]
#[command(about = "Select hosts with a tag query over a cached tag index", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file to use instead of the default one
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Cache file (overrides config)
    #[arg(long = "cache", value_name = "PATH", global = true)]
    pub cache: Option<PathBuf>,

    /// JSON tag source file (overrides config)
    #[arg(long = "source", value_name = "PATH", global = true)]
    pub source: Option<PathBuf>,

    /// Seconds a cache generation stays fresh (overrides config)
    #[arg(long = "expiry", value_name = "SECS", global = true)]
    pub expiry: Option<u64>,

    /// Never rebuild the cache
    #[arg(long = "offline", global = true, conflicts_with = "force")]
    pub offline: bool,

    /// Rebuild the cache before running
    #[arg(long = "force", global = true)]
    pub force: bool,

    /// Match literals exactly, without glob fallbacks
    #[arg(short = 'F', long = "fixed-string", global = true)]
    pub fixed_string: bool,

    /// Suppress informational output (only print results)
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    /// Log more; repeat for debug output
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Evaluate a query and print the matching hosts
    #[command(visible_alias = "s")]
    Search {
        /// Query text, e.g. `role:web and not env:dev`
        #[arg(value_name = "QUERY")]
        query: String,

        /// Fields to print per host (tag names or `@host`; repeatable)
        #[arg(short = 'a', long = "attr", value_name = "FIELD")]
        fields: Vec<String>,

        /// Output format (overrides config)
        #[arg(short = 'f', long = "format", value_enum)]
        format: Option<OutputFormat>,

        /// Print the field names first
        #[arg(long = "header")]
        header: bool,

        /// Print only the number of matching hosts
        #[arg(short = 'c', long = "count", conflicts_with_all = ["fields", "format", "header"])]
        count: bool,
    },

    /// Rebuild the cache from the tag source
    #[command(visible_alias = "u")]
    Update,

    /// Show how a query is parsed and optimized
    Parse {
        /// Query text
        #[arg(value_name = "QUERY")]
        query: String,

        /// Show the optimized tree instead of the built one
        #[arg(short = 'o', long = "optimize")]
        optimize: bool,

        /// Print the tree structure as JSON
        #[arg(long = "json")]
        json: bool,
    },

    /// Manage configuration settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

impl Cli {
    /// Parse command-line arguments
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Apply the global flags on top of `config`
    pub fn apply(&self, config: &mut HostqConfig) {
        if let Some(cache) = &self.cache {
            config.cache_path = Some(cache.clone());
        }
        if let Some(source) = &self.source {
            config.source_file = Some(source.clone());
        }
        if let Some(expiry) = self.expiry {
            config.expiry_secs = expiry;
        }
        config.offline |= self.offline;
        config.fixed_string |= self.fixed_string;
        config.quiet |= self.quiet;
    }

    /// Log filter for `env_logger`; `RUST_LOG` still takes precedence
    #[must_use]
    pub const fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 if self.quiet => LevelFilter::Error,
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_with_fields() {
        let cli = Cli::parse_from(["hostq", "search", "role:web", "-a", "@host", "-a", "zone", "-f", "csv"]);
        let Commands::Search { query, fields, format, header, count } = cli.command else {
            panic!("Expected Search command");
        };
        assert_eq!(query, "role:web");
        assert_eq!(fields, vec!["@host".to_string(), "zone".to_string()]);
        assert_eq!(format, Some(OutputFormat::Csv));
        assert!(!header && !count);
    }

    #[test]
    fn test_search_alias() {
        let cli = Cli::parse_from(["hostq", "s", "*"]);
        assert!(matches!(cli.command, Commands::Search { .. }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["hostq", "search", "x", "--offline", "-F", "--cache", "/tmp/c.db", "-vv"]);
        assert!(cli.offline && cli.fixed_string);
        assert_eq!(cli.cache, Some(PathBuf::from("/tmp/c.db")));
        assert_eq!(cli.log_level(), LevelFilter::Debug);
    }

    #[test]
    fn test_offline_conflicts_with_force() {
        assert!(Cli::try_parse_from(["hostq", "update", "--offline", "--force"]).is_err());
    }

    #[test]
    fn test_count_conflicts_with_fields() {
        assert!(Cli::try_parse_from(["hostq", "search", "x", "-c", "-a", "zone"]).is_err());
    }

    #[test]
    fn test_apply_overrides_config() {
        let cli = Cli::parse_from(["hostq", "update", "--source", "tags.json", "--expiry", "0", "-q"]);
        let mut config = HostqConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.source_file, Some(PathBuf::from("tags.json")));
        assert_eq!(config.expiry_secs, 0);
        assert!(config.quiet);
        assert!(!config.offline);
        assert_eq!(cli.log_level(), LevelFilter::Error);
    }

    #[test]
    fn test_parse_config_commands() {
        let cli = Cli::parse_from(["hostq", "config", "set", "offline=true"]);
        let Commands::Config { command: ConfigCommands::Set { setting } } = cli.command else {
            panic!("Expected config set");
        };
        assert_eq!(setting, "offline=true");
        assert!(matches!(
            Cli::parse_from(["hostq", "config", "path"]).command,
            Commands::Config { command: ConfigCommands::Path }
        ));
    }
}
