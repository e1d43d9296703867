//! hostq CLI application entry point
//!
//! Evaluates host selection queries against the local tag cache and prints
//! the matching hosts.
//!
//! # Usage
//!
//! ```bash
//! # Hosts with role web in production, one name per line
//! hostq search 'role:web and env:prod'
//!
//! # Project fields, as CSV with a header
//! hostq search 'ORDER_BY(role:db, zone)' -a @host -a zone -f csv --header
//!
//! # Rebuild the cache from a JSON tag dump
//! hostq --source tags.json update
//!
//! # Show the optimized query tree
//! hostq parse --optimize 'a:1 or a:2 or a:3'
//! ```
//!
//! # Configuration
//!
//! Settings are read from `~/.config/hostq/config.toml` on Linux and from
//! `HOSTQ_*` environment variables. `hostq config set key=value` edits the file.

use hostq::{
    HostqError,
    cli::{Cli, Commands, ConfigCommands},
    config::{HostqConfig, OutputFormat},
    db::TagIndex,
    output,
    query::{self, Evaluator, OptimizeOptions, ReloadState, ast::canonical_tag_name, optimize_fully},
    source::{JsonFileSource, MemorySource, TagSource},
};
use std::io;
use std::path::Path;

type Result<T> = std::result::Result<T, HostqError>;

/// Parameters of the search command
struct SearchParams<'a> {
    query: &'a str,
    fields: &'a [String],
    format: OutputFormat,
    header: bool,
    count: bool,
}

/// The configured tag source
///
/// An offline run may go without one, since it never rebuilds.
fn tag_source(config: &HostqConfig) -> Result<Box<dyn TagSource>> {
    match &config.source_file {
        Some(path) => Ok(Box::new(JsonFileSource::new(path))),
        None if config.offline => Ok(Box::new(MemorySource::new("offline"))),
        None => Err(HostqError::InvalidInput(
            "No tag source configured. Use --source <file> or 'hostq config set source_file=<file>'.".into(),
        )),
    }
}

fn open_index(config: &HostqConfig) -> Result<TagIndex> {
    Ok(TagIndex::open(config.cache_path()?, config.index_options())?)
}

fn handle_search_command(config: &HostqConfig, params: &SearchParams<'_>, force: bool) -> Result<()> {
    let source = tag_source(config)?;
    let mut index = open_index(config)?;
    let rebuilt = index.refresh(source.as_ref(), force)?;

    let mut evaluator = Evaluator::new(&mut index, source.as_ref(), config.query_options());
    let mut reload = ReloadState { reloaded: rebuilt };
    let ids = evaluator.search(params.query, &mut reload)?;

    if params.count {
        println!("{}", ids.len());
        return Ok(());
    }
    if ids.is_empty() && !config.quiet {
        eprintln!("{}", output::info_line("No hosts matched"));
    }

    let fields: Vec<String> = if params.fields.is_empty() {
        vec![canonical_tag_name("host").to_string()]
    } else {
        params.fields.iter().map(|field| canonical_tag_name(field).to_string()).collect()
    };
    let rows = evaluator.index().host_fields(&ids, &fields)?;
    output::write_rows(io::stdout().lock(), params.format, &fields, &rows, params.header)?;
    Ok(())
}

fn handle_update_command(config: &HostqConfig) -> Result<()> {
    let source = tag_source(config)?;
    let mut index = open_index(config)?;
    if !index.refresh(source.as_ref(), true)? {
        return Err(hostq::db::DbError::Offline.into());
    }
    if !config.quiet {
        let message = format!("Cache rebuilt from {} with {} hosts", source.name(), index.count_hosts()?);
        println!("{}", output::info_line(&message));
    }
    Ok(())
}

fn handle_parse_command(config: &HostqConfig, text: &str, optimize: bool, json: bool) -> Result<()> {
    let mut node = query::parse(text)?;
    if optimize {
        let options = OptimizeOptions { fixed_string: config.fixed_string, max_terms: config.max_terms };
        node = optimize_fully(&node, &options, config.optimize_iterations);
    }
    if json {
        let dump = serde_json::to_string_pretty(&node.dump()).map_err(output::OutputError::from)?;
        println!("{dump}");
    } else {
        println!("{node}");
    }
    Ok(())
}

fn handle_config_command(mut config: HostqConfig, path: &Path, command: &ConfigCommands, quiet: bool) -> Result<()> {
    match command {
        ConfigCommands::Set { setting } => {
            let (key, value) = setting.split_once('=').ok_or_else(|| {
                HostqError::InvalidInput("Invalid format. Use: hostq config set key=value".into())
            })?;
            let (key, value) = (key.trim(), value.trim());
            config.set(key, value)?;
            config.save_to(path)?;
            if !quiet {
                println!("Set {key} = {}", config.get(key)?);
            }
        }
        ConfigCommands::Get { key } => println!("{}", config.get(key)?),
        ConfigCommands::Path => println!("{}", path.display()),
    }
    Ok(())
}

/// Load configuration and dispatch to the command handler
///
/// # Errors
///
/// Returns `HostqError` if configuration loading fails or the command fails.
fn run(cli: &Cli) -> Result<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => HostqConfig::config_path()?,
    };
    let config = HostqConfig::load_from(&config_path)?;
    let mut effective = config.clone();
    cli.apply(&mut effective);

    match &cli.command {
        Commands::Search { query, fields, format, header, count } => {
            let params = SearchParams {
                query,
                fields,
                format: format.unwrap_or(effective.format),
                header: *header,
                count: *count,
            };
            handle_search_command(&effective, &params, cli.force)
        }
        Commands::Update => handle_update_command(&effective),
        Commands::Parse { query, optimize, json } => handle_parse_command(&effective, query, *optimize, *json),
        Commands::Config { command } => handle_config_command(config, &config_path, command, effective.quiet),
    }
}

fn main() {
    let cli = Cli::parse_args();
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    if let Err(error) = run(&cli) {
        eprintln!("{}", output::error_line(&error));
        std::process::exit(1);
    }
}
