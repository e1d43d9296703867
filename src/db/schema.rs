//! Tag index schema
//!
//! Hosts, tags and their associations live in three tables. Names and
//! values use `COLLATE NOCASE`, so literal comparisons are case-insensitive
//! and uniqueness is enforced case-insensitively.
//!
//! The virtual tag families `@host`, `@source` and `@status` are
//! materialized from the `hosts` table on every rebuild rather than pulled
//! from the tag source.

use crate::db::types::HostStatus;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, Error, Result, params};
use std::sync::Arc;

/// Virtual tag carrying the host name
pub const HOST_TAG: &str = "@host";
/// Virtual tag carrying the source name
pub const SOURCE_TAG: &str = "@source";
/// Virtual tag carrying the status name
pub const STATUS_TAG: &str = "@status";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hosts (
    id     INTEGER PRIMARY KEY AUTOINCREMENT,
    name   VARCHAR(255) NOT NULL COLLATE NOCASE,
    source INTEGER NOT NULL DEFAULT 0,
    status INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS hosts_name ON hosts (name);

CREATE TABLE IF NOT EXISTS tags (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  VARCHAR(200) NOT NULL COLLATE NOCASE,
    value VARCHAR(200) NOT NULL DEFAULT '' COLLATE NOCASE
);
CREATE UNIQUE INDEX IF NOT EXISTS tags_name_value ON tags (name, value);

CREATE TABLE IF NOT EXISTS hosts_tags (
    host_id INTEGER NOT NULL,
    tag_id  INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS hosts_tags_host_id_tag_id ON hosts_tags (host_id, tag_id);
CREATE INDEX IF NOT EXISTS hosts_tags_tag_id ON hosts_tags (tag_id);

CREATE TABLE IF NOT EXISTS host_sources (
    id   INTEGER PRIMARY KEY,
    name VARCHAR(255) NOT NULL COLLATE NOCASE
);

CREATE TABLE IF NOT EXISTS host_statuses (
    id   INTEGER PRIMARY KEY,
    name VARCHAR(255) NOT NULL COLLATE NOCASE
);

CREATE TABLE IF NOT EXISTS generation (
    id       INTEGER PRIMARY KEY CHECK (id = 0),
    built_at INTEGER NOT NULL
);
"#;

/// Create all tables and indexes if missing, and seed the status lookup table
///
/// # Errors
/// Returns an SQLite error if any DDL statement fails.
pub fn create(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    for status in HostStatus::ALL {
        conn.execute(
            "INSERT OR IGNORE INTO host_statuses (id, name) VALUES (?1, ?2)",
            params![status.id(), status.as_str()],
        )?;
    }
    Ok(())
}

/// Register the `REGEXP` operator backed by the `regex` crate
///
/// `X REGEXP Y` is evaluated by SQLite as `regexp(Y, X)`. Compiled patterns
/// are cached per statement as auxiliary data.
///
/// # Errors
/// Returns an SQLite error if the function cannot be registered.
pub fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<Regex> = ctx.get_or_create_aux(0, |raw| {
                let source = raw.as_str().map_err(|e| Error::UserFunctionError(e.into()))?;
                Regex::new(source).map_err(|e| Error::UserFunctionError(e.into()))
            })?;
            let text = ctx
                .get_raw(1)
                .as_str()
                .map_err(|e| Error::UserFunctionError(e.into()))?;
            Ok(pattern.is_match(text))
        },
    )
}

/// Materialize the `@host`, `@source` and `@status` tags from `hosts`
///
/// # Errors
/// Returns an SQLite error if an insert fails.
pub fn materialize_virtual_tags(conn: &Connection) -> Result<()> {
    let families = [
        (HOST_TAG, "SELECT hosts.id AS host_id, hosts.name AS value FROM hosts"),
        (
            SOURCE_TAG,
            "SELECT hosts.id AS host_id, host_sources.name AS value FROM hosts \
             INNER JOIN host_sources ON hosts.source = host_sources.id",
        ),
        (
            STATUS_TAG,
            "SELECT hosts.id AS host_id, host_statuses.name AS value FROM hosts \
             INNER JOIN host_statuses ON hosts.status = host_statuses.id",
        ),
    ];

    for (tag, rows) in families {
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO tags (name, value) \
                 SELECT ?1, v.value FROM ({rows}) AS v"
            ),
            [tag],
        )?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO hosts_tags (host_id, tag_id) \
                 SELECT v.host_id, tags.id FROM ({rows}) AS v \
                 INNER JOIN tags ON tags.name = ?1 AND tags.value = v.value"
            ),
            [tag],
        )?;
    }
    Ok(())
}
