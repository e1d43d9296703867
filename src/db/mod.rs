//! Local tag index
//!
//! Provides the cached host/tag index the query engine evaluates against,
//! stored in SQLite.
//!
//! Uses three core tables:
//! - `hosts`: one row per host, with its source and status
//! - `tags`: one row per distinct `(name, value)` pair
//! - `hosts_tags`: the many-to-many association between them
//!
//! The whole content is one *generation*. A generation is never modified in
//! place: [`TagIndex::rebuild`] builds a new one in an in-memory database and
//! copies it over the durable store in a single backup step, so readers never
//! observe a half-written generation.

use rusqlite::{Connection, params_from_iter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod error;
pub mod query;
pub mod retry;
pub mod schema;
pub mod types;

mod projection;
mod rebuild;
mod selection;
mod setops;

pub use error::DbError;
pub use query::{MAX_TERMS, SqlQuery};
pub use retry::RetryPolicy;
pub use setops::SetOp;
pub use types::{Host, HostStatus, Tables};

/// Behaviour knobs of a [`TagIndex`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOptions {
    /// How long a generation stays fresh after it was written
    pub expiry: Duration,
    /// Never rebuild, even when stale or forced
    pub offline: bool,
    /// Maximum number of terms in one compound statement
    pub max_terms: usize,
    /// Busy retry behaviour
    pub retry: RetryPolicy,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            expiry: Duration::from_secs(3600),
            offline: false,
            max_terms: MAX_TERMS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Host/tag index backed by SQLite
pub struct TagIndex {
    conn: Connection,
    path: Option<PathBuf>,
    options: IndexOptions,
}

impl TagIndex {
    /// Opens or creates a cache file at the specified path
    ///
    /// # Examples
    /// ```no_run
    /// use hostq::db::{IndexOptions, TagIndex};
    /// let index = TagIndex::open("cache.db", IndexOptions::default()).unwrap();
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the options are invalid, the parent directory
    /// cannot be created, or the schema cannot be set up.
    pub fn open<P: AsRef<Path>>(path: P, options: IndexOptions) -> Result<Self, DbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()), options)
    }

    /// Creates an index that lives only as long as the returned value
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the options are invalid or the schema cannot be set up.
    pub fn open_in_memory(options: IndexOptions) -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, None, options)
    }

    fn init(conn: Connection, path: Option<PathBuf>, options: IndexOptions) -> Result<Self, DbError> {
        if options.max_terms < query::MIN_TERMS {
            return Err(DbError::InvalidInput(format!(
                "max_terms must be at least {}, got {}",
                query::MIN_TERMS,
                options.max_terms
            )));
        }
        conn.busy_timeout(Duration::ZERO)?;
        let index = Self { conn, path, options };
        index.options.retry.run(|| schema::create(&index.conn))?;
        schema::register_functions(&index.conn)?;
        Ok(index)
    }

    #[must_use]
    pub const fn options(&self) -> &IndexOptions {
        &self.options
    }

    #[must_use]
    pub const fn max_terms(&self) -> usize {
        self.options.max_terms
    }

    #[must_use]
    pub const fn is_offline(&self) -> bool {
        self.options.offline
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// When the current generation was built, in epoch seconds
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the generation table cannot be read.
    pub fn built_at(&self) -> Result<Option<i64>, DbError> {
        self.options.retry.run(|| {
            let mut stmt = self.conn.prepare_cached("SELECT built_at FROM generation WHERE id = 0")?;
            let mut rows = stmt.query([])?;
            rows.next()?.map(|row| row.get(0)).transpose()
        })
    }

    /// Whether the cached generation can be used without a rebuild
    ///
    /// A file-backed cache is fresh while its modification time plus the
    /// expiry lies in the future; an in-memory cache uses its build time.
    /// A cache that was never built is never fresh.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the generation or file metadata cannot be read.
    pub fn is_fresh(&self) -> Result<bool, DbError> {
        let Some(built_at) = self.built_at()? else {
            return Ok(false);
        };
        let modified = match &self.path {
            Some(path) => Some(fs::metadata(path)?.modified()?),
            None => UNIX_EPOCH.checked_add(Duration::from_secs(u64::try_from(built_at).unwrap_or(0))),
        };
        // an expiry beyond the clock's range never runs out
        Ok(modified
            .and_then(|time| time.checked_add(self.options.expiry))
            .is_none_or(|expires| expires > SystemTime::now()))
    }

    /// Rebuild from `source` when the cache is stale or `force` is set
    ///
    /// Does nothing when offline. Returns whether a rebuild happened.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if freshness cannot be determined or the rebuild fails.
    pub fn refresh(&mut self, source: &dyn crate::source::TagSource, force: bool) -> Result<bool, DbError> {
        if self.options.offline {
            log::debug!("offline mode, keeping the current cache");
            return Ok(false);
        }
        if !force && self.is_fresh()? {
            log::debug!("cache is fresh");
            return Ok(false);
        }
        self.rebuild(source)?;
        Ok(true)
    }

    /// Run a query returning host ids in the first column
    ///
    /// Duplicates are removed, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    pub fn query_ids(&self, query: &SqlQuery) -> Result<Vec<i64>, DbError> {
        log::debug!("{} -- {:?}", query.sql(), query.values());
        let ids = self.options.retry.run(|| {
            let mut stmt = self.conn.prepare_cached(query.sql())?;
            let rows = stmt.query_map(params_from_iter(query.values()), |row| row.get::<_, i64>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(dedup_ids(ids))
    }

    /// Run a statement without result rows, returning the number of changed rows
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    pub fn execute(&self, query: &SqlQuery) -> Result<usize, DbError> {
        log::debug!("{} -- {} values", query.sql(), query.param_count());
        self.options.retry.run(|| {
            let mut stmt = self.conn.prepare_cached(query.sql())?;
            stmt.execute(params_from_iter(query.values()))
        })
    }

    /// Every host id of the current generation, ascending
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails.
    pub fn all_ids(&self) -> Result<Vec<i64>, DbError> {
        self.query_ids(&SqlQuery::new("SELECT id FROM hosts ORDER BY id"))
    }

    /// Smallest and largest host id, `None` when there are no hosts
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails.
    pub fn id_range(&self) -> Result<Option<(i64, i64)>, DbError> {
        let (min, max): (Option<i64>, Option<i64>) = self.options.retry.run(|| {
            self.conn
                .query_row("SELECT MIN(id), MAX(id) FROM hosts", [], |row| Ok((row.get(0)?, row.get(1)?)))
        })?;
        Ok(min.zip(max))
    }

    /// Number of hosts in the current generation
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails.
    pub fn count_hosts(&self) -> Result<usize, DbError> {
        let count: i64 = self
            .options
            .retry
            .run(|| self.conn.query_row("SELECT COUNT(*) FROM hosts", [], |row| row.get(0)))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Remove duplicate ids, keeping the first occurrence of each
#[must_use]
pub fn dedup_ids(ids: Vec<i64>) -> Vec<i64> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn source() -> MemorySource {
        MemorySource::new("static")
            .with_tag("role:web", ["web-01", "web-02"])
            .with_tag("role:db", ["db-01"])
    }

    #[test]
    fn test_rejects_tiny_term_limit() {
        let options = IndexOptions { max_terms: 3, ..Default::default() };
        assert!(matches!(TagIndex::open_in_memory(options), Err(DbError::InvalidInput(_))));
    }

    #[test]
    fn test_never_built_is_stale() {
        let index = TagIndex::open_in_memory(IndexOptions::default()).unwrap();
        assert_eq!(index.built_at().unwrap(), None);
        assert!(!index.is_fresh().unwrap());
    }

    #[test]
    fn test_refresh_builds_once_while_fresh() {
        let mut index = TagIndex::open_in_memory(IndexOptions::default()).unwrap();
        assert!(index.refresh(&source(), false).unwrap());
        assert!(index.is_fresh().unwrap());
        assert!(!index.refresh(&source(), false).unwrap());
        assert!(index.refresh(&source(), true).unwrap());
        assert_eq!(index.count_hosts().unwrap(), 3);
    }

    #[test]
    fn test_zero_expiry_is_always_stale() {
        let options = IndexOptions { expiry: Duration::ZERO, ..Default::default() };
        let mut index = TagIndex::open_in_memory(options).unwrap();
        index.refresh(&source(), false).unwrap();
        assert!(!index.is_fresh().unwrap());
    }

    #[test]
    fn test_huge_expiry_stays_fresh() {
        let options = IndexOptions { expiry: Duration::from_secs(u64::MAX), ..Default::default() };
        let mut index = TagIndex::open_in_memory(options.clone()).unwrap();
        index.refresh(&source(), false).unwrap();
        assert!(index.is_fresh().unwrap());

        let dir = tempfile::TempDir::new().unwrap();
        let mut index = TagIndex::open(dir.path().join("cache.db"), options).unwrap();
        assert!(index.refresh(&source(), false).unwrap());
        assert!(index.is_fresh().unwrap());
        assert!(!index.refresh(&source(), false).unwrap());
    }

    #[test]
    fn test_offline_never_rebuilds() {
        let options = IndexOptions { offline: true, ..Default::default() };
        let mut index = TagIndex::open_in_memory(options).unwrap();
        assert!(!index.refresh(&source(), true).unwrap());
        assert_eq!(index.count_hosts().unwrap(), 0);
    }

    #[test]
    fn test_id_range_and_all_ids() {
        let mut index = TagIndex::open_in_memory(IndexOptions::default()).unwrap();
        assert_eq!(index.id_range().unwrap(), None);
        index.refresh(&source(), true).unwrap();
        let ids = index.all_ids().unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(index.id_range().unwrap(), Some((ids[0], ids[2])));
    }

    #[test]
    fn test_dedup_ids_keeps_first() {
        assert_eq!(dedup_ids(vec![3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }
}
