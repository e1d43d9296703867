use super::query::{SqlQuery, paginate, placeholders};
use super::{DbError, HostStatus, TagIndex, schema};
use crate::source::{TagMap, TagSource, split_tag};
use rusqlite::backup::{Backup, StepResult};
use rusqlite::types::Value;
use rusqlite::{Connection, Transaction, params_from_iter};
use std::collections::{BTreeSet, HashSet};
use std::time::Instant;

/// Id of the single source row a generation records
const SOURCE_ID: i64 = 1;

impl TagIndex {
    /// Replace the cached generation with fresh data from `source`
    ///
    /// The new generation is assembled in an in-memory database, then copied
    /// over the durable store in one backup step. If the source fails, the
    /// existing cache is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Offline` in offline mode, `DbError::SourceError` if
    /// the source fails, or an SQLite error if assembling or copying fails.
    pub fn rebuild(&mut self, source: &dyn TagSource) -> Result<(), DbError> {
        if self.options.offline {
            return Err(DbError::Offline);
        }
        let started = Instant::now();
        let tags = source.get_all_tags()?;
        let downtimes = source.get_all_downtimes()?;

        let now = chrono::Utc::now().timestamp();
        let stopped: HashSet<String> = downtimes
            .iter()
            .filter(|downtime| downtime.is_active_at(now))
            .flat_map(|downtime| downtime.hosts())
            .map(str::to_lowercase)
            .collect();

        let mut ephemeral = Connection::open_in_memory()?;
        schema::create(&ephemeral)?;
        let tx = ephemeral.transaction()?;
        populate(&tx, source.name(), &tags, &stopped, self.options.max_terms)?;
        schema::materialize_virtual_tags(&tx)?;
        tx.execute("INSERT OR REPLACE INTO generation (id, built_at) VALUES (0, ?1)", [now])?;
        tx.commit()?;

        self.copy_from(&ephemeral)?;
        log::info!(
            "rebuilt tag index from '{}': {} tags, {} hosts in downtime ({}ms)",
            source.name(),
            tags.len(),
            stopped.len(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    fn copy_from(&mut self, ephemeral: &Connection) -> Result<(), DbError> {
        let retry = self.options.retry;
        let backup = Backup::new(ephemeral, &mut self.conn)?;
        let mut attempts = 0;
        loop {
            match backup.step(-1)? {
                StepResult::Done => return Ok(()),
                StepResult::More => {}
                _ => {
                    attempts += 1;
                    retry.wait(attempts)?;
                }
            }
        }
    }
}

fn populate(
    tx: &Transaction<'_>,
    source_name: &str,
    tags: &TagMap,
    stopped: &HashSet<String>,
    max_terms: usize,
) -> Result<(), DbError> {
    tx.execute(
        "INSERT INTO host_sources (id, name) VALUES (?1, ?2)",
        rusqlite::params![SOURCE_ID, source_name],
    )?;

    let hosts: Vec<&str> = tags
        .values()
        .flatten()
        .map(String::as_str)
        .filter(|name| !name.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    for chunk in paginate(&hosts, max_terms, 0) {
        let rows = vec![format!("(?, {SOURCE_ID})"); chunk.len()].join(", ");
        run(
            tx,
            &format!("INSERT OR IGNORE INTO hosts (name, source) VALUES {rows}"),
            chunk.iter().map(|h| Value::from(h.to_string())),
        )?;
    }

    tx.execute("UPDATE hosts SET status = ?1", [HostStatus::Running.id()])?;
    let stopped: Vec<&str> = hosts
        .iter()
        .copied()
        .filter(|name| stopped.contains(&name.to_lowercase()))
        .collect();
    for chunk in paginate(&stopped, max_terms, 1) {
        let mut values = vec![Value::Integer(HostStatus::Stopped.id())];
        values.extend(chunk.iter().map(|h| Value::from(h.to_string())));
        run(
            tx,
            &format!("UPDATE hosts SET status = ? WHERE name IN ({})", placeholders(chunk.len())),
            values,
        )?;
    }

    let pairs: Vec<(&str, &str)> = tags
        .keys()
        .map(|key| split_tag(key))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    for chunk in paginate(&pairs, max_terms / 2, 0) {
        let rows = vec!["(?, ?)"; chunk.len()].join(", ");
        let values = chunk
            .iter()
            .flat_map(|(name, value)| [Value::from(name.to_string()), Value::from(value.to_string())]);
        run(tx, &format!("INSERT OR IGNORE INTO tags (name, value) VALUES {rows}"), values)?;
    }

    for (key, tagged) in tags {
        let (name, value) = split_tag(key);
        for chunk in paginate(tagged, max_terms, 2) {
            let mut query = SqlQuery::new(format!(
                "INSERT OR IGNORE INTO hosts_tags (host_id, tag_id) \
                 SELECT hosts.id, tags.id FROM hosts \
                 INNER JOIN tags ON tags.name = ? AND tags.value = ? \
                 WHERE hosts.name IN ({})",
                placeholders(chunk.len())
            ));
            query.bind(name.to_string());
            query.bind(value.to_string());
            for host in chunk {
                query.bind(host.clone());
            }
            run(tx, query.sql(), query.values().iter().cloned())?;
        }
    }
    Ok(())
}

fn run(tx: &Transaction<'_>, sql: &str, values: impl IntoIterator<Item = Value>) -> Result<usize, DbError> {
    let mut stmt = tx.prepare(sql)?;
    Ok(stmt.execute(params_from_iter(values))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::IndexOptions;
    use crate::source::{Downtime, MemorySource, SourceError};

    struct FailingSource;

    impl TagSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn get_all_tags(&self) -> Result<TagMap, SourceError> {
            Err(SourceError::Transport("unreachable".into()))
        }

        fn get_all_downtimes(&self) -> Result<Vec<crate::source::Downtime>, SourceError> {
            Ok(Vec::new())
        }
    }

    fn small_index() -> TagIndex {
        let options = IndexOptions { max_terms: 6, ..Default::default() };
        TagIndex::open_in_memory(options).unwrap()
    }

    fn count(index: &TagIndex, sql: &str) -> i64 {
        index.conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_rebuild_chunks_large_inputs() {
        let hosts: Vec<String> = (0..40).map(|i| format!("host-{i:02}")).collect();
        let mut source = MemorySource::new("static").with_tag("role:web", hosts.clone());
        for i in 0..20 {
            source = source.with_tag(&format!("shard:{i}"), [hosts[i].clone()]);
        }
        let mut index = small_index();
        index.rebuild(&source).unwrap();

        assert_eq!(count(&index, "SELECT COUNT(*) FROM hosts"), 40);
        // 21 source tags + 40 @host + 1 @source + 1 @status
        assert_eq!(count(&index, "SELECT COUNT(*) FROM tags"), 63);
        // 40 role + 20 shard + 3 virtual per host
        assert_eq!(count(&index, "SELECT COUNT(*) FROM hosts_tags"), 180);
    }

    #[test]
    fn test_downtime_hosts_are_stopped() {
        let source = MemorySource::new("static")
            .with_tag("role:web", ["web-01", "web-02"])
            .with_downtime(Downtime {
                active: true,
                scope: vec!["host:WEB-02".into()],
                ..Default::default()
            });
        let mut index = small_index();
        index.rebuild(&source).unwrap();

        assert_eq!(
            count(&index, "SELECT status FROM hosts WHERE name = 'web-02'"),
            HostStatus::Stopped.id()
        );
        assert_eq!(
            count(&index, "SELECT status FROM hosts WHERE name = 'web-01'"),
            HostStatus::Running.id()
        );
    }

    #[test]
    fn test_presence_only_tags_have_empty_value() {
        let source = MemorySource::new("static").with_tag("monitored", ["web-01"]);
        let mut index = small_index();
        index.rebuild(&source).unwrap();
        assert_eq!(count(&index, "SELECT COUNT(*) FROM tags WHERE name = 'monitored' AND value = ''"), 1);
    }

    #[test]
    fn test_rebuild_replaces_previous_generation() {
        let mut index = small_index();
        index
            .rebuild(&MemorySource::new("static").with_tag("role:web", ["old-01"]))
            .unwrap();
        index
            .rebuild(&MemorySource::new("static").with_tag("role:web", ["new-01"]))
            .unwrap();
        assert_eq!(count(&index, "SELECT COUNT(*) FROM hosts WHERE name = 'old-01'"), 0);
        assert_eq!(count(&index, "SELECT COUNT(*) FROM hosts WHERE name = 'new-01'"), 1);
    }

    #[test]
    fn test_failed_source_keeps_cache() {
        let mut index = small_index();
        index
            .rebuild(&MemorySource::new("static").with_tag("role:web", ["web-01"]))
            .unwrap();
        let result = index.rebuild(&FailingSource);
        assert!(matches!(result, Err(DbError::SourceError(_))));
        assert_eq!(index.count_hosts().unwrap(), 1);
    }

    #[test]
    fn test_offline_rebuild_is_error() {
        let options = IndexOptions { offline: true, ..Default::default() };
        let mut index = TagIndex::open_in_memory(options).unwrap();
        let result = index.rebuild(&MemorySource::new("static"));
        assert!(matches!(result, Err(DbError::Offline)));
    }
}
