use super::query::{SqlQuery, paginate, placeholders};
use super::schema::HOST_TAG;
use super::{DbError, Host, HostStatus, TagIndex};
use rusqlite::params_from_iter;
use std::collections::HashMap;

impl TagIndex {
    /// Project `fields` for each host in `ids`, keeping the order of `ids`
    ///
    /// A field is a tag name; `@host` yields the host name. Several values
    /// of one tag are joined with `,`, a presence-only tag yields its own
    /// name, and a missing tag yields an empty string. Without fields, the
    /// host name is projected.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if a lookup fails.
    pub fn host_fields(&self, ids: &[i64], fields: &[String]) -> Result<Vec<Vec<String>>, DbError> {
        let default_fields = [HOST_TAG.to_string()];
        let fields = if fields.is_empty() { &default_fields[..] } else { fields };

        let mut values: HashMap<(i64, String), Vec<String>> = HashMap::new();
        for query in field_queries(ids, fields, self.max_terms()) {
            log::debug!("{} -- {} values", query.sql(), query.param_count());

            let rows: Vec<(i64, String, String)> = self.options.retry.run(|| {
                let mut stmt = self.conn.prepare_cached(query.sql())?;
                let rows = stmt.query_map(params_from_iter(query.values()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
                rows.collect()
            })?;
            for (id, name, value) in rows {
                let value = if value.is_empty() { name.clone() } else { value };
                values.entry((id, name.to_lowercase())).or_default().push(value);
            }
        }

        Ok(ids
            .iter()
            .map(|id| {
                fields
                    .iter()
                    .map(|field| {
                        values
                            .get(&(*id, field.to_lowercase()))
                            .map(|found| found.join(","))
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect())
    }

    /// Host rows for `ids`, keeping the order of `ids`
    ///
    /// Ids unknown to the current generation are skipped.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if a lookup fails.
    pub fn hosts(&self, ids: &[i64]) -> Result<Vec<Host>, DbError> {
        let mut found: HashMap<i64, Host> = HashMap::with_capacity(ids.len());
        for chunk in paginate(ids, self.max_terms(), 0) {
            let query = SqlQuery::in_list("hosts.id", chunk);
            let sql = format!(
                "SELECT hosts.id, hosts.name, COALESCE(host_sources.name, ''), hosts.status FROM hosts \
                 LEFT JOIN host_sources ON hosts.source = host_sources.id WHERE {}",
                query.sql()
            );
            let rows: Vec<Host> = self.options.retry.run(|| {
                let mut stmt = self.conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(params_from_iter(query.values()), |row| {
                    Ok(Host {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        source: row.get(2)?,
                        status: HostStatus::from_id(row.get(3)?).unwrap_or(HostStatus::Pending),
                    })
                })?;
                rows.collect()
            })?;
            found.extend(rows.into_iter().map(|host| (host.id, host)));
        }
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }
}

/// Lookup statements for `fields` of `ids`, each binding at most `max_terms` values
///
/// Fields are compared case-insensitively and looked up once each. They are
/// split into groups of at most half the term limit, leaving the rest for ids.
fn field_queries(ids: &[i64], fields: &[String], max_terms: usize) -> Vec<SqlQuery> {
    let mut names: Vec<String> = Vec::with_capacity(fields.len());
    for field in fields {
        let name = field.to_lowercase();
        if !names.contains(&name) {
            names.push(name);
        }
    }

    let mut queries = Vec::new();
    for names in paginate(&names, max_terms / 2, 0) {
        for chunk in paginate(ids, max_terms, names.len()) {
            let mut query = SqlQuery::new(format!(
                "SELECT hosts_tags.host_id, tags.name, tags.value FROM hosts_tags \
                 INNER JOIN tags ON hosts_tags.tag_id = tags.id \
                 WHERE tags.name IN ({}) AND hosts_tags.host_id IN ({}) \
                 ORDER BY tags.value",
                placeholders(names.len()),
                placeholders(chunk.len())
            ));
            for name in names {
                query.bind(name.clone());
            }
            for id in chunk {
                query.bind(*id);
            }
            queries.push(query);
        }
    }
    queries
}
