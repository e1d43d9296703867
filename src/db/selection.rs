//! Result shaping through a temporary selection table
//!
//! Shuffling, ordering and grouping an evaluated id list is left to SQLite:
//! the ids are loaded into a connection-local `selection` table, keeping
//! their input position, and read back in the requested order. This works
//! the same for ten ids or a hundred thousand.

use super::query::{SqlQuery, paginate};
use super::{DbError, TagIndex};

const CREATE_SELECTION: &str = "CREATE TEMP TABLE IF NOT EXISTS selection (\
     position INTEGER PRIMARY KEY, \
     host_id  INTEGER NOT NULL)";

/// One value per host for the tag bound to `?`; the smallest when several
const TAG_VALUES: &str = "SELECT hosts_tags.host_id AS host_id, MIN(tags.value) AS value \
     FROM hosts_tags INNER JOIN tags ON hosts_tags.tag_id = tags.id \
     WHERE tags.name = ? GROUP BY hosts_tags.host_id";

impl TagIndex {
    /// `ids` in random order
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the selection cannot be loaded or read.
    pub fn shuffle(&self, ids: &[i64]) -> Result<Vec<i64>, DbError> {
        self.load_selection(ids)?;
        self.query_ids(&SqlQuery::new("SELECT host_id FROM temp.selection ORDER BY RANDOM()"))
    }

    /// `ids` ordered by the value of `tag`, or by host name when `tag` is `None`
    ///
    /// Hosts without the tag come last. Ties keep their input order.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the selection cannot be loaded or read.
    pub fn order_by_tag(&self, ids: &[i64], tag: Option<&str>) -> Result<Vec<i64>, DbError> {
        self.load_selection(ids)?;
        let query = match tag {
            Some(tag) => {
                let mut query = SqlQuery::new(format!(
                    "SELECT s.host_id FROM temp.selection AS s \
                     LEFT JOIN ({TAG_VALUES}) AS t ON t.host_id = s.host_id \
                     ORDER BY t.value IS NULL, t.value COLLATE NOCASE, s.position"
                ));
                query.bind(tag.to_string());
                query
            }
            None => SqlQuery::new(
                "SELECT s.host_id FROM temp.selection AS s \
                 INNER JOIN hosts ON hosts.id = s.host_id \
                 ORDER BY hosts.name, s.position",
            ),
        };
        self.query_ids(&query)
    }

    /// One host per distinct value of `tag`, ordered by that value
    ///
    /// The host kept for a value is the first one in input order. Hosts
    /// without the tag are dropped.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the selection cannot be loaded or read.
    pub fn group_by_tag(&self, ids: &[i64], tag: &str) -> Result<Vec<i64>, DbError> {
        self.load_selection(ids)?;
        let mut query = SqlQuery::new(format!(
            "SELECT s.host_id FROM temp.selection AS s INNER JOIN (\
                 SELECT t.value AS value, MIN(inner_s.position) AS position \
                 FROM temp.selection AS inner_s \
                 INNER JOIN ({TAG_VALUES}) AS t ON t.host_id = inner_s.host_id \
                 GROUP BY t.value COLLATE NOCASE\
             ) AS g ON g.position = s.position \
             ORDER BY g.value COLLATE NOCASE"
        ));
        query.bind(tag.to_string());
        self.query_ids(&query)
    }

    fn load_selection(&self, ids: &[i64]) -> Result<(), DbError> {
        self.execute(&SqlQuery::new(CREATE_SELECTION))?;
        self.execute(&SqlQuery::new("DELETE FROM temp.selection"))?;
        for chunk in paginate(ids, self.max_terms(), 0) {
            let rows = vec!["(?)"; chunk.len()].join(", ");
            let mut query = SqlQuery::new(format!("INSERT INTO temp.selection (host_id) VALUES {rows}"));
            for id in chunk {
                query.bind(*id);
            }
            self.execute(&query)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{IndexOptions, TagIndex};
    use crate::source::MemorySource;

    fn index() -> TagIndex {
        let source = MemorySource::new("static")
            .with_tag("zone:b", ["alpha", "delta"])
            .with_tag("zone:a", ["charlie"])
            .with_tag("zone:c", ["bravo"])
            .with_tag("role:web", ["alpha", "bravo", "charlie", "delta", "echo"]);
        let options = IndexOptions { max_terms: 6, ..Default::default() };
        let mut index = TagIndex::open_in_memory(options).unwrap();
        index.rebuild(&source).unwrap();
        index
    }

    fn ids(index: &TagIndex, names: &[&str]) -> Vec<i64> {
        names
            .iter()
            .map(|name| {
                index
                    .conn
                    .query_row("SELECT id FROM hosts WHERE name = ?1", [name], |row| row.get(0))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_shuffle_keeps_members() {
        let index = index();
        let input = ids(&index, &["alpha", "bravo", "charlie", "delta", "echo"]);
        let mut shuffled = index.shuffle(&input).unwrap();
        assert_eq!(shuffled.len(), input.len());
        shuffled.sort_unstable();
        let mut expected = input.clone();
        expected.sort_unstable();
        assert_eq!(shuffled, expected);
    }

    #[test]
    fn test_order_by_tag_value_missing_last() {
        let index = index();
        let input = ids(&index, &["echo", "alpha", "bravo", "charlie", "delta"]);
        let ordered = index.order_by_tag(&input, Some("zone")).unwrap();
        assert_eq!(ordered, ids(&index, &["charlie", "alpha", "delta", "bravo", "echo"]));
    }

    #[test]
    fn test_order_by_host_name() {
        let index = index();
        let input = ids(&index, &["delta", "bravo", "echo", "alpha"]);
        let ordered = index.order_by_tag(&input, None).unwrap();
        assert_eq!(ordered, ids(&index, &["alpha", "bravo", "delta", "echo"]));
    }

    #[test]
    fn test_group_by_keeps_first_per_value() {
        let index = index();
        let input = ids(&index, &["delta", "bravo", "alpha", "charlie", "echo"]);
        let grouped = index.group_by_tag(&input, "zone").unwrap();
        assert_eq!(grouped, ids(&index, &["charlie", "delta", "bravo"]));
    }

    #[test]
    fn test_selection_is_replaced_between_calls() {
        let index = index();
        let first = ids(&index, &["alpha", "bravo"]);
        index.order_by_tag(&first, None).unwrap();
        let second = ids(&index, &["echo"]);
        assert_eq!(index.order_by_tag(&second, None).unwrap(), second);
    }

    #[test]
    fn test_empty_selection() {
        let index = index();
        assert!(index.shuffle(&[]).unwrap().is_empty());
        assert!(index.group_by_tag(&[], "zone").unwrap().is_empty());
    }
}
