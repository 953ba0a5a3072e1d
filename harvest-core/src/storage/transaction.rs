use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Params};
use tracing::{debug, warn};

use crate::models::{MenuCandidate, ReviewCandidate, StoreCandidate, StoreDetails};

use super::error::{StorageError, StorageResult};

/// Tables that accept bulk inserts. Column names come from here, never from
/// scraped data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Store,
    Menu,
    Review,
    Emotion,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Store => "store",
            Table::Menu => "menu",
            Table::Review => "review",
            Table::Emotion => "emotion",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Store => &["s_name", "s_categ", "s_location", "s_address", "s_img"],
            Table::Menu => &["s_idx", "m_name", "m_price", "m_location"],
            Table::Review => &[
                "s_idx",
                "r_content",
                "r_visit_count",
                "r_date",
                "r_location",
                "r_writer",
            ],
            Table::Emotion => &["e_score", "t_idx", "r_idx"],
        }
    }

    fn insert_sql(&self, columns: &[&str]) -> StorageResult<String> {
        let known = self.columns();
        for column in columns {
            if !known.contains(column) {
                return Err(StorageError::UnknownColumn {
                    table: self.name(),
                    column: (*column).to_string(),
                });
            }
        }
        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.name(),
            columns.join(", "),
            placeholders
        ))
    }
}

/// One connection with autocommit disabled. Nothing is visible to other
/// connections until [`commit`](Self::commit); dropping an unfinished
/// transaction rolls it back.
#[derive(Debug)]
pub struct StoreTransaction {
    conn: Connection,
    finished: bool,
}

impl StoreTransaction {
    pub(crate) fn begin(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.finished {
            Err(StorageError::Finished)
        } else {
            Ok(())
        }
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> StorageResult<usize> {
        self.ensure_open()?;
        Ok(self.conn.execute(sql, params)?)
    }

    pub fn query<P: Params>(&self, sql: &str, params: P) -> StorageResult<Vec<Vec<Value>>> {
        self.ensure_open()?;
        let mut stmt = self.conn.prepare(sql)?;
        let width = stmt.column_count();
        let rows = stmt.query_map(params, |row| {
            (0..width)
                .map(|index| row.get::<_, Value>(index))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Inserts `rows` with one prepared statement. Returns the rows written.
    pub fn bulk_insert(
        &self,
        table: Table,
        columns: &[&str],
        rows: &[Vec<Value>],
    ) -> StorageResult<usize> {
        self.ensure_open()?;
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = table.insert_sql(columns)?;
        let mut stmt = self.conn.prepare(&sql)?;
        let mut written = 0;
        for (index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(StorageError::RowShape {
                    row: index,
                    found: row.len(),
                    expected: columns.len(),
                });
            }
            written += stmt.execute(params_from_iter(row.iter()))?;
        }
        debug!(table = table.name(), rows = written, "bulk insert");
        Ok(written)
    }

    pub fn commit(mut self) -> StorageResult<()> {
        self.ensure_open()?;
        self.finished = true;
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(mut self) -> StorageResult<()> {
        self.ensure_open()?;
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub fn store_exists(&self, name: &str, location: &str) -> StorageResult<bool> {
        Ok(self.store_id(name, location)?.is_some())
    }

    pub fn store_id(&self, name: &str, location: &str) -> StorageResult<Option<i64>> {
        self.ensure_open()?;
        Ok(self
            .conn
            .query_row(
                "SELECT s_idx FROM store WHERE s_name = ?1 AND s_location = ?2",
                params![name, location],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Location of another row with the same name and address, if any.
    pub fn cross_location_duplicate(
        &self,
        name: &str,
        address: &str,
        location: &str,
    ) -> StorageResult<Option<String>> {
        self.ensure_open()?;
        Ok(self
            .conn
            .query_row(
                "SELECT s_location FROM store
                 WHERE s_name = ?1 AND s_address = ?2 AND s_location != ?3
                 ORDER BY s_idx LIMIT 1",
                params![name, address, location],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn delete_store(&self, name: &str, location: &str) -> StorageResult<usize> {
        self.execute(
            "DELETE FROM store WHERE s_name = ?1 AND s_location = ?2",
            params![name, location],
        )
    }

    pub fn update_store_details(&self, s_idx: i64, details: &StoreDetails) -> StorageResult<usize> {
        self.execute(
            "UPDATE store SET s_address = ?1, s_img = ?2 WHERE s_idx = ?3",
            params![details.address, details.image, s_idx],
        )
    }

    pub fn insert_stores(&self, stores: &[StoreCandidate]) -> StorageResult<usize> {
        let rows: Vec<Vec<Value>> = stores
            .iter()
            .map(|store| {
                vec![
                    Value::Text(store.name.clone()),
                    store.category.clone().map_or(Value::Null, Value::Text),
                    Value::Text(store.location.clone()),
                    Value::Null,
                    Value::Null,
                ]
            })
            .collect();
        self.bulk_insert(Table::Store, Table::Store.columns(), &rows)
    }

    pub fn menu_exists(&self, s_idx: i64, name: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM menu WHERE s_idx = ?1 AND m_name = ?2",
                params![s_idx, name],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    pub fn insert_menus(
        &self,
        s_idx: i64,
        location: &str,
        menus: &[MenuCandidate],
    ) -> StorageResult<usize> {
        let rows: Vec<Vec<Value>> = menus
            .iter()
            .map(|menu| {
                vec![
                    Value::Integer(s_idx),
                    Value::Text(menu.name.clone()),
                    menu.price.clone().map_or(Value::Null, Value::Text),
                    Value::Text(location.to_string()),
                ]
            })
            .collect();
        self.bulk_insert(Table::Menu, Table::Menu.columns(), &rows)
    }

    pub fn review_exists(&self, s_idx: i64, review: &ReviewCandidate) -> StorageResult<bool> {
        self.ensure_open()?;
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM review
                 WHERE s_idx = ?1 AND r_content = ?2 AND r_date = ?3 AND r_writer = ?4",
                params![s_idx, review.content, review.date, review.writer],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// `None` when the (store, content, date, writer) key already exists.
    pub fn insert_review(
        &self,
        s_idx: i64,
        location: &str,
        review: &ReviewCandidate,
    ) -> StorageResult<Option<i64>> {
        let written = self.execute(
            "INSERT OR IGNORE INTO review
                (s_idx, r_content, r_visit_count, r_date, r_location, r_writer)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                s_idx,
                review.content,
                review.visit_count,
                review.date,
                location,
                review.writer
            ],
        )?;
        if written == 0 {
            return Ok(None);
        }
        Ok(Some(self.conn.last_insert_rowid()))
    }
}

impl Drop for StoreTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            warn!(error = %err, "rollback of abandoned transaction failed");
        } else {
            debug!("abandoned transaction rolled back");
        }
    }
}
