use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::extract::{average_price, parse_menu_price, AVERAGE_WINDOW};
use crate::models::{DatabaseStats, LocationCounts, MenuLine, MenuSummary, StoreRecord};
use crate::sqlite::{configure_connection, DEFAULT_BUSY_TIMEOUT};

use super::error::{StorageError, StorageResult};
use super::transaction::StoreTransaction;

const HARVEST_SCHEMA: &str = include_str!("../../../sql/schema.sql");

#[derive(Debug, Clone)]
pub struct HarvestDatabaseBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
    busy_timeout: Duration,
}

impl Default for HarvestDatabaseBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl HarvestDatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn busy_timeout(mut self, value: Duration) -> Self {
        self.busy_timeout = value;
        self
    }

    pub fn build(self) -> StorageResult<HarvestDatabase> {
        let path = self.path.ok_or(StorageError::MissingPath)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        flags |= OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        Ok(HarvestDatabase {
            path,
            flags,
            read_only: self.read_only,
            busy_timeout: self.busy_timeout,
        })
    }
}

/// Handle to the harvest database file. Holds no connection; every caller
/// gets its own through [`open`](Self::open) or [`begin`](Self::begin).
#[derive(Debug, Clone)]
pub struct HarvestDatabase {
    path: PathBuf,
    flags: OpenFlags,
    read_only: bool,
    busy_timeout: Duration,
}

impl HarvestDatabase {
    pub fn builder() -> HarvestDatabaseBuilder {
        HarvestDatabaseBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StorageResult<Self> {
        HarvestDatabaseBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> StorageResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StorageError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        let configured = if self.read_only {
            conn.busy_timeout(self.busy_timeout)
        } else {
            configure_connection(&conn, self.busy_timeout)
        };
        configured.map_err(|source| StorageError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = self.open()?;
        conn.execute_batch(HARVEST_SCHEMA)?;
        Ok(())
    }

    /// Opens a fresh connection and starts a transaction on it.
    pub fn begin(&self) -> StorageResult<StoreTransaction> {
        StoreTransaction::begin(self.open()?)
    }

    /// Stores of `location` in discovery order. With `only_missing`, only
    /// those not yet enriched.
    pub fn pending_stores(
        &self,
        location: &str,
        only_missing: bool,
    ) -> StorageResult<Vec<StoreRecord>> {
        let conn = self.open()?;
        let sql = if only_missing {
            "SELECT s_idx, s_name, s_categ, s_location, s_address, s_img FROM store
             WHERE s_location = ?1 AND s_img IS NULL ORDER BY s_idx"
        } else {
            "SELECT s_idx, s_name, s_categ, s_location, s_address, s_img FROM store
             WHERE s_location = ?1 ORDER BY s_idx"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![location], StoreRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn store(&self, name: &str, location: &str) -> StorageResult<Option<StoreRecord>> {
        let conn = self.open()?;
        Ok(conn
            .query_row(
                "SELECT s_idx, s_name, s_categ, s_location, s_address, s_img FROM store
                 WHERE s_name = ?1 AND s_location = ?2",
                params![name, location],
                StoreRecord::from_row,
            )
            .optional()?)
    }

    pub fn known_locations(&self) -> StorageResult<Vec<String>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT s_location FROM store_view ORDER BY s_location")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    pub fn menu_summary(&self, name: &str, location: &str) -> StorageResult<Option<MenuSummary>> {
        let Some(store) = self.store(name, location)? else {
            return Ok(None);
        };
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT m_name, m_price FROM menu WHERE s_idx = ?1 ORDER BY m_idx")?;
        let rows = stmt.query_map(params![store.idx], |row| {
            let name: String = row.get(0)?;
            let price: Option<String> = row.get(1)?;
            Ok(MenuLine {
                name,
                price: parse_menu_price(price.as_deref().unwrap_or_default()),
            })
        })?;
        let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        let average_price = average_price(items.iter().take(AVERAGE_WINDOW).map(|line| &line.price));
        Ok(Some(MenuSummary {
            store: store.name,
            location: store.location,
            items,
            average_price,
        }))
    }

    pub fn stats(&self) -> StorageResult<DatabaseStats> {
        let conn = self.open()?;
        let count = |table: &str| -> rusqlite::Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
        };
        let stores = count("store")?;
        let menus = count("menu")?;
        let reviews = count("review")?;
        let emotions = count("emotion")?;

        let mut stmt = conn.prepare(
            "SELECT s_location,
                    COUNT(*),
                    SUM(CASE WHEN s_img IS NOT NULL OR s_address IS NOT NULL THEN 1 ELSE 0 END),
                    SUM(menu_count),
                    SUM(review_count)
             FROM store_view
             GROUP BY s_location
             ORDER BY s_location",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LocationCounts {
                location: row.get(0)?,
                stores: row.get(1)?,
                enriched: row.get(2)?,
                menus: row.get(3)?,
                reviews: row.get(4)?,
            })
        })?;
        let per_location = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(DatabaseStats {
            stores,
            menus,
            reviews,
            emotions,
            per_location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MenuCandidate, ReviewCandidate, StoreCandidate, StoreDetails};
    use tempfile::tempdir;

    fn database() -> (tempfile::TempDir, HarvestDatabase) {
        let dir = tempdir().unwrap();
        let db = HarvestDatabase::new(dir.path().join("harvest.db")).unwrap();
        db.initialize().unwrap();
        (dir, db)
    }

    fn store(name: &str, location: &str) -> StoreCandidate {
        StoreCandidate {
            name: name.into(),
            category: Some("한식".into()),
            location: location.into(),
        }
    }

    fn review(content: &str, writer: &str) -> ReviewCandidate {
        ReviewCandidate {
            content: content.into(),
            visit_count: 1,
            date: "2025-03-07".into(),
            writer: writer.into(),
        }
    }

    #[test]
    fn initialize_is_repeatable_and_seeds_emotion_types() {
        let (_dir, db) = database();
        db.initialize().unwrap();
        let conn = db.open().unwrap();
        let types: i64 = conn
            .query_row("SELECT COUNT(*) FROM emotion_type", [], |row| row.get(0))
            .unwrap();
        assert_eq!(types, 6);
    }

    #[test]
    fn uncommitted_writes_are_rolled_back_on_drop() {
        let (_dir, db) = database();
        {
            let tx = db.begin().unwrap();
            tx.insert_stores(&[store("김밥천국", "신촌")]).unwrap();
        }
        assert!(db.pending_stores("신촌", true).unwrap().is_empty());

        let tx = db.begin().unwrap();
        tx.insert_stores(&[store("김밥천국", "신촌")]).unwrap();
        tx.commit().unwrap();
        assert_eq!(db.pending_stores("신촌", true).unwrap().len(), 1);
    }

    #[test]
    fn pending_stores_follow_discovery_order() {
        let (_dir, db) = database();
        let tx = db.begin().unwrap();
        tx.insert_stores(&[store("b", "신촌"), store("a", "신촌"), store("c", "홍대")])
            .unwrap();
        tx.commit().unwrap();

        let names: Vec<String> = db
            .pending_stores("신촌", true)
            .unwrap()
            .into_iter()
            .map(|record| record.name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);

        let tx = db.begin().unwrap();
        let id = tx.store_id("b", "신촌").unwrap().unwrap();
        tx.update_store_details(
            id,
            &StoreDetails {
                address: Some("서울 서대문구".into()),
                image: Some("https://img/1.jpg".into()),
            },
        )
        .unwrap();
        tx.commit().unwrap();
        assert_eq!(db.pending_stores("신촌", true).unwrap().len(), 1);
        assert_eq!(db.pending_stores("신촌", false).unwrap().len(), 2);
        assert_eq!(db.known_locations().unwrap(), vec!["신촌", "홍대"]);
    }

    #[test]
    fn review_key_spans_store_content_date_and_writer() {
        let (_dir, db) = database();
        let tx = db.begin().unwrap();
        tx.insert_stores(&[store("a", "신촌"), store("b", "신촌")]).unwrap();
        let a = tx.store_id("a", "신촌").unwrap().unwrap();
        let b = tx.store_id("b", "신촌").unwrap().unwrap();

        assert!(tx.insert_review(a, "신촌", &review("맛있어요", "kim")).unwrap().is_some());
        assert!(tx.insert_review(b, "신촌", &review("맛있어요", "kim")).unwrap().is_some());
        assert!(tx.insert_review(a, "신촌", &review("맛있어요", "lee")).unwrap().is_some());
        assert!(tx.insert_review(a, "신촌", &review("맛있어요", "kim")).unwrap().is_none());
        assert!(tx.review_exists(a, &review("맛있어요", "kim")).unwrap());
        tx.commit().unwrap();

        assert_eq!(db.stats().unwrap().reviews, 3);
    }

    #[test]
    fn menu_summary_averages_leading_numeric_prices() {
        let (_dir, db) = database();
        let tx = db.begin().unwrap();
        tx.insert_stores(&[store("a", "신촌")]).unwrap();
        let id = tx.store_id("a", "신촌").unwrap().unwrap();
        let menus: Vec<MenuCandidate> = [
            ("김밥", "8,000원"),
            ("라면", "변동"),
            ("돈까스", "12,000원"),
            ("정식", "50,000원"),
        ]
        .iter()
        .map(|(name, price)| MenuCandidate {
            name: (*name).into(),
            price: Some((*price).into()),
        })
        .collect();
        assert_eq!(tx.insert_menus(id, "신촌", &menus).unwrap(), 4);
        tx.commit().unwrap();

        let summary = db.menu_summary("a", "신촌").unwrap().unwrap();
        assert_eq!(summary.items.len(), 4);
        assert_eq!(summary.average_price, Some(10_000));
        assert!(db.menu_summary("a", "홍대").unwrap().is_none());
    }

    #[test]
    fn deleting_a_store_cascades() {
        let (_dir, db) = database();
        let tx = db.begin().unwrap();
        tx.insert_stores(&[store("a", "신촌")]).unwrap();
        let id = tx.store_id("a", "신촌").unwrap().unwrap();
        tx.insert_review(id, "신촌", &review("좋아요", "kim")).unwrap();
        assert_eq!(tx.delete_store("a", "신촌").unwrap(), 1);
        tx.commit().unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.stores, 0);
        assert_eq!(stats.reviews, 0);
    }

    #[test]
    fn missing_path_is_rejected() {
        assert!(matches!(
            HarvestDatabase::builder().build(),
            Err(StorageError::MissingPath)
        ));
    }
}
