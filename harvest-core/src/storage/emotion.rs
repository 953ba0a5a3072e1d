use std::io::{Read, Write};

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::database::HarvestDatabase;
use super::error::StorageResult;
use super::transaction::Table;

/// Emotion labels and their `emotion_type.t_idx`.
pub const EMOTION_TYPES: [(&str, i64); 6] = [
    ("t_happy", 1),
    ("t_angry", 2),
    ("t_sad", 3),
    ("t_love", 4),
    ("t_fun", 5),
    ("t_complaint", 6),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnscoredReview {
    pub r_idx: i64,
    pub s_idx: i64,
    pub r_content: String,
    pub r_visit_count: i64,
    pub r_date: String,
    pub r_location: String,
    pub r_writer: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LabelledReview {
    r_idx: i64,
    t_happy: f64,
    t_angry: f64,
    t_sad: f64,
    t_love: f64,
    t_fun: f64,
    t_complaint: f64,
}

impl LabelledReview {
    fn scores(&self) -> [f64; 6] {
        [
            self.t_happy,
            self.t_angry,
            self.t_sad,
            self.t_love,
            self.t_fun,
            self.t_complaint,
        ]
    }
}

/// Writes every review without emotion rows as CSV with a header row.
pub fn export_unscored_reviews<W: Write>(db: &HarvestDatabase, writer: W) -> StorageResult<usize> {
    let conn = db.open()?;
    let mut stmt = conn.prepare(
        "SELECT r.r_idx, r.s_idx, r.r_content, r.r_visit_count, r.r_date, r.r_location, r.r_writer
         FROM review r
         LEFT JOIN emotion e ON r.r_idx = e.r_idx
         WHERE e.r_idx IS NULL
         ORDER BY r.r_idx",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(UnscoredReview {
            r_idx: row.get(0)?,
            s_idx: row.get(1)?,
            r_content: row.get(2)?,
            r_visit_count: row.get(3)?,
            r_date: row.get(4)?,
            r_location: row.get(5)?,
            r_writer: row.get(6)?,
        })
    })?;

    let mut csv = csv::Writer::from_writer(writer);
    let mut written = 0;
    for review in rows {
        csv.serialize(review?)?;
        written += 1;
    }
    csv.flush()?;
    info!(reviews = written, "exported unscored reviews");
    Ok(written)
}

/// Reads labelled CSV (`r_idx` plus one score column per emotion type) and
/// inserts all scores in one transaction. Extra columns are ignored.
pub fn import_emotion_scores<R: Read>(db: &HarvestDatabase, reader: R) -> StorageResult<usize> {
    let mut csv = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for record in csv.deserialize::<LabelledReview>() {
        let record = record?;
        for ((_, t_idx), score) in EMOTION_TYPES.iter().zip(record.scores()) {
            rows.push(vec![
                Value::Real(score),
                Value::Integer(*t_idx),
                Value::Integer(record.r_idx),
            ]);
        }
    }
    let tx = db.begin()?;
    let inserted = tx.bulk_insert(Table::Emotion, Table::Emotion.columns(), &rows)?;
    tx.commit()?;
    info!(scores = inserted, "imported emotion scores");
    Ok(inserted)
}
