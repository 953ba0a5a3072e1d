use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("database path not configured")]
    MissingPath,
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("column {column} does not belong to table {table}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("row {row} has {found} values, expected {expected}")]
    RowShape {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("transaction already finished")]
    Finished,
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
