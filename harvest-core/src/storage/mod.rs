mod database;
mod emotion;
mod error;
mod transaction;

pub use database::{HarvestDatabase, HarvestDatabaseBuilder};
pub use emotion::{export_unscored_reviews, import_emotion_scores, UnscoredReview, EMOTION_TYPES};
pub use error::{StorageError, StorageResult};
pub use transaction::{StoreTransaction, Table};
