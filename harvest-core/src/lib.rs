pub mod browser;
pub mod config;
pub mod crawler;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod models;
pub mod sqlite;
pub mod storage;

pub use config::{
    load_browser_config, load_harvest_config, BrowserConfig, ConfigBundle, HarvestConfig,
    SelectorSection,
};
pub use crawler::{
    CancellationFlag, CrawlError, CrawlResult, DiscoveryStats, HarvestReport, Harvester,
    LocationReport, StepOutcome, StoreResolution,
};
pub use error::{ConfigError, Result};
pub use models::{
    DatabaseStats, MenuCandidate, MenuPrice, MenuSummary, ReviewCandidate, StoreCandidate,
    StoreRecord,
};
pub use storage::{HarvestDatabase, StorageError};
