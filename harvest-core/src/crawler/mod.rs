mod coordinator;
mod discovery;
mod error;
mod harvester;
mod outcome;
mod state_machine;
mod supervisor;

pub use coordinator::TransactionCoordinator;
pub use discovery::{DiscoveryStats, StoreDiscovery, MAX_RESULT_PAGES, MAX_SCROLL_ROUNDS};
pub use error::{CrawlError, CrawlResult};
pub use harvester::{CancellationFlag, HarvestReport, Harvester, LocationReport};
pub use outcome::{CrawlStep, StepOutcome, StoreCounts, StoreResolution};
pub use state_machine::{CrawlContext, CrawlState, StoreCrawl, CLICK_ATTEMPTS, MAX_REVIEW_ROUNDS};
pub use supervisor::ResilienceSupervisor;
