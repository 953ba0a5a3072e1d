use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::browser::{pause, DelaySource, HumanDelay, SessionFactory};
use crate::config::{HarvestConfig, SelectorSection};
use crate::storage::HarvestDatabase;

use super::coordinator::TransactionCoordinator;
use super::discovery::{DiscoveryStats, StoreDiscovery};
use super::error::CrawlResult;
use super::outcome::StoreResolution;
use super::state_machine::{CrawlContext, StoreCrawl};
use super::supervisor::ResilienceSupervisor;

/// Checked between stores; setting it lets the current store finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LocationReport {
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryStats>,
    pub stores: usize,
    pub committed: usize,
    pub duplicates: usize,
    pub rolled_back: usize,
    pub skipped: usize,
    pub failed: usize,
    pub timeouts: usize,
    pub menus_inserted: usize,
    pub reviews_inserted: usize,
    pub errors: Vec<String>,
}

impl LocationReport {
    fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, resolution: &StoreResolution) {
        match resolution {
            StoreResolution::Committed(counts) => {
                self.committed += 1;
                self.menus_inserted += counts.menus_inserted;
                self.reviews_inserted += counts.reviews_inserted;
            }
            StoreResolution::Duplicate { .. } => self.duplicates += 1,
            StoreResolution::RolledBack { .. } => self.rolled_back += 1,
            StoreResolution::Skipped { .. } => self.skipped += 1,
            StoreResolution::TransportFault { .. } => self.timeouts += 1,
            StoreResolution::Failed { reason } => {
                self.failed += 1;
                self.errors.push(reason.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub locations: Vec<LocationReport>,
    pub session_restarts: usize,
    pub cancelled: bool,
}

impl HarvestReport {
    fn started() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            locations: Vec::new(),
            session_restarts: 0,
            cancelled: false,
        }
    }

    fn finish(&mut self, restarts: usize) {
        self.session_restarts = restarts;
        self.finished_at = Some(Utc::now());
    }

    fn location_mut(&mut self, location: &str) -> &mut LocationReport {
        if let Some(position) = self
            .locations
            .iter()
            .position(|report| report.location == location)
        {
            return &mut self.locations[position];
        }
        self.locations.push(LocationReport::new(location));
        let last = self.locations.len() - 1;
        &mut self.locations[last]
    }
}

/// Sequential crawl over locations: store discovery, then per-store
/// enrichment, sharing one supervised automation session.
pub struct Harvester {
    db: HarvestDatabase,
    config: HarvestConfig,
    selectors: SelectorSection,
    factory: Box<dyn SessionFactory>,
    delays: Box<dyn DelaySource>,
    cancel: CancellationFlag,
}

impl Harvester {
    pub fn new(
        db: HarvestDatabase,
        config: HarvestConfig,
        selectors: SelectorSection,
        factory: Box<dyn SessionFactory>,
    ) -> Self {
        let delays = Box::new(HumanDelay::new(&config.politeness));
        Self {
            db,
            config,
            selectors,
            factory,
            delays,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_delays(mut self, delays: Box<dyn DelaySource>) -> Self {
        self.delays = delays;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn database(&self) -> &HarvestDatabase {
        &self.db
    }

    fn context(&self) -> CrawlContext<'_> {
        CrawlContext {
            selectors: &self.selectors,
            timeouts: &self.config.timeouts,
            politeness: &self.config.politeness,
            delays: self.delays.as_ref(),
        }
    }

    fn supervisor(&self) -> ResilienceSupervisor<'_> {
        ResilienceSupervisor::new(self.factory.as_ref(), self.config.crawl.max_session_restarts)
    }

    /// Locations given explicitly, or every configured one.
    pub fn resolve_locations(&self, requested: &[String]) -> Vec<String> {
        if requested.is_empty() {
            self.config.crawl.locations.clone()
        } else {
            requested.to_vec()
        }
    }

    pub async fn discover(&self, locations: &[String]) -> CrawlResult<HarvestReport> {
        let mut report = HarvestReport::started();
        let mut supervisor = self.supervisor();
        let result = self
            .discover_with(&mut supervisor, locations, &mut report)
            .await;
        report.finish(supervisor.restarts());
        supervisor.shutdown().await;
        result.map(|()| report)
    }

    pub async fn enrich(&self, locations: &[String]) -> CrawlResult<HarvestReport> {
        let mut report = HarvestReport::started();
        let mut supervisor = self.supervisor();
        let result = self
            .enrich_with(&mut supervisor, locations, &mut report)
            .await;
        report.finish(supervisor.restarts());
        supervisor.shutdown().await;
        result.map(|()| report)
    }

    /// Discovery followed by enrichment on the same session.
    pub async fn run(&self, locations: &[String]) -> CrawlResult<HarvestReport> {
        let mut report = HarvestReport::started();
        let mut supervisor = self.supervisor();
        let mut result = self
            .discover_with(&mut supervisor, locations, &mut report)
            .await;
        if result.is_ok() && !report.cancelled {
            result = self
                .enrich_with(&mut supervisor, locations, &mut report)
                .await;
        }
        report.finish(supervisor.restarts());
        supervisor.shutdown().await;
        result.map(|()| report)
    }

    async fn discover_with(
        &self,
        supervisor: &mut ResilienceSupervisor<'_>,
        locations: &[String],
        report: &mut HarvestReport,
    ) -> CrawlResult<()> {
        let discovery = StoreDiscovery::new(self.context(), &self.db);
        for location in locations {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let url = self
                .config
                .crawl
                .search_url(&self.config.crawl.discovery_query(location))?;
            if let Err(err) = supervisor.open(&url).await {
                if err.is_fatal() {
                    return Err(err);
                }
                warn!(location = %location, error = %err, "could not open search view");
                report.location_mut(location).errors.push(err.to_string());
                continue;
            }
            let session = supervisor.session().await?;
            let outcome = discovery.run(session, location).await;
            let entry = report.location_mut(location);
            match outcome {
                Ok(stats) => entry.discovery = Some(stats),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(location = %location, error = %err, "store discovery failed");
                    entry.errors.push(err.to_string());
                    if err.is_transport_timeout() {
                        supervisor.reset().await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn enrich_with(
        &self,
        supervisor: &mut ResilienceSupervisor<'_>,
        locations: &[String],
        report: &mut HarvestReport,
    ) -> CrawlResult<()> {
        let ctx = self.context();
        let coordinator = TransactionCoordinator::new(&self.db);
        for location in locations {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let stores = self
                .db
                .pending_stores(location, self.config.crawl.enrich_only_missing)?;
            let base_url = self.config.crawl.search_url(location)?;
            let entry = report.location_mut(location);
            entry.stores = stores.len();
            if stores.is_empty() {
                info!(location = %location, "nothing to enrich");
                continue;
            }

            if let Err(err) = supervisor.open(&base_url).await {
                if err.is_fatal() {
                    return Err(err);
                }
                warn!(location = %location, error = %err, "could not open base view; skipping location");
                entry.errors.push(err.to_string());
                continue;
            }
            let total = stores.len();
            for (index, store) in stores.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    warn!(location = %location, done = index, total, "cancelled between stores");
                    report.cancelled = true;
                    break;
                }
                info!(
                    location = %location,
                    progress = %format!("{}/{}", index + 1, total),
                    store = %store.name,
                    "enriching store"
                );
                let session = supervisor.session().await?;
                let mut crawl = StoreCrawl::new(ctx, store);
                let resolution = coordinator.run_store(session, &mut crawl).await;
                report.location_mut(location).record(&resolution);
                if resolution.needs_new_session() {
                    if let Err(err) = supervisor.recover(&base_url).await {
                        if err.is_fatal() {
                            return Err(err);
                        }
                        warn!(location = %location, error = %err, "could not reopen base view; abandoning location");
                        report.location_mut(location).errors.push(err.to_string());
                        break;
                    }
                }
                pause(ctx.delays, ctx.politeness.base_delay()).await;
            }

            let entry = report.location_mut(location);
            info!(
                location = %location,
                committed = entry.committed,
                duplicates = entry.duplicates,
                rolled_back = entry.rolled_back,
                skipped = entry.skipped,
                timeouts = entry.timeouts,
                "location complete"
            );
            if report.cancelled {
                break;
            }
        }
        Ok(())
    }
}

