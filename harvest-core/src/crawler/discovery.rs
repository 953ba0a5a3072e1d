use serde::Serialize;
use tracing::{debug, info};

use crate::browser::{
    pause, text_within, AutomationSession, PageAdvance, PaginationDriver, PaginationMode,
};
use crate::dedup::{DedupIndex, DedupVerdict};
use crate::extract::extract_store_candidate;
use crate::models::{StoreCandidate, StoreItemSnapshot};
use crate::storage::HarvestDatabase;

use super::error::{CrawlError, CrawlResult};
use super::state_machine::CrawlContext;

/// Upper bound on result pages walked for one location.
pub const MAX_RESULT_PAGES: usize = 50;
/// Upper bound on scroll rounds within one result page.
pub const MAX_SCROLL_ROUNDS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    pub location: String,
    pub pages: usize,
    pub seen: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

impl DiscoveryStats {
    fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            ..Default::default()
        }
    }
}

/// Builds a location's store list from the map search results.
pub struct StoreDiscovery<'a> {
    ctx: CrawlContext<'a>,
    db: &'a HarvestDatabase,
}

impl<'a> StoreDiscovery<'a> {
    pub fn new(ctx: CrawlContext<'a>, db: &'a HarvestDatabase) -> Self {
        Self { ctx, db }
    }

    /// Walks every result page already loaded in `session` for `location`.
    /// Candidates are deduplicated against this pass first, then against
    /// the database; each page's new stores are committed together.
    pub async fn run(
        &self,
        session: &mut dyn AutomationSession,
        location: &str,
    ) -> CrawlResult<DiscoveryStats> {
        let ctx = self.ctx;
        let selectors = ctx.selectors;
        let mut stats = DiscoveryStats::new(location);
        let mut index: DedupIndex<(String, String)> = DedupIndex::new();

        pause(ctx.delays, ctx.politeness.page_settle()).await;
        let Some(frame) = session
            .wait_for(&selectors.search_frame, ctx.timeouts.element_wait())
            .await?
        else {
            return Err(CrawlError::MissingElement {
                what: "search results frame",
            });
        };
        session.switch_to_frame(frame).await?;

        let mut pages = PaginationDriver::new(
            PaginationMode::NextControl {
                control: selectors.next_page.clone(),
                disabled_attribute: Some(selectors.next_page_disabled_attribute.clone()),
            },
            ctx.delays,
            ctx.timeouts.element_wait(),
            ctx.politeness.page_settle(),
            ctx.politeness.base_delay(),
        );

        while stats.pages < MAX_RESULT_PAGES {
            stats.pages += 1;
            let mut scroll = PaginationDriver::new(
                PaginationMode::Scroll {
                    container: selectors.list_scroll_container.clone(),
                },
                ctx.delays,
                ctx.timeouts.element_wait(),
                ctx.politeness.scroll_settle(),
                ctx.politeness.base_delay(),
            );
            let rounds = scroll.exhaust(session, MAX_SCROLL_ROUNDS).await?;
            debug!(location, page = stats.pages, rounds, "result list fully loaded");

            let candidates = self.snapshot_page(session, location).await?;
            self.persist_page(&mut index, &mut stats, candidates)?;

            if pages.advance(session).await? == PageAdvance::End {
                break;
            }
        }

        info!(
            location,
            pages = stats.pages,
            seen = stats.seen,
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            "store discovery finished"
        );
        Ok(stats)
    }

    async fn snapshot_page(
        &self,
        session: &mut dyn AutomationSession,
        location: &str,
    ) -> CrawlResult<Vec<StoreCandidate>> {
        let selectors = self.ctx.selectors;
        let items = session
            .wait_for_all(&selectors.store_item, self.ctx.timeouts.element_wait())
            .await?;
        let mut candidates = Vec::with_capacity(items.len());
        for item in items {
            let snapshot = StoreItemSnapshot {
                name: text_within(session, item, &selectors.store_name).await?,
                category: text_within(session, item, &selectors.store_category).await?,
            };
            if let Some(candidate) = extract_store_candidate(&snapshot, location) {
                candidates.push(candidate);
            }
        }
        Ok(candidates)
    }

    fn persist_page(
        &self,
        index: &mut DedupIndex<(String, String)>,
        stats: &mut DiscoveryStats,
        candidates: Vec<StoreCandidate>,
    ) -> CrawlResult<()> {
        let tx = self.db.begin()?;
        let mut fresh = Vec::new();
        for candidate in candidates {
            stats.seen += 1;
            let key = (candidate.name.clone(), candidate.location.clone());
            match index.check(key, |(name, location)| tx.store_exists(name, location))? {
                DedupVerdict::New => fresh.push(candidate),
                DedupVerdict::SeenInSession | DedupVerdict::Persisted => stats.duplicates += 1,
            }
        }
        stats.inserted += tx.insert_stores(&fresh)?;
        tx.commit()?;
        Ok(())
    }
}
