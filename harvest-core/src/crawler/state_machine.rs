use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::browser::{
    pause, text_within, AutomationSession, BrowserResult, DelaySource, ElementRef, PageAdvance,
    PaginationDriver, PaginationMode,
};
use crate::config::{MenuShape, PolitenessSection, SelectorSection, TimeoutSection};
use crate::dedup::DedupIndex;
use crate::extract::{extract_menu_candidate, extract_review_candidate};
use crate::models::{MenuItemSnapshot, ReviewSnapshot, StoreDetails, StoreRecord};
use crate::storage::StoreTransaction;

use super::error::{CrawlError, CrawlResult};
use super::outcome::{CrawlStep, StepOutcome, StoreCounts};

/// Times the top search result is clicked before giving up.
pub const CLICK_ATTEMPTS: usize = 3;
/// Upper bound on "more reviews" rounds for one store.
pub const MAX_REVIEW_ROUNDS: usize = 500;
/// Consecutive rounds without new reviews before the list is treated as done.
const REVIEW_STALL_LIMIT: usize = 2;
const NO_RESULT_PROBE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    Searching,
    IframeSwitch,
    DetailFrame,
    AddressImage,
    Menu,
    Reviews,
    Done,
    Aborted,
}

/// Everything a crawl step needs besides the session and the transaction.
#[derive(Clone, Copy)]
pub struct CrawlContext<'a> {
    pub selectors: &'a SelectorSection,
    pub timeouts: &'a TimeoutSection,
    pub politeness: &'a PolitenessSection,
    pub delays: &'a dyn DelaySource,
}

impl<'a> CrawlContext<'a> {
    fn wait(&self) -> Duration {
        self.timeouts.element_wait()
    }

    async fn settle(&self) {
        pause(self.delays, self.politeness.page_settle()).await;
    }

    async fn breathe(&self) {
        pause(self.delays, self.politeness.base_delay()).await;
    }
}

/// Walks one store from the search box to its review list. Built fresh for
/// every store.
pub struct StoreCrawl<'a> {
    ctx: CrawlContext<'a>,
    store: &'a StoreRecord,
    state: CrawlState,
    trail: Vec<CrawlState>,
    counts: StoreCounts,
    duplicate_of: Option<String>,
}

impl<'a> StoreCrawl<'a> {
    pub fn new(ctx: CrawlContext<'a>, store: &'a StoreRecord) -> Self {
        Self {
            ctx,
            store,
            state: CrawlState::Searching,
            trail: vec![CrawlState::Searching],
            counts: StoreCounts::default(),
            duplicate_of: None,
        }
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn trail(&self) -> &[CrawlState] {
        &self.trail
    }

    pub fn counts(&self) -> StoreCounts {
        self.counts
    }

    /// Location that already owns this store, once AddressImage reported
    /// `Duplicate`.
    pub fn duplicate_of(&self) -> Option<&str> {
        self.duplicate_of.as_deref()
    }

    pub fn store(&self) -> &StoreRecord {
        self.store
    }

    fn enter(&mut self, state: CrawlState) {
        debug!(store = %self.store.name, from = ?self.state, to = ?state, "crawl transition");
        self.state = state;
        self.trail.push(state);
    }

    /// Marks the crawl finished once the detail steps all succeeded.
    pub fn finish(&mut self) {
        self.enter(CrawlState::Done);
    }

    fn settle_outcome(&mut self, step: CrawlStep, result: CrawlResult<StepOutcome>) -> StepOutcome {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                let outcome = StepOutcome::from_error(&err);
                match outcome {
                    StepOutcome::NotFound => {
                        error!(store = %self.store.name, step = %step, error = %err, "required element missing")
                    }
                    StepOutcome::TransportFault => {
                        warn!(store = %self.store.name, step = %step, error = %err, "transport timeout")
                    }
                    _ => warn!(store = %self.store.name, step = %step, error = %err, "step failed"),
                }
                outcome
            }
        };
        if !outcome.is_success() {
            self.enter(CrawlState::Aborted);
        }
        outcome
    }

    /// Searching, IframeSwitch and DetailFrame: leaves the session inside the
    /// store's detail frame on success.
    pub async fn locate(&mut self, session: &mut dyn AutomationSession) -> StepOutcome {
        let result = self.locate_inner(session).await;
        self.settle_outcome(CrawlStep::Locate, result)
    }

    async fn locate_inner(&mut self, session: &mut dyn AutomationSession) -> CrawlResult<StepOutcome> {
        let ctx = self.ctx;
        let selectors = ctx.selectors;

        let mut in_results = self.submit_search(session).await?;
        if in_results && self.no_result_shown(session).await? {
            info!(store = %self.store.name, "no matching business; searching again");
            in_results = self.submit_search(session).await?;
            if in_results && self.no_result_shown(session).await? {
                error!(store = %self.store.name, "search returned no matching business");
                return Ok(StepOutcome::NotFound);
            }
        }

        self.enter(CrawlState::IframeSwitch);
        if in_results {
            let mut clicked = false;
            for attempt in 1..=CLICK_ATTEMPTS {
                let Some(top) = session.wait_for(&selectors.top_result, ctx.wait()).await? else {
                    debug!(store = %self.store.name, attempt, "top result not present");
                    continue;
                };
                match session.click(top).await {
                    Ok(()) => {
                        clicked = true;
                        break;
                    }
                    Err(err) if err.is_transport_timeout() => return Err(err.into()),
                    Err(err) => {
                        debug!(store = %self.store.name, attempt, error = %err, "top result click failed");
                        ctx.breathe().await;
                    }
                }
            }
            if !clicked {
                return Err(CrawlError::MissingElement { what: "top search result" });
            }
            ctx.settle().await;
        }
        session.switch_to_default_frame().await?;

        self.enter(CrawlState::DetailFrame);
        let Some(detail) = session.wait_for(&selectors.detail_frame, ctx.wait()).await? else {
            return Err(CrawlError::MissingElement { what: "detail frame" });
        };
        session.switch_to_frame(detail).await?;
        ctx.settle().await;
        Ok(StepOutcome::Success)
    }

    /// Types the store name and submits. True when a results frame opened and
    /// the session is now inside it.
    async fn submit_search(&mut self, session: &mut dyn AutomationSession) -> CrawlResult<bool> {
        let ctx = self.ctx;
        session.switch_to_default_frame().await?;
        let Some(search_box) = session.wait_for(&ctx.selectors.search_box, ctx.wait()).await? else {
            return Err(CrawlError::MissingElement { what: "search box" });
        };
        session.type_text(search_box, &self.store.name).await?;
        session.press_key(search_box, "Enter").await?;
        ctx.settle().await;

        match session
            .wait_for(&ctx.selectors.search_frame, ctx.wait())
            .await?
        {
            Some(frame) => {
                session.switch_to_frame(frame).await?;
                Ok(true)
            }
            None => {
                debug!(store = %self.store.name, "no results frame; expecting a direct hit");
                Ok(false)
            }
        }
    }

    async fn no_result_shown(&self, session: &mut dyn AutomationSession) -> CrawlResult<bool> {
        Ok(session
            .wait_for(&self.ctx.selectors.no_result, NO_RESULT_PROBE)
            .await?
            .is_some())
    }

    /// Reads address and image, resolving a cross-location duplicate by
    /// deleting this location's row.
    pub async fn address_image(
        &mut self,
        session: &mut dyn AutomationSession,
        tx: &StoreTransaction,
    ) -> StepOutcome {
        self.enter(CrawlState::AddressImage);
        let result = self.address_image_inner(session, tx).await;
        // A store that reached its detail frame but lacks address or image is
        // a failed extraction, not a missing store.
        match self.settle_outcome(CrawlStep::AddressImage, result) {
            StepOutcome::NotFound => StepOutcome::Failure,
            outcome => outcome,
        }
    }

    async fn address_image_inner(
        &mut self,
        session: &mut dyn AutomationSession,
        tx: &StoreTransaction,
    ) -> CrawlResult<StepOutcome> {
        let ctx = self.ctx;
        let Some(image) = session.wait_for(&ctx.selectors.store_image, ctx.wait()).await? else {
            return Err(CrawlError::MissingElement { what: "store image" });
        };
        let image = session.attribute(image, "src").await?;
        let Some(address) = session
            .wait_for(&ctx.selectors.store_address, ctx.wait())
            .await?
        else {
            return Err(CrawlError::MissingElement { what: "store address" });
        };
        let address = session
            .attribute(address, "innerText")
            .await?
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        let Some(address) = address else {
            return Err(CrawlError::MissingElement { what: "store address" });
        };

        let store = self.store;
        if let Some(other) = tx.cross_location_duplicate(&store.name, &address, &store.location)? {
            tx.delete_store(&store.name, &store.location)?;
            info!(
                store = %store.name,
                location = %store.location,
                kept = %other,
                "store already harvested under another location; removed this copy"
            );
            self.duplicate_of = Some(other);
            return Ok(StepOutcome::Duplicate);
        }

        tx.update_store_details(
            store.idx,
            &StoreDetails {
                address: Some(address),
                image,
            },
        )?;
        Ok(StepOutcome::Success)
    }

    pub async fn menu(
        &mut self,
        session: &mut dyn AutomationSession,
        tx: &StoreTransaction,
    ) -> StepOutcome {
        self.enter(CrawlState::Menu);
        let result = self.menu_inner(session, tx).await;
        self.settle_outcome(CrawlStep::Menu, result)
    }

    async fn menu_inner(
        &mut self,
        session: &mut dyn AutomationSession,
        tx: &StoreTransaction,
    ) -> CrawlResult<StepOutcome> {
        let ctx = self.ctx;
        let Some(tab) = session.wait_for(&ctx.selectors.menu_tab, ctx.wait()).await? else {
            return Err(CrawlError::MissingElement { what: "menu tab" });
        };
        session.click(tab).await?;
        ctx.settle().await;

        let Some((shape, items)) = self.first_menu_shape(session).await? else {
            return Err(CrawlError::MissingElement { what: "menu items" });
        };
        debug!(store = %self.store.name, shape = %shape.label, items = items.len(), "menu shape matched");

        let mut index: DedupIndex<String> = DedupIndex::new();
        let mut fresh = Vec::new();
        for item in items {
            let snapshot = MenuItemSnapshot {
                name: text_within(session, item, &shape.name).await?,
                price: text_within(session, item, &shape.price).await?,
            };
            let Some(candidate) = extract_menu_candidate(&snapshot) else {
                continue;
            };
            let verdict = index.check(candidate.name.clone(), |name| {
                tx.menu_exists(self.store.idx, name)
            })?;
            if verdict.is_new() {
                fresh.push(candidate);
            } else {
                self.counts.menus_skipped += 1;
            }
        }

        if fresh.is_empty() {
            debug!(store = %self.store.name, "no new menu items");
        } else {
            self.counts.menus_inserted += tx.insert_menus(self.store.idx, &self.store.location, &fresh)?;
        }
        Ok(StepOutcome::Success)
    }

    /// Tries each configured menu shape in order; the first with items wins.
    async fn first_menu_shape(
        &self,
        session: &mut dyn AutomationSession,
    ) -> CrawlResult<Option<(&'a MenuShape, Vec<ElementRef>)>> {
        let ctx = self.ctx;
        for shape in &ctx.selectors.menu_shapes {
            let items = session.wait_for_all(&shape.item, ctx.wait()).await?;
            if !items.is_empty() {
                return Ok(Some((shape, items)));
            }
            debug!(store = %self.store.name, shape = %shape.label, "menu shape empty");
        }
        Ok(None)
    }

    pub async fn reviews(
        &mut self,
        session: &mut dyn AutomationSession,
        tx: &StoreTransaction,
    ) -> StepOutcome {
        self.enter(CrawlState::Reviews);
        let result = self.reviews_inner(session, tx).await;
        self.settle_outcome(CrawlStep::Reviews, result)
    }

    async fn reviews_inner(
        &mut self,
        session: &mut dyn AutomationSession,
        tx: &StoreTransaction,
    ) -> CrawlResult<StepOutcome> {
        let ctx = self.ctx;
        let selectors = ctx.selectors;
        let Some(tab) = session.wait_for(&selectors.review_tab, ctx.wait()).await? else {
            return Err(CrawlError::MissingElement { what: "review tab" });
        };
        session.click(tab).await?;
        ctx.settle().await;

        match session
            .wait_for(&selectors.review_recent_order, ctx.wait())
            .await?
        {
            Some(order) => {
                session.click(order).await?;
                ctx.settle().await;
            }
            None => warn!(store = %self.store.name, "recent-order control missing; keeping default order"),
        }

        let mut more = PaginationDriver::new(
            PaginationMode::NextControl {
                control: selectors.review_more.clone(),
                disabled_attribute: None,
            },
            ctx.delays,
            ctx.wait(),
            ctx.politeness.scroll_settle(),
            ctx.politeness.base_delay(),
        );

        let mut processed = 0usize;
        let mut stalls = 0usize;
        for _ in 0..MAX_REVIEW_ROUNDS {
            let items = session.wait_for_all(&selectors.review_item, ctx.wait()).await?;
            if items.len() > processed {
                stalls = 0;
                for item in &items[processed..] {
                    self.store_review(session, tx, *item).await?;
                }
                processed = items.len();
            } else {
                stalls += 1;
                if stalls >= REVIEW_STALL_LIMIT {
                    debug!(store = %self.store.name, "review list stopped growing");
                    break;
                }
            }

            if more.advance(session).await? == PageAdvance::End {
                break;
            }
        }

        info!(
            store = %self.store.name,
            reviews = processed,
            inserted = self.counts.reviews_inserted,
            "reviews collected"
        );
        Ok(StepOutcome::Success)
    }

    async fn store_review(
        &mut self,
        session: &mut dyn AutomationSession,
        tx: &StoreTransaction,
        item: ElementRef,
    ) -> CrawlResult<()> {
        let snapshot = match read_review(session, self.ctx.selectors, item).await {
            Ok(snapshot) => snapshot,
            Err(err) if err.is_transport_timeout() => return Err(err.into()),
            Err(err) => {
                warn!(store = %self.store.name, error = %err, "unreadable review dropped");
                self.counts.reviews_dropped += 1;
                return Ok(());
            }
        };
        let Some(review) = extract_review_candidate(&snapshot) else {
            self.counts.reviews_dropped += 1;
            return Ok(());
        };
        if tx.review_exists(self.store.idx, &review)? {
            debug!(store = %self.store.name, date = %review.date, "review already stored");
            self.counts.reviews_skipped += 1;
            return Ok(());
        }
        match tx.insert_review(self.store.idx, &self.store.location, &review)? {
            Some(_) => self.counts.reviews_inserted += 1,
            None => self.counts.reviews_skipped += 1,
        }
        Ok(())
    }
}

async fn read_review(
    session: &mut dyn AutomationSession,
    selectors: &SelectorSection,
    item: ElementRef,
) -> BrowserResult<ReviewSnapshot> {
    Ok(ReviewSnapshot {
        content: text_within(session, item, &selectors.review_content).await?,
        visit: text_within(session, item, &selectors.review_visit).await?,
        date: text_within(session, item, &selectors.review_date).await?,
        writer: text_within(session, item, &selectors.review_writer).await?,
    })
}
