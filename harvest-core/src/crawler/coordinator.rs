use tracing::{debug, error, info, warn};

use crate::browser::AutomationSession;
use crate::storage::{HarvestDatabase, StoreTransaction};

use super::outcome::{CrawlStep, StepOutcome, StoreResolution};
use super::state_machine::StoreCrawl;

/// Runs the detail steps of one store inside a single transaction on a
/// connection of its own. The connection is released before `run_store`
/// returns, whatever the outcome.
pub struct TransactionCoordinator<'a> {
    db: &'a HarvestDatabase,
}

impl<'a> TransactionCoordinator<'a> {
    pub fn new(db: &'a HarvestDatabase) -> Self {
        Self { db }
    }

    pub async fn run_store(
        &self,
        session: &mut dyn AutomationSession,
        crawl: &mut StoreCrawl<'_>,
    ) -> StoreResolution {
        match crawl.locate(session).await {
            StepOutcome::Success => {}
            StepOutcome::TransportFault => {
                return StoreResolution::TransportFault {
                    step: CrawlStep::Locate,
                }
            }
            outcome => return StoreResolution::Skipped { outcome },
        }

        let tx = match self.db.begin() {
            Ok(tx) => tx,
            Err(err) => {
                error!(store = %crawl.store().name, error = %err, "could not open store transaction");
                return StoreResolution::Failed {
                    reason: err.to_string(),
                };
            }
        };

        match crawl.address_image(session, &tx).await {
            StepOutcome::Success => {}
            StepOutcome::Duplicate => {
                let other_location = crawl.duplicate_of().unwrap_or_default().to_string();
                return match tx.commit() {
                    Ok(()) => StoreResolution::Duplicate { other_location },
                    Err(err) => {
                        error!(store = %crawl.store().name, error = %err, "commit of duplicate removal failed");
                        StoreResolution::Failed {
                            reason: err.to_string(),
                        }
                    }
                };
            }
            outcome => return abandon(tx, crawl, CrawlStep::AddressImage, outcome),
        }

        let outcome = crawl.menu(session, &tx).await;
        if !outcome.is_success() {
            return abandon(tx, crawl, CrawlStep::Menu, outcome);
        }

        let outcome = crawl.reviews(session, &tx).await;
        if !outcome.is_success() {
            return abandon(tx, crawl, CrawlStep::Reviews, outcome);
        }

        match tx.commit() {
            Ok(()) => {
                crawl.finish();
                let counts = crawl.counts();
                info!(
                    store = %crawl.store().name,
                    location = %crawl.store().location,
                    menus = counts.menus_inserted,
                    reviews = counts.reviews_inserted,
                    "store committed"
                );
                StoreResolution::Committed(counts)
            }
            Err(err) => {
                error!(store = %crawl.store().name, error = %err, "store commit failed");
                StoreResolution::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}

fn abandon(
    tx: StoreTransaction,
    crawl: &StoreCrawl<'_>,
    step: CrawlStep,
    outcome: StepOutcome,
) -> StoreResolution {
    match tx.rollback() {
        Ok(()) => debug!(store = %crawl.store().name, step = %step, "store transaction rolled back"),
        Err(err) => warn!(store = %crawl.store().name, error = %err, "rollback failed"),
    }
    warn!(
        store = %crawl.store().name,
        step = %step,
        outcome = %outcome,
        "store abandoned"
    );
    if outcome == StepOutcome::TransportFault {
        StoreResolution::TransportFault { step }
    } else {
        StoreResolution::RolledBack { step, outcome }
    }
}
