use std::fmt;

use serde::Serialize;

use crate::browser::{BrowserError, ErrorCategorizer, FaultCategory};

use super::error::CrawlError;

/// Result of one crawl step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    /// The store exists under another location; its current-location row
    /// was removed.
    Duplicate,
    /// A required element never appeared.
    NotFound,
    /// Navigation or a script ran past its bound; the session is suspect.
    TransportFault,
    Failure,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Success => "success",
            StepOutcome::Duplicate => "duplicate",
            StepOutcome::NotFound => "not_found",
            StepOutcome::TransportFault => "transport_fault",
            StepOutcome::Failure => "failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success)
    }

    pub fn from_browser_error(error: &BrowserError) -> Self {
        match ErrorCategorizer::categorize(error) {
            FaultCategory::TransportTimeout => StepOutcome::TransportFault,
            FaultCategory::StructuralNotFound => StepOutcome::NotFound,
            FaultCategory::SessionEstablishment | FaultCategory::Unexpected => {
                StepOutcome::Failure
            }
        }
    }

    pub fn from_error(error: &CrawlError) -> Self {
        match error {
            CrawlError::Browser(err) => Self::from_browser_error(err),
            CrawlError::MissingElement { .. } => StepOutcome::NotFound,
            _ => StepOutcome::Failure,
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The step of a store crawl that produced a non-success outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStep {
    Locate,
    AddressImage,
    Menu,
    Reviews,
}

impl CrawlStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStep::Locate => "locate",
            CrawlStep::AddressImage => "address_image",
            CrawlStep::Menu => "menu",
            CrawlStep::Reviews => "reviews",
        }
    }
}

impl fmt::Display for CrawlStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub menus_inserted: usize,
    pub menus_skipped: usize,
    pub reviews_inserted: usize,
    pub reviews_skipped: usize,
    pub reviews_dropped: usize,
}

/// How one store ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StoreResolution {
    Committed(StoreCounts),
    /// Current-location row deleted in favour of `other_location`.
    Duplicate { other_location: String },
    RolledBack { step: CrawlStep, outcome: StepOutcome },
    /// Never got to the detail view; no transaction was opened.
    Skipped { outcome: StepOutcome },
    TransportFault { step: CrawlStep },
    Failed { reason: String },
}

impl StoreResolution {
    pub fn needs_new_session(&self) -> bool {
        matches!(self, StoreResolution::TransportFault { .. })
    }
}
