use thiserror::Error;

use crate::browser::BrowserError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid search url: {0}")]
    Url(#[from] url::ParseError),
    #[error("could not establish automation session: {0}")]
    SessionEstablishment(#[source] BrowserError),
    #[error("session restart budget of {limit} exhausted")]
    RestartBudgetExhausted { limit: usize },
    #[error("required element missing: {what}")]
    MissingElement { what: &'static str },
}

impl CrawlError {
    pub fn is_transport_timeout(&self) -> bool {
        matches!(self, CrawlError::Browser(err) if err.is_transport_timeout())
    }

    /// Errors that end the whole run rather than one store or location.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrawlError::SessionEstablishment(_) | CrawlError::RestartBudgetExhausted { .. }
        )
    }
}

pub type CrawlResult<T> = std::result::Result<T, CrawlError>;
