use thiserror::Error;

use super::error_handler::{ErrorCategorizer, FaultCategory};

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("script failed: {0}")]
    Script(String),
    #[error("stale element handle {0}")]
    StaleElement(usize),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BrowserError {
    /// Navigation or script execution ran past its bound; the session is
    /// presumed unusable.
    pub fn is_transport_timeout(&self) -> bool {
        ErrorCategorizer::categorize(self) == FaultCategory::TransportTimeout
    }
}

impl From<tokio::task::JoinError> for BrowserError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrowserError::Unexpected(err.to_string())
    }
}
