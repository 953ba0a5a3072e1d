use serde::Serialize;

use super::error::BrowserError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultCategory {
    /// A required element never showed up.
    StructuralNotFound,
    /// Navigation or script execution exceeded its bound.
    TransportTimeout,
    /// Browser could not be started or configured.
    SessionEstablishment,
    Unexpected,
}

pub struct ErrorCategorizer;

impl ErrorCategorizer {
    pub fn categorize(error: &BrowserError) -> FaultCategory {
        match error {
            BrowserError::Timeout(_) => FaultCategory::TransportTimeout,
            BrowserError::Launch(_) | BrowserError::Configuration(_) => {
                FaultCategory::SessionEstablishment
            }
            BrowserError::StaleElement(_) => FaultCategory::StructuralNotFound,
            BrowserError::Cdp(err) => {
                let text = err.to_string().to_lowercase();
                if mentions_timeout(&text) {
                    FaultCategory::TransportTimeout
                } else if is_missing_node(&text) {
                    FaultCategory::StructuralNotFound
                } else {
                    FaultCategory::Unexpected
                }
            }
            BrowserError::Script(message) | BrowserError::Unexpected(message) => {
                if mentions_timeout(&message.to_lowercase()) {
                    FaultCategory::TransportTimeout
                } else {
                    FaultCategory::Unexpected
                }
            }
        }
    }
}

fn mentions_timeout(text: &str) -> bool {
    text.contains("timeout") || text.contains("timed out")
}

/// CDP's wording for a query that matched nothing.
pub(crate) fn is_missing_node(text: &str) -> bool {
    let text = text.to_lowercase();
    text.contains("could not find node") || text.contains("no node")
}
