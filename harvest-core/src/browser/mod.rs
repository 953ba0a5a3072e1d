mod chromium;
mod error;
mod error_handler;
mod human;
mod pagination;
mod session;

pub use chromium::{ChromiumSession, ChromiumSessionFactory};
pub use error::{BrowserError, BrowserResult};
pub use error_handler::{ErrorCategorizer, FaultCategory};
pub use human::{pause, DelaySource, FixedDelay, HumanDelay};
pub use pagination::{PageAdvance, PaginationDriver, PaginationMode};
pub use session::{
    text_within, AutomationSession, ElementRef, Locator, ScrollPosition, SessionFactory,
    CLICK_SCRIPT, SCROLL_TO_BOTTOM,
};
