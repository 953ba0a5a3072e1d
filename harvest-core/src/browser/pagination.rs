use std::time::Duration;

use tracing::{debug, trace};

use super::error::BrowserResult;
use super::human::{pause, DelaySource};
use super::session::{AutomationSession, Locator, SCROLL_TO_BOTTOM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAdvance {
    More,
    End,
}

#[derive(Debug, Clone)]
pub enum PaginationMode {
    /// Infinite-scroll list inside `container`.
    Scroll { container: Locator },
    /// A "next"/"more" control; absent or flagged by `disabled_attribute`
    /// means the list is exhausted.
    NextControl {
        control: Locator,
        disabled_attribute: Option<String>,
    },
}

/// Drives one list to its end. Built fresh for every list; nothing carries
/// over between stores.
pub struct PaginationDriver<'a> {
    mode: PaginationMode,
    delays: &'a dyn DelaySource,
    wait: Duration,
    settle: Duration,
    politeness: Duration,
}

impl<'a> PaginationDriver<'a> {
    pub fn new(
        mode: PaginationMode,
        delays: &'a dyn DelaySource,
        wait: Duration,
        settle: Duration,
        politeness: Duration,
    ) -> Self {
        Self {
            mode,
            delays,
            wait,
            settle,
            politeness,
        }
    }

    pub async fn advance(
        &mut self,
        session: &mut dyn AutomationSession,
    ) -> BrowserResult<PageAdvance> {
        match &self.mode {
            PaginationMode::Scroll { container } => {
                let Some(element) = session.wait_for(container, self.wait).await? else {
                    debug!(container = %container, "scroll container missing; treating list as ended");
                    return Ok(PageAdvance::End);
                };
                session
                    .execute_script(SCROLL_TO_BOTTOM, Some(element))
                    .await?;
                pause(self.delays, self.settle).await;
                let position = session.current_scroll_offset(element).await?;
                trace!(
                    offset = position.offset,
                    max = position.max_offset,
                    "scrolled list"
                );
                if position.at_end() {
                    return Ok(PageAdvance::End);
                }
                pause(self.delays, self.politeness).await;
                Ok(PageAdvance::More)
            }
            PaginationMode::NextControl {
                control,
                disabled_attribute,
            } => {
                let Some(element) = session.wait_for(control, self.wait).await? else {
                    debug!(control = %control, "no next control; list ended");
                    return Ok(PageAdvance::End);
                };
                if let Some(attribute) = disabled_attribute {
                    let flag = session.attribute(element, attribute).await?;
                    if flag.as_deref().map(str::trim) == Some("true") {
                        debug!(control = %control, "next control disabled; list ended");
                        return Ok(PageAdvance::End);
                    }
                }
                session.scroll_into_view(element).await?;
                session.click(element).await?;
                pause(self.delays, self.politeness).await;
                Ok(PageAdvance::More)
            }
        }
    }

    /// Advances until `End`, bounded by `max_rounds`. Returns the number of
    /// `More` results.
    pub async fn exhaust(
        &mut self,
        session: &mut dyn AutomationSession,
        max_rounds: usize,
    ) -> BrowserResult<usize> {
        let mut rounds = 0;
        while rounds < max_rounds {
            match self.advance(session).await? {
                PageAdvance::More => rounds += 1,
                PageAdvance::End => break,
            }
        }
        Ok(rounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::error::BrowserError;
    use crate::browser::human::FixedDelay;
    use crate::browser::session::{ElementRef, ScrollPosition};
    use async_trait::async_trait;
    use serde_json::Value;

    /// A list whose scroll height follows `heights`: each scroll-to-bottom
    /// moves the offset to the current height, then the next height (if any)
    /// is revealed. A next control exists for `pages - 1` clicks.
    struct ListSession {
        heights: Vec<f64>,
        revealed: usize,
        offset: f64,
        pages: usize,
        page: usize,
        disabled_on_last: bool,
        clicks: usize,
    }

    impl ListSession {
        fn scrolling(heights: Vec<f64>) -> Self {
            Self {
                heights,
                revealed: 0,
                offset: 0.0,
                pages: 1,
                page: 1,
                disabled_on_last: false,
                clicks: 0,
            }
        }

        fn paged(pages: usize, disabled_on_last: bool) -> Self {
            Self {
                heights: vec![0.0],
                revealed: 0,
                offset: 0.0,
                pages,
                page: 1,
                disabled_on_last,
                clicks: 0,
            }
        }
    }

    #[async_trait(?Send)]
    impl AutomationSession for ListSession {
        async fn navigate(&mut self, _url: &str) -> BrowserResult<()> {
            Ok(())
        }

        async fn wait_for(
            &mut self,
            locator: &Locator,
            _timeout: Duration,
        ) -> BrowserResult<Option<ElementRef>> {
            match locator {
                Locator::Id(_) => Ok(Some(ElementRef(0))),
                Locator::Css(_) => {
                    if self.page < self.pages || self.disabled_on_last {
                        Ok(Some(ElementRef(1)))
                    } else {
                        Ok(None)
                    }
                }
                _ => Ok(None),
            }
        }

        async fn wait_for_all(
            &mut self,
            _locator: &Locator,
            _timeout: Duration,
        ) -> BrowserResult<Vec<ElementRef>> {
            Ok(Vec::new())
        }

        async fn find_within(
            &mut self,
            _parent: ElementRef,
            _locator: &Locator,
        ) -> BrowserResult<Option<ElementRef>> {
            Ok(None)
        }

        async fn click(&mut self, _element: ElementRef) -> BrowserResult<()> {
            self.clicks += 1;
            self.page += 1;
            Ok(())
        }

        async fn type_text(&mut self, _element: ElementRef, _text: &str) -> BrowserResult<()> {
            Ok(())
        }

        async fn press_key(&mut self, _element: ElementRef, _key: &str) -> BrowserResult<()> {
            Ok(())
        }

        async fn attribute(
            &mut self,
            _element: ElementRef,
            _name: &str,
        ) -> BrowserResult<Option<String>> {
            if self.page >= self.pages {
                Ok(Some("true".into()))
            } else {
                Ok(Some("false".into()))
            }
        }

        async fn switch_to_frame(&mut self, _frame: ElementRef) -> BrowserResult<()> {
            Ok(())
        }

        async fn switch_to_default_frame(&mut self) -> BrowserResult<()> {
            Ok(())
        }

        async fn execute_script(
            &mut self,
            script: &str,
            _target: Option<ElementRef>,
        ) -> BrowserResult<Value> {
            if script != SCROLL_TO_BOTTOM {
                return Err(BrowserError::Script(script.to_string()));
            }
            self.offset = self.heights[self.revealed];
            if self.revealed + 1 < self.heights.len() {
                self.revealed += 1;
            }
            Ok(Value::Null)
        }

        async fn scroll_into_view(&mut self, _element: ElementRef) -> BrowserResult<()> {
            Ok(())
        }

        async fn current_scroll_offset(
            &mut self,
            _container: ElementRef,
        ) -> BrowserResult<ScrollPosition> {
            Ok(ScrollPosition {
                offset: self.offset,
                max_offset: self.heights[self.revealed],
            })
        }

        async fn quit(self: Box<Self>) -> BrowserResult<()> {
            Ok(())
        }
    }

    fn scroll_driver(delays: &FixedDelay) -> PaginationDriver<'_> {
        PaginationDriver::new(
            PaginationMode::Scroll {
                container: Locator::id("list"),
            },
            delays,
            Duration::from_millis(10),
            Duration::ZERO,
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn scroll_list_without_growth_ends_immediately() {
        let delays = FixedDelay::default();
        let mut session = ListSession::scrolling(vec![800.0]);
        let mut driver = scroll_driver(&delays);
        assert_eq!(driver.advance(&mut session).await.unwrap(), PageAdvance::End);
    }

    #[tokio::test]
    async fn scroll_list_that_stops_growing_ends_within_two_advances() {
        let delays = FixedDelay::default();
        let mut session = ListSession::scrolling(vec![800.0, 1600.0, 1600.0]);
        let mut driver = scroll_driver(&delays);
        assert_eq!(driver.advance(&mut session).await.unwrap(), PageAdvance::More);
        assert_eq!(driver.advance(&mut session).await.unwrap(), PageAdvance::End);

        let mut flat = ListSession::scrolling(vec![800.0, 800.0]);
        let mut driver = scroll_driver(&delays);
        let mut calls = 0;
        loop {
            calls += 1;
            if driver.advance(&mut flat).await.unwrap() == PageAdvance::End {
                break;
            }
        }
        assert!(calls <= 2);
    }

    #[tokio::test]
    async fn next_control_stops_when_disabled() {
        let delays = FixedDelay::default();
        let mut session = ListSession::paged(3, true);
        let mut driver = PaginationDriver::new(
            PaginationMode::NextControl {
                control: Locator::css("a.next"),
                disabled_attribute: Some("aria-disabled".into()),
            },
            &delays,
            Duration::from_millis(10),
            Duration::ZERO,
            Duration::ZERO,
        );
        let rounds = driver.exhaust(&mut session, 10).await.unwrap();
        assert_eq!(rounds, 2);
        assert_eq!(session.clicks, 2);
    }

    #[tokio::test]
    async fn next_control_stops_when_absent() {
        let delays = FixedDelay::default();
        let mut session = ListSession::paged(2, false);
        let mut driver = PaginationDriver::new(
            PaginationMode::NextControl {
                control: Locator::css("a.more"),
                disabled_attribute: None,
            },
            &delays,
            Duration::from_millis(10),
            Duration::ZERO,
            Duration::ZERO,
        );
        assert_eq!(driver.advance(&mut session).await.unwrap(), PageAdvance::More);
        assert_eq!(driver.advance(&mut session).await.unwrap(), PageAdvance::End);
    }
}
