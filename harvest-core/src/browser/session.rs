use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::error::BrowserResult;

/// How to find an element. Deserialized from config as an externally tagged
/// table, e.g. `{ css = "li.UEzoS" }` or
/// `{ css_with_text = { css = "span", text = "번째" } }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    Xpath(String),
    Id(String),
    /// First match of `css` whose rendered text contains `text`.
    CssWithText { css: String, text: String },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Locator::Xpath(expression.into())
    }

    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    pub fn css_with_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Locator::CssWithText {
            css: css.into(),
            text: text.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "css:{selector}"),
            Locator::Xpath(expression) => write!(f, "xpath:{expression}"),
            Locator::Id(id) => write!(f, "id:{id}"),
            Locator::CssWithText { css, text } => write!(f, "css:{css}[text~={text}]"),
        }
    }
}

/// Opaque handle to an element owned by the session that produced it.
/// Handles go stale after navigation or a frame switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef(pub usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollPosition {
    pub offset: f64,
    pub max_offset: f64,
}

impl ScrollPosition {
    /// Within one unit of the bottom counts as the end of the list.
    pub fn at_end(&self) -> bool {
        self.offset >= self.max_offset - 1.0
    }
}

/// Scripts run by [`AutomationSession::execute_script`] are JavaScript
/// function declarations. With an element argument the function is invoked
/// with `this` bound to that element.
pub const SCROLL_TO_BOTTOM: &str = "function() { this.scrollTop = this.scrollHeight; }";
pub const CLICK_SCRIPT: &str = "function() { this.click(); }";

#[async_trait(?Send)]
pub trait AutomationSession {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;

    /// `Ok(None)` when nothing matched before `timeout`.
    async fn wait_for(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> BrowserResult<Option<ElementRef>>;

    /// Empty when nothing matched before `timeout`.
    async fn wait_for_all(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> BrowserResult<Vec<ElementRef>>;

    async fn find_within(
        &mut self,
        parent: ElementRef,
        locator: &Locator,
    ) -> BrowserResult<Option<ElementRef>>;

    async fn click(&mut self, element: ElementRef) -> BrowserResult<()>;

    /// Replaces the element's current value with `text`.
    async fn type_text(&mut self, element: ElementRef, text: &str) -> BrowserResult<()>;

    async fn press_key(&mut self, element: ElementRef, key: &str) -> BrowserResult<()>;

    /// DOM property of the given name (`innerText`, `src`, ...), falling back
    /// to the attribute.
    async fn attribute(&mut self, element: ElementRef, name: &str)
        -> BrowserResult<Option<String>>;

    async fn switch_to_frame(&mut self, frame: ElementRef) -> BrowserResult<()>;

    async fn switch_to_default_frame(&mut self) -> BrowserResult<()>;

    async fn execute_script(
        &mut self,
        script: &str,
        target: Option<ElementRef>,
    ) -> BrowserResult<Value>;

    async fn scroll_into_view(&mut self, element: ElementRef) -> BrowserResult<()>;

    async fn current_scroll_offset(&mut self, container: ElementRef)
        -> BrowserResult<ScrollPosition>;

    async fn quit(self: Box<Self>) -> BrowserResult<()>;
}

#[async_trait(?Send)]
pub trait SessionFactory {
    async fn create(&self) -> BrowserResult<Box<dyn AutomationSession>>;
}

/// Rendered text of the first `locator` match under `parent`, whitespace
/// preserved.
pub async fn text_within(
    session: &mut dyn AutomationSession,
    parent: ElementRef,
    locator: &Locator,
) -> BrowserResult<Option<String>> {
    match session.find_within(parent, locator).await? {
        Some(child) => session.attribute(child, "innerText").await,
        None => Ok(None),
    }
}
