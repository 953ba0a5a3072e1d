use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{BrowserConfig, TimeoutSection};

use super::error::{BrowserError, BrowserResult};
use super::error_handler::is_missing_node;
use super::session::{
    AutomationSession, ElementRef, Locator, ScrollPosition, SessionFactory, CLICK_SCRIPT,
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const MARK_ATTRIBUTE: &str = "data-harvest-mark";

/// Launches one Chromium process per session.
#[derive(Debug, Clone)]
pub struct ChromiumSessionFactory {
    config: Arc<BrowserConfig>,
    timeouts: TimeoutSection,
}

impl ChromiumSessionFactory {
    pub fn new(config: BrowserConfig, timeouts: TimeoutSection) -> Self {
        Self {
            config: Arc::new(config),
            timeouts,
        }
    }

    fn build_chromium_config(&self) -> BrowserResult<ChromiumConfig> {
        let chromium = &self.config.chromium;
        let flags = &self.config.flags;
        let mut builder = ChromiumConfig::builder()
            .request_timeout(self.timeouts.navigation());
        if !chromium.executable_path.is_empty() {
            builder = builder.chrome_executable(&chromium.executable_path);
        }
        if !chromium.headless {
            builder = builder.with_head();
        }
        if !chromium.sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = Vec::new();
        if chromium.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        if let Some(agent) = &flags.user_agent {
            args.push(format!("--user-agent={agent}"));
        }
        if let Some(lang) = &flags.lang {
            args.push(format!("--lang={lang}"));
        }
        if let Some(accept) = &flags.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }
        for feature in &flags.disable_blink_features {
            args.push(format!("--disable-blink-features={feature}"));
        }
        if flags.disable_automation_controlled {
            args.push("--disable-features=AutomationControlled".into());
        }
        args.push("--no-first-run".into());
        args.push("--password-store=basic".into());
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }

    async fn configure_page(&self, page: &Page) -> BrowserResult<()> {
        let flags = &self.config.flags;
        if flags.disable_automation_controlled {
            match &flags.user_agent {
                Some(agent) => page.enable_stealth_mode_with_agent(agent).await?,
                None => page.enable_stealth_mode().await?,
            }
        }
        if let Some(agent) = &flags.user_agent {
            let mut params = SetUserAgentOverrideParams::builder().user_agent(agent.clone());
            if let Some(accept) = &flags.accept_language {
                params = params.accept_language(accept.clone());
            }
            page.set_user_agent(params.build().map_err(BrowserError::Configuration)?)
                .await?;
        }
        if let Some(lang) = &flags.lang {
            let lang = serde_json::to_string(lang)
                .map_err(|err| BrowserError::Configuration(err.to_string()))?;
            let script = format!(
                "Object.defineProperty(navigator, 'language', {{ get: () => {lang} }});\nObject.defineProperty(navigator, 'languages', {{ get: () => [{lang}] }});"
            );
            page.evaluate_on_new_document(
                AddScriptToEvaluateOnNewDocumentParams::builder()
                    .source(script)
                    .build()
                    .map_err(BrowserError::Configuration)?,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl SessionFactory for ChromiumSessionFactory {
    async fn create(&self) -> BrowserResult<Box<dyn AutomationSession>> {
        let config = self.build_chromium_config()?;
        info!(
            headless = self.config.chromium.headless,
            "launching chromium session"
        );
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });
        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                handler_task.abort();
                return Err(BrowserError::Launch(err.to_string()));
            }
        };
        self.configure_page(&page).await?;
        Ok(Box::new(ChromiumSession {
            browser,
            handler_task: Some(handler_task),
            page,
            elements: Vec::new(),
            frames: Vec::new(),
            root_url: None,
            next_mark: 0,
            timeouts: self.timeouts.clone(),
        }))
    }
}

/// Frames are entered by loading the iframe's document as the page and left
/// by reloading the document that was showing before the outermost frame was
/// entered. Element handles are indexes into `elements` and are invalidated
/// by every navigation.
pub struct ChromiumSession {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    page: Page,
    elements: Vec<Option<Element>>,
    frames: Vec<FrameEntry>,
    root_url: Option<String>,
    next_mark: u64,
    timeouts: TimeoutSection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FrameEntry {
    /// Address of the document the frame was entered from.
    parent_url: Option<String>,
    src: String,
}

/// Where leaving every frame should land: the document showing before the
/// outermost frame was entered, falling back to the last navigation.
fn default_frame_url(frames: &[FrameEntry], root_url: Option<&str>) -> Option<String> {
    frames
        .first()
        .and_then(|entry| entry.parent_url.clone())
        .or_else(|| root_url.map(str::to_string))
}

#[derive(Deserialize)]
struct RawScroll {
    offset: f64,
    max: f64,
}

impl ChromiumSession {
    fn register(&mut self, element: Element) -> ElementRef {
        self.elements.push(Some(element));
        ElementRef(self.elements.len() - 1)
    }

    fn element(&self, handle: ElementRef) -> BrowserResult<&Element> {
        self.elements
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(BrowserError::StaleElement(handle.0))
    }

    fn invalidate_handles(&mut self) {
        for slot in self.elements.iter_mut() {
            *slot = None;
        }
    }

    fn next_token(&mut self) -> String {
        self.next_mark += 1;
        format!("m{}", self.next_mark)
    }

    async fn load(&mut self, url: &str) -> BrowserResult<()> {
        self.invalidate_handles();
        match timeout(self.timeouts.navigation(), self.page.goto(url)).await {
            Ok(result) => {
                result?;
                Ok(())
            }
            Err(_) => Err(BrowserError::Timeout(format!("navigation to {url}"))),
        }
    }

    async fn call_on(&self, handle: ElementRef, function: &str) -> BrowserResult<Value> {
        let element = self.element(handle)?;
        match timeout(self.timeouts.script(), element.call_js_fn(function, false)).await {
            Ok(result) => Ok(result?.result.value.unwrap_or(Value::Null)),
            Err(_) => Err(BrowserError::Timeout("script on element".into())),
        }
    }

    async fn evaluate(&self, function: &str) -> BrowserResult<Value> {
        let expression = format!("({function}).call(document)");
        match timeout(self.timeouts.script(), self.page.evaluate(expression)).await {
            Ok(result) => Ok(result?.value().cloned().unwrap_or(Value::Null)),
            Err(_) => Err(BrowserError::Timeout("page script".into())),
        }
    }

    /// Resolves every match of `locator` under the document (or `parent`).
    async fn locate(
        &mut self,
        locator: &Locator,
        parent: Option<ElementRef>,
        all: bool,
    ) -> BrowserResult<Vec<ElementRef>> {
        let css = match locator {
            Locator::Css(selector) => selector.clone(),
            Locator::Id(id) => format!("[id={}]", js_literal(id)?),
            Locator::Xpath(_) | Locator::CssWithText { .. } => {
                let token = self.next_token();
                let script = mark_script(locator, &token, all)?;
                let marked = match parent {
                    Some(handle) => self.call_on(handle, &script).await?,
                    None => self.evaluate(&script).await?,
                };
                if marked.as_u64().unwrap_or(0) == 0 {
                    return Ok(Vec::new());
                }
                format!("[{MARK_ATTRIBUTE}=\"{token}\"]")
            }
        };
        let found = match parent {
            Some(handle) => {
                let element = self.element(handle)?;
                if all {
                    element.find_elements(css).await
                } else {
                    element.find_element(css).await.map(|found| vec![found])
                }
            }
            None => {
                if all {
                    self.page.find_elements(css).await
                } else {
                    self.page.find_element(css).await.map(|found| vec![found])
                }
            }
        };
        // chromiumoxide reports "no match" as an error.
        let found = match found {
            Ok(found) => found,
            Err(err) if is_missing_node(&err.to_string()) => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(found.into_iter().map(|element| self.register(element)).collect())
    }

    async fn poll(
        &mut self,
        locator: &Locator,
        wait: Duration,
        all: bool,
    ) -> BrowserResult<Vec<ElementRef>> {
        let deadline = Instant::now() + wait;
        loop {
            let found = self.locate(locator, None, all).await?;
            if !found.is_empty() || Instant::now() >= deadline {
                return Ok(found);
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

fn js_literal(text: &str) -> BrowserResult<String> {
    serde_json::to_string(text).map_err(|err| BrowserError::Script(err.to_string()))
}

/// Function declaration that tags matches of an xpath or text-filtered
/// locator under `this` and returns how many were tagged.
fn mark_script(locator: &Locator, token: &str, all: bool) -> BrowserResult<String> {
    let collect = match locator {
        Locator::Xpath(expression) => format!(
            "const snapshot = doc.evaluate({}, root, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
             for (let i = 0; i < snapshot.snapshotLength; i++) {{ nodes.push(snapshot.snapshotItem(i)); }}",
            js_literal(expression)?
        ),
        Locator::CssWithText { css, text } => format!(
            "const needle = {};
             nodes = Array.from(root.querySelectorAll({})).filter(
                 (node) => (node.innerText || node.textContent || '').includes(needle));",
            js_literal(text)?,
            js_literal(css)?
        ),
        other => {
            return Err(BrowserError::Unexpected(format!(
                "locator {other} does not need marking"
            )))
        }
    };
    Ok(format!(
        "function() {{
            const root = this;
            const doc = root.ownerDocument || root;
            let nodes = [];
            {collect}
            nodes = nodes.filter((node) => node && node.nodeType === 1);
            if (!{all}) {{ nodes = nodes.slice(0, 1); }}
            nodes.forEach((node) => node.setAttribute('{MARK_ATTRIBUTE}', {token}));
            return nodes.length;
        }}",
        token = js_literal(token)?,
    ))
}

#[async_trait(?Send)]
impl AutomationSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        debug!(url, "navigating");
        self.frames.clear();
        self.load(url).await?;
        self.root_url = Some(url.to_string());
        Ok(())
    }

    async fn wait_for(
        &mut self,
        locator: &Locator,
        wait: Duration,
    ) -> BrowserResult<Option<ElementRef>> {
        Ok(self.poll(locator, wait, false).await?.into_iter().next())
    }

    async fn wait_for_all(
        &mut self,
        locator: &Locator,
        wait: Duration,
    ) -> BrowserResult<Vec<ElementRef>> {
        self.poll(locator, wait, true).await
    }

    async fn find_within(
        &mut self,
        parent: ElementRef,
        locator: &Locator,
    ) -> BrowserResult<Option<ElementRef>> {
        Ok(self
            .locate(locator, Some(parent), false)
            .await?
            .into_iter()
            .next())
    }

    async fn click(&mut self, element: ElementRef) -> BrowserResult<()> {
        let native = self.element(element)?.click().await.map(|_| ());
        if let Err(err) = native {
            debug!(error = %err, "native click failed; dispatching script click");
            self.call_on(element, CLICK_SCRIPT).await?;
        }
        Ok(())
    }

    async fn type_text(&mut self, element: ElementRef, text: &str) -> BrowserResult<()> {
        self.call_on(element, "function() { this.focus(); this.value = ''; }")
            .await?;
        self.element(element)?.type_str(text).await?;
        Ok(())
    }

    async fn press_key(&mut self, element: ElementRef, key: &str) -> BrowserResult<()> {
        self.element(element)?.press_key(key).await?;
        Ok(())
    }

    async fn attribute(
        &mut self,
        element: ElementRef,
        name: &str,
    ) -> BrowserResult<Option<String>> {
        let name = js_literal(name)?;
        let script = format!(
            "function() {{
                const value = this[{name}];
                if (value !== undefined && value !== null && typeof value !== 'object' && typeof value !== 'function') {{
                    return String(value);
                }}
                return this.getAttribute({name});
            }}"
        );
        Ok(match self.call_on(element, &script).await? {
            Value::String(text) => Some(text),
            Value::Null => None,
            other => Some(other.to_string()),
        })
    }

    async fn switch_to_frame(&mut self, frame: ElementRef) -> BrowserResult<()> {
        let Some(src) = self.attribute(frame, "src").await? else {
            return Err(BrowserError::Unexpected(format!(
                "frame handle {} has no source",
                frame.0
            )));
        };
        let parent_url = match self.page.url().await {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "could not read the address before entering frame");
                None
            }
        };
        debug!(src = %src, depth = self.frames.len() + 1, "entering frame");
        self.load(&src).await?;
        self.frames.push(FrameEntry { parent_url, src });
        Ok(())
    }

    async fn switch_to_default_frame(&mut self) -> BrowserResult<()> {
        if self.frames.is_empty() {
            return Ok(());
        }
        let target = default_frame_url(&self.frames, self.root_url.as_deref());
        let innermost = self.frames.pop().map(|entry| entry.src);
        self.frames.clear();
        if let Some(url) = target {
            debug!(url = %url, frame = ?innermost, "leaving frames");
            self.load(&url).await?;
        }
        Ok(())
    }

    async fn execute_script(
        &mut self,
        script: &str,
        target: Option<ElementRef>,
    ) -> BrowserResult<Value> {
        match target {
            Some(element) => self.call_on(element, script).await,
            None => self.evaluate(script).await,
        }
    }

    async fn scroll_into_view(&mut self, element: ElementRef) -> BrowserResult<()> {
        self.element(element)?.scroll_into_view().await?;
        Ok(())
    }

    async fn current_scroll_offset(
        &mut self,
        container: ElementRef,
    ) -> BrowserResult<ScrollPosition> {
        let value = self
            .call_on(
                container,
                "function() { return { offset: this.scrollTop, max: this.scrollHeight - this.clientHeight }; }",
            )
            .await?;
        let raw: RawScroll = serde_json::from_value(value)
            .map_err(|err| BrowserError::Script(format!("scroll position: {err}")))?;
        Ok(ScrollPosition {
            offset: raw.offset,
            max_offset: raw.max.max(0.0),
        })
    }

    async fn quit(mut self: Box<Self>) -> BrowserResult<()> {
        info!("shutting down chromium session");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("chromium session dropped without quit");
                handle.abort();
            }
        }
    }
}
