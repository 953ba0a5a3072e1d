#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use harvest_core::browser::{
    AutomationSession, BrowserError, BrowserResult, ElementRef, FixedDelay, Locator,
    ScrollPosition, SessionFactory, SCROLL_TO_BOTTOM,
};
use harvest_core::config::{
    CrawlSection, DatabaseSection, HarvestConfig, PolitenessSection, SelectorSection,
    TimeoutSection,
};
use harvest_core::{HarvestDatabase, Harvester};

pub const DISCOVERY_SUFFIX: &str = "음식점";
pub const REVIEW_PAGE_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Neither menu shape renders any item.
    NoMenu,
    /// Clicking the menu tab times out.
    MenuTimeout,
    /// The detail frame never opens.
    NoDetail,
    /// The detail frame shows no address.
    NoAddress,
    /// Clicking the review tab times out.
    ReviewTimeout,
    /// The first review's handle goes stale before it can be read.
    StaleReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuLayout {
    Flat,
    Packaging,
}

#[derive(Debug, Clone)]
pub struct FakeReview {
    pub content: String,
    pub visit: Option<String>,
    pub date: String,
    pub writer: String,
}

pub fn review(content: &str, visit: &str, date: &str, writer: &str) -> FakeReview {
    FakeReview {
        content: content.into(),
        visit: Some(visit.into()),
        date: date.into(),
        writer: writer.into(),
    }
}

#[derive(Debug, Clone)]
pub struct FakeStore {
    pub name: String,
    pub category: String,
    pub address: String,
    pub image: String,
    pub layout: MenuLayout,
    pub menus: Vec<(String, String)>,
    pub reviews: Vec<FakeReview>,
    pub fault: Option<Fault>,
}

impl FakeStore {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.into(),
            category: "한식".into(),
            address: address.into(),
            image: format!("https://img.example/{}.jpg", name.len()),
            layout: MenuLayout::Flat,
            menus: vec![
                ("김치찌개".into(), "8,000원".into()),
                ("제육볶음".into(), "변동".into()),
                ("된장찌개".into(), "12,000원".into()),
            ],
            reviews: vec![
                review("맛있어요", "3번째 방문", "2025년 3월 7일 금요일", "kim"),
                review("친절해요", "방문", "2025년 2월 1일 토요일", "lee"),
                review("   ", "1번째 방문", "2025년 1월 1일 수요일", "park"),
            ],
            fault: None,
        }
    }

    pub fn with_layout(mut self, layout: MenuLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn with_reviews(mut self, reviews: Vec<FakeReview>) -> Self {
        self.reviews = reviews;
        self
    }
}

/// What the fake map site serves. Store details are keyed by name only, so
/// the same business looks identical from every location.
#[derive(Debug, Default)]
pub struct SiteData {
    pub stores: HashMap<String, FakeStore>,
    /// Result pages per location, each a list of store names.
    pub listings: HashMap<String, Vec<Vec<String>>>,
    /// Search terms whose page refuses to load.
    pub unreachable: HashSet<String>,
    pub sessions_created: Cell<usize>,
    pub sessions_quit: Cell<usize>,
    pub timeouts_fired: Cell<usize>,
    /// Navigations and submitted searches, across every session.
    pub log: RefCell<Vec<String>>,
}

impl SiteData {
    pub fn add_store(&mut self, store: FakeStore) {
        self.stores.insert(store.name.clone(), store);
    }

    pub fn list(&mut self, location: &str, pages: Vec<Vec<&str>>) {
        self.listings.insert(
            location.to_string(),
            pages
                .into_iter()
                .map(|page| page.into_iter().map(String::from).collect())
                .collect(),
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Root,
    Search,
    Detail,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    SearchBox,
    SearchFrame,
    DetailFrame,
    NoResult,
    TopResult,
    ScrollContainer,
    StoreItem(String),
    NextPage,
    Image,
    Address,
    MenuTab,
    MenuItem(usize),
    ReviewTab,
    RecentOrder,
    ReviewItem(usize),
    ReviewMore,
    Text(String),
}

pub struct FakeSession {
    site: Rc<SiteData>,
    selectors: SelectorSection,
    nodes: Vec<Node>,
    frame: Frame,
    discovery_location: Option<String>,
    page: usize,
    typed: String,
    submitted: Option<String>,
    opened: Option<String>,
    menu_open: bool,
    reviews_open: bool,
    reviews_shown: usize,
}

impl FakeSession {
    fn new(site: Rc<SiteData>) -> Self {
        Self {
            site,
            selectors: SelectorSection::default(),
            nodes: Vec::new(),
            frame: Frame::Root,
            discovery_location: None,
            page: 0,
            typed: String::new(),
            submitted: None,
            opened: None,
            menu_open: false,
            reviews_open: false,
            reviews_shown: 0,
        }
    }

    fn handle(&mut self, node: Node) -> ElementRef {
        self.nodes.push(node);
        ElementRef(self.nodes.len() - 1)
    }

    fn node(&self, element: ElementRef) -> BrowserResult<Node> {
        self.nodes
            .get(element.0)
            .cloned()
            .ok_or(BrowserError::StaleElement(element.0))
    }

    fn opened_store(&self) -> Option<&FakeStore> {
        self.opened
            .as_ref()
            .and_then(|name| self.site.stores.get(name))
    }

    fn listing(&self) -> Vec<String> {
        self.discovery_location
            .as_ref()
            .and_then(|location| self.site.listings.get(location))
            .and_then(|pages| pages.get(self.page))
            .cloned()
            .unwrap_or_default()
    }

    fn page_count(&self) -> usize {
        self.discovery_location
            .as_ref()
            .and_then(|location| self.site.listings.get(location))
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn visible_reviews(&self) -> usize {
        match self.opened_store() {
            Some(store) if self.reviews_open => self.reviews_shown.min(store.reviews.len()),
            _ => 0,
        }
    }

    /// Every node currently matching `locator` in the active frame.
    fn matches(&self, locator: &Locator) -> Vec<Node> {
        let s = &self.selectors;
        match self.frame {
            Frame::Root => {
                if *locator == s.search_box {
                    return vec![Node::SearchBox];
                }
                if *locator == s.search_frame
                    && (self.discovery_location.is_some() || self.submitted.is_some())
                {
                    return vec![Node::SearchFrame];
                }
                if *locator == s.detail_frame {
                    let blocked = self
                        .opened_store()
                        .map_or(true, |store| store.fault == Some(Fault::NoDetail));
                    if !blocked {
                        return vec![Node::DetailFrame];
                    }
                }
                Vec::new()
            }
            Frame::Search => {
                if self.discovery_location.is_some() {
                    if *locator == s.list_scroll_container {
                        return vec![Node::ScrollContainer];
                    }
                    if *locator == s.store_item {
                        return self.listing().into_iter().map(Node::StoreItem).collect();
                    }
                    if *locator == s.next_page && self.page_count() > 0 {
                        return vec![Node::NextPage];
                    }
                    return Vec::new();
                }
                let known = self
                    .submitted
                    .as_ref()
                    .map_or(false, |name| self.site.stores.contains_key(name));
                if *locator == s.no_result && !known {
                    return vec![Node::NoResult];
                }
                if *locator == s.top_result && known {
                    return vec![Node::TopResult];
                }
                Vec::new()
            }
            Frame::Detail => {
                let Some(store) = self.opened_store() else {
                    return Vec::new();
                };
                if *locator == s.store_image {
                    return vec![Node::Image];
                }
                if *locator == s.store_address && store.fault != Some(Fault::NoAddress) {
                    return vec![Node::Address];
                }
                if *locator == s.menu_tab {
                    return vec![Node::MenuTab];
                }
                if *locator == s.review_tab {
                    return vec![Node::ReviewTab];
                }
                if *locator == s.review_recent_order && self.reviews_open {
                    return vec![Node::RecentOrder];
                }
                if *locator == s.review_item {
                    return (0..self.visible_reviews()).map(Node::ReviewItem).collect();
                }
                if *locator == s.review_more
                    && self.reviews_open
                    && self.reviews_shown < store.reviews.len()
                {
                    return vec![Node::ReviewMore];
                }
                for (index, shape) in s.menu_shapes.iter().enumerate() {
                    if *locator != shape.item {
                        continue;
                    }
                    let shape_layout = if index == 0 {
                        MenuLayout::Flat
                    } else {
                        MenuLayout::Packaging
                    };
                    if self.menu_open
                        && store.fault != Some(Fault::NoMenu)
                        && store.layout == shape_layout
                    {
                        return (0..store.menus.len()).map(Node::MenuItem).collect();
                    }
                    return Vec::new();
                }
                Vec::new()
            }
        }
    }

    fn child_text(&self, parent: &Node, locator: &Locator) -> Option<String> {
        let s = &self.selectors;
        match parent {
            Node::StoreItem(name) => {
                let store = self.site.stores.get(name);
                if *locator == s.store_name {
                    return Some(name.clone());
                }
                if *locator == s.store_category {
                    return store.map(|store| store.category.clone());
                }
                None
            }
            Node::MenuItem(index) => {
                let store = self.opened_store()?;
                let (name, price) = store.menus.get(*index)?;
                let shape = s.menu_shapes.iter().find(|shape| {
                    *locator == shape.name || *locator == shape.price
                })?;
                if *locator == shape.name {
                    Some(name.clone())
                } else {
                    Some(price.clone())
                }
            }
            Node::ReviewItem(index) => {
                let review = self.opened_store()?.reviews.get(*index)?;
                if *locator == s.review_content {
                    Some(review.content.clone())
                } else if *locator == s.review_visit {
                    review.visit.clone()
                } else if *locator == s.review_date {
                    Some(review.date.clone())
                } else if *locator == s.review_writer {
                    Some(review.writer.clone())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn record(&self, entry: String) {
        self.site.log.borrow_mut().push(entry);
    }
}

fn decode_last_segment(url: &str) -> String {
    let parsed = url::Url::parse(url).ok();
    let segment = parsed
        .as_ref()
        .and_then(|url| url.path_segments())
        .and_then(|mut segments| segments.next_back().map(str::to_string))
        .unwrap_or_default();
    percent_decode(&segment)
}

fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(hex, 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[async_trait(?Send)]
impl AutomationSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.record(format!("navigate {url}"));
        let query = decode_last_segment(url);
        if self.site.unreachable.contains(&query) {
            return Err(BrowserError::Unexpected("net::ERR_CONNECTION_RESET".into()));
        }
        self.nodes.clear();
        self.frame = Frame::Root;
        self.page = 0;
        self.typed.clear();
        self.submitted = None;
        self.opened = None;
        self.menu_open = false;
        self.reviews_open = false;
        self.discovery_location = query
            .strip_suffix(&format!(" {DISCOVERY_SUFFIX}"))
            .map(str::to_string);
        Ok(())
    }

    async fn wait_for(
        &mut self,
        locator: &Locator,
        _timeout: Duration,
    ) -> BrowserResult<Option<ElementRef>> {
        Ok(self
            .matches(locator)
            .into_iter()
            .next()
            .map(|node| self.handle(node)))
    }

    async fn wait_for_all(
        &mut self,
        locator: &Locator,
        _timeout: Duration,
    ) -> BrowserResult<Vec<ElementRef>> {
        let nodes = self.matches(locator);
        Ok(nodes.into_iter().map(|node| self.handle(node)).collect())
    }

    async fn find_within(
        &mut self,
        parent: ElementRef,
        locator: &Locator,
    ) -> BrowserResult<Option<ElementRef>> {
        let node = self.node(parent)?;
        let stale = node == Node::ReviewItem(0)
            && self.opened_store().and_then(|store| store.fault) == Some(Fault::StaleReview);
        if stale {
            return Err(BrowserError::StaleElement(parent.0));
        }
        let parent = node;
        Ok(self
            .child_text(&parent, locator)
            .map(|text| self.handle(Node::Text(text))))
    }

    async fn click(&mut self, element: ElementRef) -> BrowserResult<()> {
        match self.node(element)? {
            Node::TopResult => {
                self.opened = self.submitted.clone();
                self.menu_open = false;
                self.reviews_open = false;
            }
            Node::NextPage => {
                self.page += 1;
            }
            Node::MenuTab => {
                if self.opened_store().and_then(|store| store.fault) == Some(Fault::MenuTimeout) {
                    self.site.timeouts_fired.set(self.site.timeouts_fired.get() + 1);
                    return Err(BrowserError::Timeout("menu tab script".into()));
                }
                self.menu_open = true;
                self.reviews_open = false;
            }
            Node::ReviewTab => {
                if self.opened_store().and_then(|store| store.fault) == Some(Fault::ReviewTimeout) {
                    self.site.timeouts_fired.set(self.site.timeouts_fired.get() + 1);
                    return Err(BrowserError::Timeout("review tab script".into()));
                }
                self.menu_open = false;
                self.reviews_open = true;
                self.reviews_shown = REVIEW_PAGE_SIZE;
            }
            Node::ReviewMore => {
                self.reviews_shown += REVIEW_PAGE_SIZE;
            }
            _ => {}
        }
        Ok(())
    }

    async fn type_text(&mut self, element: ElementRef, text: &str) -> BrowserResult<()> {
        if self.node(element)? == Node::SearchBox {
            self.typed = text.to_string();
        }
        Ok(())
    }

    async fn press_key(&mut self, element: ElementRef, key: &str) -> BrowserResult<()> {
        if self.node(element)? == Node::SearchBox && key == "Enter" {
            self.record(format!("search {}", self.typed));
            self.submitted = Some(self.typed.clone());
            self.opened = None;
        }
        Ok(())
    }

    async fn attribute(
        &mut self,
        element: ElementRef,
        name: &str,
    ) -> BrowserResult<Option<String>> {
        let node = self.node(element)?;
        let store = self.opened_store();
        Ok(match (node, name) {
            (Node::Text(text), "innerText") => Some(text),
            (Node::Address, "innerText") => store.map(|store| store.address.clone()),
            (Node::Image, "src") => store.map(|store| store.image.clone()),
            (Node::NextPage, "aria-disabled") => {
                Some((self.page + 1 >= self.page_count()).to_string())
            }
            _ => None,
        })
    }

    async fn switch_to_frame(&mut self, frame: ElementRef) -> BrowserResult<()> {
        self.frame = match self.node(frame)? {
            Node::SearchFrame => Frame::Search,
            Node::DetailFrame => Frame::Detail,
            other => {
                return Err(BrowserError::Unexpected(format!("{other:?} is not a frame")))
            }
        };
        Ok(())
    }

    async fn switch_to_default_frame(&mut self) -> BrowserResult<()> {
        self.frame = Frame::Root;
        Ok(())
    }

    async fn execute_script(
        &mut self,
        script: &str,
        _target: Option<ElementRef>,
    ) -> BrowserResult<Value> {
        if script == SCROLL_TO_BOTTOM {
            return Ok(Value::Null);
        }
        Err(BrowserError::Script(format!("unexpected script {script}")))
    }

    async fn scroll_into_view(&mut self, _element: ElementRef) -> BrowserResult<()> {
        Ok(())
    }

    async fn current_scroll_offset(
        &mut self,
        _container: ElementRef,
    ) -> BrowserResult<ScrollPosition> {
        let height = 120.0 * self.listing().len() as f64;
        Ok(ScrollPosition {
            offset: height,
            max_offset: height,
        })
    }

    async fn quit(self: Box<Self>) -> BrowserResult<()> {
        self.site.sessions_quit.set(self.site.sessions_quit.get() + 1);
        Ok(())
    }
}

pub struct FakeSiteFactory {
    pub site: Rc<SiteData>,
}

#[async_trait(?Send)]
impl SessionFactory for FakeSiteFactory {
    async fn create(&self) -> BrowserResult<Box<dyn AutomationSession>> {
        self.site
            .sessions_created
            .set(self.site.sessions_created.get() + 1);
        Ok(Box::new(FakeSession::new(Rc::clone(&self.site))))
    }
}

pub struct FailingFactory;

#[async_trait(?Send)]
impl SessionFactory for FailingFactory {
    async fn create(&self) -> BrowserResult<Box<dyn AutomationSession>> {
        Err(BrowserError::Launch("chromium binary not found".into()))
    }
}

pub fn harvest_config(db_path: &str, locations: &[&str], only_missing: bool) -> HarvestConfig {
    HarvestConfig {
        database: DatabaseSection {
            path: db_path.to_string(),
            busy_timeout_ms: 1000,
        },
        crawl: CrawlSection {
            locations: locations.iter().map(|loc| loc.to_string()).collect(),
            enrich_only_missing: only_missing,
            max_session_restarts: 3,
            ..CrawlSection::default()
        },
        politeness: PolitenessSection {
            base_delay_ms: 0,
            jitter_ms: 0,
            floor_ms: 1,
            scroll_settle_ms: 0,
            page_settle_ms: 0,
        },
        timeouts: TimeoutSection {
            element_wait_seconds: 1,
            navigation_seconds: 1,
            script_seconds: 1,
        },
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub db: HarvestDatabase,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = HarvestDatabase::new(dir.path().join("harvest.sqlite")).expect("db handle");
        db.initialize().expect("schema");
        Self { dir, db }
    }

    pub fn db_path(&self) -> String {
        self.dir
            .path()
            .join("harvest.sqlite")
            .to_string_lossy()
            .into_owned()
    }

    pub fn harvester(
        &self,
        factory: Box<dyn SessionFactory>,
        locations: &[&str],
        only_missing: bool,
    ) -> Harvester {
        let config = harvest_config(&self.db_path(), locations, only_missing);
        Harvester::new(
            self.db.clone(),
            config,
            SelectorSection::default(),
            factory,
        )
        .with_delays(Box::new(FixedDelay(Duration::ZERO)))
    }

    pub fn count(&self, sql: &str) -> i64 {
        let conn = self.db.open().expect("connection");
        conn.query_row(sql, [], |row| row.get(0)).expect("count query")
    }
}

/// A factory that hands out sessions over `site` and keeps a handle on it.
pub fn factory(site: SiteData) -> (Rc<SiteData>, Box<dyn SessionFactory>) {
    let site = Rc::new(site);
    let factory = FakeSiteFactory {
        site: Rc::clone(&site),
    };
    (site, Box::new(factory))
}
