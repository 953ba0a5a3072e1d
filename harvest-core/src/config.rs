use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::browser::Locator;
use crate::error::{ConfigError, Result};

pub const DATABASE_PATH_ENV: &str = "HARVEST_DATABASE_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HarvestConfig {
    pub database: DatabaseSection,
    pub crawl: CrawlSection,
    #[serde(default)]
    pub politeness: PolitenessSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
}

impl HarvestConfig {
    /// Applies `HARVEST_DATABASE_PATH` (a `.env` file is honoured) on top of
    /// the file-based database path.
    pub fn apply_env_overrides(&mut self) {
        if let Some(err) = dotenv_problem(dotenvy::dotenv()) {
            warn!(error = %err, "failed to load .env");
        }
        if let Ok(path) = std::env::var(DATABASE_PATH_ENV) {
            if !path.trim().is_empty() {
                self.database.path = path;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "database.path",
                reason: "must not be empty".into(),
            });
        }
        if self.politeness.floor_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "politeness.floor_ms",
                reason: "politeness delays must stay above zero".into(),
            });
        }
        if let Err(err) = self.crawl.search_url("check") {
            return Err(ConfigError::Invalid {
                field: "crawl.base_url",
                reason: err.to_string(),
            });
        }
        Ok(())
    }
}

/// A missing `.env` is normal; any other failure is returned for logging.
fn dotenv_problem<T>(result: dotenvy::Result<T>) -> Option<dotenvy::Error> {
    match result {
        Ok(_) => None,
        Err(err) if err.not_found() => None,
        Err(err) => Some(err),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    pub path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlSection {
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default = "default_search_suffix")]
    pub search_suffix: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_true")]
    pub enrich_only_missing: bool,
    #[serde(default = "default_max_session_restarts")]
    pub max_session_restarts: usize,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            locations: Vec::new(),
            search_suffix: default_search_suffix(),
            base_url: default_base_url(),
            enrich_only_missing: true,
            max_session_restarts: default_max_session_restarts(),
        }
    }
}

impl CrawlSection {
    /// Map view for a free-text query, e.g. the location itself or
    /// `"{location} {search_suffix}"` during discovery.
    pub fn search_url(&self, query: &str) -> std::result::Result<String, url::ParseError> {
        let mut url = url::Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(query);
        Ok(url.into())
    }

    pub fn discovery_query(&self, location: &str) -> String {
        if self.search_suffix.trim().is_empty() {
            location.to_string()
        } else {
            format!("{location} {}", self.search_suffix.trim())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolitenessSection {
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
    pub floor_ms: u64,
    pub scroll_settle_ms: u64,
    pub page_settle_ms: u64,
}

impl Default for PolitenessSection {
    fn default() -> Self {
        Self {
            base_delay_ms: 2000,
            jitter_ms: 1000,
            floor_ms: 100,
            scroll_settle_ms: 1000,
            page_settle_ms: 2500,
        }
    }
}

impl PolitenessSection {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }

    pub fn page_settle(&self) -> Duration {
        Duration::from_millis(self.page_settle_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutSection {
    pub element_wait_seconds: u64,
    pub navigation_seconds: u64,
    pub script_seconds: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            element_wait_seconds: 10,
            navigation_seconds: 30,
            script_seconds: 30,
        }
    }
}

impl TimeoutSection {
    pub fn element_wait(&self) -> Duration {
        Duration::from_secs(self.element_wait_seconds)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_secs(self.navigation_seconds)
    }

    pub fn script(&self) -> Duration {
        Duration::from_secs(self.script_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    pub chromium: ChromiumSection,
    #[serde(default)]
    pub flags: FlagsSection,
    #[serde(default)]
    pub selectors: SelectorSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: String,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagsSection {
    pub disable_automation_controlled: bool,
    pub disable_blink_features: Vec<String>,
    pub lang: Option<String>,
    pub accept_language: Option<String>,
    pub user_agent: Option<String>,
}

impl Default for FlagsSection {
    fn default() -> Self {
        Self {
            disable_automation_controlled: true,
            disable_blink_features: vec!["AutomationControlled".into()],
            lang: Some("ko-KR".into()),
            accept_language: Some("ko-KR,ko;q=0.9,en-US;q=0.8".into()),
            user_agent: None,
        }
    }
}

/// Where a menu list lives and how one line of it is laid out.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MenuShape {
    pub label: String,
    pub item: Locator,
    pub name: Locator,
    pub price: Locator,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorSection {
    pub search_box: Locator,
    pub search_frame: Locator,
    pub no_result: Locator,
    pub top_result: Locator,
    pub detail_frame: Locator,
    pub list_scroll_container: Locator,
    pub store_item: Locator,
    pub store_name: Locator,
    pub store_category: Locator,
    pub next_page: Locator,
    pub next_page_disabled_attribute: String,
    pub store_image: Locator,
    pub store_address: Locator,
    pub menu_tab: Locator,
    pub menu_shapes: Vec<MenuShape>,
    pub review_tab: Locator,
    pub review_recent_order: Locator,
    pub review_item: Locator,
    pub review_content: Locator,
    pub review_visit: Locator,
    pub review_date: Locator,
    pub review_writer: Locator,
    pub review_more: Locator,
}

impl Default for SelectorSection {
    fn default() -> Self {
        Self {
            search_box: Locator::css("input.input_search"),
            search_frame: Locator::id("searchIframe"),
            no_result: Locator::css("div.FYvSc"),
            top_result: Locator::css("a.place_bluelink"),
            detail_frame: Locator::id("entryIframe"),
            list_scroll_container: Locator::id("_pcmap_list_scroll_container"),
            store_item: Locator::css("li.UEzoS"),
            store_name: Locator::css("span.TYaxT"),
            store_category: Locator::css("span.KCMnt"),
            next_page: Locator::xpath("//span[normalize-space(text())='다음페이지']/parent::a"),
            next_page_disabled_attribute: "aria-disabled".into(),
            store_image: Locator::css("img.K0PDV"),
            store_address: Locator::css("span.LDgIH"),
            menu_tab: Locator::xpath("//span[text()='메뉴']"),
            menu_shapes: vec![
                MenuShape {
                    label: "flat".into(),
                    item: Locator::css("li.E2jtL"),
                    name: Locator::css("span.lPzHi"),
                    price: Locator::css("div.GXS1X"),
                },
                MenuShape {
                    label: "packaging".into(),
                    item: Locator::css("div.MenuContent__info_detail__rCviz"),
                    name: Locator::css("div.MenuContent__tit__313LA"),
                    price: Locator::css("div.MenuContent__price__lhCy9"),
                },
            ],
            review_tab: Locator::xpath("//span[text()='리뷰']"),
            review_recent_order: Locator::xpath("//a[text()='최신순']"),
            review_item: Locator::css("li.place_apply_pui"),
            review_content: Locator::css("div.pui__vn15t2 > a"),
            review_visit: Locator::css_with_text("span", "번째"),
            review_date: Locator::css_with_text("span", "년"),
            review_writer: Locator::css("span.pui__NMi-Dp"),
            review_more: Locator::css("a.fvwqf"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub harvest: HarvestConfig,
    pub browser: BrowserConfig,
}

impl ConfigBundle {
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let harvest = load_harvest_config(dir.join("harvest.toml"))?;
        let browser = load_browser_config(dir.join("browser.toml"))?;
        Ok(Self { harvest, browser })
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.harvest.database.path)
    }
}

pub fn load_harvest_config<P: AsRef<Path>>(path: P) -> Result<HarvestConfig> {
    let config: HarvestConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

pub fn load_browser_config<P: AsRef<Path>>(path: P) -> Result<BrowserConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_search_suffix() -> String {
    "음식점".to_string()
}

fn default_base_url() -> String {
    "https://map.naver.com/p/search".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_session_restarts() -> usize {
    5
}
