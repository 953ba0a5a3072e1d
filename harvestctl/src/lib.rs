use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use harvest_core::browser::ChromiumSessionFactory;
use harvest_core::{
    CancellationFlag, ConfigBundle, DatabaseStats, HarvestDatabase, HarvestReport, Harvester,
    MenuSummary,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;

pub use commands::{DiscoverArgs, EmotionCommands, EmotionTransfer, EnrichArgs};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] harvest_core::ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] harvest_core::StorageError),
    #[error("crawl error: {0}")]
    Crawl(#[from] harvest_core::CrawlError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid log filter: {0}")]
    LogFilter(String),
    #[error("no menu recorded for {store} in {location}")]
    MissingMenu { store: String, location: String },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Restaurant harvest control interface", long_about = None)]
pub struct Cli {
    /// Directory holding harvest.toml and browser.toml
    #[arg(long, global = true, default_value = "configs")]
    pub config_dir: PathBuf,
    /// SQLite file to use instead of [database].path
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,
    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Log filter (e.g. `debug` or `harvest_core=trace`); RUST_LOG is used otherwise
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collects store names from the map search
    Discover(DiscoverArgs),
    /// Crawls detail pages of discovered stores
    Enrich(EnrichArgs),
    /// Discovery followed by enrichment for every configured location
    Run,
    /// Lists configured and persisted locations
    Locations,
    /// Shows row counts per table and location
    Stats,
    /// Shows a store's menu and its average price
    Menu {
        /// Store name as discovered
        store: String,
        /// Location the store was discovered under
        #[arg(long)]
        location: String,
    },
    /// Moves reviews to and from the emotion classifier
    #[command(subcommand)]
    Emotion(EmotionCommands),
    /// Creates the database schema
    InitDb,
    /// Prints a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        let name = command.get_name().to_string();
        clap_complete::generate(*shell, &mut command, name, &mut io::stdout());
        return Ok(());
    }

    init_tracing(cli.log_level.as_deref())?;
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Discover(args) => {
            let report = context.crawl(CrawlMode::Discover, &args.locations, false)?;
            render(&report, cli.format)?;
        }
        Commands::Enrich(args) => {
            let report = context.crawl(CrawlMode::Enrich, &args.locations, args.all)?;
            render(&report, cli.format)?;
        }
        Commands::Run => {
            let report = context.crawl(CrawlMode::Full, &[], false)?;
            render(&report, cli.format)?;
        }
        Commands::Locations => {
            let view = context.locations()?;
            render(&view, cli.format)?;
        }
        Commands::Stats => {
            let stats = context.database()?.stats()?;
            render(&stats, cli.format)?;
        }
        Commands::Menu { store, location } => {
            let summary = context
                .database()?
                .menu_summary(store, location)?
                .ok_or_else(|| AppError::MissingMenu {
                    store: store.clone(),
                    location: location.clone(),
                })?;
            render(&summary, cli.format)?;
        }
        Commands::Emotion(command) => {
            let transfer = command.execute(&context.database()?)?;
            render(&transfer, cli.format)?;
        }
        Commands::InitDb => {
            let db = context.database()?;
            db.initialize()?;
            let created = InitReport {
                database: db.path().to_path_buf(),
            };
            render(&created, cli.format)?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).map_err(|err| AppError::LogFilter(err.to_string()))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrawlMode {
    Discover,
    Enrich,
    Full,
}

#[derive(Debug)]
struct AppContext {
    bundle: ConfigBundle,
    database_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut bundle = ConfigBundle::from_directory(&cli.config_dir)?;
        bundle.harvest.apply_env_overrides();
        let database_path = match &cli.database {
            Some(path) => path.clone(),
            None => bundle.database_path(),
        };
        bundle.harvest.database.path = database_path.to_string_lossy().into_owned();
        Ok(Self {
            bundle,
            database_path,
        })
    }

    fn database(&self) -> Result<HarvestDatabase> {
        let db = HarvestDatabase::builder()
            .path(&self.database_path)
            .busy_timeout(std::time::Duration::from_millis(
                self.bundle.harvest.database.busy_timeout_ms,
            ))
            .build()?;
        Ok(db)
    }

    fn locations(&self) -> Result<LocationsView> {
        let db = self.database()?;
        db.initialize()?;
        Ok(LocationsView {
            configured: self.bundle.harvest.crawl.locations.clone(),
            persisted: db.known_locations()?,
        })
    }

    fn crawl(&self, mode: CrawlMode, requested: &[String], revisit: bool) -> Result<HarvestReport> {
        let db = self.database()?;
        db.initialize()?;

        let mut config = self.bundle.harvest.clone();
        if revisit {
            config.crawl.enrich_only_missing = false;
        }
        let factory = ChromiumSessionFactory::new(self.bundle.browser.clone(), config.timeouts.clone());
        let cancel = CancellationFlag::new();
        let harvester = Harvester::new(
            db,
            config,
            self.bundle.browser.selectors.clone(),
            Box::new(factory),
        )
        .with_cancellation(cancel.clone());
        let locations = harvester.resolve_locations(requested);
        info!(?mode, locations = ?locations, "starting crawl");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let report = runtime.block_on(async move {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; stopping after the current store");
                    cancel.cancel();
                }
            });
            match mode {
                CrawlMode::Discover => harvester.discover(&locations).await,
                CrawlMode::Enrich => harvester.enrich(&locations).await,
                CrawlMode::Full => harvester.run(&locations).await,
            }
        })?;
        Ok(report)
    }
}

#[derive(Debug, Serialize)]
struct LocationsView {
    configured: Vec<String>,
    persisted: Vec<String>,
}

#[derive(Debug, Serialize)]
struct InitReport {
    database: PathBuf,
}

impl DisplayFallback for HarvestReport {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in &self.locations {
            if let Some(discovery) = &entry.discovery {
                lines.push(format!(
                    "{} | discovery: pages={} seen={} new={} duplicates={}",
                    entry.location,
                    discovery.pages,
                    discovery.seen,
                    discovery.inserted,
                    discovery.duplicates
                ));
            }
            if entry.stores > 0 {
                lines.push(format!(
                    "{} | enrich: stores={} committed={} duplicates={} rolled_back={} skipped={} timeouts={} failed={} menus+={} reviews+={}",
                    entry.location,
                    entry.stores,
                    entry.committed,
                    entry.duplicates,
                    entry.rolled_back,
                    entry.skipped,
                    entry.timeouts,
                    entry.failed,
                    entry.menus_inserted,
                    entry.reviews_inserted
                ));
            }
            for error in &entry.errors {
                lines.push(format!("{} | error: {}", entry.location, error));
            }
        }
        if lines.is_empty() {
            lines.push("Nothing to do.".to_string());
        }
        lines.push(format!("session restarts: {}", self.session_restarts));
        if self.cancelled {
            lines.push("cancelled before completion".to_string());
        }
        lines.join("\n")
    }
}

impl DisplayFallback for DatabaseStats {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "stores={} menus={} reviews={} emotions={}",
            self.stores, self.menus, self.reviews, self.emotions
        )];
        for counts in &self.per_location {
            lines.push(format!(
                "{} | stores={} enriched={} menus={} reviews={}",
                counts.location, counts.stores, counts.enriched, counts.menus, counts.reviews
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for MenuSummary {
    fn display(&self) -> String {
        let mut lines = vec![format!("{} ({})", self.store, self.location)];
        for item in &self.items {
            lines.push(format!("  {} | {}", item.name, item.price));
        }
        match self.average_price {
            Some(average) => lines.push(format!("average: {}원", average)),
            None => lines.push("average: n/a".to_string()),
        }
        lines.join("\n")
    }
}

impl DisplayFallback for LocationsView {
    fn display(&self) -> String {
        let mut lines = vec!["configured:".to_string()];
        lines.extend(self.configured.iter().map(|location| format!("  {location}")));
        lines.push("persisted:".to_string());
        if self.persisted.is_empty() {
            lines.push("  (none)".to_string());
        }
        lines.extend(self.persisted.iter().map(|location| format!("  {location}")));
        lines.join("\n")
    }
}

impl DisplayFallback for EmotionTransfer {
    fn display(&self) -> String {
        format!("{}: {} rows ({})", self.direction, self.rows, self.file.display())
    }
}

impl DisplayFallback for InitReport {
    fn display(&self) -> String {
        format!("schema ready at {}", self.database.display())
    }
}
