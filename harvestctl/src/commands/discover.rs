use clap::Args;

/// Collects store names for one or more locations from the map search.
#[derive(Args, Debug, Clone, Default)]
pub struct DiscoverArgs {
    /// Location to discover (repeatable); defaults to every configured one
    #[arg(short, long = "location", value_name = "LOCATION")]
    pub locations: Vec<String>,
}

/// Fills in address, image, menu and reviews for discovered stores.
#[derive(Args, Debug, Clone, Default)]
pub struct EnrichArgs {
    /// Location to enrich (repeatable); defaults to every configured one
    #[arg(short, long = "location", value_name = "LOCATION")]
    pub locations: Vec<String>,

    /// Revisit stores that were already enriched
    #[arg(long)]
    pub all: bool,
}
