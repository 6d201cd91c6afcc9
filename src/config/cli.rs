use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use std::path::PathBuf;

const DEFAULT_DEMO_POSTS: usize = 15;

/// Command-line arguments for the feedline binary.
#[derive(Debug, Parser)]
#[command(name = "feedline", version, about = "Feed sync and query cache walkthrough")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FEEDLINE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Seed an in-memory store, page the feed through the cache and run every mutation.
    Demo(DemoArgs),
    /// Print the resolved settings and exit.
    Config(ConfigArgs),
}

impl Default for Command {
    fn default() -> Self {
        Self::Demo(DemoArgs::default())
    }
}

#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    #[command(flatten)]
    pub overrides: SettingsOverrides,

    /// Number of posts seeded before the walkthrough.
    #[arg(long = "posts", default_value_t = DEFAULT_DEMO_POSTS)]
    pub posts: usize,

    /// Artificial store latency in milliseconds.
    #[arg(long = "store-latency-ms", default_value_t = 0)]
    pub store_latency_ms: u64,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            overrides: SettingsOverrides::default(),
            posts: DEFAULT_DEMO_POSTS,
            store_latency_ms: 0,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub overrides: SettingsOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SettingsOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override how long fetched queries stay fresh.
    #[arg(long = "cache-fresh-for-ms", value_name = "MILLIS")]
    pub cache_fresh_for_ms: Option<u64>,

    /// Override the number of cached queries kept before eviction.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<u64>,

    /// Override the feed page size.
    #[arg(long = "feed-page-size", value_name = "COUNT")]
    pub feed_page_size: Option<u64>,

    /// Override the number of posts enriched concurrently.
    #[arg(long = "feed-enrichment-concurrency", value_name = "COUNT")]
    pub feed_enrichment_concurrency: Option<u64>,
}

impl Command {
    pub fn overrides(&self) -> &SettingsOverrides {
        match self {
            Command::Demo(args) => &args.overrides,
            Command::Config(args) => &args.overrides,
        }
    }
}
