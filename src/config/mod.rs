//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, str::FromStr};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{CliArgs, Command, ConfigArgs, DemoArgs, SettingsOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "feedline";
const ENV_PREFIX: &str = "FEEDLINE";
const DEFAULT_FRESH_FOR_MS: u64 = 0;
const DEFAULT_MAX_ENTRIES: u64 = 200;
const DEFAULT_PAGE_SIZE: u64 = 10;
const MAX_PAGE_SIZE: u64 = 100;
const DEFAULT_ENRICHMENT_CONCURRENCY: u64 = 10;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub feed: FeedSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub fresh_for_ms: u64,
    pub max_entries: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Posts per page, between 1 and 100.
    pub page_size: u32,
    pub enrichment_concurrency: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    if let Some(command) = cli.command.as_ref() {
        raw.apply_overrides(command.overrides());
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    feed: RawFeedSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    fresh_for_ms: Option<u64>,
    max_entries: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeedSettings {
    page_size: Option<u64>,
    enrichment_concurrency: Option<u64>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(fresh_for_ms) = overrides.cache_fresh_for_ms {
            self.cache.fresh_for_ms = Some(fresh_for_ms);
        }
        if let Some(max_entries) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max_entries);
        }
        if let Some(page_size) = overrides.feed_page_size {
            self.feed.page_size = Some(page_size);
        }
        if let Some(concurrency) = overrides.feed_enrichment_concurrency {
            self.feed.enrichment_concurrency = Some(concurrency);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            feed,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            feed: build_feed_settings(feed)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let fresh_for_ms = cache.fresh_for_ms.unwrap_or(DEFAULT_FRESH_FOR_MS);
    let max_entries = non_zero_usize(
        cache.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES),
        "cache.max_entries",
    )?;

    Ok(CacheSettings {
        fresh_for_ms,
        max_entries,
    })
}

fn build_feed_settings(feed: RawFeedSettings) -> Result<FeedSettings, LoadError> {
    let page_size = feed.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(LoadError::invalid(
            "feed.page_size",
            format!("must be between 1 and {MAX_PAGE_SIZE}"),
        ));
    }
    let page_size = u32::try_from(page_size)
        .map_err(|_| LoadError::invalid("feed.page_size", "value exceeds supported range"))?;

    let enrichment_concurrency = non_zero_usize(
        feed.enrichment_concurrency
            .unwrap_or(DEFAULT_ENRICHMENT_CONCURRENCY),
        "feed.enrichment_concurrency",
    )?;

    Ok(FeedSettings {
        page_size,
        enrichment_concurrency,
    })
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value = usize::try_from(value)
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
