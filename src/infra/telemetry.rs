use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber and describe the crate's metrics.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "feedline_cache_hit_total",
            Unit::Count,
            "Total number of query cache reads served from an entry with data."
        );
        describe_counter!(
            "feedline_cache_miss_total",
            Unit::Count,
            "Total number of query cache reads that had to wait for a fetch."
        );
        describe_counter!(
            "feedline_cache_dedup_total",
            Unit::Count,
            "Total number of reads that joined an in-flight fetch."
        );
        describe_counter!(
            "feedline_cache_discard_total",
            Unit::Count,
            "Total number of fetch results dropped for evicted, detached or overwritten entries."
        );
        describe_counter!(
            "feedline_cache_evict_total",
            Unit::Count,
            "Total number of query cache evictions due to capacity."
        );
        describe_histogram!(
            "feedline_cache_fetch_ms",
            Unit::Milliseconds,
            "Query fetch latency in milliseconds."
        );
        describe_counter!(
            "feedline_enrichment_warning_total",
            Unit::Count,
            "Total number of posts delivered with an unresolved creator or liked user."
        );
        describe_counter!(
            "feedline_mutation_rollback_total",
            Unit::Count,
            "Total number of optimistic mutations rolled back after a failed write."
        );
    });
}
