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

/// Install a global tracing subscriber using the provided logging settings.
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
            "strata_cache_hit_total",
            Unit::Count,
            "Total number of lookups answered from the shared store."
        );
        describe_counter!(
            "strata_cache_miss_total",
            Unit::Count,
            "Total number of lookups that found no usable entry, by reason."
        );
        describe_counter!(
            "strata_cache_write_total",
            Unit::Count,
            "Total number of responses written to the shared store."
        );
        describe_counter!(
            "strata_cache_invalidate_total",
            Unit::Count,
            "Total number of metadata lists rewritten as expired."
        );
        describe_counter!(
            "strata_cache_lock_contended_total",
            Unit::Count,
            "Total number of regeneration locks already held by another request."
        );
        describe_histogram!(
            "strata_cache_backend_ms",
            Unit::Milliseconds,
            "Key-value backend round-trip latency in milliseconds, by operation."
        );
    });
}
