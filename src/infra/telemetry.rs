use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    cache::{
        METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_STORE, METRIC_CACHE_SUPPRESSED,
        METRIC_PEER_PURGE_FAILED, METRIC_PURGE,
    },
    config::{LogFormat, LoggingSettings},
    peers::{METRIC_PEER_DIRECTORY_SIZE, METRIC_PEER_REFRESH_FAILED},
};

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
            METRIC_CACHE_HIT,
            Unit::Count,
            "Total number of page requests answered from the local cache."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Total number of page requests passed through to the renderer."
        );
        describe_counter!(
            METRIC_CACHE_STORE,
            Unit::Count,
            "Total number of rendered pages stored."
        );
        describe_counter!(
            METRIC_CACHE_SUPPRESSED,
            Unit::Count,
            "Total number of stores skipped because the path was suppressed."
        );
        describe_counter!(
            METRIC_PURGE,
            Unit::Count,
            "Total number of purge requests handled."
        );
        describe_counter!(
            METRIC_PEER_PURGE_FAILED,
            Unit::Count,
            "Total number of fleet-wide purges that failed on at least one peer."
        );
        describe_gauge!(
            METRIC_PEER_DIRECTORY_SIZE,
            Unit::Count,
            "Number of peers in the current directory snapshot."
        );
        describe_counter!(
            METRIC_PEER_REFRESH_FAILED,
            Unit::Count,
            "Total number of failed peer directory refreshes."
        );
    });
}
