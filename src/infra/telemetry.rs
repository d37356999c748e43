use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
            "scopa_purge_dispatch_total",
            Unit::Count,
            "Total number of purge requests dispatched to the driver."
        );
        describe_counter!(
            "scopa_purge_failure_total",
            Unit::Count,
            "Total number of purge dispatches rejected by the provider or transport."
        );
        describe_counter!(
            "scopa_purge_enqueued_total",
            Unit::Count,
            "Total number of purge operations written to the queue."
        );
        describe_counter!(
            "scopa_queue_dead_total",
            Unit::Count,
            "Total number of queue items that exhausted their attempts."
        );
        describe_gauge!(
            "scopa_queue_depth",
            Unit::Count,
            "Current number of pending and reserved purge queue items."
        );
        describe_histogram!(
            "scopa_queue_drain_ms",
            Unit::Milliseconds,
            "Queue drain tick latency in milliseconds."
        );
    });
}
