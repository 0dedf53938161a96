use crate::config::{LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::{StatsdBuilder, StatsdError};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const METRICS_PREFIX: &str = "umessage";

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("could not build statsd exporter: {0}")]
    Statsd(#[from] StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
}

/// Installs the fmt subscriber, plus the Sentry layer when a DSN is configured.
/// The returned guard flushes pending Sentry events when dropped.
pub fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let default = LoggingConfig::default();
    let config = config.unwrap_or(&default);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

/// Routes the `metrics` facade to statsd and describes every inbox metric.
pub fn init_metrics(config: Option<&MetricsConfig>) -> Result<(), TelemetryError> {
    let Some(config) = config else {
        tracing::info!("No metrics backend configured, metrics are discarded");
        return Ok(());
    };

    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))?;
    metrics::set_global_recorder(recorder).map_err(|_| TelemetryError::RecorderInstalled)?;

    shared::metrics_defs::describe_all(inbox::metrics_defs::ALL_METRICS);
    tracing::info!(
        "Sending metrics to statsd at {}:{}",
        config.statsd_host,
        config.statsd_port
    );
    Ok(())
}
