pub mod config;
pub mod ingest;
pub mod models;
pub mod phenotype;
pub mod sink;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber, logging to stderr so stdout stays free for records.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::debug!("{} v{}", config::APP_NAME, config::APP_VERSION);
}
