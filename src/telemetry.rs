use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize structured logging for the process.
pub fn init_telemetry() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,netmanager_sync_engine=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("telemetry initialized");
}
