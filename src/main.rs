use std::sync::Arc;

use anyhow::Result;
use tracing::info;

mod config;
mod crypto;
mod dahua;
mod error;
mod jobs;
mod probe;
mod store;
mod sync;
mod telemetry;

use config::AppConfig;
use jobs::JobsState;
use store::LibsqlStore;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_telemetry();

    let config = AppConfig::from_env();
    info!(
        database_url = %config.database_url,
        web_port = config.web_port,
        "starting netmanager sync engine"
    );

    let store = LibsqlStore::connect(&config.database_url).await?;

    let jobs_state = JobsState {
        store,
        config: Arc::new(config.clone()),
    };
    let app = jobs::router(jobs_state);

    let addr = format!("0.0.0.0:{}", config.web_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("job invoker listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
