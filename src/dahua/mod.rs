pub mod inventory;
pub mod login;
pub mod target;
pub mod transport;

use std::time::Duration;

use tracing::info;

use crate::error::SyncError;

use inventory::ExtractedCamera;
use transport::RpcTransport;

/// Run the full NVR round trip for one site: validate the target, log in,
/// extract the camera inventory, and log out (best-effort) regardless of
/// outcome.
pub async fn fetch_camera_table(
    host: &str,
    port: i64,
    user: &str,
    password: &str,
    timeout: Duration,
) -> Result<Vec<ExtractedCamera>, SyncError> {
    let base_url = target::normalize(host, port)?;
    let transport = RpcTransport::new();

    info!("logging into nvr at {}", base_url);
    let session = login::login(&transport, &base_url, user, password, timeout).await?;

    let result = inventory::fetch_inventory(&transport, &base_url, &session.session, timeout).await;

    login::logout(&transport, &base_url, &session.session, timeout).await;

    result
}
