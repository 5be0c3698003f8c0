use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::SyncError;

/// JSON-over-HTTP transport to a Dahua NVR's RPC2 endpoints. One
/// `RpcTransport` (and its underlying connection pool) lives for the
/// duration of a single sync run.
pub struct RpcTransport {
    client: reqwest::Client,
}

impl RpcTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// POST a JSON body to `url`, returning the parsed JSON response.
    /// No retries here - the login state machine owns the one retry the
    /// spec allows, and only for the init step's timeout.
    pub async fn post(&self, url: &str, body: &Value, timeout: Duration) -> Result<Value, SyncError> {
        debug!("POST {} body={}", url, body);

        let response = self
            .client
            .post(url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(SyncError::HttpStatus(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(classify_request_error)?;

        serde_json::from_slice(&bytes).map_err(|e| SyncError::JsonParse(e.to_string()))
    }
}

impl Default for RpcTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_request_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout
    } else if e.is_connect() {
        SyncError::Connect(e.to_string())
    } else if let Some(status) = e.status() {
        SyncError::HttpStatus(status.as_u16())
    } else {
        SyncError::Connect(e.to_string())
    }
}
