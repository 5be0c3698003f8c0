use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::SyncError;

use super::transport::RpcTransport;

static INFO_INDEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^INFO_(\d+)$").expect("static regex is valid"));

/// One normalized camera record as extracted from the NVR's `RemoteDevice`
/// configuration table. `status` is advisory only - the TCP prober's
/// result is the authoritative liveness signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCamera {
    pub channel: i64,
    pub name: String,
    pub ip: String,
    pub mac: String,
    pub model: String,
    pub serial: String,
    pub status: &'static str,
}

/// Ordered `(serial_prefix, version_substring, model)` rules used when the
/// NVR reports no `DeviceType` for a channel. First match wins; an empty
/// string means no rule matched.
const MODEL_INFERENCE_RULES: &[(&str, &str, &str)] = &[
    ("4A", "IPC-HFW", "Dahua IPC-HFW (inferred)"),
    ("4A", "IPC-HDW", "Dahua IPC-HDW (inferred)"),
    ("2A", "DH-IPC", "Dahua DH-IPC (inferred)"),
    ("1A", "IPC-", "Dahua IPC (legacy, inferred)"),
];

fn infer_model(serial: &str, version: &str) -> String {
    for (serial_prefix, version_substring, model) in MODEL_INFERENCE_RULES {
        if serial.starts_with(serial_prefix) && version.contains(version_substring) {
            return model.to_string();
        }
    }
    String::new()
}

/// Parse the NVR's `ConnectionState` field, which arrives as a bool,
/// string, or number depending on firmware, falling back to `Enable` when
/// the field is absent entirely.
fn parse_connection_state(value: Option<&Value>, enable: bool) -> &'static str {
    match value {
        Some(Value::Bool(b)) => if *b { "online" } else { "offline" },
        Some(Value::String(s)) => {
            let s = s.to_lowercase();
            if s == "true" || s == "connected" || s == "1" {
                "online"
            } else {
                "offline"
            }
        }
        Some(Value::Number(n)) => {
            let is_nonzero = n.as_f64().map(|f| f != 0.0).unwrap_or(false);
            if is_nonzero { "online" } else { "offline" }
        }
        _ => if enable { "online" } else { "offline" },
    }
}

/// Fetch and normalize the `RemoteDevice` table, returning cameras sorted
/// ascending by channel.
pub async fn fetch_inventory(
    transport: &RpcTransport,
    base_url: &str,
    session: &str,
    timeout: Duration,
) -> Result<Vec<ExtractedCamera>, SyncError> {
    let url = format!("{}/RPC2", base_url);
    let body = json!({
        "method": "configManager.getConfig",
        "params": {"name": "RemoteDevice"},
        "id": 3,
        "session": session,
    });

    let resp = transport.post(&url, &body, timeout).await?;

    let table = resp
        .get("params")
        .and_then(|p| p.get("table"))
        .and_then(|t| t.as_object())
        .ok_or_else(|| SyncError::RpcError("RemoteDevice response missing params.table".to_string()))?;

    let mut cameras = Vec::new();

    for (key, entry) in table {
        let Some(caps) = INFO_INDEX_RE.captures(key) else { continue };
        let index: i64 = caps[1].parse().unwrap_or(-1);
        if index < 0 {
            continue;
        }

        let enable = entry.get("Enable").and_then(|v| v.as_bool()).unwrap_or(false);
        let address = entry.get("Address").and_then(|v| v.as_str());
        let (Some(address), true) = (address, enable) else { continue };

        let name = entry
            .get("VideoInputs")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|vi| vi.get("Name"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let mac = entry.get("Mac").and_then(|v| v.as_str()).unwrap_or("").to_string();

        let device_type = entry.get("DeviceType").and_then(|v| v.as_str()).unwrap_or("");
        let model = if !device_type.is_empty() {
            device_type.to_string()
        } else {
            let version = entry.get("SoftwareVersion").and_then(|v| v.as_str()).unwrap_or("");
            let serial_no = entry.get("SerialNo").and_then(|v| v.as_str()).unwrap_or("");
            infer_model(serial_no, version)
        };

        let serial_no = entry.get("SerialNo").and_then(|v| v.as_str()).unwrap_or("");
        let serial = if !serial_no.is_empty() {
            serial_no.to_string()
        } else {
            // Reproduced as-is: the original mingles serial and display
            // name when SerialNo is absent. Not a bug to fix here.
            name.clone()
        };

        let status = parse_connection_state(entry.get("ConnectionState"), enable);

        cameras.push(ExtractedCamera {
            channel: index + 1,
            name,
            ip: address.to_string(),
            mac,
            model,
            serial,
            status,
        });
    }

    cameras.sort_by_key(|c| c.channel);
    Ok(cameras)
}
