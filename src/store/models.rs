use chrono::{DateTime, Utc};
use serde::Serialize;

/// `NvrCredential` row. Exactly one `active` row per site is expected;
/// this crate never manages credentials beyond reading the active one and
/// recording the outcome of a sync run against it.
#[derive(Debug, Clone)]
pub struct NvrCredential {
    pub id: i64,
    pub site_id: i64,
    pub recorder_id: Option<i64>,
    pub host: String,
    pub port: i64,
    pub username: String,
    pub encrypted_password: String,
    pub active: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
}

/// `Camera` row. Identity key is `(site_id, recorder_id, channel)`
/// primarily, `(site_id, ip)` as a secondary match when channel is absent.
#[derive(Debug, Clone)]
pub struct Camera {
    pub id: i64,
    pub site_id: i64,
    pub recorder_id: Option<i64>,
    pub channel: Option<i64>,
    pub name: String,
    pub ip: String,
    pub mac: String,
    pub model: String,
    pub serial: String,
    pub cam_type: String,
    pub configured: bool,
    pub status_config: String,
    pub status_real: String,
    /// Legacy mirror of `status_real`, kept for consumers that haven't
    /// adopted the newer field. Only ever `online`/`offline` - never
    /// `unknown`.
    pub status: String,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub offline_streak: i64,
}

/// Fields the orchestrator writes when upserting a camera. A `None`
/// `id` means "insert"; `Some(id)` means "update that row".
#[derive(Debug, Clone)]
pub struct CameraUpsert {
    pub id: Option<i64>,
    pub site_id: i64,
    pub recorder_id: Option<i64>,
    pub channel: i64,
    pub name: String,
    pub ip: String,
    pub mac: String,
    pub model: String,
    pub serial: String,
    pub cam_type: String,
    pub configured: bool,
    pub status_config: String,
    pub status_real: String,
    pub status: String,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub offline_streak: i64,
}

/// An immutable, append-only event. `camera_id` is resolved by the store
/// from `channel` when the camera was inserted in the same run.
#[derive(Debug, Clone)]
pub struct NewCameraEvent {
    pub site_id: i64,
    pub channel: i64,
    pub event_type: String,
    pub from_status: String,
    pub to_status: String,
    pub severity: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraEvent {
    pub id: i64,
    pub site_id: i64,
    pub camera_id: Option<i64>,
    pub channel: Option<i64>,
    pub event_type: String,
    pub from_status: String,
    pub to_status: String,
    pub severity: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSyncLog {
    pub credential_id: i64,
    pub site_id: i64,
    pub action: String,
    pub status: String,
    pub found: i64,
    pub added: i64,
    pub updated: i64,
    pub online: i64,
    pub offline: i64,
    pub error_message: Option<String>,
}

/// One entry of a [`super::models::Camera`]-shaped record inside a
/// `CameraSnapshot.payload` - never persisted on its own.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotCameraRecord {
    pub channel: i64,
    pub name: String,
    pub ip: String,
    pub mac: String,
    pub model: String,
    pub serial: String,
    pub configured: bool,
    pub status_config: String,
    pub status_real: String,
}
