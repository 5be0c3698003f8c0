use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, instrument, warn};

use crate::config::AppConfig;
use crate::crypto;
use crate::dahua::{self, inventory::ExtractedCamera};
use crate::error::SyncError;
use crate::probe::{self, ProbeConfig, ProbeTarget};
use crate::store::models::{Camera, CameraUpsert, NewCameraEvent, NewSyncLog, NvrCredential, SnapshotCameraRecord};
use crate::store::LibsqlStore;

/// Consecutive failed probes required before a camera is committed
/// `offline` on the update path (spec §3 invariant 2).
const OFFLINE_STRIKES_THRESHOLD: i64 = 2;

/// Dedup window for committed `CameraEvent` rows (spec §3 invariant 3).
fn dedup_window() -> chrono::Duration {
    chrono::Duration::minutes(5)
}

/// Summary of one `sync_site` run, returned to the job invoker verbatim
/// as the public wire contract (spec §4.G / §6.2).
#[derive(Debug, Clone, Serialize)]
pub struct SyncRunResult {
    pub site_id: i64,
    pub ok: bool,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub total: i64,
    pub online: i64,
    pub offline: i64,
    pub unknown: i64,
    pub added: i64,
    pub updated: i64,
    pub inventory_changes: i64,
    pub status_changes: i64,
    pub elapsed_ms: u128,
    pub run_id: String,
}

impl SyncRunResult {
    fn failure(site_id: i64, run_id: String, elapsed: Duration, err: &SyncError) -> Self {
        Self {
            site_id,
            ok: false,
            error: Some(err.to_string()),
            error_code: Some(err.code().to_string()),
            total: 0,
            online: 0,
            offline: 0,
            unknown: 0,
            added: 0,
            updated: 0,
            inventory_changes: 0,
            status_changes: 0,
            elapsed_ms: elapsed.as_millis(),
            run_id,
        }
    }
}

/// Per-`site_id` locks so two sync runs for the same site can never
/// interleave, even if a future caller parallelizes `sync_all_sites`
/// across sites (spec §5). `sync_site` is the only entry point, so
/// taking this lock here is enough to make that guarantee hold
/// regardless of how many callers invoke it concurrently.
static SITE_LOCKS: Lazy<StdMutex<HashMap<i64, Arc<AsyncMutex<()>>>>> =
    Lazy::new(|| StdMutex::new(HashMap::new()));

fn site_lock(site_id: i64) -> Arc<AsyncMutex<()>> {
    let mut locks = SITE_LOCKS.lock().expect("site lock registry poisoned");
    locks.entry(site_id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
}

fn generate_run_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Pending event enqueued during the diff pass, not yet checked against
/// the dedup window or committed.
struct PendingEvent {
    channel: i64,
    event_type: &'static str,
    from_status: String,
    to_status: String,
    severity: &'static str,
    message: String,
    /// Whether this event counts toward the run's `status_changes` /
    /// `inventory_changes` summary counters. The first-strike advisory
    /// event is enqueued (and subject to dedup like any other event) but
    /// never counted, per spec §4.G step 6.
    counted: CountedAs,
}

#[derive(PartialEq)]
enum CountedAs {
    StatusChange,
    InventoryChange,
    Nothing,
}

/// Run a single site's hybrid sync: NVR login + inventory extraction,
/// concurrent TCP probing, delta detection against the store, and a single
/// atomic commit of the upserts/snapshot/events/log for the run.
#[instrument(skip(store, config), fields(site_id))]
pub async fn sync_site(store: &LibsqlStore, config: &AppConfig, site_id: i64) -> SyncRunResult {
    let lock = site_lock(site_id);
    let _guard = lock.lock().await;

    let start = Instant::now();
    let run_id = generate_run_id();

    let credential = match store.find_active_credential(site_id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            info!(site_id, "no active nvr credential, skipping");
            return SyncRunResult::failure(site_id, run_id, start.elapsed(), &SyncError::NoCredentials);
        }
        Err(e) => {
            let err = SyncError::Internal(e.to_string());
            return SyncRunResult::failure(site_id, run_id, start.elapsed(), &err);
        }
    };

    match run_inner(store, config, site_id, &credential, &run_id).await {
        Ok(result) => result,
        Err(e) => {
            error!(site_id, error = %e, code = e.code(), "sync run failed");
            let log = NewSyncLog {
                credential_id: credential.id,
                site_id,
                action: "sync".to_string(),
                status: "error".to_string(),
                found: 0,
                added: 0,
                updated: 0,
                online: 0,
                offline: 0,
                error_message: Some(e.to_string()),
            };
            if let Err(store_err) = store.record_failed_run(credential.id, &log, Utc::now()).await {
                error!(site_id, error = %store_err, "failed to record failed sync run");
            }
            SyncRunResult::failure(site_id, run_id, start.elapsed(), &e)
        }
    }
}

async fn run_inner(
    store: &LibsqlStore,
    config: &AppConfig,
    site_id: i64,
    credential: &NvrCredential,
    run_id: &str,
) -> Result<SyncRunResult, SyncError> {
    let start = Instant::now();

    let password = crypto::decrypt_password(&config.secret_key, &credential.encrypted_password)
        .map_err(|e| SyncError::Internal(format!("credential decrypt failed: {}", e)))?;

    let rpc_timeout = Duration::from_secs(config.nvr_rpc_timeout_secs);
    let extracted = dahua::fetch_camera_table(
        &credential.host,
        credential.port,
        &credential.username,
        password.expose(),
        rpc_timeout,
    )
    .await?;
    // `password` is dropped at the end of this scope; it is never logged,
    // serialized into an event, or returned in the error surface above.

    let probe_targets: Vec<ProbeTarget> = extracted
        .iter()
        .map(|c| ProbeTarget { channel: c.channel, ip: c.ip.clone() })
        .collect();
    let probe_config = ProbeConfig {
        ports: config.probe_ports.clone(),
        timeout: Duration::from_secs_f64(config.probe_timeout_secs),
        max_concurrency: config.probe_max_concurrency,
        routability_timeout: Duration::from_secs_f64(config.routability_timeout_secs),
    };
    let verdicts = probe::probe_many(&probe_targets, &probe_config).await;

    let existing = store
        .list_cameras(site_id)
        .await
        .map_err(|e| SyncError::Internal(e.to_string()))?;
    let scoped: Vec<&Camera> = existing
        .iter()
        .filter(|c| credential.recorder_id.map_or(true, |rid| c.recorder_id == Some(rid)))
        .collect();
    let by_channel: HashMap<i64, &Camera> =
        scoped.iter().filter_map(|c| c.channel.map(|ch| (ch, *c))).collect();
    let by_ip: HashMap<&str, &Camera> = scoped
        .iter()
        .filter(|c| !c.ip.is_empty())
        .map(|c| (c.ip.as_str(), *c))
        .collect();

    let now = Utc::now();
    let mut upserts = Vec::with_capacity(extracted.len());
    let mut pending_events = Vec::new();
    let mut snapshot_records = Vec::with_capacity(extracted.len());

    let mut added = 0i64;
    let mut updated = 0i64;
    let mut online = 0i64;
    let mut offline = 0i64;
    let mut unknown = 0i64;

    for cam in &extracted {
        let probe_status = verdicts.get(&cam.channel).map(String::as_str).unwrap_or("unknown");
        match probe_status {
            "online" => online += 1,
            "offline" => offline += 1,
            _ => unknown += 1,
        }

        let matched = by_channel
            .get(&cam.channel)
            .or_else(|| by_ip.get(cam.ip.as_str()))
            .copied();

        let upsert = match matched {
            Some(existing_cam) => {
                updated += 1;
                build_update(existing_cam, cam, probe_status, &mut pending_events, now)
            }
            None => {
                added += 1;
                build_insert(site_id, credential.recorder_id, cam, probe_status, &mut pending_events, now)
            }
        };

        snapshot_records.push(SnapshotCameraRecord {
            channel: upsert.channel,
            name: upsert.name.clone(),
            ip: upsert.ip.clone(),
            mac: upsert.mac.clone(),
            model: upsert.model.clone(),
            serial: upsert.serial.clone(),
            configured: upsert.configured,
            status_config: upsert.status_config.clone(),
            status_real: upsert.status_real.clone(),
        });
        upserts.push(upsert);
    }

    // Event dedup: only events that survive the committed-event lookup are
    // written. Events enqueued within this same run never dedup against
    // each other (spec §5 ordering guarantee 3).
    let since = now - dedup_window();
    let mut committed_events = Vec::with_capacity(pending_events.len());
    let mut status_changes = 0i64;
    let mut inventory_changes = 0i64;

    for pending in pending_events {
        let recent = store
            .find_recent_event(site_id, pending.channel, pending.event_type, &pending.to_status, since)
            .await
            .map_err(|e| SyncError::Internal(e.to_string()))?;

        match pending.counted {
            CountedAs::StatusChange => status_changes += 1,
            CountedAs::InventoryChange => inventory_changes += 1,
            CountedAs::Nothing => {}
        }

        if recent.is_some() {
            continue;
        }

        committed_events.push(NewCameraEvent {
            site_id,
            channel: pending.channel,
            event_type: pending.event_type.to_string(),
            from_status: pending.from_status,
            to_status: pending.to_status,
            severity: pending.severity.to_string(),
            message: pending.message,
        });
    }

    let snapshot_payload = serde_json::to_string(&snapshot_records)
        .map_err(|e| SyncError::Internal(format!("snapshot serialization failed: {}", e)))?;

    let sync_log = NewSyncLog {
        credential_id: credential.id,
        site_id,
        action: "sync".to_string(),
        status: "ok".to_string(),
        found: extracted.len() as i64,
        added,
        updated,
        online,
        offline,
        error_message: None,
    };

    store
        .run_sync_transaction(run_id, site_id, credential.id, &upserts, &committed_events, &sync_log, &snapshot_payload, now)
        .await
        .map_err(|e| SyncError::Internal(e.to_string()))?;

    info!(
        site_id,
        run_id,
        found = extracted.len(),
        added,
        updated,
        online,
        offline,
        unknown,
        "sync run committed"
    );

    Ok(SyncRunResult {
        site_id,
        ok: true,
        error: None,
        error_code: None,
        total: extracted.len() as i64,
        online,
        offline,
        unknown,
        added,
        updated,
        inventory_changes,
        status_changes,
        elapsed_ms: start.elapsed().as_millis(),
        run_id: run_id.to_string(),
    })
}

/// Inventory delta across `{ip, mac, model, serial, name}`: a field only
/// counts as "changed" when the new value is non-empty after trim and
/// differs from the stored value.
fn diff_inventory_fields(existing: &Camera, cam: &ExtractedCamera) -> Option<(serde_json::Value, serde_json::Value)> {
    let mut from = serde_json::Map::new();
    let mut to = serde_json::Map::new();

    let candidates: [(&str, &str, &str); 5] = [
        ("ip", existing.ip.as_str(), cam.ip.as_str()),
        ("mac", existing.mac.as_str(), cam.mac.as_str()),
        ("model", existing.model.as_str(), cam.model.as_str()),
        ("serial", existing.serial.as_str(), cam.serial.as_str()),
        ("name", existing.name.as_str(), cam.name.as_str()),
    ];

    for (field, old_val, new_val) in candidates {
        let trimmed = new_val.trim();
        if !trimmed.is_empty() && trimmed != old_val {
            from.insert(field.to_string(), json!(old_val));
            to.insert(field.to_string(), json!(trimmed));
        }
    }

    if from.is_empty() {
        None
    } else {
        Some((serde_json::Value::Object(from), serde_json::Value::Object(to)))
    }
}

fn build_update(
    existing: &Camera,
    cam: &ExtractedCamera,
    probe_status: &str,
    events: &mut Vec<PendingEvent>,
    now: chrono::DateTime<Utc>,
) -> CameraUpsert {
    let mut name = existing.name.clone();
    let mut ip = existing.ip.clone();
    let mut mac = existing.mac.clone();
    let mut model = existing.model.clone();
    let mut serial = existing.serial.clone();

    if let Some((from, to)) = diff_inventory_fields(existing, cam) {
        events.push(PendingEvent {
            channel: cam.channel,
            event_type: "inventory_change",
            from_status: from.to_string(),
            to_status: to.to_string(),
            severity: "info",
            message: format!("camera inventory changed on channel {}", cam.channel),
            counted: CountedAs::InventoryChange,
        });

        for field in ["ip", "mac", "model", "serial", "name"] {
            let new_val = match field {
                "ip" => cam.ip.trim(),
                "mac" => cam.mac.trim(),
                "model" => cam.model.trim(),
                "serial" => cam.serial.trim(),
                "name" => cam.name.trim(),
                _ => unreachable!(),
            };
            if new_val.is_empty() {
                continue;
            }
            match field {
                "ip" => ip = new_val.to_string(),
                "mac" => mac = new_val.to_string(),
                "model" => model = new_val.to_string(),
                "serial" => serial = new_val.to_string(),
                "name" => name = new_val.to_string(),
                _ => unreachable!(),
            }
        }
    }

    let prev = if existing.status_real.is_empty() { "unknown".to_string() } else { existing.status_real.clone() };
    let mut status_real = prev.clone();
    let mut offline_streak = existing.offline_streak;
    let mut last_seen_at = existing.last_seen_at;

    match probe_status {
        "online" => {
            offline_streak = 0;
            last_seen_at = Some(now);
            status_real = "online".to_string();
            if prev != "online" {
                events.push(PendingEvent {
                    channel: cam.channel,
                    event_type: "status_change",
                    from_status: prev.clone(),
                    to_status: "online".to_string(),
                    severity: "info",
                    message: format!("camera on channel {} came online", cam.channel),
                    counted: CountedAs::StatusChange,
                });
            }
        }
        "offline" => {
            offline_streak += 1;
            if offline_streak >= OFFLINE_STRIKES_THRESHOLD {
                status_real = "offline".to_string();
                if prev != "offline" {
                    events.push(PendingEvent {
                        channel: cam.channel,
                        event_type: "status_change",
                        from_status: prev.clone(),
                        to_status: "offline".to_string(),
                        severity: "crit",
                        message: format!("camera on channel {} went offline", cam.channel),
                        counted: CountedAs::StatusChange,
                    });
                }
            } else if prev == "online" {
                // First strike: advisory only. status_real does not move
                // yet and this does not count toward status_changes, but
                // it is still subject to the dedup check like any other
                // event. A distinct to_status ("offline_pending") keeps
                // it from deduping against the eventual committed
                // "offline" transition.
                events.push(PendingEvent {
                    channel: cam.channel,
                    event_type: "status_change",
                    from_status: prev.clone(),
                    to_status: "offline_pending".to_string(),
                    severity: "warn",
                    message: format!(
                        "camera on channel {} missed {} consecutive probe(s)",
                        cam.channel, offline_streak
                    ),
                    counted: CountedAs::Nothing,
                });
            }
        }
        _ => {
            if existing.status_real.is_empty() {
                status_real = "unknown".to_string();
            }
        }
    }

    let status = if status_real == "online" || status_real == "offline" {
        status_real.clone()
    } else {
        existing.status.clone()
    };

    CameraUpsert {
        id: Some(existing.id),
        site_id: existing.site_id,
        recorder_id: existing.recorder_id,
        channel: cam.channel,
        name,
        ip,
        mac,
        model,
        serial,
        cam_type: if existing.cam_type.is_empty() { "ip-net".to_string() } else { existing.cam_type.clone() },
        configured: true,
        status_config: "enabled".to_string(),
        status_real,
        status,
        last_seen_at,
        offline_streak,
    }
}

fn build_insert(
    site_id: i64,
    recorder_id: Option<i64>,
    cam: &ExtractedCamera,
    probe_status: &str,
    events: &mut Vec<PendingEvent>,
    now: chrono::DateTime<Utc>,
) -> CameraUpsert {
    // Explicit asymmetry with the update path (spec §9 open question):
    // a brand-new camera's first probe result is committed to
    // `status_real` directly, without waiting for the 2-strike threshold.
    let (status_real, offline_streak, last_seen_at) = match probe_status {
        "online" => ("online".to_string(), 0, Some(now)),
        "offline" => ("offline".to_string(), 1, None),
        _ => ("unknown".to_string(), 0, None),
    };

    if probe_status == "online" {
        events.push(PendingEvent {
            channel: cam.channel,
            event_type: "status_change",
            from_status: "unknown".to_string(),
            to_status: "online".to_string(),
            severity: "info",
            message: format!("new camera discovered online on channel {}", cam.channel),
            counted: CountedAs::StatusChange,
        });
    }

    CameraUpsert {
        id: None,
        site_id,
        recorder_id,
        channel: cam.channel,
        name: cam.name.clone(),
        ip: cam.ip.clone(),
        mac: cam.mac.clone(),
        model: cam.model.clone(),
        serial: cam.serial.clone(),
        cam_type: "ip-net".to_string(),
        configured: true,
        status_config: "enabled".to_string(),
        status_real: status_real.clone(),
        status: if probe_status == "unknown" { "online" } else { probe_status }.to_string(),
        last_seen_at,
        offline_streak,
    }
}

/// Run every site with an active credential, serially. A per-site failure
/// (including an internal panic inside that site's run) never aborts the
/// sites that follow it (spec §7 policy).
#[instrument(skip(store, config))]
pub async fn sync_all_sites(store: &LibsqlStore, config: &AppConfig) -> Vec<SyncRunResult> {
    let credentials = match store.list_active_credentials().await {
        Ok(creds) => creds,
        Err(e) => {
            error!(error = %e, "failed to list active credentials for fleet sync");
            return Vec::new();
        }
    };

    let mut site_ids: Vec<i64> = credentials.iter().map(|c| c.site_id).collect();
    site_ids.sort_unstable();
    site_ids.dedup();

    let mut results = Vec::with_capacity(site_ids.len());
    for site_id in site_ids {
        let store = store.clone();
        let config = config.clone();
        // Isolate each site's run in its own task so a panic inside the
        // orchestrator (a genuine internal defect) can't bring down the
        // rest of the fleet run; it is folded into that site's result.
        let result = match tokio::spawn(async move { sync_site(&store, &config, site_id).await }).await {
            Ok(result) => result,
            Err(join_err) => {
                warn!(site_id, error = %join_err, "sync task panicked");
                SyncRunResult::failure(
                    site_id,
                    generate_run_id(),
                    Duration::from_millis(0),
                    &SyncError::Internal(join_err.to_string()),
                )
            }
        };
        results.push(result);
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::Camera;

    fn base_camera() -> Camera {
        Camera {
            id: 1,
            site_id: 1,
            recorder_id: Some(1),
            channel: Some(1),
            name: "Front Door".to_string(),
            ip: "10.1.1.10".to_string(),
            mac: "00:11:22:33:44:55".to_string(),
            model: "IPC-HDW1431".to_string(),
            serial: "SN000".to_string(),
            cam_type: "ip-net".to_string(),
            configured: true,
            status_config: "enabled".to_string(),
            status_real: "online".to_string(),
            status: "online".to_string(),
            last_seen_at: Some(Utc::now()),
            offline_streak: 0,
        }
    }

    fn extracted(channel: i64, ip: &str) -> ExtractedCamera {
        ExtractedCamera {
            channel,
            name: "Front Door".to_string(),
            ip: ip.to_string(),
            mac: "00:11:22:33:44:55".to_string(),
            model: "IPC-HDW1431".to_string(),
            serial: "SN000".to_string(),
            status: "online",
        }
    }

    #[test]
    fn online_probe_resets_streak_and_keeps_status() {
        let mut events = Vec::new();
        let cam = extracted(1, "10.1.1.10");
        let upsert = build_update(&base_camera(), &cam, "online", &mut events, Utc::now());
        assert_eq!(upsert.offline_streak, 0);
        assert_eq!(upsert.status_real, "online");
        assert!(events.is_empty(), "no transition, no event expected");
    }

    #[test]
    fn first_offline_strike_is_advisory_only() {
        let mut events = Vec::new();
        let cam = extracted(1, "10.1.1.10");
        let upsert = build_update(&base_camera(), &cam, "offline", &mut events, Utc::now());
        assert_eq!(upsert.offline_streak, 1);
        assert_eq!(upsert.status_real, "online", "status must not move on first strike");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, "warn");
        assert!(matches!(events[0].counted, CountedAs::Nothing));
    }

    #[test]
    fn second_offline_strike_commits_transition() {
        let mut events = Vec::new();
        let mut existing = base_camera();
        existing.offline_streak = 1;
        let cam = extracted(1, "10.1.1.10");
        let upsert = build_update(&existing, &cam, "offline", &mut events, Utc::now());
        assert_eq!(upsert.offline_streak, 2);
        assert_eq!(upsert.status_real, "offline");
        assert_eq!(upsert.status, "offline");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, "crit");
        assert!(matches!(events[0].counted, CountedAs::StatusChange));
    }

    #[test]
    fn new_camera_unknown_probe_mirrors_legacy_status_to_online() {
        let mut events = Vec::new();
        let cam = extracted(4, "10.1.1.13");
        let upsert = build_insert(1, None, &cam, "unknown", &mut events, Utc::now());
        assert_eq!(upsert.status_real, "unknown");
        assert_eq!(upsert.status, "online", "legacy status field is never \"unknown\"");
        assert!(events.is_empty());
    }

    #[test]
    fn new_camera_offline_asymmetry_skips_threshold() {
        let mut events = Vec::new();
        let cam = extracted(3, "10.1.1.12");
        let upsert = build_insert(1, None, &cam, "offline", &mut events, Utc::now());
        assert_eq!(upsert.offline_streak, 1);
        assert_eq!(upsert.status_real, "offline");
        assert!(events.is_empty(), "insert-path offline produces no counted event");
    }

    #[test]
    fn new_camera_online_is_counted() {
        let mut events = Vec::new();
        let cam = extracted(1, "10.1.1.10");
        let upsert = build_insert(1, None, &cam, "online", &mut events, Utc::now());
        assert_eq!(upsert.offline_streak, 0);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].counted, CountedAs::StatusChange));
    }

    #[test]
    fn inventory_change_detects_only_changed_nonempty_fields() {
        let existing = base_camera();
        let mut cam = extracted(1, "10.1.1.10");
        cam.mac = "AA:BB:CC:DD:EE:FF".to_string();
        cam.model = "".to_string(); // empty, must not count as a change

        let (from, to) = diff_inventory_fields(&existing, &cam).unwrap();
        assert_eq!(from["mac"], "00:11:22:33:44:55");
        assert_eq!(to["mac"], "AA:BB:CC:DD:EE:FF");
        assert!(from.get("model").is_none());
    }

    #[test]
    fn no_inventory_change_when_fields_match() {
        let existing = base_camera();
        let cam = extracted(1, "10.1.1.10");
        assert!(diff_inventory_fields(&existing, &cam).is_none());
    }
}
