pub mod models;
pub mod schema;

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use libsql::{params, Builder, Connection, Database, Rows, Transaction};
use thiserror::Error;
use tracing::instrument;

use models::{
    Camera, CameraEvent, CameraUpsert, NewCameraEvent, NewSyncLog, NvrCredential,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database connect failed: {0}")]
    Connect(String),
    #[error("query failed: {0}")]
    Query(#[from] libsql::Error),
    #[error("row decode failed: {0}")]
    Decode(String),
    #[error("no active credential for site {0}")]
    NoActiveCredential(i64),
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
}

/// The Store Gateway: the engine's only door into persistence. One
/// `libsql::Database` backs the process; each call to a write method
/// opens its own `Connection`, and [`LibsqlStore::run_sync_transaction`]
/// is the single place a whole sync run commits atomically.
#[derive(Clone)]
pub struct LibsqlStore {
    database: std::sync::Arc<Database>,
    /// Keeps an in-memory database's backing store alive for the life of
    /// the `LibsqlStore`. An in-memory `libsql`/sqlite database is torn
    /// down the moment its last connection closes, so without this anchor
    /// every `connect_sync()` after the schema-bootstrap connection drops
    /// would see an empty, unrelated database.
    _memory_anchor: Option<std::sync::Arc<Connection>>,
}

/// Strip a SQLAlchemy-style `sqlite:///` or `sqlite:////` prefix down to
/// the bare filesystem path `libsql::Builder::new_local` expects, the same
/// normalization the original service's `database.py` applies. Anything
/// else (a bare path, `:memory:`) passes through unchanged.
fn local_db_path(database_url: &str) -> std::borrow::Cow<'_, str> {
    if let Some(rest) = database_url.strip_prefix("sqlite:////") {
        std::borrow::Cow::Owned(format!("/{}", rest))
    } else if let Some(rest) = database_url.strip_prefix("sqlite:///") {
        std::borrow::Cow::Borrowed(rest)
    } else {
        std::borrow::Cow::Borrowed(database_url)
    }
}

impl LibsqlStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let path = local_db_path(database_url);
        let database = Builder::new_local(path.as_ref())
            .build()
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        let conn = database
            .connect()
            .map_err(|e| StoreError::Connect(e.to_string()))?;
        schema::apply_schema(&conn).await?;

        let is_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let memory_anchor = if is_memory { Some(std::sync::Arc::new(conn)) } else { None };

        Ok(Self {
            database: std::sync::Arc::new(database),
            _memory_anchor: memory_anchor,
        })
    }

    fn connect_sync(&self) -> Result<Connection, StoreError> {
        self.database
            .connect()
            .map_err(|e| StoreError::Connect(e.to_string()))
    }

    /// The single active credential for a site, or `None` if the site has
    /// none configured / none marked active.
    #[instrument(skip(self))]
    pub async fn find_active_credential(
        &self,
        site_id: i64,
    ) -> Result<Option<NvrCredential>, StoreError> {
        let conn = self.connect_sync()?;
        let mut rows: Rows = conn
            .query(
                "SELECT id, site_id, recorder_id, host, port, username, encrypted_password, \
                 active, last_sync_time, last_status \
                 FROM nvr_credentials WHERE site_id = ?1 AND active = 1 LIMIT 1",
                params![site_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let last_sync_time: Option<String> = row.get(8)?;
        Ok(Some(NvrCredential {
            id: row.get(0)?,
            site_id: row.get(1)?,
            recorder_id: row.get(2)?,
            host: row.get(3)?,
            port: row.get(4)?,
            username: row.get(5)?,
            encrypted_password: row.get(6)?,
            active: row.get::<i64>(7)? != 0,
            last_sync_time: last_sync_time.and_then(|s| parse_ts(&s)),
            last_status: row.get(9)?,
        }))
    }

    /// Every credential row marked active, across all sites - used by the
    /// sync-all-sites entry point.
    #[instrument(skip(self))]
    pub async fn list_active_credentials(&self) -> Result<Vec<NvrCredential>, StoreError> {
        let conn = self.connect_sync()?;
        let mut rows = conn
            .query(
                "SELECT id, site_id, recorder_id, host, port, username, encrypted_password, \
                 active, last_sync_time, last_status FROM nvr_credentials WHERE active = 1",
                (),
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let last_sync_time: Option<String> = row.get(8)?;
            out.push(NvrCredential {
                id: row.get(0)?,
                site_id: row.get(1)?,
                recorder_id: row.get(2)?,
                host: row.get(3)?,
                port: row.get(4)?,
                username: row.get(5)?,
                encrypted_password: row.get(6)?,
                active: row.get::<i64>(7)? != 0,
                last_sync_time: last_sync_time.and_then(|s| parse_ts(&s)),
                last_status: row.get(9)?,
            });
        }
        Ok(out)
    }

    /// Every camera currently on file for a site, keyed by channel where
    /// known. Cameras with no channel (legacy/manual rows) are omitted
    /// from the map but available via the returned `Vec`.
    #[instrument(skip(self))]
    pub async fn list_cameras(&self, site_id: i64) -> Result<Vec<Camera>, StoreError> {
        let conn = self.connect_sync()?;
        let mut rows = conn
            .query(
                "SELECT id, site_id, recorder_id, channel, name, ip, mac, model, serial, \
                 cam_type, configured, status_config, status_real, status, last_seen_at, \
                 offline_streak FROM cameras WHERE site_id = ?1",
                params![site_id],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let last_seen_at: Option<String> = row.get(14)?;
            out.push(Camera {
                id: row.get(0)?,
                site_id: row.get(1)?,
                recorder_id: row.get(2)?,
                channel: row.get(3)?,
                name: row.get(4)?,
                ip: row.get(5)?,
                mac: row.get(6)?,
                model: row.get(7)?,
                serial: row.get(8)?,
                cam_type: row.get(9)?,
                configured: row.get::<i64>(10)? != 0,
                status_config: row.get(11)?,
                status_real: row.get(12)?,
                status: row.get(13)?,
                last_seen_at: last_seen_at.and_then(|s| parse_ts(&s)),
                offline_streak: row.get(15)?,
            });
        }
        Ok(out)
    }

    /// Recent camera events for dedup: most recent row first, for the
    /// `(site_id, channel, event_type, to_status)` key, no older than
    /// `since`.
    #[instrument(skip(self))]
    pub async fn find_recent_event(
        &self,
        site_id: i64,
        channel: i64,
        event_type: &str,
        to_status: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<CameraEvent>, StoreError> {
        let conn = self.connect_sync()?;
        let mut rows = conn
            .query(
                "SELECT id, site_id, camera_id, channel, event_type, from_status, to_status, \
                 severity, message, created_at FROM camera_events \
                 WHERE site_id = ?1 AND channel = ?2 AND event_type = ?3 AND to_status = ?4 \
                 AND created_at >= ?5 ORDER BY created_at DESC LIMIT 1",
                params![site_id, channel, event_type, to_status, since.to_rfc3339()],
            )
            .await?;

        let Some(row) = rows.next().await? else { return Ok(None) };
        let created_at: String = row.get(9)?;
        Ok(Some(CameraEvent {
            id: row.get(0)?,
            site_id: row.get(1)?,
            camera_id: row.get(2)?,
            channel: row.get(3)?,
            event_type: row.get(4)?,
            from_status: row.get(5)?,
            to_status: row.get(6)?,
            severity: row.get(7)?,
            message: row.get(8)?,
            created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
        }))
    }

    /// Commit one full sync run atomically: camera upserts, then the
    /// inventory snapshot, then events, then the sync-log row, then the
    /// credential's `last_sync_time`/`last_status` - all inside a single
    /// transaction, so a crash mid-run leaves no partial state visible.
    ///
    /// Returns the `camera_id` assigned to (or already held by) each
    /// channel upserted, so the caller can attribute events to the right
    /// camera even when this run just inserted it.
    #[instrument(skip(self, cameras, events, sync_log, snapshot_payload))]
    pub async fn run_sync_transaction(
        &self,
        run_id: &str,
        site_id: i64,
        credential_id: i64,
        cameras: &[CameraUpsert],
        events: &[NewCameraEvent],
        sync_log: &NewSyncLog,
        snapshot_payload: &str,
        now: DateTime<Utc>,
    ) -> Result<HashMap<i64, i64>, StoreError> {
        let mut conn = self.connect_sync()?;
        let tx: Transaction = conn.transaction().await?;

        let mut channel_to_id: HashMap<i64, i64> = HashMap::new();
        for cam in cameras {
            let camera_id = upsert_camera(&tx, cam, now).await?;
            channel_to_id.insert(cam.channel, camera_id);
        }

        tx.execute(
            "INSERT INTO camera_snapshots (site_id, run_id, collected_at, payload) \
             VALUES (?1, ?2, ?3, ?4)",
            params![site_id, run_id, now.to_rfc3339(), snapshot_payload],
        )
        .await?;

        for ev in events {
            let camera_id = channel_to_id.get(&ev.channel).copied();
            tx.execute(
                "INSERT INTO camera_events \
                 (site_id, camera_id, channel, event_type, from_status, to_status, severity, \
                  message, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    ev.site_id,
                    camera_id,
                    ev.channel,
                    ev.event_type.as_str(),
                    ev.from_status.as_str(),
                    ev.to_status.as_str(),
                    ev.severity.as_str(),
                    ev.message.as_str(),
                    now.to_rfc3339(),
                ],
            )
            .await?;
        }

        tx.execute(
            "INSERT INTO sync_logs \
             (credential_id, site_id, action, status, found, added, updated, online, offline, \
              error_message, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                sync_log.credential_id,
                sync_log.site_id,
                sync_log.action.as_str(),
                sync_log.status.as_str(),
                sync_log.found,
                sync_log.added,
                sync_log.updated,
                sync_log.online,
                sync_log.offline,
                sync_log.error_message.clone(),
                now.to_rfc3339(),
            ],
        )
        .await?;

        tx.execute(
            "UPDATE nvr_credentials SET last_sync_time = ?1, last_status = ?2 WHERE id = ?3",
            params![now.to_rfc3339(), sync_log.status.as_str(), credential_id],
        )
        .await?;

        tx.commit().await?;
        Ok(channel_to_id)
    }

    /// Record a failed run (NVR unreachable, login rejected, etc.) without
    /// touching camera state - just the sync log and the credential's
    /// last-known status.
    #[instrument(skip(self, sync_log))]
    pub async fn record_failed_run(
        &self,
        credential_id: i64,
        sync_log: &NewSyncLog,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.connect_sync()?;
        let tx = conn.transaction().await?;

        tx.execute(
            "INSERT INTO sync_logs \
             (credential_id, site_id, action, status, found, added, updated, online, offline, \
              error_message, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                sync_log.credential_id,
                sync_log.site_id,
                sync_log.action.as_str(),
                sync_log.status.as_str(),
                sync_log.found,
                sync_log.added,
                sync_log.updated,
                sync_log.online,
                sync_log.offline,
                sync_log.error_message.clone(),
                now.to_rfc3339(),
            ],
        )
        .await?;

        tx.execute(
            "UPDATE nvr_credentials SET last_sync_time = ?1, last_status = ?2 WHERE id = ?3",
            params![now.to_rfc3339(), sync_log.status.as_str(), credential_id],
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

async fn upsert_camera(
    tx: &Transaction,
    cam: &CameraUpsert,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    if let Some(id) = cam.id {
        tx.execute(
            "UPDATE cameras SET recorder_id = ?1, name = ?2, ip = ?3, mac = ?4, model = ?5, \
             serial = ?6, cam_type = ?7, configured = ?8, status_config = ?9, status_real = ?10, \
             status = ?11, last_seen_at = ?12, offline_streak = ?13 WHERE id = ?14",
            params![
                cam.recorder_id,
                cam.name.as_str(),
                cam.ip.as_str(),
                cam.mac.as_str(),
                cam.model.as_str(),
                cam.serial.as_str(),
                cam.cam_type.as_str(),
                cam.configured as i64,
                cam.status_config.as_str(),
                cam.status_real.as_str(),
                cam.status.as_str(),
                cam.last_seen_at.map(|t| t.to_rfc3339()),
                cam.offline_streak,
                id,
            ],
        )
        .await?;
        Ok(id)
    } else {
        tx.execute(
            "INSERT INTO cameras \
             (site_id, recorder_id, channel, name, ip, mac, model, serial, cam_type, configured, \
              status_config, status_real, status, last_seen_at, offline_streak) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                cam.site_id,
                cam.recorder_id,
                cam.channel,
                cam.name.as_str(),
                cam.ip.as_str(),
                cam.mac.as_str(),
                cam.model.as_str(),
                cam.serial.as_str(),
                cam.cam_type.as_str(),
                cam.configured as i64,
                cam.status_config.as_str(),
                cam.status_real.as_str(),
                cam.status.as_str(),
                cam.last_seen_at.map(|t| t.to_rfc3339()),
                cam.offline_streak,
            ],
        )
        .await?;

        let mut rows = tx.query("SELECT last_insert_rowid()", ()).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| StoreError::Decode("last_insert_rowid returned no row".to_string()))?;
        let _ = now;
        Ok(row.get(0)?)
    }
}

#[cfg(test)]
impl LibsqlStore {
    /// Insert an active credential row directly, bypassing the vault -
    /// test setup only, used by the orchestrator's integration tests.
    pub(crate) async fn insert_credential_for_test(
        &self,
        site_id: i64,
        host: &str,
        port: i64,
        username: &str,
        encrypted_password: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.connect_sync()?;
        conn.execute(
            "INSERT INTO nvr_credentials (site_id, host, port, username, encrypted_password, active) \
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![site_id, host, port, username, encrypted_password],
        )
        .await?;

        let mut rows = conn.query("SELECT last_insert_rowid()", ()).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| StoreError::Decode("last_insert_rowid returned no row".to_string()))?;
        Ok(row.get(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_db_path_strips_sqlalchemy_style_prefixes() {
        assert_eq!(local_db_path(":memory:"), ":memory:");
        assert_eq!(local_db_path("netmanager.db"), "netmanager.db");
        assert_eq!(local_db_path("sqlite:///netmanager.db"), "netmanager.db");
        assert_eq!(local_db_path("sqlite:////app/data/netmanager.db"), "/app/data/netmanager.db");
    }

    fn sample_upsert(channel: i64) -> CameraUpsert {
        CameraUpsert {
            id: None,
            site_id: 1,
            recorder_id: Some(1),
            channel,
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

    #[tokio::test]
    async fn insert_and_list_cameras_round_trip() {
        let store = LibsqlStore::connect(":memory:").await.unwrap();
        let now = Utc::now();

        let log = NewSyncLog {
            credential_id: 1,
            site_id: 1,
            action: "sync".to_string(),
            status: "success".to_string(),
            found: 1,
            added: 1,
            updated: 0,
            online: 1,
            offline: 0,
            error_message: None,
        };

        conn_bootstrap_credential(&store).await;

        let ids = store
            .run_sync_transaction(
                "run-0001",
                1,
                1,
                &[sample_upsert(1)],
                &[],
                &log,
                "[]",
                now,
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        let cameras = store.list_cameras(1).await.unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].ip, "10.1.1.10");

        let cred = store.find_active_credential(1).await.unwrap().unwrap();
        assert_eq!(cred.last_status.as_deref(), Some("success"));
    }

    #[tokio::test]
    async fn event_dedup_lookup_finds_recent_match() {
        let store = LibsqlStore::connect(":memory:").await.unwrap();
        let now = Utc::now();
        conn_bootstrap_credential(&store).await;

        let log = NewSyncLog {
            credential_id: 1,
            site_id: 1,
            action: "sync".to_string(),
            status: "success".to_string(),
            found: 1,
            added: 1,
            updated: 0,
            online: 0,
            offline: 1,
            error_message: None,
        };

        let event = NewCameraEvent {
            site_id: 1,
            channel: 1,
            event_type: "status_change".to_string(),
            from_status: "online".to_string(),
            to_status: "offline".to_string(),
            severity: "warning".to_string(),
            message: "camera went offline".to_string(),
        };

        store
            .run_sync_transaction("run-0002", 1, 1, &[sample_upsert(1)], &[event], &log, "[]", now)
            .await
            .unwrap();

        let found = store
            .find_recent_event(1, 1, "status_change", "offline", now - chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert!(found.is_some());

        let stale = store
            .find_recent_event(1, 1, "status_change", "offline", now + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    async fn conn_bootstrap_credential(store: &LibsqlStore) {
        let conn = store.connect_sync().unwrap();
        conn.execute(
            "INSERT INTO nvr_credentials \
             (id, site_id, host, port, username, encrypted_password, active) \
             VALUES (1, 1, '10.1.1.200', 80, 'admin', 'enc', 1)",
            (),
        )
        .await
        .unwrap();
    }
}
