use libsql::Connection;

use super::StoreError;

/// Table DDL for the engine's own persisted state (spec §3 / §6.4).
/// `sites` exists only as an FK anchor - this crate never creates,
/// updates, or deletes a site row; that's a separate, external CRUD
/// surface.
const SCHEMA_SQL: &[&str] = &[
    "PRAGMA journal_mode=WAL",
    "PRAGMA foreign_keys=ON",
    r#"
    CREATE TABLE IF NOT EXISTS sites (
        id   INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS nvr_credentials (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        site_id             INTEGER NOT NULL,
        recorder_id         INTEGER,
        host                TEXT NOT NULL,
        port                INTEGER NOT NULL,
        username            TEXT NOT NULL,
        encrypted_password  TEXT NOT NULL,
        active              INTEGER NOT NULL DEFAULT 1,
        last_sync_time      TEXT,
        last_status         TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_nvr_credentials_site_active ON nvr_credentials(site_id, active)",
    r#"
    CREATE TABLE IF NOT EXISTS cameras (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        site_id         INTEGER NOT NULL,
        recorder_id     INTEGER,
        channel         INTEGER,
        name            TEXT NOT NULL DEFAULT '',
        ip              TEXT NOT NULL DEFAULT '',
        mac             TEXT NOT NULL DEFAULT '',
        model           TEXT NOT NULL DEFAULT '',
        serial          TEXT NOT NULL DEFAULT '',
        cam_type        TEXT NOT NULL DEFAULT 'ip-net',
        configured      INTEGER NOT NULL DEFAULT 0,
        status_config   TEXT NOT NULL DEFAULT 'disabled',
        status_real     TEXT NOT NULL DEFAULT 'unknown',
        status          TEXT NOT NULL DEFAULT 'offline',
        last_seen_at    TEXT,
        offline_streak  INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_cameras_site_channel ON cameras(site_id, channel)",
    "CREATE INDEX IF NOT EXISTS idx_cameras_site_ip ON cameras(site_id, ip)",
    r#"
    CREATE TABLE IF NOT EXISTS camera_snapshots (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        site_id      INTEGER NOT NULL,
        run_id       TEXT NOT NULL,
        collected_at TEXT NOT NULL,
        payload      TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_camera_snapshots_run ON camera_snapshots(run_id)",
    r#"
    CREATE TABLE IF NOT EXISTS camera_events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        site_id     INTEGER NOT NULL,
        camera_id   INTEGER,
        channel     INTEGER,
        event_type  TEXT NOT NULL,
        from_status TEXT NOT NULL DEFAULT '',
        to_status   TEXT NOT NULL DEFAULT '',
        severity    TEXT NOT NULL,
        message     TEXT NOT NULL,
        created_at  TEXT NOT NULL
    )
    "#,
    // Powers both the dedup lookup and any "recent events for a site" query.
    r#"
    CREATE INDEX IF NOT EXISTS idx_camera_events_dedup
        ON camera_events(site_id, channel, event_type, to_status, created_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_logs (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        credential_id  INTEGER NOT NULL,
        site_id        INTEGER NOT NULL,
        action         TEXT NOT NULL,
        status         TEXT NOT NULL,
        found          INTEGER NOT NULL DEFAULT 0,
        added          INTEGER NOT NULL DEFAULT 0,
        updated        INTEGER NOT NULL DEFAULT 0,
        online         INTEGER NOT NULL DEFAULT 0,
        offline        INTEGER NOT NULL DEFAULT 0,
        error_message  TEXT,
        created_at     TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sync_logs_site ON sync_logs(site_id)",
];

pub async fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    for statement in SCHEMA_SQL {
        conn.execute(statement, ()).await.map_err(StoreError::Query)?;
    }
    Ok(())
}
