use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE identities (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE,
                password        TEXT NOT NULL,
                email_verified  INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL
            );

            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL,
                email_verified  INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL,
                last_login      INTEGER NOT NULL,
                role            TEXT NOT NULL DEFAULT 'user'
            );

            -- owner_id is a weak reference to users(id), no foreign key.
            CREATE TABLE devices (
                id              TEXT PRIMARY KEY,
                owner_id        TEXT NOT NULL,
                device_name     TEXT NOT NULL,
                device_type     TEXT NOT NULL CHECK (device_type IN ('master', 'worker')),
                is_active       INTEGER NOT NULL DEFAULT 0,
                last_active     INTEGER NOT NULL,
                push_token      TEXT,
                app_version     TEXT
            );

            CREATE INDEX idx_devices_fanout
                ON devices(owner_id, device_type, is_active);

            CREATE TABLE notifications (
                id                  TEXT PRIMARY KEY,
                target_user_id      TEXT NOT NULL,
                source_device_name  TEXT NOT NULL,
                text                TEXT NOT NULL,
                origin_timestamp    INTEGER,
                created_at          INTEGER NOT NULL,
                is_handled          INTEGER NOT NULL DEFAULT 0,
                handled_at          INTEGER
            );

            CREATE INDEX idx_notifications_created
                ON notifications(created_at);

            CREATE INDEX idx_notifications_target
                ON notifications(target_user_id, created_at);

            CREATE TABLE app_versions (
                platform        TEXT PRIMARY KEY,
                latest_version  TEXT NOT NULL,
                version_code    INTEGER NOT NULL,
                download_url    TEXT NOT NULL,
                release_notes   TEXT NOT NULL DEFAULT '',
                mandatory       INTEGER NOT NULL DEFAULT 0
            );

            INSERT INTO schema_version (version) VALUES (1);
            "
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (email verification)");
        conn.execute_batch(
            "
            CREATE TABLE email_verifications (
                token           TEXT PRIMARY KEY,
                identity_id     TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
                expires_at      INTEGER NOT NULL
            );

            CREATE INDEX idx_email_verifications_identity
                ON email_verifications(identity_id);

            INSERT INTO schema_version (version) VALUES (2);
            "
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
