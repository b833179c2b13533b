use crate::Database;
use crate::models::{
    AppVersionRow, DeviceRow, IdentityRow, NotificationRow, UserRow,
};
use anyhow::Result;
use relay_types::models::DEFAULT_ROLE;
use rusqlite::{Connection, Row};

/// Result of a write that is gated on record ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnedWrite {
    Created,
    Applied,
    /// The record already had the requested state.
    Unchanged,
    NotFound,
    NotOwner,
}

/// Column set written by an owner's client when it (re)registers a device.
pub struct DeviceUpsert<'a> {
    pub id: &'a str,
    pub owner_id: &'a str,
    pub device_name: &'a str,
    pub device_type: &'a str,
    pub is_active: bool,
    pub last_active: i64,
    pub push_token: Option<&'a str>,
    pub app_version: Option<&'a str>,
}

const DEVICE_COLUMNS: &str =
    "id, owner_id, device_name, device_type, is_active, last_active, push_token, app_version";

const NOTIFICATION_COLUMNS: &str =
    "id, target_user_id, source_device_name, text, origin_timestamp, created_at, is_handled, handled_at";

impl Database {
    // -- Identities --

    /// Returns false when the email is already registered.
    pub fn create_identity(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        created_at: i64,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO identities (id, email, password, email_verified, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                rusqlite::params![id, email, password_hash, created_at],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_identity_by_email(&self, email: &str) -> Result<Option<IdentityRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, email, password, email_verified, created_at FROM identities WHERE email = ?1",
                [email],
                |row| {
                    Ok(IdentityRow {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        password: row.get(2)?,
                        email_verified: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn identity_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM identities WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn delete_identity(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM identities WHERE id = ?1", [id])?;
            Ok(changed == 1)
        })
    }

    /// Remove an identity for `email` that never got a profile and was
    /// created before `created_before`. Returns the removed id.
    pub fn delete_unprovisioned_identity(&self, email: &str, created_before: i64) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let stale: Option<String> = tx
                .query_row(
                    "SELECT i.id FROM identities i
                     WHERE i.email = ?1 AND i.created_at < ?2
                       AND NOT EXISTS (SELECT 1 FROM users u WHERE u.id = i.id)",
                    rusqlite::params![email, created_before],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = &stale {
                tx.execute("DELETE FROM identities WHERE id = ?1", [id])?;
            }
            tx.commit()?;
            Ok(stale)
        })
    }

    // -- Email verification --

    pub fn create_email_verification(&self, token: &str, identity_id: &str, expires_at: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO email_verifications (token, identity_id, expires_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![token, identity_id, expires_at],
            )?;
            Ok(())
        })
    }

    /// Spend a verification token. The token is removed whether or not it is
    /// still valid; a valid one marks its identity verified and returns the
    /// identity id.
    pub fn consume_email_verification(&self, token: &str, now: i64) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let found: Option<(String, i64)> = tx
                .query_row(
                    "SELECT identity_id, expires_at FROM email_verifications WHERE token = ?1",
                    [token],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let verified = match found {
                Some((identity_id, expires_at)) => {
                    tx.execute("DELETE FROM email_verifications WHERE token = ?1", [token])?;
                    if expires_at > now {
                        tx.execute(
                            "UPDATE identities SET email_verified = 1 WHERE id = ?1",
                            [&identity_id],
                        )?;
                        Some(identity_id)
                    } else {
                        None
                    }
                }
                None => None,
            };

            tx.commit()?;
            Ok(verified)
        })
    }

    // -- Users --

    /// Insert a profile unless one already exists for `id`.
    /// Returns true when a row was written.
    pub fn insert_user_if_absent(
        &self,
        id: &str,
        email: &str,
        email_verified: bool,
        now: i64,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO users (id, email, email_verified, created_at, last_login, role)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
                rusqlite::params![id, email, email_verified, now, DEFAULT_ROLE],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    /// Advance `last_login` to `now`, never moving it backwards.
    /// Returns false when no profile exists.
    pub fn touch_last_login(&self, id: &str, now: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET last_login = MAX(last_login, ?2) WHERE id = ?1",
                rusqlite::params![id, now],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn set_email_verified(&self, id: &str, verified: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET email_verified = ?2 WHERE id = ?1",
                rusqlite::params![id, verified],
            )?;
            Ok(changed == 1)
        })
    }

    /// Remove an account and everything it owns in one transaction.
    pub fn delete_account(&self, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM notifications WHERE target_user_id = ?1", [user_id])?;
            tx.execute("DELETE FROM devices WHERE owner_id = ?1", [user_id])?;
            tx.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
            tx.execute("DELETE FROM identities WHERE id = ?1", [user_id])?;
            tx.commit()?;
            Ok(())
        })
    }

    // -- Devices --

    pub fn upsert_device(&self, d: &DeviceUpsert<'_>) -> Result<OwnedWrite> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let owner: Option<String> = tx
                .query_row("SELECT owner_id FROM devices WHERE id = ?1", [d.id], |row| row.get(0))
                .optional()?;

            let outcome = match owner {
                Some(existing) if existing != d.owner_id => return Ok(OwnedWrite::NotOwner),
                Some(_) => {
                    tx.execute(
                        "UPDATE devices
                         SET device_name = ?2, device_type = ?3, is_active = ?4,
                             last_active = ?5, push_token = ?6, app_version = ?7
                         WHERE id = ?1",
                        rusqlite::params![
                            d.id, d.device_name, d.device_type, d.is_active,
                            d.last_active, d.push_token, d.app_version
                        ],
                    )?;
                    OwnedWrite::Applied
                }
                None => {
                    tx.execute(
                        &format!("INSERT INTO devices ({DEVICE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                        rusqlite::params![
                            d.id, d.owner_id, d.device_name, d.device_type,
                            d.is_active, d.last_active, d.push_token, d.app_version
                        ],
                    )?;
                    OwnedWrite::Created
                }
            };

            tx.commit()?;
            Ok(outcome)
        })
    }

    pub fn get_device(&self, id: &str) -> Result<Option<DeviceRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"),
                [id],
                device_from_row,
            )
            .optional()
        })
    }

    pub fn list_devices_by_owner(&self, owner_id: &str) -> Result<Vec<DeviceRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DEVICE_COLUMNS} FROM devices WHERE owner_id = ?1 ORDER BY device_name, id"
            ))?;
            let rows = stmt
                .query_map([owner_id], device_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Devices eligible for fan-out: the owner's masters with the active flag set.
    pub fn active_master_devices(&self, owner_id: &str) -> Result<Vec<DeviceRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DEVICE_COLUMNS} FROM devices
                 WHERE owner_id = ?1 AND device_type = 'master' AND is_active = 1"
            ))?;
            let rows = stmt
                .query_map([owner_id], device_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn rename_device(&self, id: &str, owner_id: &str, name: &str) -> Result<OwnedWrite> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            match owner_of(&tx, "devices", "owner_id", id)? {
                None => return Ok(OwnedWrite::NotFound),
                Some(owner) if owner != owner_id => return Ok(OwnedWrite::NotOwner),
                Some(_) => {}
            }
            tx.execute(
                "UPDATE devices SET device_name = ?2 WHERE id = ?1",
                rusqlite::params![id, name],
            )?;
            tx.commit()?;
            Ok(OwnedWrite::Applied)
        })
    }

    pub fn delete_device(&self, id: &str, owner_id: &str) -> Result<OwnedWrite> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            match owner_of(&tx, "devices", "owner_id", id)? {
                None => return Ok(OwnedWrite::NotFound),
                Some(owner) if owner != owner_id => return Ok(OwnedWrite::NotOwner),
                Some(_) => {}
            }
            tx.execute("DELETE FROM devices WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(OwnedWrite::Applied)
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, n: &NotificationRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                rusqlite::params![
                    n.id, n.target_user_id, n.source_device_name, n.text,
                    n.origin_timestamp, n.created_at, n.is_handled, n.handled_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_notification(&self, id: &str) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                [id],
                notification_from_row,
            )
            .optional()
        })
    }

    /// Most recent notifications for an owner, newest first.
    pub fn recent_notifications(&self, target_user_id: &str, limit: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE target_user_id = ?1
                 ORDER BY created_at DESC, id
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![target_user_id, limit], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Set the handled flag once. A second call leaves `handled_at` untouched.
    pub fn mark_notification_handled(&self, id: &str, owner_id: &str, now: i64) -> Result<OwnedWrite> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            match owner_of(&tx, "notifications", "target_user_id", id)? {
                None => return Ok(OwnedWrite::NotFound),
                Some(owner) if owner != owner_id => return Ok(OwnedWrite::NotOwner),
                Some(_) => {}
            }
            let changed = tx.execute(
                "UPDATE notifications SET is_handled = 1, handled_at = ?2
                 WHERE id = ?1 AND is_handled = 0",
                rusqlite::params![id, now],
            )?;
            tx.commit()?;
            Ok(if changed == 1 { OwnedWrite::Applied } else { OwnedWrite::Unchanged })
        })
    }

    /// Ids of notifications ingested before `cutoff`, at most `limit` of them.
    pub fn stale_notification_ids(&self, cutoff: i64, limit: usize) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM notifications WHERE created_at < ?1 ORDER BY created_at LIMIT ?2",
            )?;
            let ids = stmt
                .query_map(rusqlite::params![cutoff, limit as i64], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Delete the given notifications in a single committed transaction.
    pub fn delete_notifications(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM notifications WHERE id = ?1")?;
                for id in ids {
                    deleted += stmt.execute([id])?;
                }
            }
            tx.commit()?;
            Ok(deleted)
        })
    }

    // -- App versions --

    pub fn get_app_version(&self, platform: &str) -> Result<Option<AppVersionRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT platform, latest_version, version_code, download_url, release_notes, mandatory
                 FROM app_versions WHERE platform = ?1",
                [platform],
                |row| {
                    Ok(AppVersionRow {
                        platform: row.get(0)?,
                        latest_version: row.get(1)?,
                        version_code: row.get(2)?,
                        download_url: row.get(3)?,
                        release_notes: row.get(4)?,
                        mandatory: row.get(5)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Replace the singleton record for a platform. Written by the release process.
    pub fn put_app_version(&self, v: &AppVersionRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO app_versions (platform, latest_version, version_code, download_url, release_notes, mandatory)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(platform) DO UPDATE SET
                    latest_version = excluded.latest_version,
                    version_code = excluded.version_code,
                    download_url = excluded.download_url,
                    release_notes = excluded.release_notes,
                    mandatory = excluded.mandatory",
                rusqlite::params![
                    v.platform, v.latest_version, v.version_code,
                    v.download_url, v.release_notes, v.mandatory
                ],
            )?;
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, email, email_verified, created_at, last_login, role FROM users WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                email_verified: row.get(2)?,
                created_at: row.get(3)?,
                last_login: row.get(4)?,
                role: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn owner_of(conn: &Connection, table: &str, owner_column: &str, id: &str) -> Result<Option<String>> {
    conn.query_row(
        &format!("SELECT {owner_column} FROM {table} WHERE id = ?1"),
        [id],
        |row| row.get(0),
    )
    .optional()
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<DeviceRow> {
    Ok(DeviceRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        device_name: row.get(2)?,
        device_type: row.get(3)?,
        is_active: row.get(4)?,
        last_active: row.get(5)?,
        push_token: row.get(6)?,
        app_version: row.get(7)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        target_user_id: row.get(1)?,
        source_device_name: row.get(2)?,
        text: row.get(3)?,
        origin_timestamp: row.get(4)?,
        created_at: row.get(5)?,
        is_handled: row.get(6)?,
        handled_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn id() -> String {
        Uuid::new_v4().to_string()
    }

    fn device<'a>(id: &'a str, owner: &'a str, kind: &'a str, active: bool, token: Option<&'a str>) -> DeviceUpsert<'a> {
        DeviceUpsert {
            id,
            owner_id: owner,
            device_name: "Register 1",
            device_type: kind,
            is_active: active,
            last_active: 1_000,
            push_token: token,
            app_version: Some("1.4.0"),
        }
    }

    fn notification(target: &str, created_at: i64) -> NotificationRow {
        NotificationRow {
            id: id(),
            target_user_id: target.to_string(),
            source_device_name: "Worker A".into(),
            text: "hello".into(),
            origin_timestamp: None,
            created_at,
            is_handled: false,
            handled_at: None,
        }
    }

    #[test]
    fn insert_user_if_absent_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let uid = id();
        assert!(db.insert_user_if_absent(&uid, "a@example.com", false, 10).unwrap());
        assert!(!db.insert_user_if_absent(&uid, "a@example.com", true, 20).unwrap());

        let user = db.get_user(&uid).unwrap().unwrap();
        assert_eq!(user.created_at, 10);
        assert!(!user.email_verified);
        assert_eq!(user.role, "user");
    }

    #[test]
    fn touch_last_login_never_moves_backwards() {
        let db = Database::open_in_memory().unwrap();
        let uid = id();
        db.insert_user_if_absent(&uid, "a@example.com", true, 100).unwrap();

        assert!(db.touch_last_login(&uid, 500).unwrap());
        assert!(db.touch_last_login(&uid, 300).unwrap());
        assert_eq!(db.get_user(&uid).unwrap().unwrap().last_login, 500);

        assert!(!db.touch_last_login(&id(), 500).unwrap());
    }

    #[test]
    fn active_master_query_filters_owner_type_and_flag() {
        let db = Database::open_in_memory().unwrap();
        let owner = id();
        let other = id();
        let (a, b, c, d) = (id(), id(), id(), id());

        db.upsert_device(&device(&a, &owner, "master", true, Some("tok-a"))).unwrap();
        db.upsert_device(&device(&b, &owner, "master", false, Some("tok-b"))).unwrap();
        db.upsert_device(&device(&c, &owner, "worker", true, Some("tok-c"))).unwrap();
        db.upsert_device(&device(&d, &other, "master", true, Some("tok-d"))).unwrap();

        let rows = db.active_master_devices(&owner).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, a);
    }

    #[test]
    fn device_writes_check_ownership() {
        let db = Database::open_in_memory().unwrap();
        let owner = id();
        let intruder = id();
        let dev = id();

        assert_eq!(db.upsert_device(&device(&dev, &owner, "worker", true, None)).unwrap(), OwnedWrite::Created);
        assert_eq!(db.upsert_device(&device(&dev, &intruder, "worker", true, None)).unwrap(), OwnedWrite::NotOwner);
        assert_eq!(db.rename_device(&dev, &intruder, "Mine now").unwrap(), OwnedWrite::NotOwner);
        assert_eq!(db.delete_device(&dev, &intruder).unwrap(), OwnedWrite::NotOwner);
        assert_eq!(db.rename_device(&id(), &owner, "x").unwrap(), OwnedWrite::NotFound);

        assert_eq!(db.rename_device(&dev, &owner, "Back office").unwrap(), OwnedWrite::Applied);
        assert_eq!(db.get_device(&dev).unwrap().unwrap().device_name, "Back office");

        assert_eq!(db.delete_device(&dev, &owner).unwrap(), OwnedWrite::Applied);
        assert!(db.get_device(&dev).unwrap().is_none());
    }

    #[test]
    fn mark_handled_only_sets_timestamp_once() {
        let db = Database::open_in_memory().unwrap();
        let owner = id();
        let n = notification(&owner, 1_000);
        db.insert_notification(&n).unwrap();

        assert_eq!(db.mark_notification_handled(&n.id, &owner, 2_000).unwrap(), OwnedWrite::Applied);
        assert_eq!(db.mark_notification_handled(&n.id, &owner, 3_000).unwrap(), OwnedWrite::Unchanged);

        let row = db.get_notification(&n.id).unwrap().unwrap();
        assert!(row.is_handled);
        assert_eq!(row.handled_at, Some(2_000));
    }

    #[test]
    fn stale_ids_respect_cutoff_and_limit() {
        let db = Database::open_in_memory().unwrap();
        let owner = id();
        for ts in [10, 20, 30, 40] {
            db.insert_notification(&notification(&owner, ts)).unwrap();
        }

        assert_eq!(db.stale_notification_ids(35, 10).unwrap().len(), 3);
        let two = db.stale_notification_ids(35, 2).unwrap();
        assert_eq!(two.len(), 2);
        assert_eq!(db.delete_notifications(&two).unwrap(), 2);
        assert_eq!(db.stale_notification_ids(35, 10).unwrap().len(), 1);
    }

    #[test]
    fn verification_token_is_single_use_and_expires() {
        let db = Database::open_in_memory().unwrap();
        let uid = id();
        db.create_identity(&uid, "a@example.com", "hash", 1).unwrap();
        db.create_email_verification("tok-live", &uid, 1_000).unwrap();
        db.create_email_verification("tok-old", &uid, 50).unwrap();

        assert_eq!(db.consume_email_verification("tok-old", 100).unwrap(), None);
        assert!(!db.get_identity_by_email("a@example.com").unwrap().unwrap().email_verified);

        assert_eq!(db.consume_email_verification("tok-live", 100).unwrap(), Some(uid.clone()));
        assert!(db.get_identity_by_email("a@example.com").unwrap().unwrap().email_verified);
        assert_eq!(db.consume_email_verification("tok-live", 100).unwrap(), None);
        assert_eq!(db.consume_email_verification("tok-missing", 100).unwrap(), None);
    }

    #[test]
    fn only_stale_unprovisioned_identities_are_replaceable() {
        let db = Database::open_in_memory().unwrap();
        let (stuck, fresh, live) = (id(), id(), id());
        db.create_identity(&stuck, "stuck@example.com", "hash", 10).unwrap();
        db.create_identity(&fresh, "fresh@example.com", "hash", 900).unwrap();
        db.create_identity(&live, "live@example.com", "hash", 10).unwrap();
        db.insert_user_if_absent(&live, "live@example.com", false, 10).unwrap();

        assert_eq!(db.delete_unprovisioned_identity("fresh@example.com", 500).unwrap(), None);
        assert_eq!(db.delete_unprovisioned_identity("live@example.com", 500).unwrap(), None);
        assert_eq!(db.delete_unprovisioned_identity("stuck@example.com", 500).unwrap(), Some(stuck.clone()));
        assert!(!db.identity_exists(&stuck).unwrap());
        assert!(db.create_identity(&id(), "stuck@example.com", "hash", 600).unwrap());
    }

    #[test]
    fn delete_account_removes_owned_records() {
        let db = Database::open_in_memory().unwrap();
        let uid = id();
        let dev = id();
        db.create_identity(&uid, "a@example.com", "hash", 1).unwrap();
        db.insert_user_if_absent(&uid, "a@example.com", false, 1).unwrap();
        db.upsert_device(&device(&dev, &uid, "master", true, None)).unwrap();
        db.insert_notification(&notification(&uid, 5)).unwrap();

        db.create_email_verification("tok", &uid, 100).unwrap();

        db.delete_account(&uid).unwrap();
        assert_eq!(db.consume_email_verification("tok", 1).unwrap(), None);

        assert!(!db.identity_exists(&uid).unwrap());
        assert!(db.get_user(&uid).unwrap().is_none());
        assert!(db.list_devices_by_owner(&uid).unwrap().is_empty());
        assert!(db.recent_notifications(&uid, 20).unwrap().is_empty());
    }
}
