//! Database row types. These map directly to SQLite rows and are kept
//! distinct from the relay-types models; `into_model` converts.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use relay_types::models::{AppVersionRecord, Device, DeviceType, Notification, User};

pub struct IdentityRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub email_verified: bool,
    pub created_at: i64,
}

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub created_at: i64,
    pub last_login: i64,
    pub role: String,
}

pub struct DeviceRow {
    pub id: String,
    pub owner_id: String,
    pub device_name: String,
    pub device_type: String,
    pub is_active: bool,
    pub last_active: i64,
    pub push_token: Option<String>,
    pub app_version: Option<String>,
}

pub struct NotificationRow {
    pub id: String,
    pub target_user_id: String,
    pub source_device_name: String,
    pub text: String,
    pub origin_timestamp: Option<i64>,
    pub created_at: i64,
    pub is_handled: bool,
    pub handled_at: Option<i64>,
}

pub struct AppVersionRow {
    pub platform: String,
    pub latest_version: String,
    pub version_code: i64,
    pub download_url: String,
    pub release_notes: String,
    pub mandatory: bool,
}

/// Timestamps are stored as milliseconds since the Unix epoch.
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().map_err(|e| anyhow!("corrupt id '{}': {}", raw, e))
}

impl UserRow {
    pub fn into_model(self) -> Result<User> {
        Ok(User {
            id: parse_id(&self.id)?,
            email: self.email,
            email_verified: self.email_verified,
            created_at: from_millis(self.created_at)?,
            last_login: from_millis(self.last_login)?,
            role: self.role,
        })
    }
}

impl DeviceRow {
    pub fn into_model(self) -> Result<Device> {
        let device_type = DeviceType::parse(&self.device_type)
            .ok_or_else(|| anyhow!("corrupt device_type '{}' on device '{}'", self.device_type, self.id))?;

        Ok(Device {
            id: parse_id(&self.id)?,
            owner_id: parse_id(&self.owner_id)?,
            device_name: self.device_name,
            device_type,
            is_active: self.is_active,
            last_active: from_millis(self.last_active)?,
            push_token: self.push_token,
            app_version: self.app_version,
        })
    }
}

impl NotificationRow {
    pub fn into_model(self) -> Result<Notification> {
        Ok(Notification {
            id: parse_id(&self.id)?,
            target_user_id: parse_id(&self.target_user_id)?,
            source_device_name: self.source_device_name,
            text: self.text,
            origin_timestamp: self.origin_timestamp.map(from_millis).transpose()?,
            created_at: from_millis(self.created_at)?,
            is_handled: self.is_handled,
            handled_at: self.handled_at.map(from_millis).transpose()?,
        })
    }
}

impl AppVersionRow {
    pub fn into_model(self) -> AppVersionRecord {
        AppVersionRecord {
            latest_version: self.latest_version,
            version_code: self.version_code,
            download_url: self.download_url,
            release_notes: self.release_notes,
            mandatory: self.mandatory,
        }
    }
}
