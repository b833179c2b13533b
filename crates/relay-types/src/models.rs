use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The only role an account can hold.
pub const DEFAULT_ROLE: &str = "user";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
    pub role: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Receives relayed pushes for its account.
    Master,
    /// Observes source events and reports them as notifications.
    Worker,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Worker => "worker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "master" => Some(Self::Master),
            "worker" => Some(Self::Worker),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub device_name: String,
    pub device_type: DeviceType,
    /// Client-maintained heartbeat flag. Never derived server-side.
    pub is_active: bool,
    pub last_active: DateTime<Utc>,
    pub push_token: Option<String>,
    pub app_version: Option<String>,
}

/// Dashboard presence badge derived from `last_active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Idle,
    Offline,
}

impl Device {
    pub fn presence(&self, now: DateTime<Utc>) -> Presence {
        let since = now - self.last_active;
        if since < Duration::minutes(5) {
            Presence::Online
        } else if since < Duration::minutes(60) {
            Presence::Idle
        } else {
            Presence::Offline
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub target_user_id: Uuid,
    pub source_device_name: String,
    pub text: String,
    pub origin_timestamp: Option<DateTime<Utc>>,
    /// Ingestion time; retention is measured from here.
    pub created_at: DateTime<Utc>,
    pub is_handled: bool,
    pub handled_at: Option<DateTime<Utc>>,
}

/// Where a notification sits in its relay lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationState {
    Dispatched,
    Handled,
    UnhandledExpired,
}

impl Notification {
    pub fn state(&self, now: DateTime<Utc>, retention: Duration) -> NotificationState {
        if self.is_handled {
            NotificationState::Handled
        } else if self.created_at < now - retention {
            NotificationState::UnhandledExpired
        } else {
            NotificationState::Dispatched
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppVersionRecord {
    pub latest_version: String,
    pub version_code: i64,
    pub download_url: String,
    pub release_notes: String,
    pub mandatory: bool,
}
