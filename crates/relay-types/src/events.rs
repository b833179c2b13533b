use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity as delivered by the authentication subsystem on account creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIdentity {
    pub id: Uuid,
    pub email: Option<String>,
    pub email_verified: bool,
}

/// Trigger kinds. Each topic has exactly one subscribed handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    IdentityCreated,
    NotificationCreated,
    ScheduleTick,
}

/// Events published onto the trigger bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TriggerEvent {
    /// An account identity was created and awaits gating
    IdentityCreated(NewIdentity),

    /// A worker wrote a new notification record
    NotificationCreated { notification_id: Uuid },

    /// The daily retention schedule fired
    ScheduleTick { fired_at: DateTime<Utc> },
}

impl TriggerEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::IdentityCreated(_) => Topic::IdentityCreated,
            Self::NotificationCreated { .. } => Topic::NotificationCreated,
            Self::ScheduleTick { .. } => Topic::ScheduleTick,
        }
    }
}
