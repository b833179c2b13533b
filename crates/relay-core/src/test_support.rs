use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use relay_db::Database;
use relay_db::models::{NotificationRow, to_millis};
use relay_db::queries::DeviceUpsert;

use crate::push::{MulticastMessage, MulticastResponse, PushError, PushProvider, SendResponse};

/// Records every multicast call. Tokens listed in `failing` are reported as
/// per-token failures; `unreachable` fails the whole call.
#[derive(Default)]
pub struct RecordingPush {
    pub calls: Mutex<Vec<MulticastMessage>>,
    pub failing: Vec<String>,
    pub unreachable: bool,
}

impl RecordingPush {
    pub fn calls(&self) -> Vec<MulticastMessage> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushProvider for RecordingPush {
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastResponse, PushError> {
        self.calls.lock().unwrap().push(message.clone());
        if self.unreachable {
            return Err(PushError::Rejected { status: 503, body: "unavailable".into() });
        }

        let responses: Vec<SendResponse> = message
            .tokens
            .iter()
            .map(|t| {
                if self.failing.contains(t) {
                    SendResponse { success: false, message_id: None, error: Some("unregistered".into()) }
                } else {
                    SendResponse { success: true, message_id: Some(format!("msg-{t}")), error: None }
                }
            })
            .collect();
        let success_count = responses.iter().filter(|r| r.success).count();

        Ok(MulticastResponse {
            success_count,
            failure_count: responses.len() - success_count,
            responses,
        })
    }
}

pub fn memory_db() -> Arc<Database> {
    Arc::new(Database::open_in_memory().unwrap())
}

pub fn add_device(
    db: &Database,
    owner: Uuid,
    kind: &str,
    active: bool,
    token: Option<&str>,
) -> Uuid {
    let id = Uuid::new_v4();
    let id_str = id.to_string();
    let owner_str = owner.to_string();
    db.upsert_device(&DeviceUpsert {
        id: &id_str,
        owner_id: &owner_str,
        device_name: "Test device",
        device_type: kind,
        is_active: active,
        last_active: to_millis(Utc::now()),
        push_token: token,
        app_version: None,
    })
    .unwrap();
    id
}

pub fn add_notification(db: &Database, target: Uuid, text: &str, created_at: DateTime<Utc>) -> Uuid {
    let id = Uuid::new_v4();
    db.insert_notification(&NotificationRow {
        id: id.to_string(),
        target_user_id: target.to_string(),
        source_device_name: "Cart barn tablet".into(),
        text: text.into(),
        origin_timestamp: None,
        created_at: to_millis(created_at),
        is_handled: false,
        handled_at: None,
    })
    .unwrap();
    id
}
