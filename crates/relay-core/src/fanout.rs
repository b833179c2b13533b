//! Fan-out of new notifications to the owner's active master devices.
//!
//! A notification moves `Created -> Dispatched -> {Handled, UnhandledExpired}`.
//! This module owns the `Created -> Dispatched` step: resolve the owner's
//! qualifying masters, collect their tokens and issue exactly one multicast
//! call. It only reads device and notification state.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use relay_db::Database;
use relay_types::events::TriggerEvent;
use relay_types::models::Notification;

use crate::error::RelayError;
use crate::push::{MulticastMessage, PushNotification, PushProvider};
use crate::registry::DeviceRegistry;
use crate::triggers::TriggerHandler;

/// Push body length cap, in characters. Presentation only.
pub const BODY_MAX_CHARS: usize = 100;

const FALLBACK_BODY: &str = "New notification";
const FALLBACK_SOURCE: &str = "Unknown Device";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The record was gone by the time the dispatcher ran.
    NotificationGone,
    NoActiveMasters,
    NoPushTokens,
    Delivered { success_count: usize, failure_count: usize },
}

pub struct FanoutDispatcher {
    db: Arc<Database>,
    registry: DeviceRegistry,
    push: Arc<dyn PushProvider>,
}

impl FanoutDispatcher {
    pub fn new(db: Arc<Database>, registry: DeviceRegistry, push: Arc<dyn PushProvider>) -> Self {
        Self { db, registry, push }
    }

    pub async fn dispatch(&self, notification_id: Uuid) -> Result<DispatchOutcome, RelayError> {
        let Some(row) = self.db.get_notification(&notification_id.to_string())? else {
            warn!("Notification {} no longer exists, skipping fan-out", notification_id);
            return Ok(DispatchOutcome::NotificationGone);
        };
        let notification = row.into_model()?;
        let owner = notification.target_user_id;
        info!("New notification {} for user {}", notification.id, owner);

        let targets = self.registry.active_master_targets(owner)?;
        if targets.matched == 0 {
            info!("No active master devices found for {}", owner);
            return Ok(DispatchOutcome::NoActiveMasters);
        }
        info!("Found {} active master device(s) for {}", targets.matched, owner);
        for device_id in &targets.without_token {
            warn!("Master device {} has no push token, skipping", device_id);
        }

        if targets.tokens.is_empty() {
            info!("No push tokens found for {}", owner);
            return Ok(DispatchOutcome::NoPushTokens);
        }

        let message = build_message(&notification, targets.tokens);
        let response = self.push.send_multicast(&message).await.map_err(|e| {
            error!("Multicast for notification {} failed: {}", notification.id, e);
            RelayError::from(e)
        })?;

        info!("Successfully sent {} message(s)", response.success_count);
        if response.failure_count > 0 {
            warn!("Failed to send {} message(s)", response.failure_count);
            for (idx, resp) in response.responses.iter().enumerate() {
                if !resp.success {
                    warn!(
                        "Push to token #{} failed: {}",
                        idx,
                        resp.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }

        Ok(DispatchOutcome::Delivered {
            success_count: response.success_count,
            failure_count: response.failure_count,
        })
    }
}

#[async_trait]
impl TriggerHandler for FanoutDispatcher {
    async fn handle(&self, event: &TriggerEvent) -> Result<(), RelayError> {
        match event {
            TriggerEvent::NotificationCreated { notification_id } => {
                self.dispatch(*notification_id).await.map(|_| ())
            }
            other => {
                warn!("Fan-out dispatcher ignoring {:?}", other.topic());
                Ok(())
            }
        }
    }
}

/// Build the single multicast request for a notification.
pub fn build_message(notification: &Notification, tokens: Vec<String>) -> MulticastMessage {
    let source = match notification.source_device_name.trim() {
        "" => FALLBACK_SOURCE,
        name => name,
    };
    let body = if notification.text.is_empty() {
        FALLBACK_BODY.to_string()
    } else {
        truncate_chars(&notification.text, BODY_MAX_CHARS)
    };
    let timestamp = notification
        .origin_timestamp
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    let mut data = BTreeMap::new();
    data.insert("notificationId".to_string(), notification.id.to_string());
    data.insert("sourceDeviceName".to_string(), source.to_string());
    data.insert("timestamp".to_string(), timestamp);

    MulticastMessage {
        tokens,
        notification: PushNotification {
            title: format!("📱 {}", source),
            body,
        },
        data,
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingPush, add_device, add_notification, memory_db};
    use chrono::{Duration, TimeZone};

    fn dispatcher(db: &Arc<Database>, push: &Arc<RecordingPush>) -> FanoutDispatcher {
        FanoutDispatcher::new(db.clone(), DeviceRegistry::new(db.clone()), push.clone())
    }

    #[tokio::test]
    async fn one_multicast_with_only_qualifying_tokens() {
        let db = memory_db();
        let push = Arc::new(RecordingPush::default());
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        add_device(&db, owner, "master", true, Some("m1"));
        add_device(&db, owner, "master", true, Some("m2"));
        add_device(&db, owner, "master", true, None);
        add_device(&db, owner, "master", false, Some("inactive"));
        add_device(&db, owner, "worker", true, Some("worker"));
        add_device(&db, stranger, "master", true, Some("stranger"));
        let id = add_notification(&db, owner, "Cart 4 returned", Utc::now());

        let outcome = dispatcher(&db, &push).dispatch(id).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered { success_count: 2, failure_count: 0 });

        let calls = push.calls();
        assert_eq!(calls.len(), 1);
        let mut tokens = calls[0].tokens.clone();
        tokens.sort();
        assert_eq!(tokens, vec!["m1".to_string(), "m2".to_string()]);
    }

    #[tokio::test]
    async fn no_qualifying_devices_means_no_push_and_no_error() {
        let db = memory_db();
        let push = Arc::new(RecordingPush::default());
        let owner = Uuid::new_v4();
        add_device(&db, owner, "worker", true, Some("w"));
        add_device(&db, owner, "master", false, Some("off"));
        let id = add_notification(&db, owner, "hi", Utc::now());

        let outcome = dispatcher(&db, &push).dispatch(id).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::NoActiveMasters);
        assert!(push.calls().is_empty());
    }

    #[tokio::test]
    async fn masters_without_tokens_end_quietly() {
        let db = memory_db();
        let push = Arc::new(RecordingPush::default());
        let owner = Uuid::new_v4();
        add_device(&db, owner, "master", true, None);
        let id = add_notification(&db, owner, "hi", Utc::now());

        let outcome = dispatcher(&db, &push).dispatch(id).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::NoPushTokens);
        assert!(push.calls().is_empty());
    }

    #[tokio::test]
    async fn long_text_is_truncated_in_push_only() {
        let db = memory_db();
        let push = Arc::new(RecordingPush::default());
        let owner = Uuid::new_v4();
        add_device(&db, owner, "master", true, Some("m1"));
        let text = "é".repeat(150);
        let id = add_notification(&db, owner, &text, Utc::now());

        dispatcher(&db, &push).dispatch(id).await.unwrap();

        let call = &push.calls()[0];
        assert_eq!(call.notification.body.chars().count(), 100);
        assert_eq!(call.notification.title, "📱 Cart barn tablet");
        assert_eq!(call.data["notificationId"], id.to_string());
        assert_eq!(call.data["sourceDeviceName"], "Cart barn tablet");

        let stored = db.get_notification(&id.to_string()).unwrap().unwrap();
        assert_eq!(stored.text.chars().count(), 150);
    }

    #[tokio::test]
    async fn per_token_failures_are_not_errors() {
        let db = memory_db();
        let push = Arc::new(RecordingPush { failing: vec!["dead".into()], ..Default::default() });
        let owner = Uuid::new_v4();
        add_device(&db, owner, "master", true, Some("live"));
        add_device(&db, owner, "master", true, Some("dead"));
        let id = add_notification(&db, owner, "hi", Utc::now());

        let outcome = dispatcher(&db, &push).dispatch(id).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered { success_count: 1, failure_count: 1 });
        assert_eq!(push.calls().len(), 1);
        assert_eq!(db.active_master_devices(&owner.to_string()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn call_level_failure_is_raised_as_transient() {
        let db = memory_db();
        let push = Arc::new(RecordingPush { unreachable: true, ..Default::default() });
        let owner = Uuid::new_v4();
        add_device(&db, owner, "master", true, Some("m1"));
        let id = add_notification(&db, owner, "hi", Utc::now());

        let err = dispatcher(&db, &push).dispatch(id).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(push.calls().len(), 1);
    }

    #[tokio::test]
    async fn swept_notification_is_a_lost_event() {
        let db = memory_db();
        let push = Arc::new(RecordingPush::default());
        let outcome = dispatcher(&db, &push).dispatch(Uuid::new_v4()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::NotificationGone);
        assert!(push.calls().is_empty());
    }

    #[test]
    fn message_uses_origin_timestamp_and_fallbacks() {
        let origin = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let n = Notification {
            id: Uuid::new_v4(),
            target_user_id: Uuid::new_v4(),
            source_device_name: "  ".into(),
            text: String::new(),
            origin_timestamp: Some(origin),
            created_at: origin + Duration::seconds(3),
            is_handled: false,
            handled_at: None,
        };

        let msg = build_message(&n, vec!["t".into()]);
        assert_eq!(msg.notification.title, "📱 Unknown Device");
        assert_eq!(msg.notification.body, "New notification");
        assert_eq!(msg.data["timestamp"], "2026-03-01T12:00:00.000Z");
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_chars("abc", 100), "abc");
        assert_eq!(truncate_chars(&"a".repeat(100), 100).len(), 100);
        assert_eq!(truncate_chars(&"a".repeat(101), 100).len(), 100);
    }
}
