use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use relay_db::Database;
use relay_db::models::{NotificationRow, to_millis};
use relay_db::queries::OwnedWrite;
use relay_types::api::{CreateNotificationRequest, FeedStats, NotificationFeed, NotificationView};
use relay_types::events::TriggerEvent;
use relay_types::models::Notification;

use crate::error::RelayError;
use crate::triggers::TriggerBus;

pub const DEFAULT_FEED_LIMIT: u32 = 20;
pub const MAX_FEED_LIMIT: u32 = 100;

/// Notification intake, the dashboard feed and mark-handled.
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<Database>,
    bus: TriggerBus,
    retention: Duration,
}

impl NotificationService {
    pub fn new(db: Arc<Database>, bus: TriggerBus, retention: Duration) -> Self {
        Self { db, bus, retention }
    }

    /// Store a worker-reported event for the caller's own account and
    /// announce it on the bus.
    pub fn create(&self, caller: Uuid, req: &CreateNotificationRequest) -> Result<Notification, RelayError> {
        if req.text.trim().is_empty() {
            return Err(RelayError::InvalidArgument("notification text must not be empty".into()));
        }

        let id = Uuid::new_v4();
        let row = NotificationRow {
            id: id.to_string(),
            target_user_id: caller.to_string(),
            source_device_name: req.source_device_name.trim().to_string(),
            text: req.text.clone(),
            origin_timestamp: req.timestamp.map(to_millis),
            created_at: to_millis(Utc::now()),
            is_handled: false,
            handled_at: None,
        };
        self.db.insert_notification(&row)?;
        let notification = row.into_model()?;

        debug!("Notification {} stored for {}", id, caller);
        self.bus.publish(TriggerEvent::NotificationCreated { notification_id: id });
        Ok(notification)
    }

    /// Idempotent: an already-handled record keeps its original `handled_at`.
    pub fn mark_handled(&self, caller: Uuid, id: Uuid) -> Result<Notification, RelayError> {
        let key = id.to_string();
        let outcome = self
            .db
            .mark_notification_handled(&key, &caller.to_string(), to_millis(Utc::now()))?;

        match outcome {
            OwnedWrite::NotFound => return Err(RelayError::NotFound(format!("notification {}", id))),
            OwnedWrite::NotOwner => {
                return Err(RelayError::PermissionDenied(format!(
                    "notification {} belongs to another account",
                    id
                )));
            }
            OwnedWrite::Applied => info!("Notification {} marked handled", id),
            _ => debug!("Notification {} was already handled", id),
        }

        Ok(self
            .db
            .get_notification(&key)?
            .ok_or_else(|| RelayError::NotFound(format!("notification {}", id)))?
            .into_model()?)
    }

    /// The caller's most recent notifications, newest first, with counts over
    /// the returned page.
    pub fn feed(&self, caller: Uuid, limit: Option<u32>) -> Result<NotificationFeed, RelayError> {
        let limit = limit.unwrap_or(DEFAULT_FEED_LIMIT).clamp(1, MAX_FEED_LIMIT);
        let rows = self.db.recent_notifications(&caller.to_string(), limit)?;
        let now = Utc::now();

        let mut stats = FeedStats::default();
        let mut notifications = Vec::with_capacity(rows.len());
        for row in rows {
            let notification = row.into_model()?;
            stats.total += 1;
            if notification.is_handled {
                stats.handled += 1;
            } else {
                stats.unhandled += 1;
            }
            let state = notification.state(now, self.retention);
            notifications.push(NotificationView { notification, state });
        }

        Ok(NotificationFeed { notifications, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_notification, memory_db};
    use relay_types::models::NotificationState;

    fn service(db: Arc<Database>) -> (NotificationService, tokio::sync::mpsc::UnboundedReceiver<TriggerEvent>) {
        let (bus, rx) = TriggerBus::channel();
        (NotificationService::new(db, bus, Duration::days(30)), rx)
    }

    fn request(text: &str) -> CreateNotificationRequest {
        CreateNotificationRequest {
            source_device_name: "Shop tablet".into(),
            text: text.into(),
            timestamp: None,
        }
    }

    #[test]
    fn create_targets_caller_and_publishes() {
        let (svc, mut rx) = service(memory_db());
        let caller = Uuid::new_v4();

        let n = svc.create(caller, &request("Cart 12 needs service")).unwrap();
        assert_eq!(n.target_user_id, caller);
        assert!(!n.is_handled);

        match rx.try_recv().unwrap() {
            TriggerEvent::NotificationCreated { notification_id } => assert_eq!(notification_id, n.id),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn create_rejects_blank_text() {
        let (svc, mut rx) = service(memory_db());
        assert!(matches!(svc.create(Uuid::new_v4(), &request("  ")), Err(RelayError::InvalidArgument(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stored_text_is_never_truncated() {
        let (svc, _rx) = service(memory_db());
        let text = "x".repeat(150);
        let n = svc.create(Uuid::new_v4(), &request(&text)).unwrap();
        assert_eq!(n.text.chars().count(), 150);
    }

    #[test]
    fn mark_handled_twice_keeps_first_timestamp() {
        let db = memory_db();
        let owner = Uuid::new_v4();
        let id = add_notification(&db, owner, "hello", Utc::now());
        let (svc, _rx) = service(db);

        let first = svc.mark_handled(owner, id).unwrap();
        assert!(first.is_handled);
        let handled_at = first.handled_at.unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = svc.mark_handled(owner, id).unwrap();
        assert!(second.is_handled);
        assert_eq!(second.handled_at, Some(handled_at));
    }

    #[test]
    fn mark_handled_checks_owner_and_existence() {
        let db = memory_db();
        let owner = Uuid::new_v4();
        let id = add_notification(&db, owner, "hello", Utc::now());
        let (svc, _rx) = service(db);

        assert!(matches!(svc.mark_handled(Uuid::new_v4(), id), Err(RelayError::PermissionDenied(_))));
        assert!(matches!(svc.mark_handled(owner, Uuid::new_v4()), Err(RelayError::NotFound(_))));
    }

    #[test]
    fn feed_is_newest_first_with_stats() {
        let db = memory_db();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let old = add_notification(&db, owner, "old", now - Duration::days(40));
        let mid = add_notification(&db, owner, "mid", now - Duration::hours(2));
        let new = add_notification(&db, owner, "new", now - Duration::minutes(1));
        add_notification(&db, Uuid::new_v4(), "someone else", now);
        let (svc, _rx) = service(db);
        svc.mark_handled(owner, mid).unwrap();

        let feed = svc.feed(owner, None).unwrap();
        let ids: Vec<Uuid> = feed.notifications.iter().map(|v| v.notification.id).collect();
        assert_eq!(ids, vec![new, mid, old]);
        assert_eq!(feed.stats, FeedStats { total: 3, unhandled: 2, handled: 1 });
        assert_eq!(feed.notifications[0].state, NotificationState::Dispatched);
        assert_eq!(feed.notifications[1].state, NotificationState::Handled);
        assert_eq!(feed.notifications[2].state, NotificationState::UnhandledExpired);

        assert_eq!(svc.feed(owner, Some(2)).unwrap().notifications.len(), 2);
    }
}
