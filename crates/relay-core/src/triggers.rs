//! Trigger bus and runtime.
//!
//! Every external event kind is a [`Topic`] with exactly one subscribed
//! [`TriggerHandler`]. The runtime runs each event as its own task and owns
//! the redelivery policy; handlers never retry internally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use relay_types::events::{Topic, TriggerEvent};

use crate::error::RelayError;

#[async_trait]
pub trait TriggerHandler: Send + Sync {
    async fn handle(&self, event: &TriggerEvent) -> Result<(), RelayError>;
}

/// Explicit topic -> handler routing.
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<Topic, Arc<dyn TriggerHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, topic: Topic, handler: Arc<dyn TriggerHandler>) -> anyhow::Result<()> {
        if self.handlers.contains_key(&topic) {
            anyhow::bail!("topic {:?} already has a handler", topic);
        }
        self.handlers.insert(topic, handler);
        Ok(())
    }

    pub fn handler_for(&self, topic: Topic) -> Option<Arc<dyn TriggerHandler>> {
        self.handlers.get(&topic).cloned()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first delivery.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Publisher side of the trigger bus. Cheap to clone.
#[derive(Clone)]
pub struct TriggerBus {
    tx: mpsc::UnboundedSender<TriggerEvent>,
}

impl TriggerBus {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TriggerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: TriggerEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!("Trigger runtime is gone, dropping {:?}", e.0.topic());
        }
    }
}

pub struct TriggerRuntime {
    table: Arc<DispatchTable>,
    retry: RetryPolicy,
}

impl TriggerRuntime {
    pub fn new(table: DispatchTable, retry: RetryPolicy) -> Self {
        Self {
            table: Arc::new(table),
            retry,
        }
    }

    /// Consume the bus until every publisher is dropped. Each event is
    /// handled on its own task; nothing is shared between invocations
    /// beyond the store and provider handles inside the handlers.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<TriggerEvent>) {
        while let Some(event) = rx.recv().await {
            let table = self.table.clone();
            let retry = self.retry;
            tokio::spawn(async move {
                let _ = deliver(&table, &event, retry).await;
            });
        }
        info!("Trigger bus closed");
    }
}

/// Run the handler for one event, redelivering retryable failures.
pub async fn deliver(
    table: &DispatchTable,
    event: &TriggerEvent,
    retry: RetryPolicy,
) -> Result<(), RelayError> {
    let topic = event.topic();
    let Some(handler) = table.handler_for(topic) else {
        warn!("No handler subscribed to {:?}", topic);
        return Ok(());
    };

    let mut attempt = 1;
    loop {
        match handler.handle(event).await {
            Ok(()) => {
                debug!("{:?} handled on attempt {}", topic, attempt);
                return Ok(());
            }
            Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                warn!("{:?} attempt {}/{} failed: {}", topic, attempt, retry.max_attempts, e);
                tokio::time::sleep(retry.backoff).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    error!("{:?} failed after {} attempt(s): {}", topic, attempt, e);
                } else {
                    warn!("{:?} rejected: {}", topic, e);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
        terminal: bool,
    }

    #[async_trait]
    impl TriggerHandler for Flaky {
        async fn handle(&self, _event: &TriggerEvent) -> Result<(), RelayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                if self.terminal {
                    return Err(RelayError::PermissionDenied("nope".into()));
                }
                return Err(RelayError::TransientProviderFailure(anyhow::anyhow!("503")));
            }
            Ok(())
        }
    }

    fn flaky(fail_first: u32, terminal: bool) -> Arc<Flaky> {
        Arc::new(Flaky { calls: AtomicU32::new(0), fail_first, terminal })
    }

    fn event() -> TriggerEvent {
        TriggerEvent::NotificationCreated { notification_id: Uuid::new_v4() }
    }

    const FAST: RetryPolicy = RetryPolicy { max_attempts: 3, backoff: Duration::ZERO };

    #[test]
    fn a_topic_takes_only_one_handler() {
        let mut table = DispatchTable::new();
        table.subscribe(Topic::ScheduleTick, flaky(0, false)).unwrap();
        assert!(table.subscribe(Topic::ScheduleTick, flaky(0, false)).is_err());
        assert!(table.handler_for(Topic::IdentityCreated).is_none());
    }

    #[tokio::test]
    async fn transient_failures_are_redelivered() {
        let handler = flaky(2, false);
        let mut table = DispatchTable::new();
        table.subscribe(Topic::NotificationCreated, handler.clone()).unwrap();

        deliver(&table, &event(), FAST).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn redelivery_stops_at_max_attempts() {
        let handler = flaky(10, false);
        let mut table = DispatchTable::new();
        table.subscribe(Topic::NotificationCreated, handler.clone()).unwrap();

        let err = deliver(&table, &event(), FAST).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_failures_are_not_retried() {
        let handler = flaky(1, true);
        let mut table = DispatchTable::new();
        table.subscribe(Topic::NotificationCreated, handler.clone()).unwrap();

        let err = deliver(&table, &event(), FAST).await.unwrap_err();
        assert!(matches!(err, RelayError::PermissionDenied(_)));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn runtime_handles_published_events() {
        struct Signal(mpsc::UnboundedSender<Topic>);

        #[async_trait]
        impl TriggerHandler for Signal {
            async fn handle(&self, event: &TriggerEvent) -> Result<(), RelayError> {
                let _ = self.0.send(event.topic());
                Ok(())
            }
        }

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let mut table = DispatchTable::new();
        table.subscribe(Topic::ScheduleTick, Arc::new(Signal(seen_tx))).unwrap();

        let (bus, rx) = TriggerBus::channel();
        tokio::spawn(TriggerRuntime::new(table, FAST).run(rx));

        bus.publish(TriggerEvent::ScheduleTick { fired_at: chrono::Utc::now() });
        assert_eq!(seen_rx.recv().await, Some(Topic::ScheduleTick));
    }
}
