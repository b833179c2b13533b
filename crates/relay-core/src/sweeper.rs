//! Retention sweep: deletes notifications older than the retention window
//! in bounded, individually committed batches.
//!
//! A run keeps no progress of its own. Each batch re-selects the oldest
//! remaining matches, so an interrupted run simply leaves the rest for the
//! next scheduled tick.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Days, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use relay_db::Database;
use relay_db::models::to_millis;
use relay_types::events::TriggerEvent;

use crate::error::RelayError;
use crate::triggers::{TriggerBus, TriggerHandler};

pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Per-transaction mutation cap of the store.
pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows deleted by each committed batch, in order.
    pub batches: Vec<usize>,
    pub deleted: usize,
}

pub struct RetentionSweeper {
    db: Arc<Database>,
    retention: Duration,
    batch_size: usize,
}

impl RetentionSweeper {
    pub fn new(db: Arc<Database>, retention: Duration, batch_size: usize) -> Self {
        Self {
            db,
            retention,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, RelayError> {
        let cutoff = now - self.retention;
        info!("Starting cleanup of notifications created before {}", cutoff);

        let cutoff = to_millis(cutoff);
        let mut report = SweepReport::default();

        loop {
            let db = self.db.clone();
            let batch_size = self.batch_size;
            let (selected, deleted) = tokio::task::spawn_blocking(move || {
                let ids = db.stale_notification_ids(cutoff, batch_size)?;
                let deleted = db.delete_notifications(&ids)?;
                anyhow::Ok((ids.len(), deleted))
            })
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r)
            .map_err(|e| {
                error!(
                    "Cleanup batch {} failed after {} deletions: {:#}",
                    report.batches.len() + 1,
                    report.deleted,
                    e
                );
                RelayError::FatalBatchFailure(e)
            })?;

            if selected == 0 {
                break;
            }
            // Rows removed elsewhere between select and delete count as zero here.
            if deleted == 0 {
                continue;
            }

            info!("Deleted {} notifications", deleted);
            report.batches.push(deleted);
            report.deleted += deleted;
        }

        if report.deleted == 0 {
            info!("No old notifications to delete");
        } else {
            info!("Cleanup complete. Total deleted: {}", report.deleted);
        }
        Ok(report)
    }
}

#[async_trait]
impl TriggerHandler for RetentionSweeper {
    async fn handle(&self, event: &TriggerEvent) -> Result<(), RelayError> {
        match event {
            TriggerEvent::ScheduleTick { .. } => self.sweep(Utc::now()).await.map(|_| ()),
            other => {
                warn!("Retention sweeper ignoring {:?}", other.topic());
                Ok(())
            }
        }
    }
}

/// Next instant strictly after `now` at which the wall clock in `tz` reads
/// `hour:00`. Ambiguous local times resolve to the earlier instant; a local
/// time skipped by DST moves one hour later.
pub fn next_daily_run(now: DateTime<Utc>, tz: Tz, hour: u32) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();

    for offset in 0..=2 {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        let Some(naive) = date.and_hms_opt(hour, 0, 0) else {
            break;
        };
        let local = tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest());

        if let Some(at) = local.map(|t| t.with_timezone(&Utc)) {
            if at > now {
                return at;
            }
        }
    }

    now + Duration::days(1)
}

/// Publish a `ScheduleTick` once a day at `hour:00` in `tz`, forever.
pub async fn run_daily_schedule(bus: TriggerBus, tz: Tz, hour: u32) {
    loop {
        let now = Utc::now();
        let next = next_daily_run(now, tz, hour);
        info!("Next retention sweep at {} ({})", next.with_timezone(&tz), tz);

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        bus.publish(TriggerEvent::ScheduleTick { fired_at: Utc::now() });
    }
}
