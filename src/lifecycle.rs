//! Timestamps, time-bounded validity and the periodic staleness sweep.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::model::{AnalyticsStatus, EntityKind, RowId};
use crate::value::{Row, Value};

/// Source of "now" for timestamps and sweeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn stamp_created(row: &mut Row, id: RowId, now: DateTime<Utc>) {
    row.insert("id", Value::Integer(id.0 as i64));
    row.insert("createdAt", Value::Timestamp(now));
    row.insert("updatedAt", Value::Timestamp(now));
}

pub(crate) fn stamp_updated(row: &mut Row, now: DateTime<Utc>) {
    row.insert("updatedAt", Value::Timestamp(now));
}

fn elapsed(row: &Row, field: &str, now: DateTime<Utc>) -> bool {
    row.get(field)
        .and_then(Value::as_timestamp)
        .is_some_and(|at| at <= now)
}

fn is_active_analytics(row: &Row) -> bool {
    row.get("status").and_then(Value::as_str) == Some(AnalyticsStatus::Active.as_str())
}

/// An unexpired notification whose `expiresAt` has passed.
pub fn notification_expired(row: &Row, now: DateTime<Utc>) -> bool {
    row.get("expired").and_then(Value::as_bool) != Some(true) && elapsed(row, "expiresAt", now)
}

/// An active analytics row whose `validUntil` has passed.
pub fn analytics_lapsed(row: &Row, now: DateTime<Utc>) -> bool {
    is_active_analytics(row) && elapsed(row, "validUntil", now)
}

/// Whether committing `newer` retires `older`: both active and computed for
/// the same student and analysis type.
pub fn supersedes(newer: &Row, older: &Row) -> bool {
    is_active_analytics(newer)
        && is_active_analytics(older)
        && ["studentId", "type"]
            .iter()
            .all(|field| newer.get(field).is_some() && newer.get(field) == older.get(field))
}

pub(crate) fn mark_expired(row: &mut Row) {
    row.insert("expired", Value::Bool(true));
}

pub(crate) fn archive(row: &mut Row) {
    row.insert("status", Value::Text(AnalyticsStatus::Archived.to_string()));
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub now: DateTime<Utc>,
    pub expired_notifications: Vec<RowId>,
    pub archived_analytics: Vec<RowId>,
    /// Another sweep held the lock; nothing was examined.
    pub skipped: bool,
}

impl SweepReport {
    fn skipped(now: DateTime<Utc>) -> Self {
        Self {
            now,
            expired_notifications: Vec::new(),
            archived_analytics: Vec::new(),
            skipped: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.expired_notifications.is_empty() && self.archived_analytics.is_empty()
    }
}

/// Runs the staleness sweep, one at a time.
pub struct Sweeper {
    db: Arc<Database>,
    running: Mutex<()>,
}

impl Sweeper {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            running: Mutex::new(()),
        }
    }

    /// Marks notifications with `expiresAt <= now` as expired and archives
    /// active analytics with `validUntil <= now`. Rows already handled by an
    /// earlier sweep are not reported again.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let _guard = match self.running.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => {
                warn!(%now, "sweep already running, skipping");
                return SweepReport::skipped(now);
            }
        };

        let expired_notifications = self.db.modify_where(
            EntityKind::Notification,
            now,
            |row| notification_expired(row, now),
            mark_expired,
        );
        let archived_analytics = self.db.modify_where(
            EntityKind::AiAnalytics,
            now,
            |row| analytics_lapsed(row, now),
            archive,
        );

        let report = SweepReport {
            now,
            expired_notifications,
            archived_analytics,
            skipped: false,
        };
        if report.is_empty() {
            debug!(%now, "sweep found nothing stale");
        } else {
            info!(
                %now,
                expired_notifications = report.expired_notifications.len(),
                archived_analytics = report.archived_analytics.len(),
                "sweep complete"
            );
        }
        report
    }

    pub fn sweep_now(&self) -> SweepReport {
        self.sweep(self.db.now())
    }
}

/// Runs `sweeper` every `every` on the tokio runtime. Each sweep holds the
/// store's write lock, so it runs on the blocking pool.
pub fn spawn(sweeper: Arc<Sweeper>, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let sweeper = Arc::clone(&sweeper);
            if let Err(err) = tokio::task::spawn_blocking(move || sweeper.sweep_now()).await {
                warn!(error = %err, "scheduled sweep did not complete");
            }
        }
    })
}
