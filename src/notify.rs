use std::cmp::Reverse;
use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{AlertLevel, AlertRecord};

/// Week-over-week rise in estimated cases that raises a warning.
pub const SURGE_THRESHOLD_PERCENT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

pub trait NotificationSink {
    fn emit(&self, notification: Notification);
}

pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Error => error!("{}", notification.message),
            NotificationKind::Warning => warn!("{}", notification.message),
            NotificationKind::Info | NotificationKind::Success => {
                info!("{}", notification.message)
            }
        }
    }
}

pub struct NotificationLog {
    entries: Mutex<VecDeque<Notification>>,
    capacity: usize,
}

impl NotificationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn recent(&self) -> Vec<Notification> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

impl NotificationSink for NotificationLog {
    fn emit(&self, notification: Notification) {
        TracingSink.emit(notification.clone());

        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push_front(notification);
        entries.truncate(self.capacity);
    }
}

pub fn check_alerts(records: &[AlertRecord], sink: &dyn NotificationSink) -> usize {
    let mut newest_first: Vec<&AlertRecord> = records.iter().collect();
    newest_first.sort_by_key(|record| Reverse((record.year, record.week)));

    let Some(latest) = newest_first.first() else {
        return 0;
    };
    let mut emitted = 0;

    match latest.level() {
        level @ (AlertLevel::Orange | AlertLevel::Red) => {
            sink.emit(Notification::new(
                NotificationKind::Error,
                format!(
                    "Alert level {} ({level}) detected in week {}",
                    level.code(),
                    latest.label()
                ),
            ));
            emitted += 1;
        }
        AlertLevel::Yellow => {
            sink.emit(Notification::new(
                NotificationKind::Warning,
                format!(
                    "Attention: alert level 2 (yellow) detected in week {}",
                    latest.label()
                ),
            ));
            emitted += 1;
        }
        AlertLevel::Green | AlertLevel::Unknown(_) => {}
    }

    if let Some(previous) = newest_first.get(1) {
        if previous.estimated_cases > 0.0 {
            let increase = (latest.estimated_cases - previous.estimated_cases)
                / previous.estimated_cases
                * 100.0;
            if increase > SURGE_THRESHOLD_PERCENT {
                sink.emit(Notification::new(
                    NotificationKind::Warning,
                    format!(
                        "Estimated cases up {increase:.1}% in week {} over week {}",
                        latest.label(),
                        previous.label()
                    ),
                ));
                emitted += 1;
            }
        }
    }

    emitted
}
