use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::error::AppError;
use crate::domain::notification::{Notification, NotificationLevel};

const MAX_NOTIFICATIONS: usize = 100;

/// Transient user-facing messages. Each one expires after the configured
/// time to live and is dropped the next time the list is read.
#[derive(Debug, Clone)]
pub struct NotificationCenter {
    entries: Arc<Mutex<Vec<Notification>>>,
    ttl: Duration,
}

impl NotificationCenter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            ttl,
        }
    }

    pub fn push(&self, level: NotificationLevel, source: &str, message: &str) -> Notification {
        match level {
            NotificationLevel::Danger => error!(source, "{}", message),
            NotificationLevel::Warning => warn!(source, "{}", message),
            NotificationLevel::Info | NotificationLevel::Success => info!(source, "{}", message),
        }

        let created_at = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            level,
            source: source.to_string(),
            message: message.to_string(),
            created_at,
            expires_at: created_at.saturating_add(ttl_ms),
        };

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push(notification.clone());
        if entries.len() > MAX_NOTIFICATIONS {
            entries.remove(0);
        }
        notification
    }

    pub fn info(&self, source: &str, message: &str) -> Notification {
        self.push(NotificationLevel::Info, source, message)
    }

    pub fn success(&self, source: &str, message: &str) -> Notification {
        self.push(NotificationLevel::Success, source, message)
    }

    pub fn warning(&self, source: &str, message: &str) -> Notification {
        self.push(NotificationLevel::Warning, source, message)
    }

    /// One danger notification for an error caught at an operation boundary.
    pub fn report_error(&self, source: &str, err: &AppError) -> Notification {
        self.push(NotificationLevel::Danger, source, &err.to_string())
    }

    /// Notifications that have not expired yet, oldest first.
    pub fn active(&self) -> Vec<Notification> {
        self.active_at(Utc::now().timestamp_millis())
    }

    pub fn active_at(&self, now_ms: i64) -> Vec<Notification> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|entry| !entry.is_expired(now_ms));
        entries.clone()
    }

    /// Everything recorded so far, expired or not.
    pub fn history(&self) -> Vec<Notification> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, level: NotificationLevel) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.level == level)
            .count()
    }

    pub fn dismiss(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
