use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::execution::OutcomeTier;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Danger,
}

impl NotificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationLevel::Info => "info",
            NotificationLevel::Success => "success",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Danger => "danger",
        }
    }
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<OutcomeTier> for NotificationLevel {
    fn from(tier: OutcomeTier) -> Self {
        match tier {
            OutcomeTier::Success => NotificationLevel::Success,
            OutcomeTier::Warning => NotificationLevel::Warning,
            OutcomeTier::Danger => NotificationLevel::Danger,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub level: NotificationLevel,
    pub source: String,
    pub message: String,
    /// Unix millis.
    pub created_at: i64,
    /// Unix millis after which the notification is dismissed.
    pub expires_at: i64,
}

impl Notification {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}
