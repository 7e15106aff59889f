use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMethod {
    Email,
    Line,
    None,
}

impl Default for NotifyMethod {
    fn default() -> Self {
        NotifyMethod::None
    }
}

impl NotifyMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyMethod::Email => "email",
            NotifyMethod::Line => "line",
            NotifyMethod::None => "none",
        }
    }
}

/// Everything one monitoring session runs under. Handed to the engine by
/// value at start time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    pub user_id: String,
    pub secret: String,
    pub target_date: NaiveDate,
    pub notify_method: NotifyMethod,
    pub email: Option<String>,
    pub line_token: Option<String>,
    pub interval_minutes: u32,
    /// Lesson positions to observe; empty means every lesson.
    pub watched_indices: Vec<usize>,
}

impl MonitorConfig {
    /// Delivery address for the configured notification method.
    pub fn notify_address(&self) -> Option<&str> {
        match self.notify_method {
            NotifyMethod::Email => self.email.as_deref(),
            NotifyMethod::Line => self.line_token.as_deref(),
            NotifyMethod::None => None,
        }
    }
}

/// The single durable monitoring-session slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub config: MonitorConfig,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(method: NotifyMethod) -> MonitorConfig {
        MonitorConfig {
            user_id: "member-1".into(),
            secret: "hunter2".into(),
            target_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            notify_method: method,
            email: Some("member@example.com".into()),
            line_token: Some("token-abc".into()),
            interval_minutes: 5,
            watched_indices: vec![0, 2],
        }
    }

    #[test]
    fn notify_address_follows_method() {
        assert_eq!(
            config(NotifyMethod::Email).notify_address(),
            Some("member@example.com")
        );
        assert_eq!(
            config(NotifyMethod::Line).notify_address(),
            Some("token-abc")
        );
        assert_eq!(config(NotifyMethod::None).notify_address(), None);
    }

    #[test]
    fn notify_method_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&NotifyMethod::Email).unwrap(),
            "\"email\""
        );
        assert_eq!(
            serde_json::from_str::<NotifyMethod>("\"none\"").unwrap(),
            NotifyMethod::None
        );
    }
}
