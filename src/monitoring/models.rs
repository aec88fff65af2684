use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::deletion::CircuitState;


#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthLevel,
    pub error_rate: f64,
    pub average_response_time_ms: f64,
    pub queue_size: usize,
    pub oldest_queued_age_secs: Option<i64>,
    pub consecutive_failures: usize,
    pub network_online: bool,
    pub circuit_state: CircuitState,
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertType {
    HighErrorRate,
    SlowResponses,
    QueueBacklog,
    StaleQueue,
    ConsecutiveFailures,
    CircuitOpen,
    NetworkOffline,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub occurrences: u32,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(alert_type: AlertType, severity: AlertSeverity, title: impl Into<String>, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            alert_type,
            severity,
            title: title.into(),
            message: message.into(),
            timestamp: now,
            last_seen_at: now,
            occurrences: 1,
            acknowledged: false,
            acknowledged_at: None,
            resolved_at: None,
        }
    }


    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }
}


/// One threshold crossing found during a health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breach {
    pub alert_type: AlertType,
    pub level: HealthLevel,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
}
