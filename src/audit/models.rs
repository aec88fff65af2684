use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::deletion::DeletionError;


#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
    Initiated,
    Success,
    Failed,
    Retried,
}

impl AuditAction {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub entry_id: Uuid,
    pub event_id: Uuid,
    pub sequence: u64,
    pub post_id: String,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub error: Option<DeletionError>,
    pub duration_ms: Option<u64>,
    pub retry_count: u32,
    pub cache_invalidated: Option<bool>,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Retrying,
    Success,
    Failed,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}


/// Rollup of one deletion's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionEvent {
    pub id: Uuid,
    pub post_id: String,
    pub status: EventStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub actor: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Timestamp,
    Action,
    Actor,
}


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFilter {
    pub post_id: Option<String>,
    pub actor: Option<String>,
    pub action: Option<AuditAction>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: usize,
    pub sort_by: SortField,
    pub order: SortOrder,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            post_id: None,
            actor: None,
            action: None,
            start: None,
            end: None,
            offset: 0,
            limit: 50,
            sort_by: SortField::Timestamp,
            order: SortOrder::Desc,
        }
    }
}

impl AuditFilter {
    pub fn for_post(post_id: impl Into<String>) -> Self {
        Self {
            post_id: Some(post_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.post_id.as_ref().is_none_or(|p| *p == entry.post_id)
            && self.actor.as_ref().is_none_or(|a| *a == entry.actor)
            && self.action.is_none_or(|a| a == entry.action)
            && self.start.is_none_or(|s| entry.timestamp >= s)
            && self.end.is_none_or(|e| entry.timestamp <= e)
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPage {
    pub entries: Vec<AuditLogEntry>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn last(window: Duration) -> Self {
        let end = Utc::now();
        Self { start: end - window, end }
    }

    pub fn last_hours(hours: i64) -> Self {
        Self::last(Duration::hours(hours))
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionMetrics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub success_rate: f64,
    pub error_rate: f64,
    pub average_duration_ms: f64,
    pub p50_duration_ms: u64,
    pub p95_duration_ms: u64,
    pub p99_duration_ms: u64,
    pub retry_rate: f64,
    pub cache_invalidation_rate: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}
