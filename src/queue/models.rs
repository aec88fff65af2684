use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deletion::{DeletionError, DeletionOptions, Priority};


#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueMetadata {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub reason: Option<String>,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedDeletion {
    pub id: Uuid,
    pub identifier: String,
    pub options: DeletionOptions,
    pub queued_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<DeletionError>,
    pub priority: Priority,
    #[serde(default)]
    pub metadata: QueueMetadata,
}

impl QueuedDeletion {
    pub fn new(
        identifier: impl Into<String>,
        options: DeletionOptions,
        metadata: QueueMetadata,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier: identifier.into(),
            priority: options.priority,
            options,
            queued_at: Utc::now(),
            attempts: 0,
            max_attempts: max_attempts.max(1),
            last_attempt_at: None,
            next_attempt_at: None,
            last_error: None,
            metadata,
        }
    }


    /// Exhausted items stay in the queue until cleared.
    pub fn is_failed(&self) -> bool {
        self.attempts >= self.max_attempts
    }


    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_failed() && self.next_attempt_at.is_none_or(|at| at <= now)
    }
}


#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub failed: usize,
    pub high_priority: usize,
    pub normal_priority: usize,
    pub low_priority: usize,
    pub oldest_queued_at: Option<DateTime<Utc>>,
    pub oldest_age_secs: Option<i64>,
}


#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Items that used up their last attempt during this run.
    pub exhausted: usize,
    pub remaining: usize,
    /// True when the run was skipped (offline, or another run in progress).
    pub skipped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_item_is_due_immediately() {
        let item = QueuedDeletion::new("post-1", DeletionOptions::default(), QueueMetadata::default(), 5);
        assert!(item.is_due(Utc::now()));
        assert!(!item.is_failed());
        assert_eq!(item.priority, Priority::Normal);
    }

    #[test]
    fn test_backoff_window_and_exhaustion() {
        let mut item = QueuedDeletion::new("post-1", DeletionOptions::default(), QueueMetadata::default(), 2);
        item.next_attempt_at = Some(Utc::now() + Duration::minutes(1));
        assert!(!item.is_due(Utc::now()));
        assert!(item.is_due(Utc::now() + Duration::minutes(2)));

        item.attempts = 2;
        assert!(item.is_failed());
        assert!(!item.is_due(Utc::now() + Duration::hours(1)));
    }
}
