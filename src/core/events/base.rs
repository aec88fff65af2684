use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    #[strum(serialize = "deletion.started")]
    DeletionStarted,
    #[strum(serialize = "deletion.succeeded")]
    DeletionSucceeded,
    #[strum(serialize = "deletion.failed")]
    DeletionFailed,
    #[strum(serialize = "deletion.queued")]
    DeletionQueued,
    #[strum(serialize = "queue.processed")]
    QueueProcessed,
    #[strum(serialize = "bulk.progress")]
    BulkProgress,
    #[strum(serialize = "bulk.completed")]
    BulkCompleted,
    #[strum(serialize = "alert.raised")]
    AlertRaised,
    #[strum(serialize = "alert.resolved")]
    AlertResolved,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub event_id: Uuid,
    pub kind: PipelineEventKind,
    pub timestamp: DateTime<Utc>,
    /// Correlates with the audit event id or bulk operation id when present.
    pub correlation_id: Option<Uuid>,
    pub payload: Value,
}

impl PipelineEvent {
    #[must_use]
    pub fn new(kind: PipelineEventKind, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            correlation_id: None,
            payload,
        }
    }


    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}
