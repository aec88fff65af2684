use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::deletion::{DeletionOptions, DeletionResult};


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkOptions {
    /// Batch size; falls back to the configured default when unset.
    pub max_concurrent: Option<usize>,
    pub continue_on_error: bool,
    pub deletion: DeletionOptions,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            continue_on_error: true,
            deletion: DeletionOptions::default(),
        }
    }
}

impl BulkOptions {
    pub fn with_deletion(deletion: DeletionOptions) -> Self {
        Self {
            deletion,
            ..Default::default()
        }
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BulkStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkDeletionProgress {
    pub operation_id: Uuid,
    pub status: BulkStatus,
    pub total: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub current_batch: usize,
    pub total_batches: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_time_remaining_ms: Option<u64>,
    pub results: Vec<DeletionResult>,
}

impl BulkDeletionProgress {
    pub fn new(operation_id: Uuid, total: usize, total_batches: usize) -> Self {
        Self {
            operation_id,
            status: BulkStatus::Running,
            total,
            processed_count: 0,
            success_count: 0,
            failure_count: 0,
            current_batch: 0,
            total_batches,
            started_at: Utc::now(),
            completed_at: None,
            estimated_time_remaining_ms: None,
            results: Vec::new(),
        }
    }


    pub fn is_running(&self) -> bool {
        self.status == BulkStatus::Running
    }


    pub fn failed_identifiers(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.identifier.clone())
            .collect()
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkDeletionResult {
    pub operation_id: Uuid,
    pub status: BulkStatus,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<DeletionResult>,
    pub duration_ms: u64,
}

impl From<&BulkDeletionProgress> for BulkDeletionResult {
    fn from(progress: &BulkDeletionProgress) -> Self {
        let duration_ms = progress
            .completed_at
            .unwrap_or_else(Utc::now)
            .signed_duration_since(progress.started_at)
            .num_milliseconds()
            .max(0) as u64;

        Self {
            operation_id: progress.operation_id,
            status: progress.status,
            total: progress.total,
            success_count: progress.success_count,
            failure_count: progress.failure_count,
            results: progress.results.clone(),
            duration_ms,
        }
    }
}
