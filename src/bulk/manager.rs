use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use lru::LruCache;
use parking_lot::RwLock;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{BulkDeletionProgress, BulkDeletionResult, BulkOptions, BulkStatus};
use crate::core::config::BulkConfig;
use crate::core::error::{PipelineError, Result};
use crate::core::events::{EventBus, PipelineEvent, PipelineEventKind};
use crate::deletion::DeletionExecutor;
use crate::utils::elapsed_ms;


struct Operation {
    progress: BulkDeletionProgress,
    token: CancellationToken,
}


struct Registry {
    active: HashMap<Uuid, Operation>,
    history: LruCache<Uuid, BulkDeletionProgress>,
}


struct Shared {
    executor: Arc<dyn DeletionExecutor>,
    bus: Arc<EventBus>,
    config: BulkConfig,
    registry: RwLock<Registry>,
}


/// Runs deletions over many posts in sequential batches, items within a batch
/// concurrently. Finished operations stay queryable: first in the active
/// registry for a grace window, then in a bounded history.
pub struct BulkDeletionManager {
    shared: Arc<Shared>,
}

impl BulkDeletionManager {
    pub fn new(executor: Arc<dyn DeletionExecutor>, bus: Arc<EventBus>, config: BulkConfig) -> Self {
        let capacity = NonZeroUsize::new(config.history_limit).unwrap_or(NonZeroUsize::MIN);
        info!(
            "BulkDeletionManager initialized: batch_size={}, max_operations={}, history={}",
            config.max_concurrent, config.max_concurrent_operations, capacity
        );

        Self {
            shared: Arc::new(Shared {
                executor,
                bus,
                config,
                registry: RwLock::new(Registry {
                    active: HashMap::new(),
                    history: LruCache::new(capacity),
                }),
            }),
        }
    }


    /// Starts an operation in the background and returns its id.
    pub fn start(&self, identifiers: Vec<String>, options: BulkOptions) -> Result<Uuid> {
        let (operation_id, identifiers, token) = self.admit(identifiers, &options)?;
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            shared.run(operation_id, identifiers, options, token).await;
        });

        Ok(operation_id)
    }


    /// Runs an operation to completion on the caller's task.
    pub async fn bulk_delete(&self, identifiers: Vec<String>, options: BulkOptions) -> Result<BulkDeletionResult> {
        let (operation_id, identifiers, token) = self.admit(identifiers, &options)?;
        Ok(Arc::clone(&self.shared).run(operation_id, identifiers, options, token).await)
    }


    pub fn get_progress(&self, operation_id: Uuid) -> Option<BulkDeletionProgress> {
        let registry = self.shared.registry.read();
        registry
            .active
            .get(&operation_id)
            .map(|op| op.progress.clone())
            .or_else(|| registry.history.peek(&operation_id).cloned())
    }


    /// Cooperative: the running batch finishes, no further batch starts.
    pub fn cancel(&self, operation_id: Uuid) -> bool {
        let registry = self.shared.registry.read();
        match registry.active.get(&operation_id) {
            Some(op) if op.progress.is_running() => {
                op.token.cancel();
                info!("Cancellation requested for bulk operation {}", operation_id);
                true
            }
            _ => false,
        }
    }


    /// Starts a new operation over the identifiers that failed in a finished one.
    pub fn retry_failures(&self, operation_id: Uuid, options: BulkOptions) -> Result<Uuid> {
        let progress = self
            .get_progress(operation_id)
            .ok_or_else(|| PipelineError::OperationNotFound(operation_id.to_string()))?;

        if progress.is_running() {
            return Err(PipelineError::BulkRejected(format!(
                "operation {} is still running",
                operation_id
            )));
        }

        let failed = progress.failed_identifiers();
        if failed.is_empty() {
            return Err(PipelineError::Validation(format!(
                "operation {} has no failed deletions to retry",
                operation_id
            )));
        }

        info!("Retrying {} failed deletions from bulk operation {}", failed.len(), operation_id);
        self.start(failed, options)
    }


    pub fn list_active(&self) -> Vec<BulkDeletionProgress> {
        let mut running: Vec<_> = self
            .shared
            .registry
            .read()
            .active
            .values()
            .filter(|op| op.progress.is_running())
            .map(|op| op.progress.clone())
            .collect();
        running.sort_by_key(|p| p.started_at);
        running
    }


    pub fn history(&self) -> Vec<BulkDeletionProgress> {
        self.shared
            .registry
            .read()
            .history
            .iter()
            .map(|(_, progress)| progress.clone())
            .collect()
    }

    fn admit(
        &self,
        identifiers: Vec<String>,
        options: &BulkOptions,
    ) -> Result<(Uuid, Vec<String>, CancellationToken)> {
        let identifiers = dedupe(identifiers);
        if identifiers.is_empty() {
            return Err(PipelineError::Validation(
                "bulk deletion needs at least one identifier".to_string(),
            ));
        }

        let batch_size = self.shared.batch_size(options);
        let total_batches = identifiers.len().div_ceil(batch_size);

        let mut registry = self.shared.registry.write();
        let running = registry.active.values().filter(|op| op.progress.is_running()).count();
        if running >= self.shared.config.max_concurrent_operations {
            warn!("Rejecting bulk deletion: {} operations already running", running);
            return Err(PipelineError::BulkRejected(format!(
                "{} bulk operations already running (limit {})",
                running, self.shared.config.max_concurrent_operations
            )));
        }

        let operation_id = Uuid::new_v4();
        let token = CancellationToken::new();
        registry.active.insert(
            operation_id,
            Operation {
                progress: BulkDeletionProgress::new(operation_id, identifiers.len(), total_batches),
                token: token.clone(),
            },
        );

        info!(
            "Bulk operation {} admitted: {} posts in {} batches",
            operation_id,
            identifiers.len(),
            total_batches
        );
        Ok((operation_id, identifiers, token))
    }
}

impl Shared {
    fn batch_size(&self, options: &BulkOptions) -> usize {
        options.max_concurrent.unwrap_or(self.config.max_concurrent).max(1)
    }

    async fn run(
        self: Arc<Self>,
        operation_id: Uuid,
        identifiers: Vec<String>,
        options: BulkOptions,
        token: CancellationToken,
    ) -> BulkDeletionResult {
        let started = Instant::now();
        let batch_size = self.batch_size(&options);
        let mut status = BulkStatus::Completed;
        let guard = RunGuard {
            shared: Arc::clone(&self),
            operation_id,
            armed: true,
        };

        for (index, batch) in identifiers.chunks(batch_size).enumerate() {
            if token.is_cancelled() {
                info!("Bulk operation {} cancelled before batch {}", operation_id, index + 1);
                status = BulkStatus::Cancelled;
                break;
            }

            self.update(operation_id, |p| p.current_batch = index + 1);
            debug!("Bulk operation {} running batch {} ({} posts)", operation_id, index + 1, batch.len());

            let results = join_all(
                batch
                    .iter()
                    .map(|identifier| self.executor.execute(identifier, options.deletion.clone())),
            )
            .await;
            let batch_failed = results.iter().any(|r| !r.success);

            let snapshot = self.update(operation_id, |p| {
                p.processed_count += results.len();
                p.success_count += results.iter().filter(|r| r.success).count();
                p.failure_count += results.iter().filter(|r| !r.success).count();
                p.results.extend(results);

                let processed = p.processed_count as u64;
                let remaining = (p.total - p.processed_count) as u64;
                p.estimated_time_remaining_ms =
                    (processed > 0 && remaining > 0).then(|| elapsed_ms(started) / processed * remaining);
            });

            if let Some(p) = snapshot {
                self.bus.emit(
                    PipelineEvent::new(
                        PipelineEventKind::BulkProgress,
                        json!({
                            "operation_id": operation_id,
                            "processed": p.processed_count,
                            "total": p.total,
                            "success_count": p.success_count,
                            "failure_count": p.failure_count,
                            "current_batch": p.current_batch,
                            "total_batches": p.total_batches,
                            "estimated_time_remaining_ms": p.estimated_time_remaining_ms,
                        }),
                    )
                    .with_correlation(operation_id),
                );
            }

            if batch_failed && !options.continue_on_error {
                warn!("Bulk operation {} stopping after failed batch {}", operation_id, index + 1);
                status = BulkStatus::Failed;
                break;
            }
        }

        let finished = self.update(operation_id, |p| {
            p.status = status;
            p.completed_at = Some(Utc::now());
            p.estimated_time_remaining_ms = None;
        });

        let result = match &finished {
            Some(progress) => BulkDeletionResult::from(progress),
            None => BulkDeletionResult {
                operation_id,
                status,
                total: identifiers.len(),
                success_count: 0,
                failure_count: 0,
                results: Vec::new(),
                duration_ms: elapsed_ms(started),
            },
        };

        info!(
            "Bulk operation {} {}: {}/{} succeeded, {} failed in {}ms",
            operation_id, result.status, result.success_count, result.total, result.failure_count, result.duration_ms
        );
        self.bus.emit(
            PipelineEvent::new(
                PipelineEventKind::BulkCompleted,
                json!({
                    "operation_id": operation_id,
                    "status": result.status,
                    "total": result.total,
                    "success_count": result.success_count,
                    "failure_count": result.failure_count,
                    "duration_ms": result.duration_ms,
                }),
            )
            .with_correlation(operation_id),
        );

        guard.disarm();
        self.schedule_archive(operation_id);
        result
    }

    /// Applies `f` to the live progress and returns a snapshot.
    fn update(&self, operation_id: Uuid, f: impl FnOnce(&mut BulkDeletionProgress)) -> Option<BulkDeletionProgress> {
        let mut registry = self.registry.write();
        let op = registry.active.get_mut(&operation_id)?;
        f(&mut op.progress);
        Some(op.progress.clone())
    }

    fn schedule_archive(self: &Arc<Self>, operation_id: Uuid) {
        let shared = Arc::clone(self);
        let grace = self.config.completion_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            shared.archive(operation_id);
        });
    }

    /// Final state for a run that never reached its own completion: the caller
    /// dropped the future or the run panicked.
    fn abandon(self: &Arc<Self>, operation_id: Uuid) {
        let status = if std::thread::panicking() {
            BulkStatus::Failed
        } else {
            BulkStatus::Cancelled
        };
        let finished = self.update(operation_id, |p| {
            p.status = status;
            p.completed_at = Some(Utc::now());
            p.estimated_time_remaining_ms = None;
        });
        if finished.is_none() {
            return;
        }
        warn!("Bulk operation {} abandoned before completion, marked {}", operation_id, status);

        if tokio::runtime::Handle::try_current().is_ok() {
            self.schedule_archive(operation_id);
        } else {
            self.archive(operation_id);
        }
    }

    fn archive(&self, operation_id: Uuid) {
        let mut registry = self.registry.write();
        if let Some(op) = registry.active.remove(&operation_id) {
            if let Some((evicted, _)) = registry.history.push(operation_id, op.progress) {
                if evicted != operation_id {
                    debug!("Bulk history full, evicted operation {}", evicted);
                }
            }
            debug!("Bulk operation {} moved to history", operation_id);
        }
    }
}


/// Releases the running slot of an operation whose run ends without finishing.
struct RunGuard {
    shared: Arc<Shared>,
    operation_id: Uuid,
    armed: bool,
}

impl RunGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.abandon(self.operation_id);
        }
    }
}


/// Trims and collapses repeats, keeping first-seen order.
fn dedupe(identifiers: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    identifiers
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
