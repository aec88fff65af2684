use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::models::{ProcessReport, QueueMetadata, QueueStats, QueuedDeletion};
use super::store::PersistentStore;
use crate::cms::NetworkMonitor;
use crate::core::config::QueueConfig;
use crate::core::error::{PipelineError, Result};
use crate::core::events::{EventBus, PipelineEvent, PipelineEventKind};
use crate::deletion::{
    codes, jittered, DeletionExecutor, DeletionOptions, DeletionResult, Priority, RetryPolicy,
};


/// Durable queue of deletions that failed for network reasons. Items are
/// replayed one attempt at a time with per-item backoff until they succeed or
/// run out of attempts.
pub struct OfflineQueue {
    config: QueueConfig,
    store: Arc<dyn PersistentStore>,
    network: Option<Arc<dyn NetworkMonitor>>,
    bus: Option<Arc<EventBus>>,
    items: Mutex<Vec<QueuedDeletion>>,
    processing: AtomicBool,
}

impl OfflineQueue {
    pub fn new(config: QueueConfig, store: Arc<dyn PersistentStore>) -> Self {
        Self {
            config,
            store,
            network: None,
            bus: None,
            items: Mutex::new(Vec::new()),
            processing: AtomicBool::new(false),
        }
    }


    /// Restores whatever the store holds from a previous run.
    pub async fn load(config: QueueConfig, store: Arc<dyn PersistentStore>) -> Result<Self> {
        let items = store.load().await?;
        info!("OfflineQueue restored {} queued deletions", items.len());

        let queue = Self::new(config, store);
        *queue.items.lock().await = items;
        Ok(queue)
    }


    #[must_use]
    pub fn with_network_monitor(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }


    #[must_use]
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }


    fn is_online(&self) -> bool {
        self.network.as_ref().is_none_or(|n| n.is_online())
    }


    pub async fn enqueue(
        &self,
        identifier: &str,
        options: DeletionOptions,
        metadata: QueueMetadata,
    ) -> Result<Uuid> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(PipelineError::Validation("cannot queue an empty identifier".to_string()));
        }

        let mut items = self.items.lock().await;

        if let Some(existing) = items.iter().find(|i| i.identifier == identifier && !i.is_failed()) {
            debug!("{} already queued as {}", identifier, existing.id);
            return Ok(existing.id);
        }

        if items.len() >= self.config.max_size {
            warn!("Offline queue full, refusing {}", identifier);
            return Err(PipelineError::QueueFull(items.len()));
        }

        let item = QueuedDeletion::new(identifier, options, metadata, self.config.max_attempts);
        let id = item.id;
        items.push(item);

        if let Err(e) = self.store.save(&items).await {
            items.pop();
            error!("Failed to persist queued deletion for {}: {}", identifier, e);
            return Err(e);
        }

        info!("Queued {} for offline retry as {} ({} in queue)", identifier, id, items.len());
        Ok(id)
    }


    pub async fn dequeue_processed(&self, ids: &[Uuid]) -> Result<usize> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|i| !ids.contains(&i.id));
        let removed = before - items.len();

        if removed > 0 {
            self.store.save(&items).await?;
        }
        Ok(removed)
    }


    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        Ok(self.dequeue_processed(&[id]).await? == 1)
    }


    pub async fn clear_failed(&self) -> Result<usize> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|i| !i.is_failed());
        let cleared = before - items.len();

        if cleared > 0 {
            self.store.save(&items).await?;
            info!("Cleared {} failed offline deletions", cleared);
        }
        Ok(cleared)
    }


    pub async fn get_all(&self) -> Vec<QueuedDeletion> {
        self.items.lock().await.clone()
    }


    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }


    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }


    pub async fn stats(&self) -> QueueStats {
        let items = self.items.lock().await;
        let now = Utc::now();
        let failed = items.iter().filter(|i| i.is_failed()).count();
        let oldest = items.iter().filter(|i| !i.is_failed()).map(|i| i.queued_at).min();

        QueueStats {
            total: items.len(),
            pending: items.len() - failed,
            failed,
            high_priority: items.iter().filter(|i| i.priority == Priority::High).count(),
            normal_priority: items.iter().filter(|i| i.priority == Priority::Normal).count(),
            low_priority: items.iter().filter(|i| i.priority == Priority::Low).count(),
            oldest_queued_at: oldest,
            oldest_age_secs: oldest.map(|at| (now - at).num_seconds().max(0)),
        }
    }


    /// Replays due items through `executor`. A run that finds the network
    /// down or another run already active returns a skipped report.
    pub async fn process_queue(&self, executor: &dyn DeletionExecutor) -> ProcessReport {
        if !self.is_online() {
            debug!("Offline, skipping queue processing");
            return self.skipped_report().await;
        }

        if self.processing.swap(true, Ordering::AcqRel) {
            debug!("Queue processing already running, coalescing");
            return self.skipped_report().await;
        }
        let _running = ProcessingFlag(&self.processing);

        let now = Utc::now();
        let mut due: Vec<QueuedDeletion> = {
            let items = self.items.lock().await;
            items.iter().filter(|i| i.is_due(now)).cloned().collect()
        };
        due.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.queued_at.cmp(&b.queued_at)));

        let mut report = ProcessReport::default();
        if !due.is_empty() {
            info!("Processing {} queued deletions", due.len());
        }

        for chunk in due.chunks(self.config.concurrency.max(1)) {
            if !self.is_online() {
                warn!("Network lost mid-run, leaving {} items for later", due.len() - report.processed);
                break;
            }

            let results = join_all(chunk.iter().map(|item| {
                let mut options = item.options.clone();
                options.retry_attempts = 0;
                options.queue_on_network_failure = false;
                executor.execute(&item.identifier, options)
            }))
            .await;

            self.apply_results(chunk, results, &mut report).await;
        }

        report.remaining = self.items.lock().await.iter().filter(|i| !i.is_failed()).count();

        if report.processed > 0 {
            info!(
                "Queue run finished: processed={}, successful={}, failed={}, remaining={}",
                report.processed, report.successful, report.failed, report.remaining
            );
            if let Some(bus) = &self.bus {
                bus.emit(PipelineEvent::new(
                    PipelineEventKind::QueueProcessed,
                    json!({
                        "processed": report.processed,
                        "successful": report.successful,
                        "failed": report.failed,
                        "exhausted": report.exhausted,
                        "remaining": report.remaining,
                    }),
                ));
            }
        }

        report
    }

    async fn apply_results(
        &self,
        chunk: &[QueuedDeletion],
        results: Vec<DeletionResult>,
        report: &mut ProcessReport,
    ) {
        let now = Utc::now();
        let policy = RetryPolicy::new(
            Duration::from_millis(self.config.base_backoff_ms),
            Duration::from_millis(self.config.max_backoff_ms),
        );

        let mut items = self.items.lock().await;

        for (queued, result) in chunk.iter().zip(results) {
            report.processed += 1;

            if result.success {
                report.successful += 1;
                items.retain(|i| i.id != queued.id);
                debug!("Queued deletion {} for {} succeeded", queued.id, queued.identifier);
                continue;
            }

            report.failed += 1;
            let Some(item) = items.iter_mut().find(|i| i.id == queued.id) else {
                debug!("Queued deletion {} was removed during processing", queued.id);
                continue;
            };

            item.last_attempt_at = Some(now);
            let error = result.error;

            // Breaker and in-flight rejections never reached the CMS.
            let local = error
                .as_ref()
                .is_some_and(|e| e.code == codes::CIRCUIT_OPEN || e.code == codes::OPERATION_IN_PROGRESS);

            if !local {
                item.attempts += 1;
                if error.as_ref().is_some_and(|e| !e.retryable) {
                    item.attempts = item.max_attempts;
                }
            }

            if item.is_failed() {
                report.exhausted += 1;
                item.next_attempt_at = None;
                warn!(
                    "Queued deletion {} for {} gave up after {} attempts",
                    item.id, item.identifier, item.attempts
                );
            } else {
                let delay = jittered(policy.delay_for_attempt(item.attempts.max(1)), self.config.jitter_factor)
                    .min(Duration::from_millis(self.config.max_backoff_ms));
                item.next_attempt_at = chrono::Duration::from_std(delay).ok().map(|d| now + d);
                debug!(
                    "Queued deletion {} attempt {}/{} failed, next try in {:?}",
                    item.id, item.attempts, item.max_attempts, delay
                );
            }
            item.last_error = error;
        }

        if let Err(e) = self.store.save(&items).await {
            error!("Failed to persist queue after processing: {}", e);
        }
    }

    async fn skipped_report(&self) -> ProcessReport {
        let remaining = self.items.lock().await.iter().filter(|i| !i.is_failed()).count();
        ProcessReport {
            remaining,
            skipped: true,
            ..Default::default()
        }
    }


    /// Processes the queue each time connectivity flips from offline to
    /// online, until `token` is cancelled.
    pub async fn watch_connectivity(
        self: Arc<Self>,
        executor: Arc<dyn DeletionExecutor>,
        token: CancellationToken,
    ) {
        let Some(network) = self.network.clone() else {
            debug!("No network monitor configured, connectivity watch not started");
            return;
        };

        let mut receiver = network.subscribe();
        let mut was_online = *receiver.borrow_and_update();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = receiver.changed() => {
                    if changed.is_err() {
                        debug!("Network monitor closed, stopping connectivity watch");
                        break;
                    }
                    let online = *receiver.borrow_and_update();
                    if online && !was_online {
                        info!("Connectivity restored, processing offline queue");
                        self.process_queue(executor.as_ref()).await;
                    }
                    was_online = online;
                }
            }
        }
    }
}


struct ProcessingFlag<'a>(&'a AtomicBool);

impl Drop for ProcessingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::WatchNetworkMonitor;
    use crate::deletion::{DeletionError, ErrorCategory};
    use crate::queue::store::{FileStore, MemoryStore};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::HashMap;

    /// Executor that answers from a per-identifier script, succeeding once
    /// the script is used up.
    #[derive(Default)]
    struct ScriptedExecutor {
        script: SyncMutex<HashMap<String, Vec<DeletionError>>>,
        calls: SyncMutex<Vec<(String, DeletionOptions)>>,
        delay: Option<Duration>,
    }

    impl ScriptedExecutor {
        fn failing(identifier: &str, errors: Vec<DeletionError>) -> Self {
            let executor = Self::default();
            executor.script.lock().insert(identifier.to_string(), errors);
            executor
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(id, _)| id.clone()).collect()
        }
    }

    #[async_trait]
    impl DeletionExecutor for ScriptedExecutor {
        async fn execute(&self, identifier: &str, options: DeletionOptions) -> DeletionResult {
            self.calls.lock().push((identifier.to_string(), options));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let next = self.script.lock().get_mut(identifier).and_then(|errors| {
                if errors.is_empty() { None } else { Some(errors.remove(0)) }
            });

            match next {
                Some(error) => DeletionResult::rejected(identifier, error),
                None => DeletionResult {
                    success: true,
                    error: None,
                    ..DeletionResult::rejected(identifier, DeletionError::invalid_identifier())
                },
            }
        }
    }

    fn network_error() -> DeletionError {
        DeletionError {
            code: codes::NETWORK_ERROR.to_string(),
            message: "ECONNRESET".to_string(),
            category: ErrorCategory::Network,
            retryable: true,
            suggested_action: "retry".to_string(),
        }
    }

    fn permission_error() -> DeletionError {
        DeletionError {
            code: codes::PERMISSION_DENIED.to_string(),
            message: "forbidden".to_string(),
            category: ErrorCategory::Permission,
            retryable: false,
            suggested_action: "check token".to_string(),
        }
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            base_backoff_ms: 0,
            max_backoff_ms: 0,
            ..Default::default()
        }
    }

    fn queue() -> OfflineQueue {
        OfflineQueue::new(fast_config(), Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_enqueue_dedupes_pending_identifiers() {
        let queue = queue();
        let first = queue.enqueue("post-1", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();
        let second = queue.enqueue(" post-1 ", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_respects_size_cap() {
        let config = QueueConfig {
            max_size: 1,
            ..fast_config()
        };
        let queue = OfflineQueue::new(config, Arc::new(MemoryStore::new()));
        queue.enqueue("a", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        let err = queue.enqueue("b", DeletionOptions::default(), QueueMetadata::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::QueueFull(1)));
    }

    #[tokio::test]
    async fn test_successful_items_are_removed() {
        let queue = queue();
        queue.enqueue("a", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();
        queue.enqueue("b", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        let executor = ScriptedExecutor::default();
        let report = queue.process_queue(&executor).await;

        assert_eq!(report.processed, 2);
        assert_eq!(report.successful, 2);
        assert_eq!(report.remaining, 0);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_replay_is_single_attempt_without_requeue() {
        let queue = queue();
        queue.enqueue("a", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        let executor = ScriptedExecutor::default();
        queue.process_queue(&executor).await;

        let (_, options) = executor.calls.lock()[0].clone();
        assert_eq!(options.retry_attempts, 0);
        assert!(!options.queue_on_network_failure);
    }

    #[tokio::test]
    async fn test_failures_back_off_then_exhaust() {
        let config = QueueConfig {
            max_attempts: 2,
            ..fast_config()
        };
        let queue = OfflineQueue::new(config, Arc::new(MemoryStore::new()));
        queue.enqueue("a", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        let executor = ScriptedExecutor::failing("a", vec![network_error(), network_error(), network_error()]);

        let first = queue.process_queue(&executor).await;
        assert_eq!(first.failed, 1);
        assert_eq!(first.remaining, 1);

        let second = queue.process_queue(&executor).await;
        assert_eq!(second.exhausted, 1);
        assert_eq!(second.remaining, 0);

        let items = queue.get_all().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_failed());
        assert_eq!(items[0].last_error.as_ref().unwrap().code, codes::NETWORK_ERROR);

        let third = queue.process_queue(&executor).await;
        assert_eq!(third.processed, 0);

        assert_eq!(queue.clear_failed().await.unwrap(), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_backoff_delays_next_attempt() {
        let config = QueueConfig {
            base_backoff_ms: 60_000,
            max_backoff_ms: 300_000,
            ..Default::default()
        };
        let queue = OfflineQueue::new(config, Arc::new(MemoryStore::new()));
        queue.enqueue("a", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        let executor = ScriptedExecutor::failing("a", vec![network_error()]);
        queue.process_queue(&executor).await;

        let item = &queue.get_all().await[0];
        assert!(item.next_attempt_at.unwrap() > Utc::now());

        let report = queue.process_queue(&executor).await;
        assert_eq!(report.processed, 0);
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fast_forwards_attempts() {
        let queue = queue();
        queue.enqueue("a", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        let executor = ScriptedExecutor::failing("a", vec![permission_error()]);
        let report = queue.process_queue(&executor).await;

        assert_eq!(report.exhausted, 1);
        let item = &queue.get_all().await[0];
        assert_eq!(item.attempts, item.max_attempts);
    }

    #[tokio::test]
    async fn test_circuit_rejection_does_not_consume_attempt() {
        let queue = queue();
        queue.enqueue("a", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        let executor = ScriptedExecutor::failing("a", vec![DeletionError::circuit_open()]);
        queue.process_queue(&executor).await;

        let item = &queue.get_all().await[0];
        assert_eq!(item.attempts, 0);
        assert!(!item.is_failed());
    }

    #[tokio::test]
    async fn test_high_priority_items_run_first() {
        let config = QueueConfig {
            concurrency: 1,
            ..fast_config()
        };
        let queue = OfflineQueue::new(config, Arc::new(MemoryStore::new()));
        let low = DeletionOptions {
            priority: Priority::Low,
            ..Default::default()
        };
        let high = DeletionOptions {
            priority: Priority::High,
            ..Default::default()
        };
        queue.enqueue("low", low, QueueMetadata::default()).await.unwrap();
        queue.enqueue("normal", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();
        queue.enqueue("high", high, QueueMetadata::default()).await.unwrap();

        let executor = ScriptedExecutor::default();
        queue.process_queue(&executor).await;

        assert_eq!(executor.calls(), vec!["high", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_offline_skips_processing() {
        let network = Arc::new(WatchNetworkMonitor::new(false));
        let queue = queue().with_network_monitor(network.clone());
        queue.enqueue("a", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        let executor = ScriptedExecutor::default();
        let report = queue.process_queue(&executor).await;
        assert!(report.skipped);
        assert_eq!(report.remaining, 1);
        assert!(executor.calls().is_empty());

        network.set_online(true);
        let report = queue.process_queue(&executor).await;
        assert_eq!(report.successful, 1);
    }

    #[tokio::test]
    async fn test_overlapping_runs_are_coalesced() {
        let queue = Arc::new(queue());
        queue.enqueue("a", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        let executor = Arc::new(ScriptedExecutor {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });

        let (first, second) = tokio::join!(
            queue.process_queue(executor.as_ref()),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                queue.process_queue(executor.as_ref()).await
            }
        );

        assert_eq!(first.successful, 1);
        assert!(second.skipped);
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_during_processing_is_kept() {
        let queue = Arc::new(queue());
        queue.enqueue("a", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        let executor = Arc::new(ScriptedExecutor {
            delay: Some(Duration::from_millis(30)),
            ..Default::default()
        });

        let (report, _) = tokio::join!(queue.process_queue(executor.as_ref()), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            queue.enqueue("b", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();
        });

        assert_eq!(report.successful, 1);
        let remaining: Vec<String> = queue.get_all().await.into_iter().map(|i| i.identifier).collect();
        assert_eq!(remaining, vec!["b"]);
    }

    #[tokio::test]
    async fn test_queue_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");

        let id = {
            let queue = OfflineQueue::new(fast_config(), Arc::new(FileStore::new(&path)));
            let metadata = QueueMetadata {
                title: Some("Hello".to_string()),
                ..Default::default()
            };
            queue.enqueue("post-1", DeletionOptions::default(), metadata).await.unwrap()
        };

        let restored = OfflineQueue::load(fast_config(), Arc::new(FileStore::new(&path))).await.unwrap();
        let items = restored.get_all().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);
        assert_eq!(items[0].metadata.title.as_deref(), Some("Hello"));

        assert!(restored.remove(id).await.unwrap());
        let reloaded = OfflineQueue::load(fast_config(), Arc::new(FileStore::new(&path))).await.unwrap();
        assert!(reloaded.is_empty().await);
    }

    #[tokio::test]
    async fn test_stats_counts_priorities_and_failures() {
        let queue = queue();
        let high = DeletionOptions {
            priority: Priority::High,
            ..Default::default()
        };
        queue.enqueue("a", high, QueueMetadata::default()).await.unwrap();
        queue.enqueue("b", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        let executor = ScriptedExecutor::failing("b", vec![permission_error()]);
        executor.script.lock().insert("a".to_string(), vec![network_error()]);
        queue.process_queue(&executor).await;

        let stats = queue.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.high_priority, 1);
        assert_eq!(stats.normal_priority, 1);
        assert!(stats.oldest_age_secs.is_some());
    }

    #[tokio::test]
    async fn test_connectivity_restored_triggers_processing() {
        let network = Arc::new(WatchNetworkMonitor::new(false));
        let queue = Arc::new(queue().with_network_monitor(network.clone()));
        queue.enqueue("a", DeletionOptions::default(), QueueMetadata::default()).await.unwrap();

        let executor: Arc<dyn DeletionExecutor> = Arc::new(ScriptedExecutor::default());
        let token = CancellationToken::new();
        let watcher = tokio::spawn(Arc::clone(&queue).watch_connectivity(executor, token.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        network.set_online(true);

        for _ in 0..50 {
            if queue.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(queue.is_empty().await);

        token.cancel();
        watcher.await.unwrap();
    }
}
