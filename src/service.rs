use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditFilter, AuditLogger, AuditPage, DeletionMetrics, TimeRange};
use crate::bulk::{BulkDeletionManager, BulkDeletionProgress, BulkDeletionResult, BulkOptions};
use crate::cms::{CacheInvalidator, CmsClient, NetworkMonitor};
use crate::core::config::PipelineConfig;
use crate::core::error::Result;
use crate::core::events::EventBus;
use crate::core::scheduler::BackgroundTasks;
use crate::deletion::{
    run_diagnostics, CircuitBreaker, CircuitBreakerState, DeletionExecutor, DeletionOptions,
    DeletionOrchestrator, DeletionResult, DiagnosticReport,
};
use crate::monitoring::{Alert, DeletionMonitor, HealthStatus};
use crate::queue::{FileStore, MemoryStore, OfflineQueue, PersistentStore, ProcessReport, QueueStats, QueuedDeletion};


/// Composition root. Owns one of each pipeline component and wires them
/// together; hosts hold a single instance for the process lifetime.
pub struct DeletionService {
    config: PipelineConfig,
    cms: Arc<dyn CmsClient>,
    bus: Arc<EventBus>,
    audit: Arc<AuditLogger>,
    breaker: Arc<CircuitBreaker>,
    queue: Arc<OfflineQueue>,
    orchestrator: Arc<DeletionOrchestrator>,
    bulk: BulkDeletionManager,
    monitor: Arc<DeletionMonitor>,
}

impl DeletionService {
    /// Builds the service, persisting the offline queue to
    /// `queue.storage_path` when set and in memory otherwise.
    pub async fn new(
        config: PipelineConfig,
        cms: Arc<dyn CmsClient>,
        cache: Arc<dyn CacheInvalidator>,
        network: Arc<dyn NetworkMonitor>,
    ) -> Result<Self> {
        let store: Arc<dyn PersistentStore> = match &config.queue.storage_path {
            Some(path) => Arc::new(FileStore::new(path)),
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_store(config, cms, cache, network, store).await
    }


    pub async fn with_store(
        config: PipelineConfig,
        cms: Arc<dyn CmsClient>,
        cache: Arc<dyn CacheInvalidator>,
        network: Arc<dyn NetworkMonitor>,
        store: Arc<dyn PersistentStore>,
    ) -> Result<Self> {
        let bus = Arc::new(EventBus::new());
        let audit = Arc::new(AuditLogger::new(config.audit.clone()));
        let breaker = Arc::new(CircuitBreaker::from_config("cms", &config.circuit_breaker));

        let queue = Arc::new(
            OfflineQueue::load(config.queue.clone(), store)
                .await?
                .with_network_monitor(Arc::clone(&network))
                .with_event_bus(Arc::clone(&bus)),
        );

        let orchestrator = Arc::new(
            DeletionOrchestrator::new(
                Arc::clone(&cms),
                cache,
                Arc::clone(&breaker),
                Arc::clone(&audit),
                Arc::clone(&queue),
                Arc::clone(&bus),
            )
            .with_config(config.orchestrator.clone(), config.cache.clone()),
        );

        let bulk = BulkDeletionManager::new(
            Arc::clone(&orchestrator) as Arc<dyn DeletionExecutor>,
            Arc::clone(&bus),
            config.bulk.clone(),
        );

        let monitor = Arc::new(
            DeletionMonitor::new(
                Arc::clone(&audit),
                Arc::clone(&queue),
                Arc::clone(&breaker),
                Arc::clone(&bus),
                config.monitoring.clone(),
            )
            .with_network_monitor(network),
        );

        info!("DeletionService ready");
        Ok(Self {
            config,
            cms,
            bus,
            audit,
            breaker,
            queue,
            orchestrator,
            bulk,
            monitor,
        })
    }


    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }


    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }


    pub async fn delete_post(&self, identifier: &str, options: DeletionOptions) -> DeletionResult {
        self.orchestrator.delete(identifier, options).await
    }


    pub async fn bulk_delete_posts(&self, identifiers: Vec<String>, options: BulkOptions) -> Result<BulkDeletionResult> {
        self.bulk.bulk_delete(identifiers, options).await
    }


    pub fn start_bulk_deletion(&self, identifiers: Vec<String>, options: BulkOptions) -> Result<Uuid> {
        self.bulk.start(identifiers, options)
    }


    pub fn get_bulk_progress(&self, operation_id: Uuid) -> Option<BulkDeletionProgress> {
        self.bulk.get_progress(operation_id)
    }


    pub fn cancel_bulk_deletion(&self, operation_id: Uuid) -> bool {
        self.bulk.cancel(operation_id)
    }


    pub fn retry_failed_bulk(&self, operation_id: Uuid, options: BulkOptions) -> Result<Uuid> {
        self.bulk.retry_failures(operation_id, options)
    }


    pub fn list_active_bulk_operations(&self) -> Vec<BulkDeletionProgress> {
        self.bulk.list_active()
    }


    pub async fn get_queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }


    pub async fn get_all_queued_deletions(&self) -> Vec<QueuedDeletion> {
        self.queue.get_all().await
    }


    pub async fn process_offline_queue(&self) -> ProcessReport {
        self.queue.process_queue(self.orchestrator.as_ref()).await
    }


    pub async fn remove_from_offline_queue(&self, id: Uuid) -> Result<bool> {
        self.queue.remove(id).await
    }


    pub async fn clear_failed_offline_deletions(&self) -> Result<usize> {
        self.queue.clear_failed().await
    }


    pub fn get_audit_logs(&self, filter: &AuditFilter) -> AuditPage {
        self.audit.query(filter)
    }


    pub fn get_deletion_metrics(&self, range: TimeRange) -> DeletionMetrics {
        self.audit.metrics(range)
    }


    pub fn export_audit_logs(&self, filter: &AuditFilter) -> Result<String> {
        self.audit.export(filter)
    }


    pub async fn get_deletion_health_status(&self) -> HealthStatus {
        self.monitor.check_health().await
    }


    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.monitor.get_active_alerts()
    }


    pub fn acknowledge_alert(&self, id: Uuid) -> bool {
        self.monitor.acknowledge_alert(id)
    }


    pub fn resolve_alert(&self, id: Uuid) -> bool {
        self.monitor.resolve_alert(id)
    }


    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.breaker.snapshot()
    }


    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }


    pub async fn run_diagnostics(&self) -> DiagnosticReport {
        run_diagnostics(self.cms.as_ref(), &self.breaker, self.config.orchestrator.call_timeout()).await
    }


    /// Starts queue replay, health checks, retention cleanup and the
    /// reconnect listener. Stop them with [`BackgroundTasks::shutdown`].
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        let queue = Arc::clone(&self.queue);
        let executor = Arc::clone(&self.orchestrator);
        tasks.spawn_periodic("offline-queue", self.config.queue.process_interval(), move || {
            let queue = Arc::clone(&queue);
            let executor = Arc::clone(&executor);
            async move {
                queue.process_queue(executor.as_ref()).await;
            }
        });

        let monitor = Arc::clone(&self.monitor);
        tasks.spawn_periodic("health-check", self.config.monitoring.check_interval(), move || {
            let monitor = Arc::clone(&monitor);
            async move {
                monitor.check_health().await;
            }
        });

        let audit = Arc::clone(&self.audit);
        let monitor = Arc::clone(&self.monitor);
        tasks.spawn_periodic("retention-cleanup", self.config.audit.cleanup_interval(), move || {
            let audit = Arc::clone(&audit);
            let monitor = Arc::clone(&monitor);
            async move {
                audit.purge_expired();
                monitor.cleanup_alerts();
            }
        });

        let queue = Arc::clone(&self.queue);
        let executor: Arc<dyn DeletionExecutor> = Arc::clone(&self.orchestrator) as Arc<dyn DeletionExecutor>;
        tasks.spawn("connectivity-watch", move |token| queue.watch_connectivity(executor, token));

        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, SortOrder};
    use crate::bulk::BulkStatus;
    use crate::cms::{CmsError, Document, InMemoryCms, RecordingInvalidator, WatchNetworkMonitor};
    use crate::core::events::PipelineEventKind;
    use crate::deletion::{codes, CircuitState};
    use crate::monitoring::{AlertType, HealthLevel};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        cms: Arc<InMemoryCms>,
        network: Arc<WatchNetworkMonitor>,
        service: DeletionService,
    }

    fn documents() -> Vec<Document> {
        (1..=5)
            .map(|i| {
                Document::new(format!("post-{}", i), "post")
                    .with_slug(format!("slug-{}", i))
                    .with_title(format!("Post {}", i))
            })
            .collect()
    }

    async fn fixture_with(config: PipelineConfig) -> Fixture {
        let cms = Arc::new(InMemoryCms::with_documents(documents()));
        let network = Arc::new(WatchNetworkMonitor::new(true));
        let service = DeletionService::new(
            config,
            cms.clone(),
            Arc::new(RecordingInvalidator::new()),
            network.clone(),
        )
        .await
        .unwrap();
        Fixture { cms, network, service }
    }

    async fn fixture() -> Fixture {
        let mut config = PipelineConfig::default();
        config.queue.base_backoff_ms = 0;
        config.queue.max_backoff_ms = 0;
        fixture_with(config).await
    }

    fn fast() -> DeletionOptions {
        DeletionOptions::default().with_retries(1, 1)
    }

    #[tokio::test]
    async fn test_delete_post_is_audited() {
        let f = fixture().await;
        let result = f.service.delete_post("slug-1", fast().with_actor("editor")).await;

        assert!(result.success);
        assert!(!f.cms.contains("post-1"));

        let page = f.service.get_audit_logs(&AuditFilter {
            actor: Some("editor".to_string()),
            order: SortOrder::Asc,
            ..Default::default()
        });
        let actions: Vec<AuditAction> = page.entries.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Initiated, AuditAction::Success]);

        let metrics = f.service.get_deletion_metrics(TimeRange::last_hours(1));
        assert_eq!(metrics.successful, 1);

        let exported = f.service.export_audit_logs(&AuditFilter::for_post("post-1")).unwrap();
        assert!(exported.contains("post-1"));
    }

    #[tokio::test]
    async fn test_network_failure_queues_then_replays() {
        let f = fixture().await;
        f.cms.set_outage(Some(CmsError::new("connect ECONNREFUSED 127.0.0.1:443")));

        let result = f.service.delete_post("post-2", fast()).await;
        assert!(result.queued_for_retry);
        assert_eq!(result.error_code(), Some(codes::NETWORK_ERROR));
        assert_eq!(f.service.get_queue_stats().await.pending, 1);

        f.cms.set_outage(None);
        let report = f.service.process_offline_queue().await;
        assert_eq!(report.successful, 1);
        assert!(!f.cms.contains("post-2"));
        assert!(f.service.get_all_queued_deletions().await.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_partial_failure() {
        let f = fixture().await;
        f.cms.fail_always("post-3", CmsError::with_status(403, "Forbidden"));

        let identifiers = (1..=5).map(|i| format!("post-{}", i)).collect();
        let result = f
            .service
            .bulk_delete_posts(identifiers, BulkOptions::with_deletion(fast()))
            .await
            .unwrap();

        assert_eq!(result.status, BulkStatus::Completed);
        assert_eq!(result.success_count, 4);
        assert_eq!(result.failure_count, 1);
        let failed = result.results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failed.error_code(), Some(codes::PERMISSION_DENIED));
        assert!(f.cms.contains("post-3"));

        let retry = f.service.retry_failed_bulk(result.operation_id, BulkOptions::default()).unwrap();
        assert!(f.service.get_bulk_progress(retry).is_some());
    }

    #[tokio::test]
    async fn test_health_reflects_network_and_alerts() {
        let f = fixture().await;
        assert_eq!(f.service.get_deletion_health_status().await.status, HealthLevel::Healthy);

        f.network.set_online(false);
        let health = f.service.get_deletion_health_status().await;
        assert_eq!(health.status, HealthLevel::Degraded);

        let alerts = f.service.get_active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::NetworkOffline);
        assert!(f.service.acknowledge_alert(alerts[0].id));
        assert!(f.service.resolve_alert(alerts[0].id));
        assert!(f.service.get_active_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_circuit_state_and_reset() {
        let mut config = PipelineConfig::default();
        config.circuit_breaker.threshold = 1;
        let f = fixture_with(config).await;
        f.cms.set_outage(Some(CmsError::with_status(500, "Internal Server Error")));

        let options = DeletionOptions {
            validate_before_delete: false,
            ..DeletionOptions::default().with_retries(0, 1)
        };
        f.service.delete_post("post-1", options).await;
        assert_eq!(f.service.circuit_state().state, CircuitState::Open);

        f.service.reset_circuit_breaker();
        assert_eq!(f.service.circuit_state().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_diagnostics_through_service() {
        let f = fixture().await;
        let report = f.service.run_diagnostics().await;
        assert!(report.healthy);
        assert_eq!(f.cms.len(), 5);
    }

    #[tokio::test]
    async fn test_events_reach_observers() {
        let f = fixture().await;
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        f.service.events().register(
            PipelineEventKind::DeletionSucceeded,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        f.service.delete_post("post-4", fast()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_triggers_queue_replay() {
        let f = fixture().await;
        f.cms.set_outage(Some(CmsError::new("network is unreachable")));
        f.network.set_online(false);

        let result = f.service.delete_post("post-5", fast()).await;
        assert!(result.queued_for_retry);

        let tasks = f.service.start_background_tasks();
        assert_eq!(tasks.len(), 4);

        f.cms.set_outage(None);
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.network.set_online(true);

        for _ in 0..50 {
            if f.service.get_all_queued_deletions().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!f.cms.contains("post-5"));
        assert!(f.service.get_all_queued_deletions().await.is_empty());

        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_survives_service_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.queue.storage_path = Some(dir.path().join("queue.json").to_string_lossy().into_owned());

        {
            let f = fixture_with(config.clone()).await;
            f.cms.set_outage(Some(CmsError::new("socket hang up")));
            let result = f.service.delete_post("post-1", fast()).await;
            assert!(result.queued_for_retry);
        }

        let restarted = fixture_with(config).await;
        let queued = restarted.service.get_all_queued_deletions().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].identifier, "post-1");

        assert_eq!(restarted.service.process_offline_queue().await.successful, 1);
        assert!(restarted.service.remove_from_offline_queue(queued[0].id).await.is_ok());
        assert_eq!(restarted.service.clear_failed_offline_deletions().await.unwrap(), 0);
    }
}
