use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::backoff::RetryPolicy;
use super::circuit_breaker::{CallError, CircuitBreaker};
use super::classifier::{classify, classify_message};
use super::models::{DeletionError, DeletionOptions, DeletionRequest, DeletionResult};
use crate::audit::AuditLogger;
use crate::cms::{CacheInvalidator, CmsClient, CmsError, Document};
use crate::core::config::{CacheInvalidationConfig, OrchestratorConfig};
use crate::core::events::{EventBus, PipelineEvent, PipelineEventKind};
use crate::queue::{OfflineQueue, QueueMetadata};
use crate::utils::{elapsed_ms, render_target};


/// Anything that can run one deletion to a terminal result. The offline queue
/// and the bulk manager drive deletions through this seam.
#[async_trait]
pub trait DeletionExecutor: Send + Sync {
    async fn execute(&self, identifier: &str, options: DeletionOptions) -> DeletionResult;
}


pub struct DeletionOrchestrator {
    cms: Arc<dyn CmsClient>,
    cache: Arc<dyn CacheInvalidator>,
    breaker: Arc<CircuitBreaker>,
    audit: Arc<AuditLogger>,
    queue: Arc<OfflineQueue>,
    bus: Arc<EventBus>,
    config: OrchestratorConfig,
    cache_targets: CacheInvalidationConfig,
    in_progress: Mutex<HashSet<String>>,
}

impl DeletionOrchestrator {
    pub fn new(
        cms: Arc<dyn CmsClient>,
        cache: Arc<dyn CacheInvalidator>,
        breaker: Arc<CircuitBreaker>,
        audit: Arc<AuditLogger>,
        queue: Arc<OfflineQueue>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            cms,
            cache,
            breaker,
            audit,
            queue,
            bus,
            config: OrchestratorConfig::default(),
            cache_targets: CacheInvalidationConfig::default(),
            in_progress: Mutex::new(HashSet::new()),
        }
    }


    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig, cache_targets: CacheInvalidationConfig) -> Self {
        self.config = config;
        self.cache_targets = cache_targets;
        self
    }


    pub fn is_in_progress(&self, identifier: &str) -> bool {
        self.in_progress.lock().contains(identifier.trim())
    }


    pub fn active_count(&self) -> usize {
        self.in_progress.lock().len()
    }


    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }


    /// Deletes one post by id or slug. Never fails with `Err`; every outcome,
    /// including rejection, is reported in the returned result.
    pub async fn delete(&self, identifier: &str, options: DeletionOptions) -> DeletionResult {
        let started = Instant::now();

        let request = match DeletionRequest::new(identifier, options) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejected deletion request: {}", e);
                return DeletionResult::rejected(identifier.trim(), e);
            }
        };
        let identifier = request.identifier();
        let options = request.options();
        let actor = if options.actor.trim().is_empty() {
            self.config.default_actor.as_str()
        } else {
            options.actor.as_str()
        };

        let Some(_claim) = self.claim(identifier) else {
            warn!("Deletion of {} already in progress, rejecting", identifier);
            return DeletionResult::rejected(identifier, DeletionError::operation_in_progress(identifier));
        };

        let document = if options.validate_before_delete {
            self.resolve(identifier).await
        } else {
            None
        };
        let post_id = document.as_ref().map_or(identifier, |d| d.id.as_str()).to_string();
        let title = document.as_ref().and_then(|d| d.title.clone());
        let slug = document.as_ref().and_then(|d| d.slug.clone());

        let event_id = self.audit.log_initiated(
            &post_id,
            title.as_deref(),
            slug.as_deref(),
            actor,
            options.retry_attempts,
        );
        self.bus.emit(
            PipelineEvent::new(
                PipelineEventKind::DeletionStarted,
                json!({ "identifier": identifier, "post_id": post_id, "actor": actor }),
            )
            .with_correlation(event_id),
        );

        let policy = RetryPolicy::new(Duration::from_millis(options.retry_delay_ms), self.config.max_backoff());
        let mut retry_count = 0;
        let mut last_error: Option<DeletionError> = None;

        for attempt in 0..=options.retry_attempts {
            if attempt > 0 {
                if let Some(previous) = &last_error {
                    self.audit.log_retry(event_id, &post_id, attempt, previous, actor);
                }
                retry_count = attempt;
                let delay = policy.delay_for_attempt(attempt);
                debug!("Retrying deletion of {} in {:?} (attempt {})", post_id, delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.guarded(|| self.cms.delete(&post_id)).await {
                Ok(()) => {
                    let cache_invalidated = if options.skip_cache_invalidation {
                        false
                    } else {
                        self.invalidate_cache(&post_id, slug.as_deref()).await
                    };
                    let duration_ms = elapsed_ms(started);

                    self.audit
                        .log_success(event_id, &post_id, duration_ms, cache_invalidated, actor);
                    self.bus.emit(
                        PipelineEvent::new(
                            PipelineEventKind::DeletionSucceeded,
                            json!({
                                "post_id": post_id,
                                "duration_ms": duration_ms,
                                "retry_count": retry_count,
                                "cache_invalidated": cache_invalidated,
                            }),
                        )
                        .with_correlation(event_id),
                    );
                    info!(
                        "Deleted {} in {}ms after {} retries (cache invalidated: {})",
                        post_id, duration_ms, retry_count, cache_invalidated
                    );

                    return DeletionResult {
                        success: true,
                        identifier: identifier.to_string(),
                        post_id: Some(post_id),
                        slug,
                        title,
                        error: None,
                        cache_invalidated,
                        timestamp: Utc::now(),
                        retry_count,
                        duration_ms,
                        event_id: Some(event_id),
                        queued_for_retry: false,
                        queue_id: None,
                    };
                }
                Err(e) => {
                    warn!("Delete attempt {} for {} failed: {}", attempt + 1, post_id, e);
                    let retryable = e.retryable;
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| classify_message("Deletion failed without an error"));
        self.audit.log_failure(event_id, &post_id, &error, retry_count, actor);

        let mut result = DeletionResult {
            success: false,
            identifier: identifier.to_string(),
            post_id: Some(post_id.clone()),
            slug: slug.clone(),
            title: title.clone(),
            error: None,
            cache_invalidated: false,
            timestamp: Utc::now(),
            retry_count,
            duration_ms: elapsed_ms(started),
            event_id: Some(event_id),
            queued_for_retry: false,
            queue_id: None,
        };

        if error.is_queueable() && options.queue_on_network_failure {
            let metadata = QueueMetadata {
                title,
                slug,
                reason: Some(error.message.clone()),
            };
            match self.queue.enqueue(&post_id, options.clone(), metadata).await {
                Ok(queue_id) => {
                    info!("Deletion of {} queued for offline retry as {}", post_id, queue_id);
                    self.bus.emit(
                        PipelineEvent::new(
                            PipelineEventKind::DeletionQueued,
                            json!({ "post_id": post_id, "queue_id": queue_id, "code": error.code }),
                        )
                        .with_correlation(event_id),
                    );
                    result.queued_for_retry = true;
                    result.queue_id = Some(queue_id);
                    result.error = Some(error);
                    return result;
                }
                Err(e) => error!("Could not queue {} for offline retry: {}", post_id, e),
            }
        }

        error!("Deletion of {} failed after {} retries: {}", post_id, retry_count, error);
        self.bus.emit(
            PipelineEvent::new(
                PipelineEventKind::DeletionFailed,
                json!({
                    "post_id": post_id,
                    "code": error.code,
                    "category": error.category,
                    "retry_count": retry_count,
                }),
            )
            .with_correlation(event_id),
        );
        result.error = Some(error);
        result
    }

    fn claim(&self, identifier: &str) -> Option<InProgressClaim<'_>> {
        let mut active = self.in_progress.lock();
        if !active.insert(identifier.to_string()) {
            return None;
        }
        Some(InProgressClaim {
            active: &self.in_progress,
            identifier: identifier.to_string(),
        })
    }

    /// Id lookup first, then slug. Misses and lookup failures only warn; the
    /// deletion proceeds with the identifier as the id.
    async fn resolve(&self, identifier: &str) -> Option<Document> {
        match self.guarded(|| self.cms.fetch_by_id(identifier)).await {
            Ok(Some(doc)) => return Some(doc),
            Ok(None) => {}
            Err(e) => {
                warn!("Lookup of {} failed, deleting by identifier: {}", identifier, e);
                return None;
            }
        }

        match self.guarded(|| self.cms.fetch_by_slug(identifier)).await {
            Ok(Some(doc)) => {
                debug!("Resolved slug {} to document {}", identifier, doc.id);
                Some(doc)
            }
            Ok(None) => {
                warn!("Post {} not found before deletion, deleting by identifier", identifier);
                None
            }
            Err(e) => {
                warn!("Slug lookup of {} failed, deleting by identifier: {}", identifier, e);
                None
            }
        }
    }

    async fn guarded<T, F, Fut>(&self, op: F) -> Result<T, DeletionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CmsError>>,
    {
        guarded_call(&self.breaker, self.config.call_timeout(), op).await
    }

    /// Returns true only if every rendered tag and path was invalidated.
    async fn invalidate_cache(&self, post_id: &str, slug: Option<&str>) -> bool {
        let mut all_ok = true;

        for template in &self.cache_targets.tags {
            let Some(tag) = render_target(template, post_id, slug) else {
                continue;
            };
            if let Err(e) = self.cache.invalidate_tag(&tag).await {
                warn!("Cache tag invalidation failed for {}: {}", tag, e);
                all_ok = false;
            }
        }

        for template in &self.cache_targets.paths {
            let Some(path) = render_target(template, post_id, slug) else {
                continue;
            };
            if let Err(e) = self.cache.invalidate_path(&path).await {
                warn!("Cache path invalidation failed for {}: {}", path, e);
                all_ok = false;
            }
        }

        all_ok
    }
}

#[async_trait]
impl DeletionExecutor for DeletionOrchestrator {
    async fn execute(&self, identifier: &str, options: DeletionOptions) -> DeletionResult {
        self.delete(identifier, options).await
    }
}


/// One CMS call through the breaker with `timeout` applied. Rejections surface
/// as `CIRCUIT_OPEN` without calling `op`; failures are classified.
pub(crate) async fn guarded_call<T, F, Fut>(
    breaker: &CircuitBreaker,
    timeout: Duration,
    op: F,
) -> Result<T, DeletionError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, CmsError>>,
{
    let outcome = breaker
        .call(|| async move {
            tokio::time::timeout(timeout, op())
                .await
                .unwrap_or_else(|_| Err(CmsError::timeout(timeout)))
        })
        .await;

    match outcome {
        Ok(value) => Ok(value),
        Err(CallError::Rejected) => Err(DeletionError::circuit_open()),
        Err(CallError::Failed(e)) => Err(classify(&e)),
    }
}


/// Releases the identifier on every exit path, including cancellation.
struct InProgressClaim<'a> {
    active: &'a Mutex<HashSet<String>>,
    identifier: String,
}

impl Drop for InProgressClaim<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.identifier);
    }
}
