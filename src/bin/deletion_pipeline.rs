use std::path::PathBuf;
use std::sync::Arc;

use deletion_pipeline::audit::{AuditFilter, TimeRange};
use deletion_pipeline::bulk::BulkOptions;
use deletion_pipeline::cms::{CmsError, Document, InMemoryCms, RecordingInvalidator, WatchNetworkMonitor};
use deletion_pipeline::core::events::{PipelineEvent, PipelineEventKind};
use deletion_pipeline::{DeletionOptions, DeletionService, PipelineConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("deletion_pipeline=info".parse()?))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = PipelineConfig::load(config_path.as_deref())?;

    let cms = Arc::new(InMemoryCms::with_documents((1..=8).map(|i| {
        Document::new(format!("post-{}", i), "post")
            .with_slug(format!("demo-post-{}", i))
            .with_title(format!("Demo post {}", i))
    })));
    let network = Arc::new(WatchNetworkMonitor::new(true));
    let service = DeletionService::new(config, cms.clone(), Arc::new(RecordingInvalidator::new()), network.clone()).await?;

    service.events().register(
        PipelineEventKind::AlertRaised,
        Arc::new(|event: PipelineEvent| tracing::warn!("ALERT {}", event.payload)),
    );
    let tasks = service.start_background_tasks();

    let options = DeletionOptions::default().with_retries(2, 100).with_actor("demo");

    let result = service.delete_post("demo-post-1", options.clone()).await;
    info!("Single deletion: success={}, post_id={:?}", result.success, result.post_id);

    cms.fail_next_deletes([CmsError::new("socket hang up").with_code("ECONNRESET")]);
    let result = service.delete_post("post-2", options.clone()).await;
    info!("Transient failure: success={}, retries={}", result.success, result.retry_count);

    cms.set_outage(Some(CmsError::new("getaddrinfo ENOTFOUND cms.example.com")));
    network.set_online(false);
    let result = service.delete_post("post-3", options.clone()).await;
    info!("Offline deletion queued: {} ({:?})", result.queued_for_retry, result.queue_id);

    cms.set_outage(None);
    network.set_online(true);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("Queue after reconnect: {}", serde_json::to_string(&service.get_queue_stats().await)?);

    cms.fail_always("post-6", CmsError::with_status(403, "Forbidden: token lacks delete permission"));
    let identifiers = (4..=8).map(|i| format!("post-{}", i)).collect();
    let bulk = service
        .bulk_delete_posts(identifiers, BulkOptions::with_deletion(options))
        .await?;
    info!(
        "Bulk {}: {} succeeded, {} failed",
        bulk.status, bulk.success_count, bulk.failure_count
    );

    let report = service.run_diagnostics().await;
    info!("Diagnostics healthy: {}", report.healthy);

    let health = service.get_deletion_health_status().await;
    println!("{}", serde_json::to_string_pretty(&health)?);

    let metrics = service.get_deletion_metrics(TimeRange::last_hours(1));
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    let failures = AuditFilter {
        action: Some(deletion_pipeline::audit::AuditAction::Failed),
        ..Default::default()
    };
    println!("{}", service.export_audit_logs(&failures)?);

    tasks.shutdown().await;
    Ok(())
}
