use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::alerts::{AlertStore, RaiseOutcome};
use super::models::{Alert, AlertSeverity, AlertType, Breach, HealthLevel, HealthStatus};
use crate::audit::{AuditLogger, TimeRange};
use crate::cms::NetworkMonitor;
use crate::core::config::MonitoringConfig;
use crate::core::events::{EventBus, PipelineEvent, PipelineEventKind};
use crate::deletion::{CircuitBreaker, CircuitState};
use crate::queue::OfflineQueue;

const ALL_ALERT_TYPES: [AlertType; 7] = [
    AlertType::HighErrorRate,
    AlertType::SlowResponses,
    AlertType::QueueBacklog,
    AlertType::StaleQueue,
    AlertType::ConsecutiveFailures,
    AlertType::CircuitOpen,
    AlertType::NetworkOffline,
];


/// Raw signals a health check is computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthInputs {
    /// Terminal deletions in the window; rates are ignored when zero.
    pub sample_size: usize,
    pub error_rate: f64,
    pub average_response_time_ms: f64,
    pub queue_size: usize,
    pub oldest_queued_age_secs: Option<i64>,
    pub consecutive_failures: usize,
    pub network_online: bool,
    pub circuit_state: CircuitState,
}


/// Pure threshold evaluation. Unhealthy-level limits come from config and the
/// degraded level triggers at half of each.
pub fn evaluate(inputs: &HealthInputs, config: &MonitoringConfig) -> Vec<Breach> {
    let mut breaches = Vec::new();

    if inputs.sample_size > 0 {
        if let Some(breach) = graded(
            AlertType::HighErrorRate,
            inputs.error_rate,
            config.error_rate_threshold,
            "High deletion error rate",
            format!("{:.1}% of deletions failed in the last window", inputs.error_rate * 100.0),
        ) {
            breaches.push(breach);
        }

        if let Some(breach) = graded(
            AlertType::SlowResponses,
            inputs.average_response_time_ms,
            config.response_time_threshold_ms,
            "Slow deletions",
            format!("Average deletion time is {:.0}ms", inputs.average_response_time_ms),
        ) {
            breaches.push(breach);
        }
    }

    if let Some(breach) = graded(
        AlertType::QueueBacklog,
        inputs.queue_size as f64,
        config.queue_size_threshold as f64,
        "Offline queue backlog",
        format!("{} deletions are waiting in the offline queue", inputs.queue_size),
    ) {
        breaches.push(breach);
    }

    if let Some(age) = inputs.oldest_queued_age_secs.filter(|age| *age > config.queue_age_threshold_secs) {
        breaches.push(Breach {
            alert_type: AlertType::StaleQueue,
            level: HealthLevel::Degraded,
            severity: AlertSeverity::Medium,
            title: "Stale offline queue".to_string(),
            message: format!("Oldest queued deletion has waited {} minutes", age / 60),
        });
    }

    if inputs.consecutive_failures >= config.consecutive_failures_threshold.max(1) {
        breaches.push(Breach {
            alert_type: AlertType::ConsecutiveFailures,
            level: HealthLevel::Degraded,
            severity: AlertSeverity::Medium,
            title: "Repeated deletion failures".to_string(),
            message: format!("The last {} deletions all failed", inputs.consecutive_failures),
        });
    }

    if inputs.circuit_state == CircuitState::Open {
        breaches.push(Breach {
            alert_type: AlertType::CircuitOpen,
            level: HealthLevel::Unhealthy,
            severity: AlertSeverity::Critical,
            title: "CMS circuit breaker open".to_string(),
            message: "Deletions are being rejected without contacting the CMS".to_string(),
        });
    }

    if !inputs.network_online {
        breaches.push(Breach {
            alert_type: AlertType::NetworkOffline,
            level: HealthLevel::Degraded,
            severity: AlertSeverity::High,
            title: "Network offline".to_string(),
            message: "Deletions are being queued until connectivity returns".to_string(),
        });
    }

    breaches
}

fn graded(alert_type: AlertType, value: f64, limit: f64, title: &str, message: String) -> Option<Breach> {
    let (level, severity) = if value > limit {
        (HealthLevel::Unhealthy, AlertSeverity::High)
    } else if value > limit / 2.0 {
        (HealthLevel::Degraded, AlertSeverity::Medium)
    } else {
        return None;
    };

    Some(Breach {
        alert_type,
        level,
        severity,
        title: title.to_string(),
        message,
    })
}


pub struct DeletionMonitor {
    audit: Arc<AuditLogger>,
    queue: Arc<OfflineQueue>,
    breaker: Arc<CircuitBreaker>,
    network: Option<Arc<dyn NetworkMonitor>>,
    bus: Arc<EventBus>,
    config: MonitoringConfig,
    alerts: AlertStore,
    last_status: RwLock<Option<HealthStatus>>,
}

impl DeletionMonitor {
    pub fn new(
        audit: Arc<AuditLogger>,
        queue: Arc<OfflineQueue>,
        breaker: Arc<CircuitBreaker>,
        bus: Arc<EventBus>,
        config: MonitoringConfig,
    ) -> Self {
        Self {
            audit,
            queue,
            breaker,
            network: None,
            bus,
            config,
            alerts: AlertStore::new(),
            last_status: RwLock::new(None),
        }
    }


    #[must_use]
    pub fn with_network_monitor(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }


    pub async fn collect_inputs(&self) -> HealthInputs {
        let metrics = self.audit.metrics(TimeRange::last(Duration::seconds(self.config.window_secs)));
        let queue = self.queue.stats().await;

        HealthInputs {
            sample_size: metrics.total,
            error_rate: metrics.error_rate,
            average_response_time_ms: metrics.average_duration_ms,
            queue_size: queue.pending,
            oldest_queued_age_secs: queue.oldest_age_secs,
            consecutive_failures: self.audit.consecutive_failures(),
            network_online: self.network.as_ref().is_none_or(|n| n.is_online()),
            circuit_state: self.breaker.state(),
        }
    }


    /// Computes health, then opens, refreshes or auto-resolves alerts to match.
    pub async fn check_health(&self) -> HealthStatus {
        let inputs = self.collect_inputs().await;
        let breaches = evaluate(&inputs, &self.config);

        let status = breaches.iter().map(|b| b.level).max().unwrap_or(HealthLevel::Healthy);
        self.sync_alerts(&breaches);

        let health = HealthStatus {
            status,
            error_rate: inputs.error_rate,
            average_response_time_ms: inputs.average_response_time_ms,
            queue_size: inputs.queue_size,
            oldest_queued_age_secs: inputs.oldest_queued_age_secs,
            consecutive_failures: inputs.consecutive_failures,
            network_online: inputs.network_online,
            circuit_state: inputs.circuit_state,
            issues: breaches.iter().map(|b| b.message.clone()).collect(),
            checked_at: Utc::now(),
        };

        match status {
            HealthLevel::Healthy => debug!("Deletion pipeline healthy"),
            level => warn!("Deletion pipeline {}: {}", level, health.issues.join("; ")),
        }

        *self.last_status.write() = Some(health.clone());
        health
    }

    fn sync_alerts(&self, breaches: &[Breach]) {
        for breach in breaches {
            let (alert, outcome) = self.alerts.raise(breach);
            if outcome != RaiseOutcome::Refreshed {
                self.emit_alert(PipelineEventKind::AlertRaised, &alert);
            }
        }

        for alert_type in ALL_ALERT_TYPES {
            if breaches.iter().any(|b| b.alert_type == alert_type) {
                continue;
            }
            if let Some(alert) = self.alerts.resolve_type(alert_type) {
                self.emit_alert(PipelineEventKind::AlertResolved, &alert);
            }
        }
    }

    fn emit_alert(&self, kind: PipelineEventKind, alert: &Alert) {
        self.bus.emit(PipelineEvent::new(
            kind,
            json!({
                "alert_id": alert.id,
                "type": alert.alert_type,
                "severity": alert.severity,
                "title": alert.title,
                "message": alert.message,
            }),
        ));
    }


    pub fn last_health(&self) -> Option<HealthStatus> {
        self.last_status.read().clone()
    }


    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.alerts.active()
    }


    pub fn get_all_alerts(&self) -> Vec<Alert> {
        self.alerts.all()
    }


    pub fn acknowledge_alert(&self, id: Uuid) -> bool {
        self.alerts.acknowledge(id)
    }


    pub fn resolve_alert(&self, id: Uuid) -> bool {
        match self.alerts.resolve(id) {
            Some(alert) => {
                self.emit_alert(PipelineEventKind::AlertResolved, &alert);
                true
            }
            None => false,
        }
    }


    pub fn cleanup_alerts(&self) -> usize {
        let cutoff = Utc::now() - Duration::days(self.config.alert_retention_days);
        let removed = self.alerts.purge_resolved_before(cutoff);
        if removed > 0 {
            info!("Alert cleanup removed {} resolved alerts", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::WatchNetworkMonitor;
    use crate::core::config::{AuditConfig, QueueConfig};
    use crate::deletion::{classify_message, DeletionOptions};
    use crate::queue::{MemoryStore, QueueMetadata};
    use std::time::Duration as StdDuration;

    fn healthy_inputs() -> HealthInputs {
        HealthInputs {
            sample_size: 10,
            error_rate: 0.0,
            average_response_time_ms: 100.0,
            queue_size: 0,
            oldest_queued_age_secs: None,
            consecutive_failures: 0,
            network_online: true,
            circuit_state: CircuitState::Closed,
        }
    }

    fn level(breaches: &[Breach]) -> HealthLevel {
        breaches.iter().map(|b| b.level).max().unwrap_or(HealthLevel::Healthy)
    }

    #[test]
    fn test_healthy_inputs_have_no_breaches() {
        assert!(evaluate(&healthy_inputs(), &MonitoringConfig::default()).is_empty());
    }

    #[test]
    fn test_error_rate_grading() {
        let config = MonitoringConfig::default();

        let degraded = HealthInputs {
            error_rate: 0.06,
            ..healthy_inputs()
        };
        let breaches = evaluate(&degraded, &config);
        assert_eq!(level(&breaches), HealthLevel::Degraded);
        assert_eq!(breaches[0].severity, AlertSeverity::Medium);

        let unhealthy = HealthInputs {
            error_rate: 0.5,
            ..healthy_inputs()
        };
        let breaches = evaluate(&unhealthy, &config);
        assert_eq!(level(&breaches), HealthLevel::Unhealthy);
        assert_eq!(breaches[0].severity, AlertSeverity::High);
    }

    #[test]
    fn test_rates_ignored_without_samples() {
        let inputs = HealthInputs {
            sample_size: 0,
            error_rate: 1.0,
            average_response_time_ms: 99_999.0,
            ..healthy_inputs()
        };
        assert!(evaluate(&inputs, &MonitoringConfig::default()).is_empty());
    }

    #[test]
    fn test_queue_thresholds() {
        let config = MonitoringConfig::default();
        let inputs = HealthInputs {
            queue_size: 60,
            oldest_queued_age_secs: Some(2 * 3_600),
            ..healthy_inputs()
        };
        let breaches = evaluate(&inputs, &config);
        let types: Vec<AlertType> = breaches.iter().map(|b| b.alert_type).collect();
        assert_eq!(types, vec![AlertType::QueueBacklog, AlertType::StaleQueue]);
        assert_eq!(level(&breaches), HealthLevel::Degraded);

        let inputs = HealthInputs {
            queue_size: 101,
            ..healthy_inputs()
        };
        assert_eq!(level(&evaluate(&inputs, &config)), HealthLevel::Unhealthy);
    }

    #[test]
    fn test_circuit_offline_and_streak() {
        let inputs = HealthInputs {
            circuit_state: CircuitState::Open,
            network_online: false,
            consecutive_failures: 5,
            ..healthy_inputs()
        };
        let breaches = evaluate(&inputs, &MonitoringConfig::default());
        assert_eq!(level(&breaches), HealthLevel::Unhealthy);

        let severity = |t: AlertType| breaches.iter().find(|b| b.alert_type == t).map(|b| b.severity);
        assert_eq!(severity(AlertType::CircuitOpen), Some(AlertSeverity::Critical));
        assert_eq!(severity(AlertType::NetworkOffline), Some(AlertSeverity::High));
        assert_eq!(severity(AlertType::ConsecutiveFailures), Some(AlertSeverity::Medium));
    }

    struct Fixture {
        audit: Arc<AuditLogger>,
        queue: Arc<OfflineQueue>,
        breaker: Arc<CircuitBreaker>,
        network: Arc<WatchNetworkMonitor>,
        monitor: DeletionMonitor,
    }

    fn fixture() -> Fixture {
        let audit = Arc::new(AuditLogger::new(AuditConfig::default()));
        let queue = Arc::new(OfflineQueue::new(QueueConfig::default(), Arc::new(MemoryStore::new())));
        let breaker = Arc::new(CircuitBreaker::new("cms", 1, StdDuration::from_secs(60)));
        let network = Arc::new(WatchNetworkMonitor::new(true));
        let monitor = DeletionMonitor::new(
            audit.clone(),
            queue.clone(),
            breaker.clone(),
            Arc::new(EventBus::new()),
            MonitoringConfig::default(),
        )
        .with_network_monitor(network.clone());

        Fixture {
            audit,
            queue,
            breaker,
            network,
            monitor,
        }
    }

    #[tokio::test]
    async fn test_fresh_pipeline_is_healthy() {
        let f = fixture();
        let health = f.monitor.check_health().await;

        assert_eq!(health.status, HealthLevel::Healthy);
        assert!(health.issues.is_empty());
        assert!(f.monitor.get_active_alerts().is_empty());
        assert_eq!(f.monitor.last_health(), Some(health));
    }

    #[tokio::test]
    async fn test_alerts_dedupe_and_auto_resolve() {
        let f = fixture();
        f.network.set_online(false);

        f.monitor.check_health().await;
        let health = f.monitor.check_health().await;
        assert_eq!(health.status, HealthLevel::Degraded);
        assert!(!health.network_online);

        let active = f.monitor.get_active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert_type, AlertType::NetworkOffline);
        assert_eq!(active[0].occurrences, 2);

        f.network.set_online(true);
        let health = f.monitor.check_health().await;
        assert_eq!(health.status, HealthLevel::Healthy);
        assert!(f.monitor.get_active_alerts().is_empty());
        assert!(f.monitor.get_all_alerts()[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_open_circuit_is_unhealthy() {
        let f = fixture();
        let _ = f.breaker.call(|| async { Err::<(), _>("boom") }).await;

        let health = f.monitor.check_health().await;
        assert_eq!(health.status, HealthLevel::Unhealthy);
        assert_eq!(health.circuit_state, CircuitState::Open);
        assert_eq!(f.monitor.get_active_alerts()[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn test_failures_and_queue_feed_health() {
        let f = fixture();
        for i in 0..5 {
            let post = format!("post-{}", i);
            let event = f.audit.log_initiated(&post, None, None, "tester", 0);
            f.audit.log_failure(event, &post, &classify_message("ECONNRESET"), 0, "tester");
        }
        f.queue
            .enqueue("post-0", DeletionOptions::default(), QueueMetadata::default())
            .await
            .unwrap();

        let health = f.monitor.check_health().await;
        assert_eq!(health.status, HealthLevel::Unhealthy);
        assert!((health.error_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(health.consecutive_failures, 5);
        assert_eq!(health.queue_size, 1);
        assert!(health.oldest_queued_age_secs.is_some());
    }

    #[tokio::test]
    async fn test_manual_acknowledge_resolve_and_cleanup() {
        let f = fixture();
        f.network.set_online(false);
        f.monitor.check_health().await;

        let alert = f.monitor.get_active_alerts().remove(0);
        assert!(f.monitor.acknowledge_alert(alert.id));
        assert!(f.monitor.resolve_alert(alert.id));
        assert!(!f.monitor.resolve_alert(alert.id));

        assert_eq!(f.monitor.cleanup_alerts(), 0);
        assert_eq!(f.monitor.get_all_alerts().len(), 1);
    }
}
