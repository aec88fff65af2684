use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::Result;


#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub orchestrator: OrchestratorConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub audit: AuditConfig,
    pub queue: QueueConfig,
    pub bulk: BulkConfig,
    pub monitoring: MonitoringConfig,
    pub cache: CacheInvalidationConfig,
}

impl PipelineConfig {
    /// Loads defaults, then the optional file, then `DELETION__*` environment
    /// variables (`DELETION__QUEUE__MAX_ATTEMPTS=7`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!("Loading pipeline config from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("DELETION")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<PipelineConfig>()?;

        Ok(config)
    }


    pub fn from_env() -> Self {
        Self::load(None).unwrap_or_else(|e| {
            tracing::warn!("Falling back to default pipeline config: {}", e);
            Self::default()
        })
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub call_timeout_ms: u64,
    pub max_backoff_ms: u64,
    pub default_actor: String,
}

impl OrchestratorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: crate::DEFAULT_CALL_TIMEOUT_MS,
            max_backoff_ms: 30_000,
            default_actor: "system".to_string(),
        }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub threshold: u32,
    pub timeout_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: crate::DEFAULT_BREAKER_THRESHOLD,
            timeout_ms: crate::DEFAULT_BREAKER_TIMEOUT_MS,
        }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub retention_days: i64,
    pub max_entries: usize,
    pub cleanup_interval_secs: u64,
}

impl AuditConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            max_entries: 10_000,
            cleanup_interval_secs: 3_600,
        }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub process_interval_secs: u64,
    pub concurrency: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_factor: f64,
    pub max_size: usize,
    pub storage_path: Option<String>,
}

impl QueueConfig {
    pub fn process_interval(&self) -> Duration {
        Duration::from_secs(self.process_interval_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_QUEUE_MAX_ATTEMPTS,
            process_interval_secs: 30,
            concurrency: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 300_000,
            jitter_factor: 0.25,
            max_size: 1_000,
            storage_path: None,
        }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub max_concurrent: usize,
    pub max_concurrent_operations: usize,
    pub history_limit: usize,
    pub completion_grace_ms: u64,
}

impl BulkConfig {
    pub fn completion_grace(&self) -> Duration {
        Duration::from_millis(self.completion_grace_ms)
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_concurrent: crate::DEFAULT_BATCH_SIZE,
            max_concurrent_operations: 3,
            history_limit: 100,
            completion_grace_ms: 5_000,
        }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub check_interval_secs: u64,
    pub window_secs: i64,
    pub error_rate_threshold: f64,
    pub response_time_threshold_ms: f64,
    pub queue_size_threshold: usize,
    pub queue_age_threshold_secs: i64,
    pub consecutive_failures_threshold: usize,
    pub alert_retention_days: i64,
}

impl MonitoringConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            window_secs: 3_600,
            error_rate_threshold: 0.10,
            response_time_threshold_ms: 5_000.0,
            queue_size_threshold: 100,
            queue_age_threshold_secs: 3_600,
            consecutive_failures_threshold: 5,
            alert_retention_days: 7,
        }
    }
}


/// Tag and path templates; `{id}` and `{slug}` are substituted per document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheInvalidationConfig {
    pub tags: Vec<String>,
    pub paths: Vec<String>,
}

impl Default for CacheInvalidationConfig {
    fn default() -> Self {
        Self {
            tags: vec!["posts".to_string(), "post:{id}".to_string(), "post:{slug}".to_string()],
            paths: vec!["/blog".to_string(), "/blog/{slug}".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.circuit_breaker.threshold, 5);
        assert_eq!(config.circuit_breaker.timeout(), Duration::from_secs(60));
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.queue.concurrency, 3);
        assert_eq!(config.bulk.history_limit, 100);
        assert_eq!(config.audit.max_entries, 10_000);
        assert_eq!(config.monitoring.alert_retention_days, 7);
        assert_eq!(config.orchestrator.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{ "queue": {{ "max_attempts": 9 }}, "bulk": {{ "max_concurrent": 7 }} }}"#
        )
        .unwrap();

        let config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.queue.max_attempts, 9);
        assert_eq!(config.bulk.max_concurrent, 7);
        assert_eq!(config.queue.concurrency, 3);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let config = PipelineConfig::load(Some(Path::new("/nonexistent/pipeline.toml"))).unwrap();
        assert_eq!(config.audit.retention_days, 90);
    }
}
