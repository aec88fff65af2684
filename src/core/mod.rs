

pub mod config;
pub mod error;
pub mod events;
pub mod scheduler;

pub use config::{
    AuditConfig, BulkConfig, CacheInvalidationConfig, CircuitBreakerConfig, MonitoringConfig,
    OrchestratorConfig, PipelineConfig, QueueConfig,
};
pub use error::{PipelineError, Result};


pub use events::{EventBus, EventHandler, PipelineEvent, PipelineEventKind};
pub use scheduler::BackgroundTasks;
