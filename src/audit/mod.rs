pub mod logger;
pub mod metrics;
pub mod models;


pub use logger::AuditLogger;
pub use metrics::{calculate_metrics, percentile};
pub use models::{
    AuditAction, AuditFilter, AuditLogEntry, AuditPage, DeletionEvent, DeletionMetrics, EventStatus,
    SortField, SortOrder, TimeRange,
};
