pub mod alerts;
pub mod models;
pub mod monitor;


pub use alerts::{AlertStore, RaiseOutcome};
pub use models::{Alert, AlertSeverity, AlertType, Breach, HealthLevel, HealthStatus};
pub use monitor::{evaluate, DeletionMonitor, HealthInputs};
