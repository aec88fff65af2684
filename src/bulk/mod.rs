pub mod manager;
pub mod models;


pub use manager::BulkDeletionManager;
pub use models::{BulkDeletionProgress, BulkDeletionResult, BulkOptions, BulkStatus};
