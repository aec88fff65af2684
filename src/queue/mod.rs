pub mod models;
pub mod offline;
pub mod store;


pub use models::{ProcessReport, QueueMetadata, QueueStats, QueuedDeletion};
pub use offline::OfflineQueue;
pub use store::{FileStore, MemoryStore, PersistentStore};
