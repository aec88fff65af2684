pub mod client;
pub mod memory;

pub use client::{
    CacheInvalidator, CmsClient, CmsError, Document, NetworkMonitor, Patch, WatchNetworkMonitor,
};
pub use memory::{InMemoryCms, RecordingInvalidator};
