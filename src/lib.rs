pub mod audit;
pub mod bulk;
pub mod cms;
pub mod core;
pub mod deletion;
pub mod monitoring;
pub mod queue;
pub mod service;
pub mod utils;

pub use utils::safe_truncate_ellipsis;


pub use core::config::PipelineConfig;
pub use core::error::{PipelineError, Result};
pub use deletion::{DeletionError, DeletionOptions, DeletionOrchestrator, DeletionResult};
pub use service::DeletionService;


pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;


pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;


pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;


pub const DEFAULT_BREAKER_THRESHOLD: u32 = 5;


pub const DEFAULT_BREAKER_TIMEOUT_MS: u64 = 60_000;


pub const DEFAULT_QUEUE_MAX_ATTEMPTS: u32 = 5;


pub const DEFAULT_BATCH_SIZE: usize = 3;
