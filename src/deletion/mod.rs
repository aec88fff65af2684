pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod diagnostics;
pub mod models;
pub mod orchestrator;


pub use backoff::{apply_jitter, jittered, RetryPolicy};
pub use circuit_breaker::{CallError, CircuitBreaker, CircuitBreakerState, CircuitState};
pub use classifier::{classify, classify_message};
pub use diagnostics::{run_diagnostics, DiagnosticReport, DiagnosticStep};
pub use models::{
    codes, DeletionError, DeletionOptions, DeletionRequest, DeletionResult, ErrorCategory, Priority,
};
pub use orchestrator::{DeletionExecutor, DeletionOrchestrator};
