use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Permission,
    Validation,
    Server,
    Unknown,
}


pub mod codes {
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const SERVER_ERROR: &str = "SERVER_ERROR";
    pub const CMS_REFERENCE_CONFLICT: &str = "CMS_REFERENCE_CONFLICT";
    pub const CMS_TRANSIENT: &str = "CMS_TRANSIENT";
    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
    pub const OPERATION_IN_PROGRESS: &str = "OPERATION_IN_PROGRESS";
    pub const CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";
    pub const INVALID_IDENTIFIER: &str = "INVALID_IDENTIFIER";
}


/// Classified failure. Built once per failure and never reclassified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionError {
    pub code: String,
    pub message: String,
    pub category: ErrorCategory,
    pub retryable: bool,
    pub suggested_action: String,
}

impl DeletionError {
    pub fn operation_in_progress(identifier: &str) -> Self {
        Self {
            code: codes::OPERATION_IN_PROGRESS.to_string(),
            message: format!("A deletion for '{}' is already in progress", identifier),
            category: ErrorCategory::Validation,
            retryable: false,
            suggested_action: "Wait for the running deletion to finish before retrying.".to_string(),
        }
    }

    pub fn circuit_open() -> Self {
        Self {
            code: codes::CIRCUIT_OPEN.to_string(),
            message: "CMS circuit breaker is open; the call was not attempted".to_string(),
            category: ErrorCategory::Server,
            retryable: false,
            suggested_action: "The CMS is failing repeatedly. Wait for it to recover and try again.".to_string(),
        }
    }

    pub fn invalid_identifier() -> Self {
        Self {
            code: codes::INVALID_IDENTIFIER.to_string(),
            message: "Post identifier must not be empty".to_string(),
            category: ErrorCategory::Validation,
            retryable: false,
            suggested_action: "Provide a document id or slug.".to_string(),
        }
    }


    pub fn is_queueable(&self) -> bool {
        self.category == ErrorCategory::Network && self.retryable
    }
}

impl std::fmt::Display for DeletionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for DeletionError {}


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionOptions {
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub skip_cache_invalidation: bool,
    pub validate_before_delete: bool,
    pub actor: String,
    pub priority: Priority,
    /// Off for replays from the offline queue so an item is never re-enqueued.
    pub queue_on_network_failure: bool,
}

impl Default for DeletionOptions {
    fn default() -> Self {
        Self {
            retry_attempts: crate::DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: crate::DEFAULT_RETRY_DELAY_MS,
            skip_cache_invalidation: false,
            validate_before_delete: true,
            actor: "system".to_string(),
            priority: Priority::Normal,
            queue_on_network_failure: true,
        }
    }
}

impl DeletionOptions {
    pub fn with_retries(mut self, retry_attempts: u32, retry_delay_ms: u64) -> Self {
        self.retry_attempts = retry_attempts;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRequest {
    identifier: String,
    options: DeletionOptions,
}

impl DeletionRequest {
    pub fn new(identifier: impl Into<String>, options: DeletionOptions) -> Result<Self, DeletionError> {
        let identifier = identifier.into().trim().to_string();
        if identifier.is_empty() {
            return Err(DeletionError::invalid_identifier());
        }
        Ok(Self { identifier, options })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn options(&self) -> &DeletionOptions {
        &self.options
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionResult {
    pub success: bool,
    pub identifier: String,
    pub post_id: Option<String>,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub error: Option<DeletionError>,
    pub cache_invalidated: bool,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub duration_ms: u64,
    pub event_id: Option<Uuid>,
    pub queued_for_retry: bool,
    pub queue_id: Option<Uuid>,
}

impl DeletionResult {
    pub fn rejected(identifier: &str, error: DeletionError) -> Self {
        Self {
            success: false,
            identifier: identifier.to_string(),
            post_id: None,
            slug: None,
            title: None,
            error: Some(error),
            cache_invalidated: false,
            timestamp: Utc::now(),
            retry_count: 0,
            duration_ms: 0,
            event_id: None,
            queued_for_retry: false,
            queue_id: None,
        }
    }


    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}
