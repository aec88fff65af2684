use std::ops::RangeInclusive;

use lazy_static::lazy_static;
use regex::Regex;

use super::models::{codes, DeletionError, ErrorCategory};
use crate::cms::CmsError;


pub struct ClassificationRule {
    pub code: &'static str,
    pub category: ErrorCategory,
    pub retryable: bool,
    pub status_range: Option<RangeInclusive<u16>>,
    pub extra_statuses: &'static [u16],
    pub pattern: Regex,
    pub suggested_action: &'static str,
}

impl ClassificationRule {
    fn matches(&self, status: Option<u16>, text: &str) -> bool {
        let status_match = status.is_some_and(|s| {
            self.status_range.as_ref().is_some_and(|r| r.contains(&s))
                || self.extra_statuses.contains(&s)
        });
        status_match || self.pattern.is_match(text)
    }
}

fn rule(
    code: &'static str,
    category: ErrorCategory,
    retryable: bool,
    status_range: Option<RangeInclusive<u16>>,
    extra_statuses: &'static [u16],
    pattern: &str,
    suggested_action: &'static str,
) -> Option<ClassificationRule> {
    let pattern = Regex::new(pattern).ok()?;
    Some(ClassificationRule {
        code,
        category,
        retryable,
        status_range,
        extra_statuses,
        pattern,
        suggested_action,
    })
}

lazy_static! {
    /// Evaluated top to bottom; the first match wins. Timeouts sit above the
    /// generic server rule so "timeout ... 500" is a timeout.
    pub static ref RULES: Vec<ClassificationRule> = [
        rule(
            codes::TIMEOUT,
            ErrorCategory::Network,
            true,
            None,
            &[408, 504],
            r"timeout|timed out|etimedout|deadline exceeded",
            "The CMS did not respond in time. The deletion will be retried automatically.",
        ),
        rule(
            codes::NETWORK_ERROR,
            ErrorCategory::Network,
            true,
            None,
            &[],
            r"econnreset|econnrefused|enotfound|eai_again|\bdns\b|connection (reset|refused|closed|aborted)|network|socket hang up|fetch failed|offline|unreachable",
            "Check your internet connection. The deletion has been saved and will be retried when the connection is restored.",
        ),
        rule(
            codes::RATE_LIMITED,
            ErrorCategory::Server,
            true,
            None,
            &[429],
            r"rate limit|too many requests",
            "The CMS is throttling requests. Wait a moment before deleting more content.",
        ),
        rule(
            codes::PERMISSION_DENIED,
            ErrorCategory::Permission,
            false,
            None,
            &[401, 403],
            r"unauthori[sz]ed|forbidden|permission|insufficient|access denied",
            "Your API token lacks delete permission. Ask an administrator to grant write access.",
        ),
        rule(
            codes::NOT_FOUND,
            ErrorCategory::Validation,
            false,
            None,
            &[404],
            r"not found|does not exist",
            "The post no longer exists. Refresh the list to see the current content.",
        ),
        rule(
            codes::VALIDATION_ERROR,
            ErrorCategory::Validation,
            false,
            None,
            &[400, 422],
            r"invalid|validation|malformed|bad request",
            "The request was rejected as invalid. Check the post identifier and try again.",
        ),
        rule(
            codes::SERVER_ERROR,
            ErrorCategory::Server,
            true,
            Some(500..=599),
            &[],
            r"\b5\d{2}\b|internal server error|bad gateway|service unavailable",
            "The CMS reported an internal error. Try again in a few minutes.",
        ),
        rule(
            codes::CMS_REFERENCE_CONFLICT,
            ErrorCategory::Validation,
            false,
            None,
            &[],
            r"referenc",
            "Other documents still reference this post. Remove those references first.",
        ),
        rule(
            codes::CMS_TRANSIENT,
            ErrorCategory::Server,
            true,
            None,
            &[409],
            r"conflict|revision|mutation|transaction|temporarily",
            "The CMS rejected a concurrent change. The deletion will be retried.",
        ),
    ]
    .into_iter()
    .flatten()
    .collect();
}

const UNKNOWN_ACTION: &str = "An unexpected error occurred. Try again, and contact support if it persists.";


/// Total and deterministic: the same input always yields the same error.
pub fn classify(err: &CmsError) -> DeletionError {
    let text = match &err.code {
        Some(code) => format!("{} {}", code, err.message),
        None => err.message.clone(),
    }
    .to_lowercase();

    let message = if err.message.is_empty() {
        "Unknown error".to_string()
    } else {
        err.message.clone()
    };

    for rule in RULES.iter() {
        if rule.matches(err.status, &text) {
            return DeletionError {
                code: rule.code.to_string(),
                message,
                category: rule.category,
                retryable: rule.retryable,
                suggested_action: rule.suggested_action.to_string(),
            };
        }
    }

    DeletionError {
        code: codes::UNKNOWN_ERROR.to_string(),
        message,
        category: ErrorCategory::Unknown,
        retryable: false,
        suggested_action: UNKNOWN_ACTION.to_string(),
    }
}


pub fn classify_message(message: &str) -> DeletionError {
    classify(&CmsError::new(message))
}
