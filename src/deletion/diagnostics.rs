use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::circuit_breaker::CircuitBreaker;
use super::classifier::classify;
use super::models::DeletionError;
use super::orchestrator::guarded_call;
use crate::cms::{CmsClient, CmsError, Document, Patch};
use crate::utils::elapsed_ms;

const DIAGNOSTIC_DOC_TYPE: &str = "deletion_diagnostic";
const PATCHED_TITLE: &str = "Deletion pipeline diagnostic (patched)";


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticStep {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub code: Option<String>,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub steps: Vec<DiagnosticStep>,
    pub healthy: bool,
    pub ran_at: DateTime<Utc>,
}

impl DiagnosticReport {
    pub fn failed_step(&self) -> Option<&DiagnosticStep> {
        self.steps.iter().find(|s| !s.success)
    }
}


/// Exercises the CMS write path end to end with a throwaway document:
/// create, patch, fetch, delete, then confirm the delete stuck. Every call goes
/// through `breaker`. Stops at the first failing step.
pub async fn run_diagnostics(cms: &dyn CmsClient, breaker: &CircuitBreaker, timeout: Duration) -> DiagnosticReport {
    let ran_at = Utc::now();
    let mut steps = Vec::new();

    let draft = Document::new("", DIAGNOSTIC_DOC_TYPE).with_title("Deletion pipeline diagnostic");
    let created = timed_step(&mut steps, "create", || guarded_call(breaker, timeout, || cms.create(draft))).await;
    let Some(created) = created else {
        return finish(steps, ran_at);
    };
    let id = created.id;

    let patch = Patch::new().set("title", PATCHED_TITLE);
    let patched = timed_step(&mut steps, "patch", || guarded_call(breaker, timeout, || cms.patch(&id, patch))).await;
    if patched.is_none() {
        return finish(steps, ran_at);
    }

    let fetched = timed_step(&mut steps, "fetch", || async {
        match guarded_call(breaker, timeout, || cms.fetch_by_id(&id)).await {
            Ok(Some(doc)) if doc.title.as_deref() == Some(PATCHED_TITLE) => Ok(doc),
            Ok(Some(_)) => Err(classify(&CmsError::new("patched title was not persisted"))),
            Ok(None) => Err(classify(&CmsError::with_status(
                404,
                format!("diagnostic document {} not found", id),
            ))),
            Err(e) => Err(e),
        }
    })
    .await;
    if fetched.is_none() {
        return finish(steps, ran_at);
    }

    let deleted = timed_step(&mut steps, "delete", || guarded_call(breaker, timeout, || cms.delete(&id))).await;
    if deleted.is_none() {
        return finish(steps, ran_at);
    }

    timed_step(&mut steps, "verify", || async {
        match guarded_call(breaker, timeout, || cms.fetch_by_id(&id)).await {
            Ok(None) => Ok(()),
            Ok(Some(_)) => Err(classify(&CmsError::new("diagnostic document still present after delete"))),
            Err(e) => Err(e),
        }
    })
    .await;

    finish(steps, ran_at)
}

async fn timed_step<T, F, Fut>(steps: &mut Vec<DiagnosticStep>, name: &str, op: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, DeletionError>>,
{
    let started = Instant::now();
    let (value, error) = match op().await {
        Ok(value) => (Some(value), None),
        Err(e) => {
            warn!("Diagnostic step {} failed: {}", name, e);
            (None, Some(e))
        }
    };

    steps.push(DiagnosticStep {
        name: name.to_string(),
        success: error.is_none(),
        duration_ms: elapsed_ms(started),
        code: error.as_ref().map(|e| e.code.clone()),
        error: error.map(|e| e.message),
    });
    value
}

fn finish(steps: Vec<DiagnosticStep>, ran_at: DateTime<Utc>) -> DiagnosticReport {
    let healthy = steps.len() == 5 && steps.iter().all(|s| s.success);
    info!(
        "CMS diagnostics finished: healthy={}, steps={}",
        healthy,
        steps.iter().map(|s| format!("{}={}", s.name, s.success)).collect::<Vec<_>>().join(",")
    );
    DiagnosticReport { steps, healthy, ran_at }
}
