use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::metrics::calculate_metrics;
use super::models::{
    AuditAction, AuditFilter, AuditLogEntry, AuditPage, DeletionEvent, DeletionMetrics, EventStatus,
    SortField, SortOrder, TimeRange,
};
use crate::core::config::AuditConfig;
use crate::core::error::Result;
use crate::deletion::DeletionError;
use crate::utils::safe_truncate_ellipsis;

const MAX_ERROR_MESSAGE_CHARS: usize = 500;


#[derive(Default)]
struct AuditStore {
    entries: VecDeque<AuditLogEntry>,
    events: HashMap<Uuid, DeletionEvent>,
    active: HashMap<String, Uuid>,
    next_sequence: u64,
}


pub struct AuditLogger {
    config: AuditConfig,
    store: RwLock<AuditStore>,
}

impl AuditLogger {
    pub fn new(config: AuditConfig) -> Self {
        info!(
            "AuditLogger initialized: retention={}d, max_entries={}",
            config.retention_days, config.max_entries
        );
        Self {
            config,
            store: RwLock::new(AuditStore::default()),
        }
    }


    pub fn log_initiated(
        &self,
        post_id: &str,
        title: Option<&str>,
        slug: Option<&str>,
        actor: &str,
        max_retries: u32,
    ) -> Uuid {
        let event_id = Uuid::new_v4();
        let now = Utc::now();
        let mut store = self.store.write();

        if let Some(previous) = store.active.insert(post_id.to_string(), event_id) {
            warn!("Post {} already had live audit event {}, superseding", post_id, previous);
        }
        store.events.insert(
            event_id,
            DeletionEvent {
                id: event_id,
                post_id: post_id.to_string(),
                status: EventStatus::Pending,
                retry_count: 0,
                max_retries,
                actor: actor.to_string(),
                started_at: now,
                completed_at: None,
            },
        );

        let mut entry = self.blank_entry(&mut store, event_id, post_id, AuditAction::Initiated, actor, now);
        entry.title = title.map(str::to_string);
        entry.slug = slug.map(str::to_string);
        self.append(&mut store, entry);

        debug!("Audit: deletion {} initiated for {} by {}", event_id, post_id, actor);
        event_id
    }


    pub fn log_success(
        &self,
        event_id: Uuid,
        post_id: &str,
        duration_ms: u64,
        cache_invalidated: bool,
        actor: &str,
    ) {
        let now = Utc::now();
        let mut store = self.store.write();
        let retry_count = self.finish_event(&mut store, event_id, post_id, EventStatus::Success, now);

        let mut entry = self.blank_entry(&mut store, event_id, post_id, AuditAction::Success, actor, now);
        entry.duration_ms = Some(duration_ms);
        entry.retry_count = retry_count;
        entry.cache_invalidated = Some(cache_invalidated);
        self.append(&mut store, entry);

        debug!("Audit: deletion {} succeeded for {} in {}ms", event_id, post_id, duration_ms);
    }


    pub fn log_failure(
        &self,
        event_id: Uuid,
        post_id: &str,
        error: &DeletionError,
        retry_count: u32,
        actor: &str,
    ) {
        let now = Utc::now();
        let mut store = self.store.write();
        let duration_ms = store
            .events
            .get(&event_id)
            .map(|e| (now - e.started_at).num_milliseconds().max(0) as u64);
        self.finish_event(&mut store, event_id, post_id, EventStatus::Failed, now);

        let mut entry = self.blank_entry(&mut store, event_id, post_id, AuditAction::Failed, actor, now);
        entry.error = Some(Self::truncated(error));
        entry.retry_count = retry_count;
        entry.duration_ms = duration_ms;
        self.append(&mut store, entry);

        debug!("Audit: deletion {} failed for {}: {}", event_id, post_id, error);
    }


    pub fn log_retry(
        &self,
        event_id: Uuid,
        post_id: &str,
        retry_count: u32,
        previous_error: &DeletionError,
        actor: &str,
    ) {
        let now = Utc::now();
        let mut store = self.store.write();
        if let Some(event) = store.events.get_mut(&event_id) {
            if !event.status.is_terminal() {
                event.status = EventStatus::Retrying;
                event.retry_count = retry_count;
            }
        }

        let mut entry = self.blank_entry(&mut store, event_id, post_id, AuditAction::Retried, actor, now);
        entry.error = Some(Self::truncated(previous_error));
        entry.retry_count = retry_count;
        self.append(&mut store, entry);

        debug!("Audit: deletion {} retry #{} for {}", event_id, retry_count, post_id);
    }


    pub fn query(&self, filter: &AuditFilter) -> AuditPage {
        let store = self.store.read();
        let mut matched: Vec<AuditLogEntry> = store
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        drop(store);

        // Stable sort: equal keys keep insertion order in both directions.
        matched.sort_by(|a, b| {
            let ord = match filter.sort_by {
                SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
                SortField::Action => a.action.to_string().cmp(&b.action.to_string()),
                SortField::Actor => a.actor.cmp(&b.actor),
            };
            match filter.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total = matched.len();
        let entries: Vec<AuditLogEntry> = if filter.limit == 0 {
            matched.into_iter().skip(filter.offset).collect()
        } else {
            matched.into_iter().skip(filter.offset).take(filter.limit).collect()
        };
        let has_more = filter.offset + entries.len() < total;

        AuditPage {
            entries,
            total,
            offset: filter.offset,
            limit: filter.limit,
            has_more,
        }
    }


    /// Every matching entry as pretty JSON, ignoring pagination.
    pub fn export(&self, filter: &AuditFilter) -> Result<String> {
        let unpaged = AuditFilter {
            offset: 0,
            limit: 0,
            ..filter.clone()
        };
        let page = self.query(&unpaged);
        info!("Exporting {} audit entries", page.total);
        Ok(serde_json::to_string_pretty(&page.entries)?)
    }


    pub fn metrics(&self, range: TimeRange) -> DeletionMetrics {
        let store = self.store.read();
        calculate_metrics(store.entries.iter(), range)
    }


    /// Trailing run of failed terminal entries, newest first.
    pub fn consecutive_failures(&self) -> usize {
        let store = self.store.read();
        store
            .entries
            .iter()
            .rev()
            .filter(|e| e.action.is_terminal())
            .take_while(|e| e.action == AuditAction::Failed)
            .count()
    }


    pub fn get_event(&self, event_id: Uuid) -> Option<DeletionEvent> {
        self.store.read().events.get(&event_id).cloned()
    }


    pub fn active_event(&self, post_id: &str) -> Option<DeletionEvent> {
        let store = self.store.read();
        store
            .active
            .get(post_id)
            .and_then(|id| store.events.get(id))
            .cloned()
    }


    pub fn entries_for_event(&self, event_id: Uuid) -> Vec<AuditLogEntry> {
        self.store
            .read()
            .entries
            .iter()
            .filter(|e| e.event_id == event_id)
            .cloned()
            .collect()
    }


    pub fn len(&self) -> usize {
        self.store.read().entries.len()
    }


    pub fn is_empty(&self) -> bool {
        self.store.read().entries.is_empty()
    }


    pub fn purge_expired(&self) -> usize {
        self.purge_older_than(Utc::now() - Duration::days(self.config.retention_days))
    }


    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut store = self.store.write();
        let before = store.entries.len();
        store.entries.retain(|e| e.timestamp >= cutoff);
        store
            .events
            .retain(|_, e| !e.status.is_terminal() || e.completed_at.is_none_or(|c| c >= cutoff));

        let purged = before - store.entries.len();
        if purged > 0 {
            info!("Purged {} audit entries older than {}", purged, cutoff);
        }
        purged
    }

    fn blank_entry(
        &self,
        store: &mut AuditStore,
        event_id: Uuid,
        post_id: &str,
        action: AuditAction,
        actor: &str,
        timestamp: DateTime<Utc>,
    ) -> AuditLogEntry {
        let sequence = store.next_sequence;
        store.next_sequence += 1;
        AuditLogEntry {
            entry_id: Uuid::new_v4(),
            event_id,
            sequence,
            post_id: post_id.to_string(),
            action,
            timestamp,
            actor: actor.to_string(),
            title: None,
            slug: None,
            error: None,
            duration_ms: None,
            retry_count: 0,
            cache_invalidated: None,
        }
    }

    /// Marks the event terminal and releases the live slot; returns its retry count.
    fn finish_event(
        &self,
        store: &mut AuditStore,
        event_id: Uuid,
        post_id: &str,
        status: EventStatus,
        now: DateTime<Utc>,
    ) -> u32 {
        let retry_count = match store.events.get_mut(&event_id) {
            Some(event) if !event.status.is_terminal() => {
                event.status = status;
                event.completed_at = Some(now);
                event.retry_count
            }
            Some(event) => {
                warn!("Audit event {} already terminal ({})", event_id, event.status);
                event.retry_count
            }
            None => {
                warn!("Audit event {} unknown, recording {} anyway", event_id, status);
                0
            }
        };

        if store.active.get(post_id) == Some(&event_id) {
            store.active.remove(post_id);
        }
        retry_count
    }

    fn append(&self, store: &mut AuditStore, entry: AuditLogEntry) {
        store.entries.push_back(entry);

        let cap = self.config.max_entries.max(1);
        if store.entries.len() <= cap {
            return;
        }

        // One batch down to 90% of the cap, so eviction does not run on every append.
        let target = (cap * 9 / 10).max(1);
        let excess = store.entries.len() - target;
        let evicted: Vec<AuditLogEntry> = store.entries.drain(..excess).collect();

        for entry in evicted.iter().filter(|e| e.action == AuditAction::Initiated) {
            let terminal = store
                .events
                .get(&entry.event_id)
                .is_some_and(|e| e.status.is_terminal());
            if terminal {
                store.events.remove(&entry.event_id);
            }
        }
        debug!("Evicted {} oldest audit entries (cap {})", evicted.len(), cap);
    }

    fn truncated(error: &DeletionError) -> DeletionError {
        let mut error = error.clone();
        error.message = safe_truncate_ellipsis(&error.message, MAX_ERROR_MESSAGE_CHARS);
        error
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(AuditConfig::default())
    }
}
