use std::collections::HashSet;

use super::models::{AuditAction, AuditLogEntry, DeletionMetrics, TimeRange};


/// Computed from scratch on every call; nothing is cached between windows.
pub fn calculate_metrics<'a>(
    entries: impl IntoIterator<Item = &'a AuditLogEntry>,
    range: TimeRange,
) -> DeletionMetrics {
    let window: Vec<&AuditLogEntry> = entries
        .into_iter()
        .filter(|e| range.contains(e.timestamp))
        .collect();

    let terminal: Vec<&AuditLogEntry> = window.iter().copied().filter(|e| e.action.is_terminal()).collect();
    let successful = terminal.iter().filter(|e| e.action == AuditAction::Success).count();
    let failed = terminal.len() - successful;

    let finished: HashSet<_> = terminal.iter().map(|e| e.event_id).collect();
    let in_progress = window
        .iter()
        .filter(|e| e.action == AuditAction::Initiated && !finished.contains(&e.event_id))
        .count();

    let mut durations: Vec<u64> = terminal.iter().filter_map(|e| e.duration_ms).collect();
    durations.sort_unstable();

    let average_duration_ms = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<u64>() as f64 / durations.len() as f64
    };

    let retried = terminal.iter().filter(|e| e.retry_count > 0).count();
    let invalidated = terminal
        .iter()
        .filter(|e| e.action == AuditAction::Success && e.cache_invalidated == Some(true))
        .count();

    DeletionMetrics {
        total: terminal.len(),
        successful,
        failed,
        in_progress,
        success_rate: ratio(successful, terminal.len()),
        error_rate: ratio(failed, terminal.len()),
        average_duration_ms,
        p50_duration_ms: percentile(&durations, 50.0),
        p95_duration_ms: percentile(&durations, 95.0),
        p99_duration_ms: percentile(&durations, 99.0),
        retry_rate: ratio(retried, terminal.len()),
        cache_invalidation_rate: ratio(invalidated, successful),
        window_start: range.start,
        window_end: range.end,
    }
}


pub fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}


/// Nearest-rank percentile over an ascending slice.
pub fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn entry(event_id: Uuid, action: AuditAction, duration_ms: Option<u64>, retry_count: u32) -> AuditLogEntry {
        AuditLogEntry {
            entry_id: Uuid::new_v4(),
            event_id,
            sequence: 0,
            post_id: "post".to_string(),
            action,
            timestamp: Utc::now(),
            actor: "tester".to_string(),
            title: None,
            slug: None,
            error: None,
            duration_ms,
            retry_count,
            cache_invalidated: (action == AuditAction::Success).then_some(true),
        }
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let data: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&data, 50.0), 50);
        assert_eq!(percentile(&data, 95.0), 95);
        assert_eq!(percentile(&data, 99.0), 99);
        assert_eq!(percentile(&[7], 99.0), 7);
        assert_eq!(percentile(&[], 50.0), 0);
    }

    #[test]
    fn test_metrics_from_entries() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let entries = vec![
            entry(a, AuditAction::Initiated, None, 0),
            entry(a, AuditAction::Success, Some(100), 0),
            entry(b, AuditAction::Initiated, None, 0),
            entry(b, AuditAction::Retried, None, 1),
            entry(b, AuditAction::Failed, Some(300), 1),
            entry(c, AuditAction::Initiated, None, 0),
        ];

        let metrics = calculate_metrics(&entries, TimeRange::last_hours(1));
        assert_eq!(metrics.total, 2);
        assert_eq!(metrics.successful, 1);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.in_progress, 1);
        assert!((metrics.error_rate - 0.5).abs() < f64::EPSILON);
        assert!((metrics.average_duration_ms - 200.0).abs() < f64::EPSILON);
        assert!((metrics.retry_rate - 0.5).abs() < f64::EPSILON);
        assert!((metrics.cache_invalidation_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_entries_outside_window_are_ignored() {
        let mut old = entry(Uuid::new_v4(), AuditAction::Failed, Some(10), 0);
        old.timestamp = Utc::now() - Duration::days(2);

        let metrics = calculate_metrics(&[old], TimeRange::last_hours(1));
        assert_eq!(metrics.total, 0);
        assert_eq!(metrics.error_rate, 0.0);
    }
}
