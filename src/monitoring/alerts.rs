use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{Alert, AlertType, Breach};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaiseOutcome {
    Created,
    Escalated,
    Refreshed,
}


/// At most one unresolved alert per type. Repeat breaches refresh the open
/// alert instead of stacking new ones.
#[derive(Default)]
pub struct AlertStore {
    alerts: RwLock<Vec<Alert>>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn raise(&self, breach: &Breach) -> (Alert, RaiseOutcome) {
        let now = Utc::now();
        let mut alerts = self.alerts.write();

        if let Some(open) = alerts
            .iter_mut()
            .find(|a| a.alert_type == breach.alert_type && a.is_active())
        {
            let outcome = if breach.severity > open.severity {
                RaiseOutcome::Escalated
            } else {
                RaiseOutcome::Refreshed
            };
            open.severity = breach.severity;
            open.title = breach.title.clone();
            open.message = breach.message.clone();
            open.last_seen_at = now;
            open.occurrences = open.occurrences.saturating_add(1);
            debug!("Alert {} refreshed ({} occurrences)", open.alert_type, open.occurrences);
            return (open.clone(), outcome);
        }

        let alert = Alert::new(breach.alert_type, breach.severity, &breach.title, &breach.message);
        info!("Alert raised: [{}] {} - {}", alert.severity, alert.title, alert.message);
        alerts.push(alert.clone());
        (alert, RaiseOutcome::Created)
    }


    /// Resolves the open alert of `alert_type`, if any.
    pub fn resolve_type(&self, alert_type: AlertType) -> Option<Alert> {
        let mut alerts = self.alerts.write();
        let open = alerts.iter_mut().find(|a| a.alert_type == alert_type && a.is_active())?;
        open.resolved_at = Some(Utc::now());
        info!("Alert auto-resolved: {}", open.alert_type);
        Some(open.clone())
    }


    pub fn acknowledge(&self, id: Uuid) -> bool {
        let mut alerts = self.alerts.write();
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) if !alert.acknowledged => {
                alert.acknowledged = true;
                alert.acknowledged_at = Some(Utc::now());
                info!("Alert {} acknowledged", id);
                true
            }
            _ => false,
        }
    }


    pub fn resolve(&self, id: Uuid) -> Option<Alert> {
        let mut alerts = self.alerts.write();
        let alert = alerts.iter_mut().find(|a| a.id == id && a.is_active())?;
        alert.resolved_at = Some(Utc::now());
        info!("Alert {} resolved", id);
        Some(alert.clone())
    }


    /// Unresolved alerts, most severe first.
    pub fn active(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self.alerts.read().iter().filter(|a| a.is_active()).cloned().collect();
        active.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.timestamp.cmp(&b.timestamp)));
        active
    }


    pub fn all(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }


    /// Drops resolved alerts resolved before `cutoff`.
    pub fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut alerts = self.alerts.write();
        let before = alerts.len();
        alerts.retain(|a| a.resolved_at.is_none_or(|at| at >= cutoff));
        let removed = before - alerts.len();
        if removed > 0 {
            info!("Purged {} resolved alerts", removed);
        }
        removed
    }
}
