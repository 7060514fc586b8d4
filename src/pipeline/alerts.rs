use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::core::alert::Alert;
use crate::core::event::{SecurityEvent, SecurityEventType};

/// Repeated (type, source_ip) conditions within this span do not spawn a
/// second alert.
pub fn dedup_window() -> Duration {
    Duration::minutes(5)
}

/// Threshold checks count events within this trailing span.
pub fn threshold_window() -> Duration {
    Duration::minutes(5)
}

/// Resolved alerts older than this are purged by the cleanup pass.
pub fn resolved_ttl() -> Duration {
    Duration::hours(24)
}

/// In-memory alert registry with dedup and TTL cleanup.
#[derive(Debug, Default)]
pub struct AlertBook {
    alerts: HashMap<String, Alert>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when an unresolved alert with the same (type, source_ip) pair
    /// was created within the dedup window.
    pub fn has_open_duplicate(
        &self,
        event_type: SecurityEventType,
        source_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let cutoff = now - dedup_window();
        self.alerts.values().any(|alert| {
            alert.is_open()
                && alert.event_type == event_type
                && alert.source_ip.as_deref() == source_ip
                && alert.created_at >= cutoff
        })
    }

    pub fn insert(&mut self, alert: Alert) {
        self.alerts.insert(alert.id.clone(), alert);
    }

    /// Resolve by id. Returns None for an unknown id, Some(false) when the
    /// alert was already resolved (nothing changed), Some(true) otherwise.
    pub fn resolve(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
        resolved_by: &str,
        notes: &str,
    ) -> Option<bool> {
        self.alerts
            .get_mut(id)
            .map(|alert| alert.resolve(now, resolved_by, notes))
    }

    pub fn get(&self, id: &str) -> Option<&Alert> {
        self.alerts.get(id)
    }

    pub fn record_notified(&mut self, id: &str, target: &str) {
        if let Some(alert) = self.alerts.get_mut(id) {
            alert.notified_targets.insert(target.to_string());
        }
    }

    /// Unresolved alerts, newest first.
    pub fn open_alerts(&self) -> Vec<Alert> {
        let mut open: Vec<Alert> = self
            .alerts
            .values()
            .filter(|a| a.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        open
    }

    pub fn open_count(&self) -> usize {
        self.alerts.values().filter(|a| a.is_open()).count()
    }

    /// Drop alerts resolved longer than the TTL ago. Open alerts are kept
    /// regardless of age.
    pub fn purge_resolved(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - resolved_ttl();
        let before = self.alerts.len();
        self.alerts.retain(|_, alert| match alert.resolution_time {
            Some(resolved_at) if alert.resolved => resolved_at >= cutoff,
            _ => true,
        });
        before - self.alerts.len()
    }
}

/// A threshold breach found by the periodic check.
#[derive(Debug, Clone)]
pub struct ThresholdBreach {
    pub event_type: SecurityEventType,
    pub count: u64,
    pub threshold: u32,
}

/// Count events per type within the trailing window and report every
/// configured threshold that is met or exceeded.
pub fn check_thresholds(
    buffer: &VecDeque<SecurityEvent>,
    thresholds: &BTreeMap<SecurityEventType, u32>,
    now: DateTime<Utc>,
) -> Vec<ThresholdBreach> {
    let cutoff = now - threshold_window();
    let mut counts: BTreeMap<SecurityEventType, u64> = BTreeMap::new();
    for event in buffer {
        if event.timestamp >= cutoff {
            *counts.entry(event.event_type).or_insert(0) += 1;
        }
    }

    let mut breaches = Vec::new();
    for (event_type, threshold) in thresholds {
        let count = counts.get(event_type).copied().unwrap_or(0);
        if *threshold > 0 && count >= u64::from(*threshold) {
            breaches.push(ThresholdBreach {
                event_type: *event_type,
                count,
                threshold: *threshold,
            });
        }
    }
    breaches
}
