use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::event::{SecurityEventType, Severity};

/// Discrete system-wide threat classification, recomputed each aggregation
/// cycle from the rolling-hour weighted score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Normal,
    Elevated,
    High,
    Severe,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Normal => "normal",
            ThreatLevel::Elevated => "elevated",
            ThreatLevel::High => "high",
            ThreatLevel::Severe => "severe",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raised alert. Lifecycle is created -> resolved, nothing in between;
/// resolved alerts are purged after 24 hours by the cleanup pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub source_ip: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolution_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notified_targets: BTreeSet<String>,
}

impl Alert {
    /// Mark the alert resolved. Idempotent: a second call leaves the
    /// resolution time and metadata untouched and returns false.
    pub fn resolve(&mut self, now: DateTime<Utc>, resolved_by: &str, notes: &str) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.resolution_time = Some(now);
        self.metadata
            .insert("resolved_by".to_string(), resolved_by.to_string());
        if !notes.is_empty() {
            self.metadata
                .insert("resolution_notes".to_string(), notes.to_string());
        }
        true
    }

    pub fn is_open(&self) -> bool {
        !self.resolved
    }
}
