use std::collections::BTreeMap;
use std::{fs, path::Path};

use serde::Deserialize;

use crate::core::error::MonitorError;
use crate::core::event::{SecurityEventType, Severity};

/// Monitoring configuration. Every table can be overridden from TOML;
/// the defaults below are the documented baseline.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between aggregation cycles.
    #[serde(default = "default_interval_secs")]
    pub aggregation_interval_secs: u64,
    /// Capacity of the in-memory event buffer (drop-oldest).
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// How many raw events the dashboard exposes.
    #[serde(default = "default_recent_events")]
    pub dashboard_recent_events: usize,
    /// Top-N entries in the threat-source ranking.
    #[serde(default = "default_top_sources")]
    pub top_threat_sources: usize,
    /// Per-type counts within a 5-minute window that raise an alert.
    #[serde(default = "default_alert_thresholds")]
    pub alert_thresholds: BTreeMap<SecurityEventType, u32>,
    /// Per-type severity assignment; unmapped types default to Info.
    #[serde(default = "default_severity_map")]
    pub severity_map: BTreeMap<SecurityEventType, Severity>,
    /// Per-type signed reputation deltas; unmapped types apply 0.
    #[serde(default = "default_reputation_deltas")]
    pub reputation_deltas: BTreeMap<SecurityEventType, f64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            aggregation_interval_secs: default_interval_secs(),
            buffer_capacity: default_buffer_capacity(),
            dashboard_recent_events: default_recent_events(),
            top_threat_sources: default_top_sources(),
            alert_thresholds: default_alert_thresholds(),
            severity_map: default_severity_map(),
            reputation_deltas: default_reputation_deltas(),
        }
    }
}

impl MonitorConfig {
    pub fn severity_for(&self, event_type: SecurityEventType) -> Severity {
        self.severity_map
            .get(&event_type)
            .copied()
            .unwrap_or(Severity::Info)
    }

    pub fn reputation_delta_for(&self, event_type: SecurityEventType) -> f64 {
        self.reputation_deltas
            .get(&event_type)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Load configuration from a TOML file; a missing file yields the defaults.
pub fn load_config(path: Option<&str>) -> Result<MonitorConfig, MonitorError> {
    let default_path = Path::new("config/redwatch.toml");
    let path = path.map(Path::new).unwrap_or(default_path);

    if !path.exists() {
        return Ok(MonitorConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| MonitorError::Config(e.to_string()))?;
    let cfg: MonitorConfig = toml::from_str(&content)?;
    if cfg.buffer_capacity == 0 {
        return Err(MonitorError::Config(
            "buffer_capacity must be at least 1".into(),
        ));
    }
    Ok(cfg)
}

fn default_interval_secs() -> u64 {
    60
}

fn default_buffer_capacity() -> usize {
    10_000
}

fn default_recent_events() -> usize {
    20
}

fn default_top_sources() -> usize {
    10
}

fn default_alert_thresholds() -> BTreeMap<SecurityEventType, u32> {
    use SecurityEventType::*;
    BTreeMap::from([
        (LoginFailed, 5),
        (RateLimitExceeded, 10),
        (SuspiciousActivity, 3),
        (BruteForceAttempt, 1),
        (SqlInjectionAttempt, 1),
        (XssAttempt, 1),
        (DataBreachAttempt, 1),
    ])
}

fn default_severity_map() -> BTreeMap<SecurityEventType, Severity> {
    use SecurityEventType::*;
    BTreeMap::from([
        (LoginSuccess, Severity::Info),
        (LoginFailed, Severity::Low),
        (LoginSuspicious, Severity::Medium),
        (PasswordReset, Severity::Info),
        (PasswordChanged, Severity::Info),
        (MfaEnabled, Severity::Info),
        (MfaDisabled, Severity::Medium),
        (MfaFailed, Severity::Low),
        (ApiKeyCreated, Severity::Info),
        (ApiKeyRevoked, Severity::Info),
        (PermissionDenied, Severity::Medium),
        (RateLimitExceeded, Severity::Medium),
        (SuspiciousActivity, Severity::High),
        (DataExport, Severity::Medium),
        (AccountLocked, Severity::Medium),
        (AccountUnlocked, Severity::Info),
        (SessionHijackAttempt, Severity::Critical),
        (SqlInjectionAttempt, Severity::Critical),
        (XssAttempt, Severity::High),
        (CsrfAttempt, Severity::High),
        (BruteForceAttempt, Severity::Critical),
        (PrivilegeEscalation, Severity::Critical),
        (UnauthorizedAccess, Severity::High),
        (DataBreachAttempt, Severity::Critical),
        (MalwareDetected, Severity::Critical),
        (DdosAttempt, Severity::Critical),
        (BotDetected, Severity::Medium),
    ])
}

fn default_reputation_deltas() -> BTreeMap<SecurityEventType, f64> {
    use SecurityEventType::*;
    BTreeMap::from([
        (LoginSuccess, 1.0),
        (LoginFailed, -5.0),
        (LoginSuspicious, -10.0),
        (RateLimitExceeded, -10.0),
        (SuspiciousActivity, -20.0),
        (SqlInjectionAttempt, -50.0),
        (XssAttempt, -40.0),
        (BruteForceAttempt, -50.0),
        (DataBreachAttempt, -100.0),
        (DdosAttempt, -100.0),
    ])
}
