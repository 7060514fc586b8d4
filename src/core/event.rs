use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Security-relevant event categories accepted from the host application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    LoginSuccess,
    LoginFailed,
    LoginSuspicious,
    PasswordReset,
    PasswordChanged,
    MfaEnabled,
    MfaDisabled,
    MfaFailed,
    ApiKeyCreated,
    ApiKeyRevoked,
    PermissionDenied,
    RateLimitExceeded,
    SuspiciousActivity,
    DataExport,
    AccountLocked,
    AccountUnlocked,
    SessionHijackAttempt,
    SqlInjectionAttempt,
    XssAttempt,
    CsrfAttempt,
    BruteForceAttempt,
    PrivilegeEscalation,
    UnauthorizedAccess,
    DataBreachAttempt,
    MalwareDetected,
    DdosAttempt,
    BotDetected,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::LoginSuccess => "login_success",
            SecurityEventType::LoginFailed => "login_failed",
            SecurityEventType::LoginSuspicious => "login_suspicious",
            SecurityEventType::PasswordReset => "password_reset",
            SecurityEventType::PasswordChanged => "password_changed",
            SecurityEventType::MfaEnabled => "mfa_enabled",
            SecurityEventType::MfaDisabled => "mfa_disabled",
            SecurityEventType::MfaFailed => "mfa_failed",
            SecurityEventType::ApiKeyCreated => "api_key_created",
            SecurityEventType::ApiKeyRevoked => "api_key_revoked",
            SecurityEventType::PermissionDenied => "permission_denied",
            SecurityEventType::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventType::SuspiciousActivity => "suspicious_activity",
            SecurityEventType::DataExport => "data_export",
            SecurityEventType::AccountLocked => "account_locked",
            SecurityEventType::AccountUnlocked => "account_unlocked",
            SecurityEventType::SessionHijackAttempt => "session_hijack_attempt",
            SecurityEventType::SqlInjectionAttempt => "sql_injection_attempt",
            SecurityEventType::XssAttempt => "xss_attempt",
            SecurityEventType::CsrfAttempt => "csrf_attempt",
            SecurityEventType::BruteForceAttempt => "brute_force_attempt",
            SecurityEventType::PrivilegeEscalation => "privilege_escalation",
            SecurityEventType::UnauthorizedAccess => "unauthorized_access",
            SecurityEventType::DataBreachAttempt => "data_breach_attempt",
            SecurityEventType::MalwareDetected => "malware_detected",
            SecurityEventType::DdosAttempt => "ddos_attempt",
            SecurityEventType::BotDetected => "bot_detected",
        }
    }
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity mapped for SOC consumption. Ordering matters: `High` and above
/// take the immediate alerting path at ingestion time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single timestamped security event. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub source_ip: Option<String>,
    pub user_id: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Set on events generated internally (pattern matcher, anomaly sweeps).
    /// The pattern matcher never rescans synthetic events.
    #[serde(default)]
    pub is_synthetic: bool,
}
