use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redwatch::core::alert::{Alert, ThreatLevel};
use redwatch::core::error::MonitorError;
use redwatch::core::event::SecurityEventType;
use redwatch::notify::{NotificationDispatcher, SessionStore};
use redwatch::{MonitorConfig, SecurityMonitor, Severity};
use tokio::sync::mpsc;

struct RecordingDispatcher {
    tx: mpsc::UnboundedSender<Alert>,
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    fn target(&self) -> &str {
        "test"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), MonitorError> {
        let _ = self.tx.send(alert.clone());
        Ok(())
    }
}

struct RecordingSessions {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl SessionStore for RecordingSessions {
    async fn invalidate_sessions(&self, user_id: &str) -> Result<usize, MonitorError> {
        let _ = self.tx.send(user_id.to_string());
        Ok(3)
    }
}

fn monitor_with_channel() -> (SecurityMonitor, mpsc::UnboundedReceiver<Alert>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let monitor = SecurityMonitor::builder(MonitorConfig::default())
        .dispatcher(Arc::new(RecordingDispatcher { tx }))
        .build()
        .unwrap();
    (monitor, rx)
}

#[tokio::test]
async fn reputation_is_clamped_and_blocking_is_immediate() {
    let monitor = SecurityMonitor::new(MonitorConfig::default()).unwrap();

    // successful logins cannot push reputation above 100
    monitor.log_event(SecurityEventType::LoginSuccess, None, Some("1.1.1.1"), None, None);
    assert_eq!(monitor.ip_reputation("1.1.1.1"), 100.0);

    // two sql injections: 100 -> 50 -> 0; block happens on the crossing,
    // visibly before log_event returns
    monitor.log_event(
        SecurityEventType::SqlInjectionAttempt,
        None,
        Some("2.2.2.2"),
        None,
        None,
    );
    assert_eq!(monitor.ip_reputation("2.2.2.2"), 50.0);
    assert!(!monitor.is_ip_blocked("2.2.2.2"));

    monitor.log_event(
        SecurityEventType::SqlInjectionAttempt,
        None,
        Some("2.2.2.2"),
        None,
        None,
    );
    assert_eq!(monitor.ip_reputation("2.2.2.2"), 0.0);
    assert!(monitor.is_ip_blocked("2.2.2.2"));

    // the floor is zero even for repeated catastrophic deltas
    monitor.log_event(
        SecurityEventType::DataBreachAttempt,
        None,
        Some("2.2.2.2"),
        None,
        None,
    );
    assert_eq!(monitor.ip_reputation("2.2.2.2"), 0.0);
}

#[tokio::test]
async fn unblock_resets_to_neutral() {
    let monitor = SecurityMonitor::new(MonitorConfig::default()).unwrap();
    monitor.log_event(
        SecurityEventType::DataBreachAttempt,
        None,
        Some("4.4.4.4"),
        None,
        None,
    );
    assert!(monitor.is_ip_blocked("4.4.4.4"));

    assert!(monitor.unblock_ip("4.4.4.4", "analyst"));
    assert!(!monitor.is_ip_blocked("4.4.4.4"));
    assert_eq!(monitor.ip_reputation("4.4.4.4"), 50.0);

    // second call is a no-op
    assert!(!monitor.unblock_ip("4.4.4.4", "analyst"));

    // the audit event carries no source ip, so no reputation feedback
    let audit: Vec<_> = monitor
        .recent_events(50)
        .into_iter()
        .filter(|e| e.event_type == SecurityEventType::AccountUnlocked)
        .collect();
    assert_eq!(audit.len(), 1);
    assert!(audit[0].source_ip.is_none());
    assert_eq!(
        audit[0].metadata.get("unblocked_by").map(String::as_str),
        Some("analyst")
    );
}

#[tokio::test]
async fn threshold_alert_fires_once_within_dedup_window() {
    let (monitor, _rx) = monitor_with_channel();
    for _ in 0..5 {
        monitor.log_event(
            SecurityEventType::LoginFailed,
            Some("alice"),
            Some("9.9.9.9"),
            None,
            None,
        );
    }
    monitor.run_cycle().unwrap();

    let threshold_alerts = |alerts: &[Alert]| {
        alerts
            .iter()
            .filter(|a| a.event_type == SecurityEventType::LoginFailed)
            .count()
    };
    assert_eq!(threshold_alerts(&monitor.open_alerts()), 1);

    // one more failed login keeps the window breached, but the open alert
    // suppresses a duplicate
    monitor.log_event(
        SecurityEventType::LoginFailed,
        Some("alice"),
        Some("9.9.9.9"),
        None,
        None,
    );
    monitor.run_cycle().unwrap();
    assert_eq!(threshold_alerts(&monitor.open_alerts()), 1);
}

#[tokio::test]
async fn attack_pattern_synthesizes_one_event() {
    let monitor = SecurityMonitor::new(MonitorConfig::default()).unwrap();
    let metadata = BTreeMap::from([("q".to_string(), "' OR 1=1--".to_string())]);
    monitor.log_event(
        SecurityEventType::LoginFailed,
        Some("mallory"),
        Some("5.5.5.5"),
        None,
        Some(metadata),
    );

    let events = monitor.recent_events(50);
    let synthetic: Vec<_> = events.iter().filter(|e| e.is_synthetic).collect();
    assert_eq!(synthetic.len(), 1);
    assert_eq!(
        synthetic[0].event_type,
        SecurityEventType::SqlInjectionAttempt
    );
    assert_eq!(synthetic[0].source_ip.as_deref(), Some("5.5.5.5"));
    assert_eq!(
        synthetic[0].metadata.get("original_event").map(String::as_str),
        Some("login_failed")
    );

    // failed login (-5) plus derived injection (-50)
    assert_eq!(monitor.ip_reputation("5.5.5.5"), 45.0);
}

#[tokio::test]
async fn threat_level_transitions_raise_exactly_one_alert_each() {
    let (monitor, _rx) = monitor_with_channel();

    // 3 medium events: weighted score 15 -> elevated
    for _ in 0..3 {
        monitor.log_event(SecurityEventType::PermissionDenied, None, None, None, None);
    }
    monitor.run_cycle().unwrap();
    assert_eq!(monitor.threat_level(), ThreatLevel::Elevated);

    // 9 more: score 60 -> high
    for _ in 0..9 {
        monitor.log_event(SecurityEventType::PermissionDenied, None, None, None, None);
    }
    monitor.run_cycle().unwrap();
    assert_eq!(monitor.threat_level(), ThreatLevel::High);

    // a steady score produces no further transition alerts
    monitor.run_cycle().unwrap();

    let transitions: Vec<_> = monitor
        .open_alerts()
        .into_iter()
        .filter(|a| a.title.starts_with("Threat level changed"))
        .collect();
    assert_eq!(transitions.len(), 2);
    let mut old_levels: Vec<_> = transitions
        .iter()
        .filter_map(|a| a.metadata.get("old_level").cloned())
        .collect();
    old_levels.sort();
    assert_eq!(old_levels, vec!["elevated".to_string(), "normal".to_string()]);
}

#[tokio::test]
async fn resolve_alert_is_idempotent_through_the_api() {
    let monitor = SecurityMonitor::new(MonitorConfig::default()).unwrap();
    monitor.log_event(
        SecurityEventType::BruteForceAttempt,
        Some("bob"),
        Some("3.3.3.3"),
        None,
        None,
    );
    let open = monitor.open_alerts();
    assert!(!open.is_empty());
    let id = open[0].id.clone();

    assert!(monitor.resolve_alert(&id, "analyst", "false positive"));
    assert!(!monitor.resolve_alert(&id, "analyst", "again"));
    assert!(!monitor.resolve_alert("alert_missing", "analyst", ""));

    let resolved = monitor.alert(&id).unwrap();
    assert!(resolved.resolved);
    assert_eq!(
        resolved.metadata.get("resolved_by").map(String::as_str),
        Some("analyst")
    );
}

#[tokio::test]
async fn brute_force_end_to_end() {
    let (monitor, mut rx) = monitor_with_channel();
    monitor.log_event(
        SecurityEventType::BruteForceAttempt,
        Some("bob"),
        Some("1.2.3.4"),
        None,
        None,
    );

    // reputation drops to 50; a single attempt does not block
    assert_eq!(monitor.ip_reputation("1.2.3.4"), 50.0);
    assert!(!monitor.is_ip_blocked("1.2.3.4"));

    // exactly one critical alert, raised inline
    let open = monitor.open_alerts();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].severity, Severity::Critical);
    assert_eq!(open[0].source_ip.as_deref(), Some("1.2.3.4"));

    // notification arrives asynchronously
    let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("notification not delivered")
        .expect("dispatcher channel closed");
    assert_eq!(delivered.id, open[0].id);

    // the notified target is recorded once the dispatcher returns
    tokio::time::sleep(Duration::from_millis(50)).await;
    let alert = monitor.alert(&open[0].id).unwrap();
    assert!(alert.notified_targets.contains("test"));
}

#[tokio::test]
async fn session_hijack_invalidates_user_sessions() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let monitor = SecurityMonitor::builder(MonitorConfig::default())
        .session_store(Arc::new(RecordingSessions { tx }))
        .build()
        .unwrap();

    monitor.log_event(
        SecurityEventType::SessionHijackAttempt,
        Some("eve"),
        Some("8.8.4.4"),
        None,
        None,
    );

    // invalidation runs on a detached task; wait for the store call
    let user = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("session invalidation not requested")
        .expect("session store channel closed");
    assert_eq!(user, "eve");

    // the hijack itself raised an immediate critical alert for the user
    let open = monitor.open_alerts();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].severity, Severity::Critical);
    assert_eq!(open[0].user_id.as_deref(), Some("eve"));
}

#[tokio::test]
async fn buffer_eviction_keeps_cumulative_counters() {
    let cfg = MonitorConfig {
        buffer_capacity: 3,
        ..MonitorConfig::default()
    };
    let monitor = SecurityMonitor::new(cfg).unwrap();
    for i in 0..5 {
        monitor.log_event(
            SecurityEventType::LoginSuccess,
            Some(&format!("user{i}")),
            None,
            None,
            None,
        );
    }
    assert_eq!(monitor.recent_events(10).len(), 3);
    // the oldest two were evicted
    assert_eq!(
        monitor.recent_events(10)[0].user_id.as_deref(),
        Some("user2")
    );

    monitor.run_cycle().unwrap();
    let dashboard = monitor.dashboard();
    assert_eq!(dashboard.snapshot.total_events, 5);
    assert_eq!(dashboard.snapshot.successful_logins, 5);
    assert_eq!(dashboard.snapshot.events_last_hour, 3);
}

#[tokio::test]
async fn events_for_user_filters_and_orders() {
    let monitor = SecurityMonitor::new(MonitorConfig::default()).unwrap();
    monitor.log_event(SecurityEventType::LoginSuccess, Some("carol"), None, None, None);
    monitor.log_event(SecurityEventType::LoginFailed, Some("dave"), None, None, None);
    monitor.log_event(SecurityEventType::DataExport, Some("carol"), None, None, None);

    let events = monitor.events_for_user("carol", 10);
    assert_eq!(events.len(), 2);
    // newest first
    assert_eq!(events[0].event_type, SecurityEventType::DataExport);
    assert_eq!(events[1].event_type, SecurityEventType::LoginSuccess);

    assert_eq!(monitor.events_for_user("carol", 1).len(), 1);
    assert!(monitor.events_for_user("nobody", 10).is_empty());
}

#[tokio::test]
async fn start_twice_is_rejected_and_stop_is_clean() {
    let monitor = SecurityMonitor::new(MonitorConfig::default()).unwrap();
    monitor.start().unwrap();
    assert!(matches!(
        monitor.start(),
        Err(MonitorError::AlreadyRunning)
    ));
    monitor.stop().await;
    // restart after a clean stop works
    monitor.start().unwrap();
    monitor.stop().await;
}
