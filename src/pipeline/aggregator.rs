use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::alert::ThreatLevel;
use crate::core::event::{SecurityEvent, SecurityEventType, Severity};
use crate::pipeline::reputation::ReputationTable;
use crate::pipeline::threat;

/// Cumulative counters maintained at ingestion time. These survive buffer
/// eviction, unlike the windowed tallies which rescan the live buffer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    pub total_events: u64,
    pub failed_logins: u64,
    pub successful_logins: u64,
    pub rate_limit_violations: u64,
    pub suspicious_activities: u64,
    pub last_critical_event: Option<DateTime<Utc>>,
}

impl Counters {
    pub fn record(&mut self, event: &SecurityEvent) {
        self.total_events += 1;
        match event.event_type {
            SecurityEventType::LoginFailed => self.failed_logins += 1,
            SecurityEventType::LoginSuccess => self.successful_logins += 1,
            SecurityEventType::RateLimitExceeded => self.rate_limit_violations += 1,
            SecurityEventType::SuspiciousActivity => self.suspicious_activities += 1,
            _ => {}
        }
        if event.severity == Severity::Critical {
            self.last_critical_event = Some(event.timestamp);
        }
    }
}

/// One entry of the top-threat-source ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatSource {
    pub ip: String,
    pub count: u64,
    pub reputation: f64,
}

/// Read-only aggregate over the live buffer, recomputed each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub total_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub events_by_severity: BTreeMap<String, u64>,
    pub events_last_hour: u64,
    pub events_last_24h: u64,
    /// Severity-weighted score over the rolling last hour; input to the
    /// threat-level evaluator.
    pub threat_score: u64,
    pub failed_logins: u64,
    pub successful_logins: u64,
    pub rate_limit_violations: u64,
    pub suspicious_activities: u64,
    pub blocked_ips: u64,
    pub tracked_ips: u64,
    pub open_alerts: u64,
    pub current_threat_level: ThreatLevel,
    pub last_critical_event: Option<DateTime<Utc>>,
    pub top_threat_sources: Vec<ThreatSource>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            generated_at: crate::core::time::now_utc(),
            total_events: 0,
            events_by_type: BTreeMap::new(),
            events_by_severity: BTreeMap::new(),
            events_last_hour: 0,
            events_last_24h: 0,
            threat_score: 0,
            failed_logins: 0,
            successful_logins: 0,
            rate_limit_violations: 0,
            suspicious_activities: 0,
            blocked_ips: 0,
            tracked_ips: 0,
            open_alerts: 0,
            current_threat_level: ThreatLevel::Normal,
            last_critical_event: None,
            top_threat_sources: Vec::new(),
        }
    }
}

/// Scan the live buffer and produce a snapshot. O(buffer) per call; the
/// buffer is capacity-bounded, so a cycle is bounded work.
pub fn build_snapshot(
    buffer: &VecDeque<SecurityEvent>,
    reputation: &ReputationTable,
    counters: &Counters,
    threat_level: ThreatLevel,
    open_alerts: usize,
    top_n: usize,
    now: DateTime<Utc>,
) -> MetricsSnapshot {
    let hour_ago = now - Duration::hours(1);
    let day_ago = now - Duration::hours(24);

    let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_severity: BTreeMap<String, u64> = BTreeMap::new();
    let mut last_hour = 0u64;
    let mut last_24h = 0u64;
    let mut threat_score = 0u64;
    let mut by_threat_ip: BTreeMap<String, u64> = BTreeMap::new();

    for event in buffer {
        *by_type.entry(event.event_type.as_str().to_string()).or_insert(0) += 1;
        *by_severity
            .entry(event.severity.as_str().to_string())
            .or_insert(0) += 1;
        if event.timestamp >= hour_ago {
            last_hour += 1;
            threat_score += threat::severity_weight(event.severity);
        }
        if event.timestamp >= day_ago {
            last_24h += 1;
        }
        if event.severity >= Severity::High {
            if let Some(ip) = &event.source_ip {
                *by_threat_ip.entry(ip.clone()).or_insert(0) += 1;
            }
        }
    }

    let mut ranked: Vec<(String, u64)> = by_threat_ip.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let top_threat_sources = ranked
        .into_iter()
        .take(top_n)
        .map(|(ip, count)| ThreatSource {
            reputation: reputation.score(&ip),
            ip,
            count,
        })
        .collect();

    MetricsSnapshot {
        generated_at: now,
        total_events: counters.total_events,
        events_by_type: by_type,
        events_by_severity: by_severity,
        events_last_hour: last_hour,
        events_last_24h: last_24h,
        threat_score,
        failed_logins: counters.failed_logins,
        successful_logins: counters.successful_logins,
        rate_limit_violations: counters.rate_limit_violations,
        suspicious_activities: counters.suspicious_activities,
        blocked_ips: reputation.blocked_count() as u64,
        tracked_ips: reputation.tracked_count() as u64,
        open_alerts: open_alerts as u64,
        current_threat_level: threat_level,
        last_critical_event: counters.last_critical_event,
        top_threat_sources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::now_utc;
    use std::collections::BTreeMap as Meta;

    fn event(
        event_type: SecurityEventType,
        severity: Severity,
        ip: Option<&str>,
        age: Duration,
    ) -> SecurityEvent {
        SecurityEvent {
            id: "evt_test".to_string(),
            event_type,
            severity,
            timestamp: now_utc() - age,
            source_ip: ip.map(str::to_string),
            user_id: None,
            user_agent: None,
            metadata: Meta::new(),
            is_synthetic: false,
        }
    }

    #[test]
    fn windows_and_rankings() {
        let now = now_utc();
        let mut buffer = VecDeque::new();
        buffer.push_back(event(
            SecurityEventType::LoginFailed,
            Severity::Low,
            Some("9.9.9.9"),
            Duration::minutes(5),
        ));
        buffer.push_back(event(
            SecurityEventType::BruteForceAttempt,
            Severity::Critical,
            Some("9.9.9.9"),
            Duration::minutes(10),
        ));
        buffer.push_back(event(
            SecurityEventType::XssAttempt,
            Severity::High,
            Some("8.8.8.8"),
            Duration::hours(3),
        ));

        let mut reputation = ReputationTable::new();
        reputation.apply("9.9.9.9", -50.0, now);

        let mut counters = Counters::default();
        for e in &buffer {
            counters.record(e);
        }

        let snap = build_snapshot(
            &buffer,
            &reputation,
            &counters,
            ThreatLevel::Normal,
            0,
            10,
            now,
        );

        assert_eq!(snap.total_events, 3);
        assert_eq!(snap.events_last_hour, 2);
        // low (1) + critical (50) inside the hour; the old xss event not
        assert_eq!(snap.threat_score, 51);
        assert_eq!(snap.events_last_24h, 3);
        assert_eq!(snap.events_by_type.get("login_failed").copied(), Some(1));
        assert_eq!(snap.events_by_severity.get("critical").copied(), Some(1));
        assert_eq!(snap.failed_logins, 1);
        assert!(snap.last_critical_event.is_some());

        // both IPs carried High/Critical events; 9.9.9.9 only once in the
        // High+ tally, so ordering falls back to the ip tie-break
        assert_eq!(snap.top_threat_sources.len(), 2);
        assert_eq!(snap.top_threat_sources[0].count, 1);
        assert_eq!(snap.top_threat_sources[0].ip, "8.8.8.8");
        let nine = snap
            .top_threat_sources
            .iter()
            .find(|s| s.ip == "9.9.9.9")
            .unwrap();
        assert_eq!(nine.reputation, 50.0);
    }

    #[test]
    fn top_n_is_honored() {
        let now = now_utc();
        let mut buffer = VecDeque::new();
        for i in 0..5 {
            buffer.push_back(event(
                SecurityEventType::XssAttempt,
                Severity::High,
                Some(&format!("10.0.0.{i}")),
                Duration::minutes(1),
            ));
        }
        let snap = build_snapshot(
            &buffer,
            &ReputationTable::new(),
            &Counters::default(),
            ThreatLevel::Normal,
            0,
            3,
            now,
        );
        assert_eq!(snap.top_threat_sources.len(), 3);
    }
}
