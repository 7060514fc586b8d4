use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::core::event::{SecurityEvent, SecurityEventType};

/// Events from a single IP within the sweep window beyond this count are
/// treated as rapid-fire probing.
const RAPID_FIRE_LIMIT: usize = 20;
/// The same matched pattern arriving from more than this many distinct IPs
/// within the window suggests a distributed attack.
const DISTRIBUTED_IP_LIMIT: usize = 5;

fn sweep_window() -> Duration {
    Duration::minutes(5)
}

/// A derived event the sweep wants ingested.
#[derive(Debug, Clone)]
pub struct AnomalyFinding {
    pub event_type: SecurityEventType,
    pub source_ip: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Scan the recent window for rapid-fire sources and distributed pattern
/// reuse. Findings feed back through ingestion as synthetic events.
pub fn sweep(buffer: &VecDeque<SecurityEvent>, now: DateTime<Utc>) -> Vec<AnomalyFinding> {
    let cutoff = now - sweep_window();
    let recent: Vec<&SecurityEvent> = buffer.iter().filter(|e| e.timestamp >= cutoff).collect();

    let mut findings = Vec::new();

    let mut per_ip: BTreeMap<&str, usize> = BTreeMap::new();
    for event in &recent {
        if let Some(ip) = event.source_ip.as_deref() {
            *per_ip.entry(ip).or_insert(0) += 1;
        }
    }
    for (ip, count) in per_ip {
        if count > RAPID_FIRE_LIMIT {
            findings.push(AnomalyFinding {
                event_type: SecurityEventType::SuspiciousActivity,
                source_ip: Some(ip.to_string()),
                metadata: BTreeMap::from([
                    ("reason".to_string(), "rapid_fire_events".to_string()),
                    ("count".to_string(), count.to_string()),
                ]),
            });
        }
    }

    let mut pattern_ips: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for event in &recent {
        if let Some(pattern) = event.metadata.get("pattern") {
            if let Some(ip) = event.source_ip.as_deref() {
                pattern_ips.entry(pattern).or_default().insert(ip);
            }
        }
    }
    for (pattern, ips) in pattern_ips {
        if ips.len() > DISTRIBUTED_IP_LIMIT {
            findings.push(AnomalyFinding {
                event_type: SecurityEventType::DdosAttempt,
                source_ip: None,
                metadata: BTreeMap::from([
                    ("reason".to_string(), "distributed_pattern".to_string()),
                    ("pattern".to_string(), pattern.to_string()),
                    ("ip_count".to_string(), ips.len().to_string()),
                ]),
            });
        }
    }

    findings
}
