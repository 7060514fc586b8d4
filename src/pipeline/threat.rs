use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::core::alert::ThreatLevel;
use crate::core::event::{SecurityEvent, Severity};

pub fn severity_weight(severity: Severity) -> u64 {
    match severity {
        Severity::Info => 0,
        Severity::Low => 1,
        Severity::Medium => 5,
        Severity::High => 20,
        Severity::Critical => 50,
    }
}

/// Weighted score over events in the rolling last hour.
pub fn weighted_score(buffer: &VecDeque<SecurityEvent>, now: DateTime<Utc>) -> u64 {
    let hour_ago = now - Duration::hours(1);
    buffer
        .iter()
        .filter(|e| e.timestamp >= hour_ago)
        .map(|e| severity_weight(e.severity))
        .sum()
}

pub fn level_for_score(score: u64) -> ThreatLevel {
    if score < 10 {
        ThreatLevel::Normal
    } else if score < 50 {
        ThreatLevel::Elevated
    } else if score < 100 {
        ThreatLevel::High
    } else if score < 200 {
        ThreatLevel::Severe
    } else {
        ThreatLevel::Critical
    }
}

/// A threat-level change detected by one evaluation pass.
#[derive(Debug, Clone, Copy)]
pub struct ThreatTransition {
    pub from: ThreatLevel,
    pub to: ThreatLevel,
    pub score: u64,
}

/// Map the cycle's weighted score to a level and report a transition only
/// when it differs from the current one. The level can move several steps
/// in either direction within a single pass; there is no hysteresis.
pub fn step(current: ThreatLevel, score: u64) -> (ThreatLevel, Option<ThreatTransition>) {
    let next = level_for_score(score);
    if next == current {
        (next, None)
    } else {
        (
            next,
            Some(ThreatTransition {
                from: current,
                to: next,
                score,
            }),
        )
    }
}
