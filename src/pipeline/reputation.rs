use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reputation below this score moves the IP into the blocked set.
pub const BLOCK_THRESHOLD: f64 = 20.0;
/// Entries at or above this score are evicted during cleanup; a good
/// actor is cheap to re-derive on its next event.
pub const TRUSTED_FLOOR: f64 = 90.0;
/// Score assigned when an operator unblocks an IP.
pub const NEUTRAL_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpReputation {
    pub ip: String,
    pub score: f64,
    pub last_updated: DateTime<Utc>,
}

/// Outcome of applying one event's delta to an IP.
#[derive(Debug, Clone, Copy)]
pub struct ReputationOutcome {
    pub score: f64,
    /// True only on the call that moved the IP into the blocked set.
    pub newly_blocked: bool,
}

/// Decaying per-IP trust scores plus the derived blocked set.
/// Scores are clamped to [0, 100]; unseen IPs start at 100.
#[derive(Debug, Default)]
pub struct ReputationTable {
    entries: HashMap<String, IpReputation>,
    blocked: HashSet<String>,
}

impl ReputationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a signed delta to the IP, clamping to [0, 100]. Blocking
    /// happens here, before the ingestion call returns to the caller.
    pub fn apply(&mut self, ip: &str, delta: f64, now: DateTime<Utc>) -> ReputationOutcome {
        let entry = self
            .entries
            .entry(ip.to_string())
            .or_insert_with(|| IpReputation {
                ip: ip.to_string(),
                score: 100.0,
                last_updated: now,
            });
        entry.score = (entry.score + delta).clamp(0.0, 100.0);
        entry.last_updated = now;
        let score = entry.score;

        let mut newly_blocked = false;
        if score < BLOCK_THRESHOLD && !self.blocked.contains(ip) {
            self.blocked.insert(ip.to_string());
            newly_blocked = true;
        }
        ReputationOutcome {
            score,
            newly_blocked,
        }
    }

    pub fn score(&self, ip: &str) -> f64 {
        self.entries.get(ip).map(|e| e.score).unwrap_or(100.0)
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        self.blocked.contains(ip)
    }

    /// Remove the IP from the blocked set and reset it to a neutral score.
    pub fn unblock(&mut self, ip: &str, now: DateTime<Utc>) -> bool {
        let was_blocked = self.blocked.remove(ip);
        if was_blocked {
            self.entries.insert(
                ip.to_string(),
                IpReputation {
                    ip: ip.to_string(),
                    score: NEUTRAL_SCORE,
                    last_updated: now,
                },
            );
        }
        was_blocked
    }

    /// Evict up to `max` well-behaved entries to bound memory.
    pub fn evict_trusted(&mut self, max: usize) -> usize {
        let victims: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, rep)| rep.score >= TRUSTED_FLOOR)
            .map(|(ip, _)| ip.clone())
            .take(max)
            .collect();
        for ip in &victims {
            self.entries.remove(ip);
        }
        victims.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::now_utc;

    #[test]
    fn score_is_clamped_both_ways() {
        let mut table = ReputationTable::new();
        let now = now_utc();
        for _ in 0..10 {
            let out = table.apply("1.1.1.1", 1.0, now);
            assert!(out.score <= 100.0);
        }
        assert_eq!(table.score("1.1.1.1"), 100.0);

        let out = table.apply("1.1.1.1", -500.0, now);
        assert_eq!(out.score, 0.0);
    }

    #[test]
    fn blocking_fires_once_on_crossing() {
        let mut table = ReputationTable::new();
        let now = now_utc();
        let out = table.apply("2.2.2.2", -50.0, now);
        assert!(!out.newly_blocked);
        assert!(!table.is_blocked("2.2.2.2"));

        let out = table.apply("2.2.2.2", -50.0, now);
        assert!(out.newly_blocked);
        assert!(table.is_blocked("2.2.2.2"));

        // already blocked: no second block notification
        let out = table.apply("2.2.2.2", -50.0, now);
        assert!(!out.newly_blocked);
    }

    #[test]
    fn unblock_resets_to_neutral() {
        let mut table = ReputationTable::new();
        let now = now_utc();
        table.apply("3.3.3.3", -100.0, now);
        assert!(table.is_blocked("3.3.3.3"));

        assert!(table.unblock("3.3.3.3", now));
        assert!(!table.is_blocked("3.3.3.3"));
        assert_eq!(table.score("3.3.3.3"), NEUTRAL_SCORE);
        // second unblock is a no-op
        assert!(!table.unblock("3.3.3.3", now));
    }

    #[test]
    fn eviction_keeps_suspects() {
        let mut table = ReputationTable::new();
        let now = now_utc();
        table.apply("good.ip", 1.0, now);
        table.apply("bad.ip", -60.0, now);
        let evicted = table.evict_trusted(100);
        assert_eq!(evicted, 1);
        assert_eq!(table.tracked_count(), 1);
        assert_eq!(table.score("bad.ip"), 40.0);
        // evicted entry re-derives at the default
        assert_eq!(table.score("good.ip"), 100.0);
    }
}
