use regex::Regex;

use crate::core::error::MonitorError;
use crate::core::event::{SecurityEvent, SecurityEventType};

/// Signature categories scanned against string metadata values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackCategory {
    SqlInjection,
    Xss,
    PathTraversal,
    CommandInjection,
}

impl AttackCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackCategory::SqlInjection => "sql_injection",
            AttackCategory::Xss => "xss",
            AttackCategory::PathTraversal => "path_traversal",
            AttackCategory::CommandInjection => "command_injection",
        }
    }

    /// Event type synthesized when a signature in this category fires.
    pub fn synthesized_event(&self) -> SecurityEventType {
        match self {
            AttackCategory::SqlInjection => SecurityEventType::SqlInjectionAttempt,
            AttackCategory::Xss => SecurityEventType::XssAttempt,
            AttackCategory::PathTraversal | AttackCategory::CommandInjection => {
                SecurityEventType::UnauthorizedAccess
            }
        }
    }
}

/// One signature hit: which category fired, on which metadata field.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub category: AttackCategory,
    pub pattern: String,
    pub key: String,
    pub value: String,
}

struct CategoryPatterns {
    category: AttackCategory,
    patterns: Vec<(String, Regex)>,
}

/// Compiled signature tables. Patterns are compiled once at construction;
/// scanning is allocation-light and infallible.
pub struct AttackPatternMatcher {
    categories: Vec<CategoryPatterns>,
}

impl AttackPatternMatcher {
    /// Build the matcher with the built-in signature corpus.
    pub fn new() -> Result<Self, MonitorError> {
        Self::from_sets(default_pattern_sets())
    }

    /// Build the matcher from an externally supplied corpus.
    pub fn from_sets(
        sets: Vec<(AttackCategory, Vec<&'static str>)>,
    ) -> Result<Self, MonitorError> {
        let mut categories = Vec::with_capacity(sets.len());
        for (category, raw) in sets {
            let mut patterns = Vec::with_capacity(raw.len());
            for src in raw {
                let compiled = Regex::new(&format!("(?i){}", src))?;
                patterns.push((src.to_string(), compiled));
            }
            categories.push(CategoryPatterns { category, patterns });
        }
        Ok(Self { categories })
    }

    /// Scan every string metadata value of a non-synthetic event. Within a
    /// category the first matching pattern per value wins; distinct
    /// categories and distinct values report independently. Synthetic
    /// events are never scanned, which bounds the feedback recursion.
    pub fn scan(&self, event: &SecurityEvent) -> Vec<PatternMatch> {
        if event.is_synthetic {
            return Vec::new();
        }
        let mut hits = Vec::new();
        for (key, value) in &event.metadata {
            for cat in &self.categories {
                for (src, regex) in &cat.patterns {
                    if regex.is_match(value) {
                        hits.push(PatternMatch {
                            category: cat.category,
                            pattern: src.clone(),
                            key: key.clone(),
                            value: value.clone(),
                        });
                        break;
                    }
                }
            }
        }
        hits
    }
}

fn default_pattern_sets() -> Vec<(AttackCategory, Vec<&'static str>)> {
    vec![
        (
            AttackCategory::SqlInjection,
            vec![
                r"(\b(union|select|insert|update|delete|drop|create)\b.*\b(from|where|table)\b)",
                r#"(;|'|"|--).*?(select|union|insert|update|delete|drop)"#,
                r"(\b(or|and)\b\s*\d+\s*=\s*\d+)",
            ],
        ),
        (
            AttackCategory::Xss,
            vec![
                r"<script[^>]*>.*?</script>",
                r"javascript:",
                r"on\w+\s*=",
                r"<iframe[^>]*>",
            ],
        ),
        (
            AttackCategory::PathTraversal,
            vec![r"\.\./", r"\.\\/", r"%2e%2e/", r"%252e%252e/"],
        ),
        (
            AttackCategory::CommandInjection,
            vec![
                r";\s*(ls|cat|rm|wget|curl|nc|netcat)",
                r"\|\s*(ls|cat|rm|wget|curl|nc|netcat)",
                r"`.*`",
                r"\$\(.*\)",
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Severity;
    use crate::core::time::now_utc;
    use std::collections::BTreeMap;

    fn event_with_metadata(metadata: BTreeMap<String, String>, synthetic: bool) -> SecurityEvent {
        SecurityEvent {
            id: "evt_test".to_string(),
            event_type: SecurityEventType::LoginFailed,
            severity: Severity::Low,
            timestamp: now_utc(),
            source_ip: Some("10.0.0.1".to_string()),
            user_id: None,
            user_agent: None,
            metadata,
            is_synthetic: synthetic,
        }
    }

    #[test]
    fn classic_sqli_matches_once() {
        let matcher = AttackPatternMatcher::new().unwrap();
        let meta = BTreeMap::from([("q".to_string(), "' OR 1=1--".to_string())]);
        let hits = matcher.scan(&event_with_metadata(meta, false));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category, AttackCategory::SqlInjection);
        assert_eq!(hits[0].key, "q");
    }

    #[test]
    fn synthetic_events_are_skipped() {
        let matcher = AttackPatternMatcher::new().unwrap();
        let meta = BTreeMap::from([("q".to_string(), "' OR 1=1--".to_string())]);
        assert!(matcher.scan(&event_with_metadata(meta, true)).is_empty());
    }

    #[test]
    fn xss_and_traversal_report_independently() {
        let matcher = AttackPatternMatcher::new().unwrap();
        let meta = BTreeMap::from([
            ("comment".to_string(), "<script>alert(1)</script>".to_string()),
            ("path".to_string(), "../../etc/passwd".to_string()),
        ]);
        let hits = matcher.scan(&event_with_metadata(meta, false));
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().any(|h| h.category == AttackCategory::Xss));
        assert!(hits
            .iter()
            .any(|h| h.category == AttackCategory::PathTraversal));
    }

    #[test]
    fn first_pattern_in_category_wins() {
        let matcher = AttackPatternMatcher::new().unwrap();
        // matches both the union/select pattern and the quote pattern;
        // only one sql_injection hit must be reported for the value
        let meta = BTreeMap::from([(
            "q".to_string(),
            "'; select password from users".to_string(),
        )]);
        let hits = matcher.scan(&event_with_metadata(meta, false));
        let sqli: Vec<_> = hits
            .iter()
            .filter(|h| h.category == AttackCategory::SqlInjection)
            .collect();
        assert_eq!(sqli.len(), 1);
    }

    #[test]
    fn command_injection_maps_to_unauthorized_access() {
        assert_eq!(
            AttackCategory::CommandInjection.synthesized_event(),
            SecurityEventType::UnauthorizedAccess
        );
        let matcher = AttackPatternMatcher::new().unwrap();
        let meta = BTreeMap::from([("arg".to_string(), "x; cat /etc/shadow".to_string())]);
        let hits = matcher.scan(&event_with_metadata(meta, false));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category, AttackCategory::CommandInjection);
    }

    #[test]
    fn benign_metadata_is_clean() {
        let matcher = AttackPatternMatcher::new().unwrap();
        let meta = BTreeMap::from([("q".to_string(), "hello world".to_string())]);
        assert!(matcher.scan(&event_with_metadata(meta, false)).is_empty());
    }
}
