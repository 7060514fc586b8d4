use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::MonitorConfig;
use crate::core::alert::{Alert, ThreatLevel};
use crate::core::error::MonitorError;
use crate::core::event::{SecurityEvent, SecurityEventType, Severity};
use crate::core::hash::prefixed_id;
use crate::core::time::now_utc;
use crate::notify::{EventSink, NotificationDispatcher, SessionStore, TracingDispatcher};
use crate::pipeline::aggregator::{self, Counters, MetricsSnapshot};
use crate::pipeline::alerts::{self, AlertBook};
use crate::pipeline::anomaly;
use crate::pipeline::patterns::{AttackCategory, AttackPatternMatcher, PatternMatch};
use crate::pipeline::reputation::ReputationTable;
use crate::pipeline::threat;

/// Fixed back-off after a failed aggregation cycle.
const CYCLE_BACKOFF_SECS: u64 = 5;
/// Cap on good-reputation entries evicted per cleanup pass.
const REPUTATION_EVICTIONS_PER_CYCLE: usize = 100;

/// Read-only dashboard payload; everything a monitoring UI needs in one
/// lock acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub snapshot: MetricsSnapshot,
    pub active_alerts: Vec<Alert>,
    pub recent_events: Vec<SecurityEvent>,
}

struct MonitorState {
    buffer: VecDeque<SecurityEvent>,
    reputation: ReputationTable,
    alerts: AlertBook,
    counters: Counters,
    threat_level: ThreatLevel,
    snapshot: MetricsSnapshot,
}

struct MonitorCore {
    config: MonitorConfig,
    matcher: AttackPatternMatcher,
    dispatcher: Arc<dyn NotificationDispatcher>,
    sessions: Option<Arc<dyn SessionStore>>,
    sink: Option<Arc<dyn EventSink>>,
    state: Arc<Mutex<MonitorState>>,
    seq: AtomicU64,
}

struct Runner {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Builder for wiring external collaborators before the monitor starts.
pub struct MonitorBuilder {
    config: MonitorConfig,
    dispatcher: Option<Arc<dyn NotificationDispatcher>>,
    sessions: Option<Arc<dyn SessionStore>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl MonitorBuilder {
    pub fn dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<SecurityMonitor, MonitorError> {
        let matcher = AttackPatternMatcher::new()?;
        let core = MonitorCore {
            matcher,
            dispatcher: self
                .dispatcher
                .unwrap_or_else(|| Arc::new(TracingDispatcher)),
            sessions: self.sessions,
            sink: self.sink,
            state: Arc::new(Mutex::new(MonitorState {
                buffer: VecDeque::with_capacity(self.config.buffer_capacity.min(4096)),
                reputation: ReputationTable::new(),
                alerts: AlertBook::new(),
                counters: Counters::default(),
                threat_level: ThreatLevel::Normal,
                snapshot: MetricsSnapshot::default(),
            })),
            seq: AtomicU64::new(0),
            config: self.config,
        };
        Ok(SecurityMonitor {
            core: Arc::new(core),
            runner: Mutex::new(None),
        })
    }
}

/// Real-time security-event monitor. One explicit instance per process,
/// owned by the host's composition root; state is process-local (separate
/// instances do not coordinate).
pub struct SecurityMonitor {
    core: Arc<MonitorCore>,
    runner: Mutex<Option<Runner>>,
}

impl SecurityMonitor {
    pub fn builder(config: MonitorConfig) -> MonitorBuilder {
        MonitorBuilder {
            config,
            dispatcher: None,
            sessions: None,
            sink: None,
        }
    }

    /// Monitor with the default tracing dispatcher and no collaborators.
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        Self::builder(config).build()
    }

    /// Spawn the background aggregation loop. Errors if already running.
    pub fn start(&self) -> Result<(), MonitorError> {
        let mut runner = lock_or_recover(&self.runner);
        if runner.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        let (shutdown, signal) = watch::channel(false);
        let core = Arc::clone(&self.core);
        let task = tokio::spawn(run_loop(core, signal));
        *runner = Some(Runner { shutdown, task });
        tracing::info!("security monitor started");
        Ok(())
    }

    /// Signal the background loop to exit and wait for it. No-op when the
    /// monitor is not running; no orphaned work remains afterwards.
    pub async fn stop(&self) {
        let runner = lock_or_recover(&self.runner).take();
        let Some(Runner { shutdown, task }) = runner else {
            return;
        };
        let _ = shutdown.send(true);
        if let Err(err) = task.await {
            tracing::warn!("aggregation task ended abnormally: {err}");
        }
        tracing::info!("security monitor stopped");
    }

    /// Record a security event. Never fails and never blocks on I/O:
    /// pattern matching, reputation scoring, and immediate alerting run
    /// inline; notification and persistence are detached tasks.
    pub fn log_event(
        &self,
        event_type: SecurityEventType,
        user_id: Option<&str>,
        source_ip: Option<&str>,
        user_agent: Option<&str>,
        metadata: Option<BTreeMap<String, String>>,
    ) {
        self.core.ingest_new(
            event_type,
            user_id,
            source_ip,
            user_agent,
            metadata.unwrap_or_default(),
            false,
        );
    }

    /// Run one aggregation pass immediately. The background loop calls
    /// this on its interval; hosts driving their own scheduler (and
    /// tests) can call it directly.
    pub fn run_cycle(&self) -> Result<(), MonitorError> {
        self.core.cycle()
    }

    /// O(1) blocklist membership check for upstream middleware.
    pub fn is_ip_blocked(&self, ip: &str) -> bool {
        self.core.lock_state().reputation.is_blocked(ip)
    }

    /// Remove an IP from the blocked set and reset it to a neutral
    /// reputation. Returns false when the IP was not blocked.
    pub fn unblock_ip(&self, ip: &str, actor: &str) -> bool {
        let changed = self.core.lock_state().reputation.unblock(ip, now_utc());
        if changed {
            tracing::info!("ip {} unblocked by {}", ip, actor);
            let metadata = BTreeMap::from([
                ("ip_address".to_string(), ip.to_string()),
                ("unblocked_by".to_string(), actor.to_string()),
            ]);
            self.log_event(
                SecurityEventType::AccountUnlocked,
                None,
                None,
                None,
                Some(metadata),
            );
        }
        changed
    }

    pub fn ip_reputation(&self, ip: &str) -> f64 {
        self.core.lock_state().reputation.score(ip)
    }

    pub fn threat_level(&self) -> ThreatLevel {
        self.core.lock_state().threat_level
    }

    /// Resolve an alert. Idempotent: returns true only on the call that
    /// actually transitioned the alert.
    pub fn resolve_alert(&self, id: &str, resolved_by: &str, notes: &str) -> bool {
        match self
            .core
            .lock_state()
            .alerts
            .resolve(id, now_utc(), resolved_by, notes)
        {
            Some(true) => {
                tracing::info!("alert {} resolved by {}", id, resolved_by);
                true
            }
            Some(false) => false,
            None => {
                tracing::debug!("resolve requested for unknown alert {}", id);
                false
            }
        }
    }

    pub fn alert(&self, id: &str) -> Option<Alert> {
        self.core.lock_state().alerts.get(id).cloned()
    }

    /// Unresolved alerts, newest first.
    pub fn open_alerts(&self) -> Vec<Alert> {
        self.core.lock_state().alerts.open_alerts()
    }

    /// Last `limit` buffered events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<SecurityEvent> {
        let state = self.core.lock_state();
        let skip = state.buffer.len().saturating_sub(limit);
        state.buffer.iter().skip(skip).cloned().collect()
    }

    /// Buffered events for one user, newest first.
    pub fn events_for_user(&self, user_id: &str, limit: usize) -> Vec<SecurityEvent> {
        let state = self.core.lock_state();
        state
            .buffer
            .iter()
            .rev()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Dashboard payload: the last cycle's snapshot plus live alert and
    /// event views. Pure read, no side effects.
    pub fn dashboard(&self) -> Dashboard {
        let state = self.core.lock_state();
        let limit = self.core.config.dashboard_recent_events;
        let skip = state.buffer.len().saturating_sub(limit);
        Dashboard {
            snapshot: state.snapshot.clone(),
            active_alerts: state.alerts.open_alerts(),
            recent_events: state.buffer.iter().skip(skip).cloned().collect(),
        }
    }
}

impl MonitorCore {
    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // telemetry must keep flowing even after a panicked writer
                tracing::warn!("monitor state mutex poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn next_id(&self, prefix: &str, discriminator: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stamp = now_utc().timestamp_nanos_opt().unwrap_or_default();
        prefixed_id(prefix, &format!("{}|{}|{}", discriminator, stamp, seq))
    }

    fn ingest_new(
        &self,
        event_type: SecurityEventType,
        user_id: Option<&str>,
        source_ip: Option<&str>,
        user_agent: Option<&str>,
        metadata: BTreeMap<String, String>,
        is_synthetic: bool,
    ) {
        let event = SecurityEvent {
            id: self.next_id("evt", event_type.as_str()),
            event_type,
            severity: self.config.severity_for(event_type),
            timestamp: now_utc(),
            source_ip: source_ip.map(str::to_string),
            user_id: user_id.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            metadata,
            is_synthetic,
        };
        self.ingest(event);
    }

    /// The shared ingestion path for caller-submitted and synthetic
    /// events. Blocking and immediate alerting complete before this
    /// returns; only notification and persistence are deferred.
    fn ingest(&self, event: SecurityEvent) {
        tracing::debug!(
            event_type = %event.event_type,
            severity = %event.severity,
            ip = event.source_ip.as_deref().unwrap_or("-"),
            synthetic = event.is_synthetic,
            "security event"
        );

        // synthetic events are never rescanned, bounding the feedback loop
        let hits = self.matcher.scan(&event);

        let mut created: Vec<Alert> = Vec::new();
        let mut hijacked_user: Option<String> = None;
        {
            let mut state = self.lock_state();
            state.counters.record(&event);

            if let Some(ip) = event.source_ip.clone() {
                let delta = self.config.reputation_delta_for(event.event_type);
                let outcome = state.reputation.apply(&ip, delta, event.timestamp);
                if outcome.newly_blocked {
                    tracing::warn!("ip {} blocked at reputation {:.1}", ip, outcome.score);
                    let metadata = BTreeMap::from([(
                        "reputation_score".to_string(),
                        format!("{:.1}", outcome.score),
                    )]);
                    if let Some(alert) = self.open_alert(
                        &mut state,
                        SecurityEventType::SuspiciousActivity,
                        Severity::High,
                        format!("IP blocked: {ip}"),
                        format!(
                            "IP {} was blocked after its reputation fell to {:.1}",
                            ip, outcome.score
                        ),
                        Some(ip.clone()),
                        None,
                        metadata,
                        true,
                    ) {
                        created.push(alert);
                    }
                }
            }

            if event.severity >= Severity::High {
                if let Some(alert) = self.open_alert(
                    &mut state,
                    event.event_type,
                    event.severity,
                    format!("High severity event: {}", event.event_type),
                    format!("A {} severity event has occurred", event.severity),
                    event.source_ip.clone(),
                    event.user_id.clone(),
                    event.metadata.clone(),
                    true,
                ) {
                    created.push(alert);
                }
                if event.event_type == SecurityEventType::SessionHijackAttempt {
                    hijacked_user = event.user_id.clone();
                }
            }

            if state.buffer.len() >= self.config.buffer_capacity {
                // bounded buffer: drop-oldest, never surfaced to the caller
                state.buffer.pop_front();
                tracing::debug!("event buffer at capacity; oldest event dropped");
            }
            state.buffer.push_back(event.clone());
        }

        self.persist_event(&event);
        for alert in created {
            self.dispatch(alert);
        }
        if let Some(user_id) = hijacked_user {
            self.invalidate_sessions(user_id);
        }

        for hit in hits {
            self.ingest_synthetic(&event, hit);
        }
    }

    fn ingest_synthetic(&self, origin: &SecurityEvent, hit: PatternMatch) {
        let mut metadata = BTreeMap::from([
            (
                "original_event".to_string(),
                origin.event_type.as_str().to_string(),
            ),
            ("pattern".to_string(), hit.pattern.clone()),
            ("field".to_string(), hit.key.clone()),
            ("value".to_string(), hit.value.clone()),
        ]);
        if matches!(
            hit.category,
            AttackCategory::PathTraversal | AttackCategory::CommandInjection
        ) {
            metadata.insert(
                "attack_type".to_string(),
                hit.category.as_str().to_string(),
            );
        }
        tracing::warn!(
            category = hit.category.as_str(),
            field = %hit.key,
            "attack signature matched"
        );
        self.ingest_new(
            hit.category.synthesized_event(),
            origin.user_id.as_deref(),
            origin.source_ip.as_deref(),
            None,
            metadata,
            true,
        );
    }

    /// Create and register an alert unless deduplicated. Threat-level
    /// transition alerts pass `dedupe = false`: consecutive transitions
    /// must each be reported even within the dedup window.
    #[allow(clippy::too_many_arguments)]
    fn open_alert(
        &self,
        state: &mut MonitorState,
        event_type: SecurityEventType,
        severity: Severity,
        title: String,
        description: String,
        source_ip: Option<String>,
        user_id: Option<String>,
        metadata: BTreeMap<String, String>,
        dedupe: bool,
    ) -> Option<Alert> {
        let now = now_utc();
        if dedupe && state.alerts.has_open_duplicate(event_type, source_ip.as_deref(), now) {
            tracing::debug!(
                "alert for {} / {:?} suppressed by dedup window",
                event_type,
                source_ip
            );
            return None;
        }
        let alert = Alert {
            id: self.next_id("alert", event_type.as_str()),
            event_type,
            severity,
            title,
            description,
            source_ip,
            user_id,
            metadata,
            created_at: now,
            resolved: false,
            resolution_time: None,
            notified_targets: BTreeSet::new(),
        };
        state.alerts.insert(alert.clone());
        tracing::warn!(
            alert_id = %alert.id,
            severity = %alert.severity,
            "alert raised: {}",
            alert.title
        );
        Some(alert)
    }

    /// Fire-and-forget delivery. A slow or failing dispatcher never
    /// stalls ingestion or alters alert state.
    fn dispatch(&self, alert: Alert) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                "alert {} raised outside an async runtime; notification skipped",
                alert.id
            );
            return;
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let sink = self.sink.clone();
        let state = Arc::clone(&self.state);
        handle.spawn(async move {
            if let Some(sink) = sink {
                if let Err(err) = sink.persist_alert(&alert).await {
                    tracing::debug!("alert persistence failed: {err}");
                }
            }
            match dispatcher.notify(&alert).await {
                Ok(()) => {
                    lock_or_recover(&state)
                        .alerts
                        .record_notified(&alert.id, dispatcher.target());
                }
                Err(err) => {
                    tracing::warn!("notification for alert {} failed: {}", alert.id, err);
                }
            }
        });
    }

    fn persist_event(&self, event: &SecurityEvent) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let event = event.clone();
        handle.spawn(async move {
            if let Err(err) = sink.persist_event(&event).await {
                tracing::debug!("event persistence failed: {err}");
            }
        });
    }

    fn invalidate_sessions(&self, user_id: String) {
        let Some(sessions) = self.sessions.clone() else {
            tracing::warn!(
                "session hijack attempt for user {} but no session store is wired",
                user_id
            );
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        handle.spawn(async move {
            match sessions.invalidate_sessions(&user_id).await {
                Ok(count) => {
                    tracing::info!("invalidated {} sessions for user {}", count, user_id);
                }
                Err(err) => {
                    tracing::error!("session invalidation for user {} failed: {}", user_id, err);
                }
            }
        });
    }

    /// One aggregation pass: anomaly sweep, snapshot, threat-level step,
    /// threshold checks, cleanup.
    fn cycle(&self) -> Result<(), MonitorError> {
        let now = now_utc();

        // sweep first so derived events join this cycle's tallies
        let findings = {
            let state = self.lock_state();
            anomaly::sweep(&state.buffer, now)
        };
        for finding in findings {
            self.ingest_new(
                finding.event_type,
                None,
                finding.source_ip.as_deref(),
                None,
                finding.metadata,
                true,
            );
        }

        let mut created: Vec<Alert> = Vec::new();
        {
            let mut state = self.lock_state();

            let mut snapshot = aggregator::build_snapshot(
                &state.buffer,
                &state.reputation,
                &state.counters,
                state.threat_level,
                state.alerts.open_count(),
                self.config.top_threat_sources,
                now,
            );

            let (next, transition) = threat::step(state.threat_level, snapshot.threat_score);
            state.threat_level = next;
            snapshot.current_threat_level = next;

            if let Some(t) = transition {
                tracing::warn!(
                    "threat level changed: {} -> {} (score {})",
                    t.from,
                    t.to,
                    t.score
                );
                let severity = if t.to >= ThreatLevel::Severe {
                    Severity::High
                } else {
                    Severity::Medium
                };
                let metadata = BTreeMap::from([
                    ("old_level".to_string(), t.from.as_str().to_string()),
                    ("new_level".to_string(), t.to.as_str().to_string()),
                    ("score".to_string(), t.score.to_string()),
                ]);
                if let Some(alert) = self.open_alert(
                    &mut state,
                    SecurityEventType::SuspiciousActivity,
                    severity,
                    format!("Threat level changed: {} -> {}", t.from, t.to),
                    format!(
                        "System threat level moved from {} to {} (score: {})",
                        t.from, t.to, t.score
                    ),
                    None,
                    None,
                    metadata,
                    false,
                ) {
                    created.push(alert);
                }
            }

            for breach in
                alerts::check_thresholds(&state.buffer, &self.config.alert_thresholds, now)
            {
                let severity = self.config.severity_for(breach.event_type);
                let metadata = BTreeMap::from([
                    ("count".to_string(), breach.count.to_string()),
                    ("threshold".to_string(), breach.threshold.to_string()),
                ]);
                if let Some(alert) = self.open_alert(
                    &mut state,
                    breach.event_type,
                    severity,
                    format!("Threshold exceeded: {}", breach.event_type),
                    format!(
                        "{} {} events in the last 5 minutes (threshold: {})",
                        breach.count, breach.event_type, breach.threshold
                    ),
                    None,
                    None,
                    metadata,
                    true,
                ) {
                    created.push(alert);
                }
            }

            let purged = state.alerts.purge_resolved(now);
            let evicted = state
                .reputation
                .evict_trusted(REPUTATION_EVICTIONS_PER_CYCLE);
            if purged > 0 || evicted > 0 {
                tracing::debug!(
                    "cleanup: {} resolved alerts purged, {} reputation entries evicted",
                    purged,
                    evicted
                );
            }

            state.snapshot = snapshot;
        }

        for alert in created {
            self.dispatch(alert);
        }
        Ok(())
    }
}

async fn run_loop(core: Arc<MonitorCore>, mut shutdown: watch::Receiver<bool>) {
    let period = StdDuration::from_secs(core.config.aggregation_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the interval's first tick fires immediately; skip it so the first
    // cycle runs one full period after start
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = core.cycle() {
                    // one bad cycle must not kill the loop
                    tracing::error!("aggregation cycle failed: {err}");
                    tokio::time::sleep(StdDuration::from_secs(CYCLE_BACKOFF_SECS)).await;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("aggregation loop exited");
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
