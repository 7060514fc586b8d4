use async_trait::async_trait;

use crate::core::alert::Alert;
use crate::core::error::MonitorError;
use crate::core::event::SecurityEvent;

/// Delivery channel for raised alerts (email, WebSocket, webhook, ...).
/// Invoked from a detached task; failures are logged and never affect
/// alert state.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// A short name recorded in the alert's notified targets.
    fn target(&self) -> &str;

    async fn notify(&self, alert: &Alert) -> Result<(), MonitorError>;
}

/// External session store. Used for the session-hijack side effect:
/// invalidating every session of the affected user.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the number of sessions invalidated.
    async fn invalidate_sessions(&self, user_id: &str) -> Result<usize, MonitorError>;
}

/// Optional best-effort durable storage for events and alerts. Absence or
/// failure of the sink never degrades detection.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn persist_event(&self, event: &SecurityEvent) -> Result<(), MonitorError>;
    async fn persist_alert(&self, alert: &Alert) -> Result<(), MonitorError>;
}

/// Default dispatcher: emits the alert into the tracing pipeline.
#[derive(Debug, Default)]
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    fn target(&self) -> &str {
        "tracing"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), MonitorError> {
        tracing::warn!(
            alert_id = %alert.id,
            severity = %alert.severity,
            "security alert: {} - {}",
            alert.title,
            alert.description
        );
        Ok(())
    }
}
