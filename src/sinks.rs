//! Write-only side channels: user notifications and the audit trail
//!
//! Both are best effort. Callers log a failed delivery and carry on; a committed
//! status change or approval decision is never rolled back because of a sink.
use crate::order::TimeStamp;
use chrono::Utc;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub kind: String,
    pub related_entity_type: String,
    pub related_entity_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub entity: String,
    pub entity_id: String,
    pub action: String,
    pub actor_id: String,
    pub diff: String,
    pub timestamp: TimeStamp<Utc>,
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification) -> anyhow::Result<()>;
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> anyhow::Result<()>;
}

/// Emits both channels as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, n: Notification) -> anyhow::Result<()> {
        tracing::info!(
            target: "order_workflow::notify",
            user_id = %n.user_id,
            kind = %n.kind,
            entity_type = %n.related_entity_type,
            entity_id = %n.related_entity_id,
            title = %n.title,
            "{}",
            n.content
        );
        Ok(())
    }
}

impl AuditSink for TracingSink {
    fn record(&self, e: AuditEvent) -> anyhow::Result<()> {
        tracing::info!(
            target: "order_workflow::audit",
            entity = %e.entity,
            entity_id = %e.entity_id,
            action = %e.action,
            actor_id = %e.actor_id,
            at = %e.timestamp.to_datetime_utc(),
            "{}",
            e.diff
        );
        Ok(())
    }
}

/// Keeps everything in memory so tests can assert on what was emitted.
/// With `failing` set every delivery errors and nothing is kept.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub notifications: Mutex<Vec<Notification>>,
    pub audit: Mutex<Vec<AuditEvent>>,
    pub failing: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: Notification) -> anyhow::Result<()> {
        if self.failing {
            anyhow::bail!("notification channel unavailable");
        }
        self.notifications
            .lock()
            .map_err(|_| anyhow::anyhow!("notification log poisoned"))?
            .push(notification);
        Ok(())
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: AuditEvent) -> anyhow::Result<()> {
        if self.failing {
            anyhow::bail!("audit channel unavailable");
        }
        self.audit
            .lock()
            .map_err(|_| anyhow::anyhow!("audit log poisoned"))?
            .push(event);
        Ok(())
    }
}
