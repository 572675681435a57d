//! Best-effort audit and notification side channel.
//!
//! Failures on these seams are logged and swallowed; they never block or
//! fail the replication path.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Categories of follower-facing notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    CopyExecuted,
    CopyFailed,
    /// Subscription auto-paused after a total-loss breach, distinct from a
    /// generic failure notice
    LossLimitPause,
    PositionClosed,
}

/// Append-only audit log collaborator.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &str, entity: &str, metadata: serde_json::Value) -> Result<()>;
}

/// Follower notification collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> Result<()>;
}

/// Audit sink that writes structured tracing events.
#[derive(Debug, Default, Clone)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: &str, entity: &str, metadata: serde_json::Value) -> Result<()> {
        info!(event, entity, %metadata, "audit");
        Ok(())
    }
}

/// Notifier that writes structured tracing events.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> Result<()> {
        info!(user = user_id, kind = ?kind, %payload, "notify");
        Ok(())
    }
}
