//! Monitor Sink: push notifications on failover/fatal errors.
//!
//! The concrete delivery transport (webhook, chat bot, pager) is an
//! external collaborator; what belongs to the core is the narrow
//! notify-on-failover-or-fatal-error boundary itself, so it's expressed as a
//! trait with a logging-only default implementation.

use async_trait::async_trait;

#[async_trait]
pub trait MonitorSink: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Default sink: routes monitor messages through `tracing` at `error!`.
/// Suitable until an operator wires up a real webhook/alerting sink.
pub struct NullSink;

#[async_trait]
impl MonitorSink for NullSink {
    async fn notify(&self, message: &str) {
        tracing::error!(monitor = true, "{message}");
    }
}
