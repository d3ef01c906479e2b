use crate::domain::context::{MetricsContext, NotificationContext};
use crate::domain::ports::{DeadLetterSink, MetricsCollector};
use crate::error::TransactionError;
use std::time::Duration;

/// Emits transaction metrics as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsCollector;

impl MetricsCollector for TracingMetricsCollector {
    fn start_transaction(&self, context: &MetricsContext) {
        tracing::info!(
            transaction_id = %context.transaction_id,
            tags = ?context.tags,
            "metrics: transaction started"
        );
    }

    fn record_success(&self, context: &MetricsContext, duration: Duration) {
        tracing::info!(
            transaction_id = %context.transaction_id,
            duration_ms = duration.as_millis() as u64,
            tags = ?context.tags,
            custom = ?context.custom_metrics,
            "metrics: transaction succeeded"
        );
    }

    fn record_error(&self, context: &MetricsContext, error: &TransactionError, duration: Duration) {
        tracing::warn!(
            transaction_id = %context.transaction_id,
            duration_ms = duration.as_millis() as u64,
            code = error.code(),
            retryable = error.retryable,
            tags = ?context.tags,
            "metrics: transaction failed"
        );
    }
}

/// Logs undeliverable background notifications at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDeadLetterSink;

impl DeadLetterSink for TracingDeadLetterSink {
    fn record(&self, notification: &NotificationContext, error: &TransactionError) {
        tracing::error!(
            event_type = %notification.event_type,
            target_type = %notification.target_entity.entity_type,
            target_id = %notification.target_entity.id,
            priority = ?notification.priority,
            error = %error,
            "Notification dead-lettered"
        );
    }
}
