use super::retry::{JitterSource, RandomJitter, next_delay};
use super::timeout::{Attempt, CancellationToken, TimeoutGuard};
use crate::domain::context::{DeliveryMode, NotificationContext, RetryPolicy, TransactionContext};
use crate::domain::ids::TransactionId;
use crate::domain::ports::{
    AuditErrorRecord, AuditRecord, AuditServiceRef, AuthorizationRequest, AuthorizationServiceRef,
    DeadLetterSinkRef, MetricsCollector, MetricsCollectorRef, NotificationServiceRef,
};
use crate::domain::result::{NotificationHandle, TransactionMetadata, TransactionResult};
use crate::error::{ErrorKind, Result, TransactionError};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs business logic inside the full transaction lifecycle: authorization
/// gate, retried and time-boxed execution, audit and notification
/// post-processing, failure auditing and metrics.
///
/// The executor holds no per-transaction state, so one instance can serve
/// any number of concurrent [`execute`](Self::execute) calls.
pub struct TransactionExecutor {
    authorization: AuthorizationServiceRef,
    audit: AuditServiceRef,
    notifications: NotificationServiceRef,
    metrics: Option<MetricsCollectorRef>,
    dead_letters: Option<DeadLetterSinkRef>,
    jitter: Arc<dyn JitterSource>,
}

impl TransactionExecutor {
    /// Creates an executor with random retry jitter, no metrics collector and
    /// no dead-letter sink.
    pub fn new(
        authorization: AuthorizationServiceRef,
        audit: AuditServiceRef,
        notifications: NotificationServiceRef,
    ) -> Self {
        Self {
            authorization,
            audit,
            notifications,
            metrics: None,
            dead_letters: None,
            jitter: Arc::new(RandomJitter),
        }
    }

    pub fn with_metrics(mut self, collector: MetricsCollectorRef) -> Self {
        self.metrics = Some(collector);
        self
    }

    pub fn with_dead_letters(mut self, sink: DeadLetterSinkRef) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Executes `business_logic` under `context` and reports the outcome.
    ///
    /// `business_logic` is invoked once per attempt with an [`Attempt`]
    /// carrying the attempt number and a cancellation token that fires when
    /// the attempt's deadline passes.
    pub async fn execute<T, F, Fut>(
        &self,
        context: TransactionContext,
        business_logic: F,
    ) -> TransactionResult<T>
    where
        F: Fn(Attempt) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        let collector = self.collector_for(&context);
        let transaction_id = context.transaction_id();

        if let Some(collector) = collector {
            collector.start_transaction(context.metrics());
        }
        info!(
            %transaction_id,
            operation_type = %context.business().operation_type,
            "Transaction started"
        );

        let (outcome, retry_count, denial_audited) = match self.authorize(&context).await {
            Ok(()) => {
                let (outcome, retry_count) = self.run_with_retry(&context, &business_logic).await;
                (outcome, retry_count, false)
            }
            Err(Rejection::Denied(err)) => (Err(err), 0, true),
            Err(Rejection::Failed(err)) => (Err(err), 0, false),
        };

        match outcome {
            Ok(data) => {
                let (warnings, notification) = self.post_process(&context).await;
                let metadata = self.metadata(&context, started, retry_count);
                if let Some(collector) = collector {
                    collector.record_success(context.metrics(), metadata.duration);
                }
                info!(
                    %transaction_id,
                    retry_count,
                    duration_ms = metadata.duration.as_millis() as u64,
                    "Transaction succeeded"
                );
                TransactionResult::Success {
                    data,
                    metadata,
                    warnings,
                    notification,
                }
            }
            Err(err) => {
                let error = self.handle_error(&context, err, denial_audited).await;
                let metadata = self.metadata(&context, started, retry_count);
                if let Some(collector) = collector {
                    collector.record_error(context.metrics(), &error, metadata.duration);
                }
                error!(
                    %transaction_id,
                    retry_count,
                    code = error.code(),
                    error = %error.message,
                    "Transaction failed"
                );
                TransactionResult::Failure { error, metadata }
            }
        }
    }

    fn collector_for(&self, context: &TransactionContext) -> Option<&dyn MetricsCollector> {
        if context.performance().enable_metrics {
            self.metrics.as_deref()
        } else {
            None
        }
    }

    /// Checks the required permission, auditing a denial when an audit
    /// context is present.
    async fn authorize(&self, context: &TransactionContext) -> std::result::Result<(), Rejection> {
        let Some(authorization) = context.authorization() else {
            return Ok(());
        };

        let request = AuthorizationRequest {
            user: authorization.user.clone(),
            resource_id: authorization.resource_id.clone(),
            resource_type: authorization.resource_type.clone(),
            additional_claims: authorization.additional_claims.clone(),
        };
        let granted = self
            .authorization
            .check_permission(&authorization.required_permission, &request)
            .await
            .map_err(Rejection::Failed)?;
        if granted {
            return Ok(());
        }

        warn!(
            transaction_id = %context.transaction_id(),
            user = %authorization.user.id,
            permission = %authorization.required_permission,
            "Permission denied"
        );

        if let Some(audit) = context.audit() {
            let record = AuditErrorRecord {
                entity_type: audit.entity_type.clone(),
                entity_id: audit.entity_id.clone(),
                attempted_by: authorization.user.id.clone(),
                error_reason: "Insufficient permissions".to_string(),
                business_impact: format!(
                    "{} blocked due to access control",
                    context.business().operation_type
                ),
                timestamp: Utc::now(),
                compliance_level: audit.compliance_level,
                correlation_id: context.business().correlation_id,
                error_code: Some(ErrorKind::PermissionDenied.as_str().to_string()),
            };
            let name = format!("{}_DENIED", audit.operation_name);
            if let Err(err) = self.audit.log_business_error(&name, &record).await {
                warn!(transaction_id = %context.transaction_id(), error = %err, "Audit logging failed");
            }
        }

        Err(Rejection::Denied(TransactionError::permission_denied(format!(
            "Permission denied: {} requires {}",
            authorization.user.id, authorization.required_permission
        ))))
    }

    /// Runs the attempts. Returns the final outcome and how many retries
    /// were made.
    async fn run_with_retry<T, F, Fut>(
        &self,
        context: &TransactionContext,
        business_logic: &F,
    ) -> (Result<T>, u32)
    where
        F: Fn(Attempt) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let performance = context.performance();
        let policy = performance.retry_policy.as_ref();
        let max_attempts = performance.max_attempts();
        let guard = TimeoutGuard::new(performance.timeout());
        let transaction_id = context.transaction_id();

        let mut attempt = 1;
        loop {
            let token = CancellationToken::new();
            let operation = business_logic(Attempt::new(attempt, token.clone()));

            let err = match guard.run(operation, &token).await {
                Ok(data) => return (Ok(data), attempt - 1),
                Err(err) => err,
            };

            if attempt < max_attempts
                && is_retryable(&err, policy)
                && let Some(policy) = policy
            {
                let delay = next_delay(attempt, policy, self.jitter.as_ref());
                warn!(
                    %transaction_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    code = err.code(),
                    error = %err.message,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            debug!(%transaction_id, attempt, code = err.code(), "Attempt failed, giving up");
            return (Err(err), attempt - 1);
        }
    }

    /// Audit and notification after a successful run. Only sync obligations
    /// are awaited; an async notification is returned as a handle.
    async fn post_process(
        &self,
        context: &TransactionContext,
    ) -> (Vec<TransactionError>, Option<NotificationHandle>) {
        let transaction_id = context.transaction_id();

        let background = context
            .notification()
            .filter(|n| n.delivery_mode == DeliveryMode::Async)
            .map(|n| self.dispatch_async(n.clone(), transaction_id));

        let audit = async {
            let Some(audit) = context.audit() else {
                return;
            };
            let record = AuditRecord {
                entity_type: audit.entity_type.clone(),
                entity_id: audit.entity_id.clone(),
                performed_by: audit.performed_by.clone(),
                timestamp: Utc::now(),
                business_data: audit.business_data.clone(),
                business_context: context.business().domain_context.clone(),
                compliance_level: audit.compliance_level,
                correlation_id: context.business().correlation_id,
            };
            if let Err(err) = self
                .audit
                .log_business_action(&audit.operation_name, &record)
                .await
            {
                warn!(%transaction_id, error = %err, "Audit logging failed");
            }
        };

        let sync_notification = async {
            match context.notification() {
                Some(notification) if notification.delivery_mode == DeliveryMode::Sync => self
                    .notifications
                    .notify(notification)
                    .await
                    .err()
                    .map(delivery_failure),
                _ => None,
            }
        };

        let ((), failure) = tokio::join!(audit, sync_notification);

        let mut warnings = Vec::new();
        if let Some(failure) = failure {
            warn!(%transaction_id, error = %failure, "Sync notification failed");
            warnings.push(failure);
        }
        (warnings, background)
    }

    fn dispatch_async(
        &self,
        notification: NotificationContext,
        transaction_id: TransactionId,
    ) -> NotificationHandle {
        let service = Arc::clone(&self.notifications);
        let dead_letters = self.dead_letters.clone();

        NotificationHandle::new(tokio::spawn(async move {
            let outcome = service.notify(&notification).await.map_err(delivery_failure);
            if let Err(err) = &outcome {
                warn!(%transaction_id, event_type = %notification.event_type, error = %err, "Async notification failed");
                if let Some(sink) = dead_letters {
                    sink.record(&notification, err);
                }
            }
            outcome
        }))
    }

    /// Audits the final failure and finalizes the error's classification.
    ///
    /// `denial_audited` is set when the gate already recorded a `_DENIED`
    /// event for this transaction.
    async fn handle_error(
        &self,
        context: &TransactionContext,
        err: TransactionError,
        denial_audited: bool,
    ) -> TransactionError {
        let retryable = is_retryable(&err, context.performance().retry_policy.as_ref());
        let error = err
            .with_retryable(retryable)
            .with_context("operationType", context.business().operation_type.clone());

        if !denial_audited
            && let Some(audit) = context.audit()
        {
            let record = AuditErrorRecord {
                entity_type: audit.entity_type.clone(),
                entity_id: audit.entity_id.clone(),
                attempted_by: audit.performed_by.clone(),
                error_reason: error.message.clone(),
                business_impact: format!(
                    "{} failed: {}",
                    context.business().operation_type,
                    error.message
                ),
                timestamp: Utc::now(),
                compliance_level: audit.compliance_level,
                correlation_id: context.business().correlation_id,
                error_code: Some(error.code().to_string()),
            };
            let name = format!("{}_FAILED", audit.operation_name);
            if let Err(audit_err) = self.audit.log_business_error(&name, &record).await {
                warn!(transaction_id = %context.transaction_id(), error = %audit_err, "Audit logging failed");
            }
        }

        error
    }

    fn metadata(
        &self,
        context: &TransactionContext,
        started: Instant,
        retry_count: u32,
    ) -> TransactionMetadata {
        let metrics = context.metrics();
        TransactionMetadata {
            transaction_id: metrics.transaction_id,
            start_time: metrics.start_time,
            end_time: Utc::now(),
            duration: started.elapsed(),
            retry_count,
            tags: metrics.tags.clone(),
        }
    }
}

/// Why the authorization gate stopped a transaction.
enum Rejection {
    /// The user lacks the permission; the denial is already audited.
    Denied(TransactionError),
    /// The authorization service itself failed.
    Failed(TransactionError),
}

/// Whether another attempt of the same transaction could succeed.
///
/// Terminal failures, authorization and context failures never are.
/// Otherwise the policy's list decides, falling back to the default
/// retryable kinds.
fn is_retryable(err: &TransactionError, policy: Option<&RetryPolicy>) -> bool {
    if err.is_terminal() {
        return false;
    }
    let kind = err.kind;
    match kind {
        ErrorKind::PermissionDenied | ErrorKind::MissingRequiredContext => false,
        _ => match policy {
            Some(policy) => policy.is_retryable(kind),
            None => kind.is_retryable_by_default(),
        },
    }
}

fn delivery_failure(err: TransactionError) -> TransactionError {
    if err.kind == ErrorKind::NotificationDelivery {
        return err.with_retryable(false);
    }
    TransactionError::wrap(ErrorKind::NotificationDelivery, err).with_retryable(false)
}
