use super::context::{Attributes, ComplianceLevel, MetricsContext, NotificationContext, User};
use super::ids::{CorrelationId, ResourceId, UserId};
use crate::error::{Result, TransactionError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Subject and resource handed to the permission check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    pub user: User,
    pub resource_id: Option<ResourceId>,
    pub resource_type: Option<String>,
    pub additional_claims: Option<Attributes>,
}

/// Detail of a successful business action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub entity_type: String,
    pub entity_id: ResourceId,
    pub performed_by: UserId,
    pub timestamp: DateTime<Utc>,
    pub business_data: Option<Attributes>,
    pub business_context: String,
    pub compliance_level: ComplianceLevel,
    pub correlation_id: Option<CorrelationId>,
}

/// Detail of a denied or failed business action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditErrorRecord {
    pub entity_type: String,
    pub entity_id: ResourceId,
    pub attempted_by: UserId,
    pub error_reason: String,
    pub business_impact: String,
    pub timestamp: DateTime<Utc>,
    pub compliance_level: ComplianceLevel,
    pub correlation_id: Option<CorrelationId>,
    pub error_code: Option<String>,
}

/// Decides whether a user may perform an operation.
///
/// Called before any business-logic side effect.
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    async fn check_permission(
        &self,
        permission: &str,
        request: &AuthorizationRequest,
    ) -> Result<bool>;
}

/// Receives business audit events. Failures never reach the transaction result.
#[async_trait]
pub trait AuditService: Send + Sync {
    async fn log_business_action(&self, name: &str, record: &AuditRecord) -> Result<()>;
    async fn log_business_error(&self, name: &str, record: &AuditErrorRecord) -> Result<()>;
}

/// Delivers domain events. The executor decides whether to await delivery
/// (`sync`) or run it in the background (`async`).
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, notification: &NotificationContext) -> Result<()>;
}

/// Passive sink for transaction lifecycle metrics.
pub trait MetricsCollector: Send + Sync {
    fn start_transaction(&self, context: &MetricsContext);
    fn record_success(&self, context: &MetricsContext, duration: Duration);
    fn record_error(&self, context: &MetricsContext, error: &TransactionError, duration: Duration);
}

/// Where background notifications end up when delivery fails.
pub trait DeadLetterSink: Send + Sync {
    fn record(&self, notification: &NotificationContext, error: &TransactionError);
}

pub type AuthorizationServiceRef = Arc<dyn AuthorizationService>;
pub type AuditServiceRef = Arc<dyn AuditService>;
pub type NotificationServiceRef = Arc<dyn NotificationService>;
pub type MetricsCollectorRef = Arc<dyn MetricsCollector>;
pub type DeadLetterSinkRef = Arc<dyn DeadLetterSink>;
