//! Immutable value objects describing one transaction attempt.
//!
//! A [`TransactionContext`] is assembled by
//! [`TransactionContextBuilder`](super::builder::TransactionContextBuilder) and
//! consumed exactly once by the executor. Nothing in it changes between retries.

use super::ids::{CorrelationId, ResourceId, TransactionId, UserId};
use crate::error::{ContextError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Free-form key/value payload attached to business, audit and notification data.
pub type Attributes = BTreeMap<String, serde_json::Value>;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessContext {
    pub operation_type: String,
    pub domain_context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl BusinessContext {
    pub fn new(operation_type: impl Into<String>, domain_context: impl Into<String>) -> Self {
        Self {
            operation_type: operation_type.into(),
            domain_context: domain_context.into(),
            metadata: None,
            correlation_id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Attributes) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exponential" => Ok(BackoffStrategy::Exponential),
            "linear" => Ok(BackoffStrategy::Linear),
            "fixed" => Ok(BackoffStrategy::Fixed),
            other => Err(format!("unknown backoff strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub retryable_errors: BTreeSet<ErrorKind>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_strategy: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            backoff_strategy,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            retryable_errors: [ErrorKind::Timeout, ErrorKind::TransientInfrastructure]
                .into_iter()
                .collect(),
        }
    }

    pub fn with_delays(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_retryable_errors(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_errors = kinds.into_iter().collect();
        self
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_errors.contains(&kind)
    }

    pub fn validate(&self) -> Result<(), ContextError> {
        if self.max_attempts == 0 {
            return Err(ContextError::Invalid(
                "retry policy maxAttempts must be at least 1".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ContextError::Invalid(format!(
                "retry policy maxDelayMs ({}) is below baseDelayMs ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }
}

/// Declarative settings handed through to collaborators that run a circuit
/// breaker. The executor itself never trips on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub monitoring_period_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceConfig {
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub enable_metrics: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_policy: None,
            circuit_breaker: None,
            enable_metrics: true,
        }
    }
}

impl PerformanceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Attempts allowed by the retry policy; a single attempt without one.
    pub fn max_attempts(&self) -> u32 {
        self.retry_policy
            .as_ref()
            .map_or(1, |policy| policy.max_attempts.max(1))
    }

    pub fn validate(&self) -> Result<(), ContextError> {
        if self.timeout_ms == 0 {
            return Err(ContextError::Invalid(
                "timeoutMs must be greater than zero".to_string(),
            ));
        }
        if let Some(policy) = &self.retry_policy {
            policy.validate()?;
        }
        Ok(())
    }
}

/// Partial [`PerformanceConfig`]: only the fields that are `Some` replace the
/// current values when merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerformanceOverrides {
    pub timeout_ms: Option<u64>,
    pub retry_policy: Option<RetryPolicy>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub enable_metrics: Option<bool>,
}

impl PerformanceOverrides {
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn enable_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = Some(enabled);
        self
    }

    pub(crate) fn apply(self, base: PerformanceConfig) -> PerformanceConfig {
        PerformanceConfig {
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            retry_policy: self.retry_policy.or(base.retry_policy),
            circuit_breaker: self.circuit_breaker.or(base.circuit_breaker),
            enable_metrics: self.enable_metrics.unwrap_or(base.enable_metrics),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl User {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationContext {
    pub required_permission: String,
    pub user: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_claims: Option<Attributes>,
}

impl AuthorizationContext {
    pub fn new(required_permission: impl Into<String>, user: User) -> Self {
        Self {
            required_permission: required_permission.into(),
            user,
            resource_id: None,
            resource_type: None,
            additional_claims: None,
        }
    }

    pub fn on_resource(mut self, resource_type: impl Into<String>, resource_id: ResourceId) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id);
        self
    }

    pub fn with_claims(mut self, claims: Attributes) -> Self {
        self.additional_claims = Some(claims);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditContext {
    pub operation_name: String,
    pub entity_type: String,
    pub entity_id: ResourceId,
    pub performed_by: UserId,
    pub compliance_level: ComplianceLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_data: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_impact: Option<String>,
}

impl AuditContext {
    pub fn new(
        operation_name: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: ResourceId,
        performed_by: UserId,
        compliance_level: ComplianceLevel,
    ) -> Self {
        Self {
            operation_name: operation_name.into(),
            entity_type: entity_type.into(),
            entity_id,
            performed_by,
            compliance_level,
            business_data: None,
            business_impact: None,
        }
    }

    pub fn with_business_data(mut self, data: Attributes) -> Self {
        self.business_data = Some(data);
        self
    }

    pub fn with_business_impact(mut self, impact: impl Into<String>) -> Self {
        self.business_impact = Some(impact.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Whether the transaction waits for notification delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Sync,
    #[default]
    Async,
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(DeliveryMode::Sync),
            "async" => Ok(DeliveryMode::Async),
            other => Err(format!("unknown delivery mode: {other}")),
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Sync => f.write_str("sync"),
            DeliveryMode::Async => f.write_str("async"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: ResourceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContext {
    pub event_type: String,
    pub target_entity: TargetEntity,
    pub priority: Priority,
    pub delivery_mode: DeliveryMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
}

impl NotificationContext {
    /// Normal priority, async delivery.
    pub fn new(
        event_type: impl Into<String>,
        target_type: impl Into<String>,
        target_id: ResourceId,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            target_entity: TargetEntity {
                entity_type: target_type.into(),
                id: target_id,
            },
            priority: Priority::default(),
            delivery_mode: DeliveryMode::default(),
            event_data: None,
            recipients: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    pub fn with_event_data(mut self, data: Attributes) -> Self {
        self.event_data = Some(data);
        self
    }

    pub fn with_recipients(mut self, recipients: impl IntoIterator<Item = String>) -> Self {
        self.recipients = recipients.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsContext {
    pub transaction_id: TransactionId,
    pub start_time: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_metrics: BTreeMap<String, f64>,
}

impl MetricsContext {
    /// Stamped with the current time.
    pub fn new(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            start_time: Utc::now(),
            tags: BTreeMap::new(),
            custom_metrics: BTreeMap::new(),
        }
    }
}

/// Everything one transaction needs beyond its business payload.
///
/// Only obtainable from the builder; fields are read through accessors so a
/// built context cannot be altered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    business: BusinessContext,
    performance: PerformanceConfig,
    metrics: MetricsContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization: Option<AuthorizationContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audit: Option<AuditContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification: Option<NotificationContext>,
}

impl TransactionContext {
    pub(crate) fn new(
        business: BusinessContext,
        performance: PerformanceConfig,
        metrics: MetricsContext,
        authorization: Option<AuthorizationContext>,
        audit: Option<AuditContext>,
        notification: Option<NotificationContext>,
    ) -> Self {
        Self {
            business,
            performance,
            metrics,
            authorization,
            audit,
            notification,
        }
    }

    pub fn business(&self) -> &BusinessContext {
        &self.business
    }

    pub fn performance(&self) -> &PerformanceConfig {
        &self.performance
    }

    pub fn metrics(&self) -> &MetricsContext {
        &self.metrics
    }

    pub fn authorization(&self) -> Option<&AuthorizationContext> {
        self.authorization.as_ref()
    }

    pub fn audit(&self) -> Option<&AuditContext> {
        self.audit.as_ref()
    }

    pub fn notification(&self) -> Option<&NotificationContext> {
        self.notification.as_ref()
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.metrics.transaction_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_performance_defaults() {
        let config = PerformanceConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.enable_metrics);
        assert_eq!(config.max_attempts(), 1);
    }

    #[test]
    fn test_zero_timeout_is_invalid() {
        let config = PerformanceConfig {
            timeout_ms: 0,
            ..PerformanceConfig::default()
        };
        assert!(matches!(config.validate(), Err(ContextError::Invalid(_))));
    }

    #[test]
    fn test_retry_policy_validation() {
        let policy = RetryPolicy::new(0, BackoffStrategy::Fixed);
        assert!(policy.validate().is_err());

        let policy = RetryPolicy::new(3, BackoffStrategy::Linear).with_delays(500, 100);
        assert!(policy.validate().is_err());

        let policy = RetryPolicy::new(3, BackoffStrategy::Linear).with_delays(100, 500);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_overrides_only_replace_supplied_fields() {
        let base = PerformanceConfig::default();
        let merged = PerformanceOverrides::default().timeout_ms(50).apply(base);

        assert_eq!(merged.timeout_ms, 50);
        assert!(merged.enable_metrics);
        assert!(merged.retry_policy.is_none());
    }

    #[test]
    fn test_enums_use_lowercase_tags() {
        assert_eq!(
            serde_json::to_string(&BackoffStrategy::Exponential).unwrap(),
            "\"exponential\""
        );
        assert_eq!(
            serde_json::to_string(&ComplianceLevel::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!("SYNC".parse::<DeliveryMode>().unwrap(), DeliveryMode::Sync);
    }

    #[test]
    fn test_notification_defaults_to_async_normal() {
        let notification = NotificationContext::new("EMPLOYEE_ADDED", "Employee", "7".into());
        assert_eq!(notification.priority, Priority::Normal);
        assert_eq!(notification.delivery_mode, DeliveryMode::Async);
        assert_eq!(notification.target_entity.entity_type, "Employee");
    }
}
