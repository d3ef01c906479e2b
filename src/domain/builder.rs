use super::context::{
    AuditContext, AuthorizationContext, BusinessContext, MetricsContext, NotificationContext,
    PerformanceConfig, PerformanceOverrides, TransactionContext,
};
use super::ids::{CorrelationId, TransactionId};
use crate::error::ContextError;
use std::collections::BTreeMap;

/// Assembles a [`TransactionContext`] from optional fragments.
///
/// Every `with_*` call consumes the builder and returns a new one, so a
/// partially configured builder can be cloned and reused as a template
/// without one transaction's fragments leaking into another.
///
/// ```
/// use txexec::domain::builder::TransactionContextBuilder;
/// use txexec::domain::context::{BusinessContext, PerformanceOverrides};
///
/// let context = TransactionContextBuilder::create()
///     .with_business(BusinessContext::new("ADD_EMPLOYEE", "hourly-employee-onboarding"))
///     .with_performance(PerformanceOverrides::default().timeout_ms(15_000))
///     .with_metrics_tags([("operation", "add_employee")])
///     .build()
///     .unwrap();
///
/// assert_eq!(context.performance().timeout_ms, 15_000);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TransactionContextBuilder {
    business: Option<BusinessContext>,
    performance: Option<PerformanceConfig>,
    metrics: Option<MetricsContext>,
    authorization: Option<AuthorizationContext>,
    audit: Option<AuditContext>,
    notification: Option<NotificationContext>,
    tags: BTreeMap<String, String>,
    custom_metrics: BTreeMap<String, f64>,
}

impl TransactionContextBuilder {
    /// An empty builder. Business, performance and metrics fragments must all
    /// be supplied before [`build`](Self::build) succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder seeded with a fresh metrics context and the default
    /// performance config (30 s timeout, metrics enabled).
    pub fn create() -> Self {
        Self::create_with_id(TransactionId::new())
    }

    pub fn create_with_id(transaction_id: TransactionId) -> Self {
        Self {
            metrics: Some(MetricsContext::new(transaction_id)),
            performance: Some(PerformanceConfig::default()),
            ..Self::default()
        }
    }

    /// A correlation id is generated when the business context has none.
    pub fn with_business(self, business: BusinessContext) -> Self {
        let business = BusinessContext {
            correlation_id: business.correlation_id.or_else(|| Some(CorrelationId::new())),
            ..business
        };
        Self {
            business: Some(business),
            ..self
        }
    }

    /// Merges the supplied overrides over the current performance config,
    /// or over the defaults when none was set yet.
    pub fn with_performance(self, overrides: PerformanceOverrides) -> Self {
        let base = self.performance.clone().unwrap_or_default();
        Self {
            performance: Some(overrides.apply(base)),
            ..self
        }
    }

    pub fn with_authorization(self, authorization: AuthorizationContext) -> Self {
        Self {
            authorization: Some(authorization),
            ..self
        }
    }

    pub fn with_audit(self, audit: AuditContext) -> Self {
        Self {
            audit: Some(audit),
            ..self
        }
    }

    pub fn with_notification(self, notification: NotificationContext) -> Self {
        Self {
            notification: Some(notification),
            ..self
        }
    }

    /// Replaces the metrics context; previously added tags are kept and merged.
    pub fn with_metrics(self, metrics: MetricsContext) -> Self {
        Self {
            metrics: Some(metrics),
            ..self
        }
    }

    /// Later keys overwrite earlier ones.
    pub fn with_metrics_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tags
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_custom_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.custom_metrics.insert(name.into(), value);
        self
    }

    /// Validates the accumulated fragments and produces the context.
    ///
    /// # Errors
    ///
    /// [`ContextError::MissingRequiredContext`] when the business,
    /// performance or metrics fragment was never supplied, and
    /// [`ContextError::Invalid`] when the performance config is inconsistent.
    pub fn build(&self) -> Result<TransactionContext, ContextError> {
        let business = self
            .business
            .clone()
            .ok_or(ContextError::MissingRequiredContext("business"))?;
        let performance = self
            .performance
            .clone()
            .ok_or(ContextError::MissingRequiredContext("performance"))?;
        let mut metrics = self
            .metrics
            .clone()
            .ok_or(ContextError::MissingRequiredContext("metrics"))?;

        performance.validate()?;

        metrics.tags.extend(self.tags.clone());
        metrics.custom_metrics.extend(self.custom_metrics.clone());

        Ok(TransactionContext::new(
            business,
            performance,
            metrics,
            self.authorization.clone(),
            self.audit.clone(),
            self.notification.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::{
        Attributes, BackoffStrategy, ComplianceLevel, DeliveryMode, RetryPolicy, User,
    };
    use crate::error::ErrorKind;
    use serde_json::json;

    fn business() -> BusinessContext {
        BusinessContext::new("ADD_EMPLOYEE", "hourly-employee-onboarding")
    }

    #[test]
    fn test_missing_business_fails() {
        let err = TransactionContextBuilder::create().build().unwrap_err();
        assert_eq!(err, ContextError::MissingRequiredContext("business"));
        assert_eq!(err.kind(), ErrorKind::MissingRequiredContext);
    }

    #[test]
    fn test_missing_performance_fails() {
        let builder = TransactionContextBuilder::new()
            .with_business(business())
            .with_metrics(MetricsContext::new(TransactionId::new()));
        assert_eq!(
            builder.build().unwrap_err(),
            ContextError::MissingRequiredContext("performance")
        );
    }

    #[test]
    fn test_missing_metrics_fails() {
        let builder = TransactionContextBuilder::new()
            .with_business(business())
            .with_performance(PerformanceOverrides::default());
        assert_eq!(
            builder.build().unwrap_err(),
            ContextError::MissingRequiredContext("metrics")
        );
    }

    #[test]
    fn test_create_seeds_defaults() {
        let id = TransactionId::new();
        let context = TransactionContextBuilder::create_with_id(id)
            .with_business(business())
            .build()
            .unwrap();

        assert_eq!(context.transaction_id(), id);
        assert_eq!(context.performance().timeout_ms, 30_000);
        assert!(context.performance().enable_metrics);
        assert!(context.business().correlation_id.is_some());
        assert!(context.authorization().is_none());
        assert!(context.audit().is_none());
        assert!(context.notification().is_none());
    }

    #[test]
    fn test_supplied_correlation_id_is_kept() {
        let correlation = CorrelationId::new();
        let context = TransactionContextBuilder::create()
            .with_business(business().with_correlation_id(correlation))
            .build()
            .unwrap();
        assert_eq!(context.business().correlation_id, Some(correlation));
    }

    #[test]
    fn test_performance_overrides_merge() {
        let policy = RetryPolicy::new(3, BackoffStrategy::Exponential).with_delays(1_000, 5_000);
        let context = TransactionContextBuilder::create()
            .with_business(business())
            .with_performance(PerformanceOverrides::default().retry_policy(policy.clone()))
            .with_performance(PerformanceOverrides::default().timeout_ms(15_000))
            .build()
            .unwrap();

        assert_eq!(context.performance().timeout_ms, 15_000);
        assert_eq!(context.performance().retry_policy, Some(policy));
        assert_eq!(context.performance().max_attempts(), 3);
    }

    #[test]
    fn test_invalid_performance_rejected() {
        let result = TransactionContextBuilder::create()
            .with_business(business())
            .with_performance(PerformanceOverrides::default().timeout_ms(0))
            .build();
        assert!(matches!(result, Err(ContextError::Invalid(_))));
    }

    #[test]
    fn test_metrics_tags_merge() {
        let context = TransactionContextBuilder::create()
            .with_business(business())
            .with_metrics_tags([("operation", "add_employee"), ("department", "ops")])
            .with_metrics_tags([("department", "engineering")])
            .with_custom_metric("initial_time_cards", 2.0)
            .build()
            .unwrap();

        let tags = &context.metrics().tags;
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["department"], "engineering");
        assert_eq!(context.metrics().custom_metrics["initial_time_cards"], 2.0);
    }

    #[test]
    fn test_caller_mutation_after_build_does_not_leak() {
        let mut data = Attributes::new();
        data.insert("employeeName".to_string(), json!("Alice"));

        let context = TransactionContextBuilder::create()
            .with_business(business().with_metadata(data.clone()))
            .with_audit(
                AuditContext::new(
                    "ADD_HOURLY_EMPLOYEE",
                    "Employee",
                    "1".into(),
                    "system".into(),
                    ComplianceLevel::High,
                )
                .with_business_data(data.clone()),
            )
            .build()
            .unwrap();

        data.insert("employeeName".to_string(), json!("Mallory"));

        let audit_data = context.audit().unwrap().business_data.as_ref().unwrap();
        assert_eq!(audit_data["employeeName"], json!("Alice"));
        assert_eq!(
            context.business().metadata.as_ref().unwrap()["employeeName"],
            json!("Alice")
        );
    }

    #[test]
    fn test_template_builder_reuse_is_isolated() {
        let template = TransactionContextBuilder::create().with_business(business());

        let with_notification = template
            .clone()
            .with_notification(
                NotificationContext::new("EMPLOYEE_ADDED", "Employee", "1".into())
                    .with_delivery_mode(DeliveryMode::Sync),
            )
            .with_authorization(AuthorizationContext::new("ADD_EMPLOYEE", User::new("alice")))
            .build()
            .unwrap();
        let plain = template.build().unwrap();

        assert!(with_notification.notification().is_some());
        assert!(with_notification.authorization().is_some());
        assert!(plain.notification().is_none());
        assert!(plain.authorization().is_none());
    }
}
