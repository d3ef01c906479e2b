#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use txexec::application::executor::TransactionExecutor;
use txexec::application::retry::FixedJitter;
use txexec::domain::builder::TransactionContextBuilder;
use txexec::domain::context::{AuditContext, BusinessContext, ComplianceLevel};
use txexec::infrastructure::in_memory::{
    InMemoryAuditService, InMemoryAuthorizationService, InMemoryDeadLetterSink,
    InMemoryMetricsCollector, InMemoryNotificationService,
};

/// In-memory collaborators wired into an executor with jitter disabled.
pub struct Harness {
    pub authorization: InMemoryAuthorizationService,
    pub audit: InMemoryAuditService,
    pub notifications: InMemoryNotificationService,
    pub metrics: InMemoryMetricsCollector,
    pub dead_letters: InMemoryDeadLetterSink,
    pub executor: TransactionExecutor,
}

pub fn harness() -> Harness {
    harness_with(
        InMemoryAuthorizationService::new(),
        InMemoryNotificationService::new(),
    )
}

pub fn harness_with(
    authorization: InMemoryAuthorizationService,
    notifications: InMemoryNotificationService,
) -> Harness {
    let audit = InMemoryAuditService::new();
    let metrics = InMemoryMetricsCollector::new();
    let dead_letters = InMemoryDeadLetterSink::new();

    let executor = TransactionExecutor::new(
        Arc::new(authorization.clone()),
        Arc::new(audit.clone()),
        Arc::new(notifications.clone()),
    )
    .with_metrics(Arc::new(metrics.clone()))
    .with_dead_letters(Arc::new(dead_letters.clone()))
    .with_jitter(Arc::new(FixedJitter::NONE));

    Harness {
        authorization,
        audit,
        notifications,
        metrics,
        dead_letters,
        executor,
    }
}

pub fn builder() -> TransactionContextBuilder {
    TransactionContextBuilder::create()
        .with_business(BusinessContext::new("ADD_EMPLOYEE", "hourly-employee-onboarding"))
        .with_metrics_tags([("operation", "add_employee")])
}

pub fn audit_context() -> AuditContext {
    AuditContext::new(
        "ADD_HOURLY_EMPLOYEE",
        "Employee",
        "1".into(),
        "system".into(),
        ComplianceLevel::High,
    )
}

/// Shared invocation counter for business-logic closures.
#[derive(Clone, Default)]
pub struct Calls(Arc<AtomicU32>);

impl Calls {
    pub fn hit(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}
