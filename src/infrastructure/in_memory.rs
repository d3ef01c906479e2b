use crate::domain::context::{MetricsContext, NotificationContext};
use crate::domain::ids::UserId;
use crate::domain::ports::{
    AuditErrorRecord, AuditRecord, AuditService, AuthorizationRequest, AuthorizationService,
    DeadLetterSink, MetricsCollector, NotificationService,
};
use crate::error::{ErrorKind, Result, TransactionError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

/// Grants permissions from an in-memory table keyed by user.
///
/// Uses `Arc<RwLock<..>>` so clones share the same grants.
#[derive(Default, Clone)]
pub struct InMemoryAuthorizationService {
    grants: Arc<RwLock<HashMap<UserId, HashSet<String>>>>,
    checks: Arc<AtomicUsize>,
}

impl InMemoryAuthorizationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the table before the service is shared.
    pub fn with_grants<I, P>(user: impl Into<UserId>, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let mut grants: HashMap<UserId, HashSet<String>> = HashMap::new();
        grants.insert(
            user.into(),
            permissions.into_iter().map(Into::into).collect(),
        );
        Self {
            grants: Arc::new(RwLock::new(grants)),
            checks: Arc::default(),
        }
    }

    pub async fn grant(&self, user: impl Into<UserId>, permission: impl Into<String>) {
        let mut grants = self.grants.write().await;
        grants
            .entry(user.into())
            .or_default()
            .insert(permission.into());
    }

    pub async fn revoke(&self, user: &UserId, permission: &str) {
        let mut grants = self.grants.write().await;
        if let Some(permissions) = grants.get_mut(user) {
            permissions.remove(permission);
        }
    }

    /// Number of permission checks served so far.
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizationService for InMemoryAuthorizationService {
    async fn check_permission(
        &self,
        permission: &str,
        request: &AuthorizationRequest,
    ) -> Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let grants = self.grants.read().await;
        Ok(grants
            .get(&request.user.id)
            .is_some_and(|permissions| permissions.contains(permission)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    Action { name: String, record: AuditRecord },
    Error { name: String, record: AuditErrorRecord },
}

impl AuditEvent {
    pub fn name(&self) -> &str {
        match self {
            AuditEvent::Action { name, .. } | AuditEvent::Error { name, .. } => name,
        }
    }
}

/// Records audit events in memory; can be switched into a failing mode.
#[derive(Default, Clone)]
pub struct InMemoryAuditService {
    events: Arc<RwLock<Vec<AuditEvent>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryAuditService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent call fails with `AuditLoggingFailure`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_named(&self, name: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| event.name() == name)
            .cloned()
            .collect()
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransactionError::new(
                ErrorKind::AuditLogging,
                "audit store unavailable",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditService for InMemoryAuditService {
    async fn log_business_action(&self, name: &str, record: &AuditRecord) -> Result<()> {
        self.check_available()?;
        self.events.write().await.push(AuditEvent::Action {
            name: name.to_string(),
            record: record.clone(),
        });
        Ok(())
    }

    async fn log_business_error(&self, name: &str, record: &AuditErrorRecord) -> Result<()> {
        self.check_available()?;
        self.events.write().await.push(AuditEvent::Error {
            name: name.to_string(),
            record: record.clone(),
        });
        Ok(())
    }
}

/// Collects delivered notifications, optionally after a delay or failing.
#[derive(Default, Clone)]
pub struct InMemoryNotificationService {
    delivered: Arc<RwLock<Vec<NotificationContext>>>,
    latency: Duration,
    failing: Arc<AtomicBool>,
}

impl InMemoryNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn delivered(&self) -> Vec<NotificationContext> {
        self.delivered.read().await.clone()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn notify(&self, notification: &NotificationContext) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransactionError::transient(format!(
                "notification channel unavailable for {}",
                notification.event_type
            )));
        }
        self.delivered.write().await.push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub started: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub last_duration: Option<Duration>,
    pub last_error_code: Option<String>,
}

/// Counts lifecycle callbacks.
#[derive(Default, Clone)]
pub struct InMemoryMetricsCollector {
    state: Arc<Mutex<MetricsSnapshot>>,
}

impl InMemoryMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsSnapshot> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MetricsCollector for InMemoryMetricsCollector {
    fn start_transaction(&self, _context: &MetricsContext) {
        self.lock().started += 1;
    }

    fn record_success(&self, _context: &MetricsContext, duration: Duration) {
        let mut state = self.lock();
        state.succeeded += 1;
        state.last_duration = Some(duration);
    }

    fn record_error(&self, _context: &MetricsContext, error: &TransactionError, duration: Duration) {
        let mut state = self.lock();
        state.failed += 1;
        state.last_duration = Some(duration);
        state.last_error_code = Some(error.code().to_string());
    }
}

/// Keeps failed background notifications for inspection.
#[derive(Default, Clone)]
pub struct InMemoryDeadLetterSink {
    letters: Arc<Mutex<Vec<(NotificationContext, String)>>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each entry pairs the notification with the failure message.
    pub fn letters(&self) -> Vec<(NotificationContext, String)> {
        self.letters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn record(&self, notification: &NotificationContext, error: &TransactionError) {
        self.letters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((notification.clone(), error.to_string()));
    }
}
