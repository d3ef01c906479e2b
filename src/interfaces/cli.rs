use crate::application::timeout::Attempt;
use crate::domain::builder::TransactionContextBuilder;
use crate::domain::context::{
    AuditContext, AuthorizationContext, BackoffStrategy, BusinessContext, ComplianceLevel,
    DEFAULT_TIMEOUT_MS, DeliveryMode, NotificationContext, PerformanceOverrides, RetryPolicy,
    TransactionContext, User,
};
use crate::domain::ids::{ResourceId, UserId};
use crate::error::{ContextError, ErrorKind, Result, TransactionError};
use crate::infrastructure::in_memory::InMemoryAuthorizationService;
use clap::Parser;
use serde::Serialize;
use std::time::Duration;

/// Runs one simulated transaction through the executor and prints the
/// result as JSON.
///
/// Every option can also be set through the matching `TXEXEC_*` variable.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Business operation type tag
    #[arg(long, env = "TXEXEC_OPERATION", default_value = "DEMO_OPERATION")]
    pub operation: String,

    /// Business domain the operation belongs to
    #[arg(long, env = "TXEXEC_DOMAIN", default_value = "demo")]
    pub domain: String,

    /// Per-attempt timeout in milliseconds
    #[arg(long, env = "TXEXEC_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Enables a retry policy with this many attempts
    #[arg(long, env = "TXEXEC_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// exponential, linear or fixed
    #[arg(long, env = "TXEXEC_BACKOFF", default_value = "exponential")]
    pub backoff: BackoffStrategy,

    #[arg(long, env = "TXEXEC_BASE_DELAY_MS", default_value_t = 100)]
    pub base_delay_ms: u64,

    #[arg(long, env = "TXEXEC_MAX_DELAY_MS", default_value_t = 1_000)]
    pub max_delay_ms: u64,

    /// Error kinds the retry policy retries on
    #[arg(
        long = "retry-on",
        env = "TXEXEC_RETRY_ON",
        value_delimiter = ',',
        default_values_t = [ErrorKind::Timeout, ErrorKind::TransientInfrastructure]
    )]
    pub retry_on: Vec<ErrorKind>,

    /// Number of attempts the simulated business logic fails before succeeding
    #[arg(long, env = "TXEXEC_FAIL_TIMES", default_value_t = 0)]
    pub fail_times: u32,

    /// Error kind the simulated failures carry
    #[arg(long, env = "TXEXEC_FAIL_WITH", default_value_t = ErrorKind::TransientInfrastructure)]
    pub fail_with: ErrorKind,

    /// Time each simulated attempt takes
    #[arg(long, env = "TXEXEC_LATENCY_MS", default_value_t = 0)]
    pub latency_ms: u64,

    /// Acting user; enables the authorization gate
    #[arg(long, env = "TXEXEC_USER")]
    pub user: Option<String>,

    /// Permission the gate requires
    #[arg(long, env = "TXEXEC_REQUIRE", default_value = "WRITE")]
    pub require: String,

    /// Permissions granted to the acting user
    #[arg(long = "grant", env = "TXEXEC_GRANTS", value_delimiter = ',')]
    pub grants: Vec<String>,

    /// Sends a notification in this delivery mode (sync or async)
    #[arg(long, env = "TXEXEC_NOTIFY")]
    pub notify: Option<DeliveryMode>,

    /// Makes notification delivery fail
    #[arg(long, env = "TXEXEC_FAIL_NOTIFICATION")]
    pub fail_notification: bool,

    /// Records audit events
    #[arg(long, env = "TXEXEC_AUDIT")]
    pub audit: bool,

    /// Disables retry jitter
    #[arg(long, env = "TXEXEC_NO_JITTER")]
    pub no_jitter: bool,

    /// Metrics tag as key=value; repeatable
    #[arg(long = "tag", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,
}

fn parse_tag(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid tag `{raw}`, expected key=value"))?;
    if key.is_empty() {
        return Err(format!("invalid tag `{raw}`, key is empty"));
    }
    Ok((key.to_string(), value.to_string()))
}

impl Cli {
    fn acting_user(&self) -> UserId {
        UserId::new(self.user.clone().unwrap_or_else(|| "system".to_string()))
    }

    /// Builds the transaction context the options describe.
    pub fn context(&self) -> std::result::Result<TransactionContext, ContextError> {
        let mut performance = PerformanceOverrides::default().timeout_ms(self.timeout_ms);
        if let Some(max_attempts) = self.max_attempts {
            performance = performance.retry_policy(
                RetryPolicy::new(max_attempts, self.backoff)
                    .with_delays(self.base_delay_ms, self.max_delay_ms)
                    .with_retryable_errors(self.retry_on.iter().copied()),
            );
        }

        let entity_id = ResourceId::new(format!("{}-1", self.domain));
        let mut builder = TransactionContextBuilder::create()
            .with_business(BusinessContext::new(&self.operation, &self.domain))
            .with_performance(performance)
            .with_metrics_tags(self.tags.iter().cloned())
            .with_metrics_tags([("operation", self.operation.to_lowercase())]);

        if let Some(user) = &self.user {
            builder = builder.with_authorization(
                AuthorizationContext::new(&self.require, User::new(user.as_str()))
                    .on_resource("Demo", entity_id.clone()),
            );
        }
        if self.audit {
            builder = builder.with_audit(AuditContext::new(
                &self.operation,
                "Demo",
                entity_id.clone(),
                self.acting_user(),
                ComplianceLevel::Medium,
            ));
        }
        if let Some(mode) = self.notify {
            builder = builder.with_notification(
                NotificationContext::new(format!("{}_COMPLETED", self.operation), "Demo", entity_id)
                    .with_delivery_mode(mode),
            );
        }

        builder.build()
    }

    /// Authorization table holding the granted permissions for the acting user.
    pub fn authorization_service(&self) -> InMemoryAuthorizationService {
        InMemoryAuthorizationService::with_grants(self.acting_user(), self.grants.iter().cloned())
    }

    pub fn workload(&self) -> SimulatedWorkload {
        SimulatedWorkload {
            operation: self.operation.clone(),
            fail_times: self.fail_times,
            fail_with: self.fail_with,
            latency: Duration::from_millis(self.latency_ms),
        }
    }
}

/// Business logic stand-in: fails the first `fail_times` attempts, then
/// succeeds. Each attempt takes `latency` unless cancelled first.
#[derive(Debug, Clone)]
pub struct SimulatedWorkload {
    pub operation: String,
    pub fail_times: u32,
    pub fail_with: ErrorKind,
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadReport {
    pub operation: String,
    pub attempt: u32,
}

impl SimulatedWorkload {
    pub async fn run(self, attempt: Attempt) -> Result<WorkloadReport> {
        tokio::select! {
            _ = tokio::time::sleep(self.latency) => {}
            _ = attempt.token().cancelled() => {
                return Err(TransactionError::timeout("cancelled by deadline"));
            }
        }

        if attempt.number() <= self.fail_times {
            return Err(TransactionError::new(
                self.fail_with,
                format!("simulated failure on attempt {}", attempt.number()),
            ));
        }
        Ok(WorkloadReport {
            operation: self.operation,
            attempt: attempt.number(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::timeout::CancellationToken;

    #[test]
    fn test_defaults_build_minimal_context() {
        let cli = Cli::parse_from(["txexec"]);
        let context = cli.context().unwrap();

        assert_eq!(context.business().operation_type, "DEMO_OPERATION");
        assert_eq!(context.performance().timeout_ms, 30_000);
        assert!(context.performance().retry_policy.is_none());
        assert!(context.authorization().is_none());
        assert_eq!(context.metrics().tags["operation"], "demo_operation");
    }

    #[test]
    fn test_retry_options_build_policy() {
        let cli = Cli::parse_from([
            "txexec",
            "--max-attempts",
            "3",
            "--backoff",
            "fixed",
            "--base-delay-ms",
            "100",
            "--max-delay-ms",
            "100",
            "--retry-on",
            "BusinessLogicError,Timeout",
        ]);
        let context = cli.context().unwrap();
        let policy = context.performance().retry_policy.clone().unwrap();

        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_strategy, BackoffStrategy::Fixed);
        assert!(policy.is_retryable(ErrorKind::BusinessLogic));
        assert!(!policy.is_retryable(ErrorKind::TransientInfrastructure));
    }

    #[test]
    fn test_optional_fragments() {
        let cli = Cli::parse_from([
            "txexec", "--user", "alice", "--require", "APPROVE", "--audit", "--notify", "sync",
            "--tag", "region=eu",
        ]);
        let context = cli.context().unwrap();

        let authorization = context.authorization().unwrap();
        assert_eq!(authorization.required_permission, "APPROVE");
        assert_eq!(authorization.user.id, UserId::new("alice"));
        assert_eq!(context.audit().unwrap().performed_by, UserId::new("alice"));
        assert_eq!(
            context.notification().unwrap().delivery_mode,
            DeliveryMode::Sync
        );
        assert_eq!(context.metrics().tags["region"], "eu");
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let cli = Cli::parse_from(["txexec", "--timeout-ms", "0"]);
        assert!(matches!(cli.context(), Err(ContextError::Invalid(_))));
    }

    #[test]
    fn test_bad_tag_is_rejected() {
        assert!(Cli::try_parse_from(["txexec", "--tag", "novalue"]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_workload_fails_then_succeeds() {
        let workload = SimulatedWorkload {
            operation: "OP".to_string(),
            fail_times: 1,
            fail_with: ErrorKind::TransientInfrastructure,
            latency: Duration::from_millis(10),
        };

        let first = workload
            .clone()
            .run(Attempt::new(1, CancellationToken::new()))
            .await;
        assert_eq!(first.unwrap_err().kind, ErrorKind::TransientInfrastructure);

        let second = workload.run(Attempt::new(2, CancellationToken::new())).await;
        assert_eq!(second.unwrap().attempt, 2);
    }
}
