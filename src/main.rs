use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use txexec::application::executor::TransactionExecutor;
use txexec::application::retry::{FixedJitter, JitterSource, RandomJitter};
use txexec::domain::ports::{AuditServiceRef, AuthorizationServiceRef, NotificationServiceRef};
use txexec::infrastructure::in_memory::{InMemoryAuditService, InMemoryNotificationService};
use txexec::infrastructure::logging::{TracingDeadLetterSink, TracingMetricsCollector};
use txexec::interfaces::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the JSON result
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let context = cli.context().into_diagnostic()?;

    let notifications = InMemoryNotificationService::new();
    notifications.set_failing(cli.fail_notification);

    let authorization: AuthorizationServiceRef = Arc::new(cli.authorization_service());
    let audit: AuditServiceRef = Arc::new(InMemoryAuditService::new());
    let notification_service: NotificationServiceRef = Arc::new(notifications);

    let jitter: Arc<dyn JitterSource> = if cli.no_jitter {
        Arc::new(FixedJitter::NONE)
    } else {
        Arc::new(RandomJitter)
    };

    let executor = TransactionExecutor::new(authorization, audit, notification_service)
        .with_metrics(Arc::new(TracingMetricsCollector))
        .with_dead_letters(Arc::new(TracingDeadLetterSink))
        .with_jitter(jitter);

    let workload = cli.workload();
    let mut result = executor
        .execute(context, move |attempt| workload.clone().run(attempt))
        .await;

    let json = serde_json::to_string_pretty(&result).into_diagnostic()?;
    println!("{json}");

    // Let a background notification finish before the runtime shuts down
    if let Some(pending) = result.take_notification()
        && let Err(e) = pending.settled().await
    {
        tracing::warn!(error = %e, "Background notification did not complete");
    }

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
