//! Per-attempt deadline enforcement.
//!
//! The guard races an attempt against a timer. It cannot preempt running
//! code: when the timer wins, the attempt's [`CancellationToken`] is
//! cancelled and the attempt task is detached. Business logic that never
//! checks its token keeps running to completion in the background and its
//! result is discarded. The timeout bounds how long the caller waits, not
//! how long the work runs.

use crate::error::{ErrorKind, Result, TransactionError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

/// Cooperative cancellation signal shared between the guard and one attempt.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so the channel never closes here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// What the business logic receives for each attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    number: u32,
    token: CancellationToken,
}

impl Attempt {
    pub fn new(number: u32, token: CancellationToken) -> Self {
        Self { number, token }
    }

    /// 1-based attempt number.
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    timeout: Duration,
}

impl TimeoutGuard {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `operation` on its own task and returns whichever settles first:
    /// the operation, or the deadline as a `Timeout` error.
    ///
    /// A panicking operation is reported as a terminal `BusinessLogicError`,
    /// which no retry policy retries.
    pub async fn run<T, Fut>(&self, operation: Fut, token: &CancellationToken) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let mut task = tokio::spawn(operation);

        tokio::select! {
            joined = &mut task => match joined {
                Ok(outcome) => outcome,
                Err(join_err) => Err(TransactionError::wrap(ErrorKind::BusinessLogic, join_err)
                    .terminal()),
            },
            _ = tokio::time::sleep(self.timeout) => {
                token.cancel();
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Attempt timed out, abandoning it");
                Err(TransactionError::timeout(format!(
                    "Transaction timed out after {} ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}
