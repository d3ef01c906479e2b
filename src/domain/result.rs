use super::ids::TransactionId;
use crate::error::{ErrorKind, TransactionError};
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Timing and identity of a finished transaction, present on both outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetadata {
    pub transaction_id: TransactionId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(rename = "durationMs", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub retry_count: u32,
    pub tags: BTreeMap<String, String>,
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Handle on an async notification still being delivered in the background.
///
/// Dropping it does not stop delivery.
#[derive(Debug)]
pub struct NotificationHandle {
    handle: JoinHandle<Result<(), TransactionError>>,
}

impl NotificationHandle {
    pub(crate) fn new(handle: JoinHandle<Result<(), TransactionError>>) -> Self {
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for delivery to settle and returns its outcome.
    pub async fn settled(self) -> Result<(), TransactionError> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(TransactionError::wrap(ErrorKind::NotificationDelivery, join_err)
                .with_retryable(false)),
        }
    }
}

#[derive(Debug)]
pub enum TransactionResult<T> {
    Success {
        data: T,
        metadata: TransactionMetadata,
        /// Non-fatal problems, e.g. a failed sync notification.
        warnings: Vec<TransactionError>,
        notification: Option<NotificationHandle>,
    },
    Failure {
        error: TransactionError,
        metadata: TransactionMetadata,
    },
}

impl<T> TransactionResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, TransactionResult::Success { .. })
    }

    pub fn metadata(&self) -> &TransactionMetadata {
        match self {
            TransactionResult::Success { metadata, .. } => metadata,
            TransactionResult::Failure { metadata, .. } => metadata,
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            TransactionResult::Success { data, .. } => Some(data),
            TransactionResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&TransactionError> {
        match self {
            TransactionResult::Success { .. } => None,
            TransactionResult::Failure { error, .. } => Some(error),
        }
    }

    pub fn warnings(&self) -> &[TransactionError] {
        match self {
            TransactionResult::Success { warnings, .. } => warnings,
            TransactionResult::Failure { .. } => &[],
        }
    }

    /// Detaches the background notification handle, if any.
    pub fn take_notification(&mut self) -> Option<NotificationHandle> {
        match self {
            TransactionResult::Success { notification, .. } => notification.take(),
            TransactionResult::Failure { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<T, TransactionError> {
        match self {
            TransactionResult::Success { data, .. } => Ok(data),
            TransactionResult::Failure { error, .. } => Err(error),
        }
    }
}

impl<T: Serialize> Serialize for TransactionResult<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            TransactionResult::Success {
                data,
                metadata,
                warnings,
                notification,
            } => {
                let mut state = serializer.serialize_struct("TransactionResult", 5)?;
                state.serialize_field("success", &true)?;
                state.serialize_field("data", data)?;
                state.serialize_field("metadata", metadata)?;
                state.serialize_field("warnings", warnings)?;
                state.serialize_field("notificationPending", &notification.is_some())?;
                state.end()
            }
            TransactionResult::Failure { error, metadata } => {
                let mut state = serializer.serialize_struct("TransactionResult", 3)?;
                state.serialize_field("success", &false)?;
                state.serialize_field("error", error)?;
                state.serialize_field("metadata", metadata)?;
                state.end()
            }
        }
    }
}
