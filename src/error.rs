use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification tag attached to every failure the framework reports.
///
/// The serialized form (and [`ErrorKind::as_str`]) is the stable code callers
/// match on, e.g. `"Timeout"` or `"PermissionDenied"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    PermissionDenied,
    Timeout,
    #[serde(rename = "TransientInfrastructureError")]
    TransientInfrastructure,
    #[serde(rename = "BusinessLogicError")]
    BusinessLogic,
    #[serde(rename = "NotificationDeliveryFailure")]
    NotificationDelivery,
    #[serde(rename = "AuditLoggingFailure")]
    AuditLogging,
    MissingRequiredContext,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::TransientInfrastructure => "TransientInfrastructureError",
            ErrorKind::BusinessLogic => "BusinessLogicError",
            ErrorKind::NotificationDelivery => "NotificationDeliveryFailure",
            ErrorKind::AuditLogging => "AuditLoggingFailure",
            ErrorKind::MissingRequiredContext => "MissingRequiredContext",
        }
    }

    /// Kinds considered worth retrying when no retry policy narrows the set.
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::TransientInfrastructure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PermissionDenied" => Ok(ErrorKind::PermissionDenied),
            "Timeout" => Ok(ErrorKind::Timeout),
            "TransientInfrastructureError" => Ok(ErrorKind::TransientInfrastructure),
            "BusinessLogicError" => Ok(ErrorKind::BusinessLogic),
            "NotificationDeliveryFailure" => Ok(ErrorKind::NotificationDelivery),
            "AuditLoggingFailure" => Ok(ErrorKind::AuditLogging),
            "MissingRequiredContext" => Ok(ErrorKind::MissingRequiredContext),
            other => Err(format!("unknown error kind: {other}")),
        }
    }
}

/// A classified failure produced by business logic, a collaborator, or the
/// executor itself.
///
/// `retryable` is a hint for the caller: whether re-invoking the whole
/// transaction might succeed.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct TransactionError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub context: BTreeMap<String, String>,
    #[source]
    pub source: Option<BoxError>,
    terminal: bool,
}

impl TransactionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable_by_default(),
            context: BTreeMap::new(),
            source: None,
            terminal: false,
        }
    }

    /// Domain-level failure raised by business logic.
    pub fn business(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BusinessLogic, message)
    }

    /// Network or service-unavailable class failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientInfrastructure, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    /// Wraps any error as a failure of the given kind, keeping it as the source.
    pub fn wrap<E>(kind: ErrorKind, err: E) -> Self
    where
        E: Into<BoxError>,
    {
        let source: BoxError = err.into();
        let mut error = Self::new(kind, source.to_string());
        error.source = Some(source);
        error
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Marks the failure as never retryable, whatever kinds a retry policy
    /// lists. Used for attempts that panicked.
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self.retryable = false;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// The stable error-kind tag.
    pub fn code(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl Serialize for TransactionError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("TransactionError", 5)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("retryable", &self.retryable)?;
        state.serialize_field("context", &self.context)?;
        state.serialize_field("cause", &self.source.as_ref().map(|s| s.to_string()))?;
        state.end()
    }
}

/// Raised by [`crate::domain::builder::TransactionContextBuilder::build`]
/// before anything executes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Missing required context: {0}")]
    MissingRequiredContext(&'static str),
    #[error("Invalid context: {0}")]
    Invalid(String),
}

impl ContextError {
    /// Both variants carry the `MissingRequiredContext` tag: an inconsistent
    /// fragment is reported the same way as an absent one, and the message
    /// tells them apart.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContextError::MissingRequiredContext(_) | ContextError::Invalid(_) => {
                ErrorKind::MissingRequiredContext
            }
        }
    }
}

impl From<ContextError> for TransactionError {
    fn from(err: ContextError) -> Self {
        TransactionError::wrap(ErrorKind::MissingRequiredContext, err).with_retryable(false)
    }
}

pub type Result<T> = std::result::Result<T, TransactionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_round_trip_through_from_str() {
        for kind in [
            ErrorKind::PermissionDenied,
            ErrorKind::Timeout,
            ErrorKind::TransientInfrastructure,
            ErrorKind::BusinessLogic,
            ErrorKind::NotificationDelivery,
            ErrorKind::AuditLogging,
            ErrorKind::MissingRequiredContext,
        ] {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
        assert!("NetworkError".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_kind_serializes_as_code() {
        let json = serde_json::to_string(&ErrorKind::TransientInfrastructure).unwrap();
        assert_eq!(json, "\"TransientInfrastructureError\"");
    }

    #[test]
    fn test_wrap_keeps_source() {
        let io = std::io::Error::other("connection reset");
        let err = TransactionError::wrap(ErrorKind::TransientInfrastructure, io);

        assert_eq!(err.code(), "TransientInfrastructureError");
        assert_eq!(err.message, "connection reset");
        assert!(err.retryable);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_business_errors_not_retryable_by_default() {
        let err = TransactionError::business("insufficient balance");
        assert!(!err.retryable);
        assert_eq!(err.to_string(), "BusinessLogicError: insufficient balance");
    }

    #[test]
    fn test_serialized_error_carries_code_and_cause() {
        let err = TransactionError::wrap(ErrorKind::Timeout, "too slow")
            .with_context("operationType", "ADD_EMPLOYEE");
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["code"], "Timeout");
        assert_eq!(json["cause"], "too slow");
        assert_eq!(json["context"]["operationType"], "ADD_EMPLOYEE");
    }

    #[test]
    fn test_terminal_errors_stay_non_retryable() {
        let err = TransactionError::business("callback panicked").terminal();
        assert!(err.is_terminal());
        assert!(!err.retryable);
        assert!(!TransactionError::business("rejected").is_terminal());
    }

    #[test]
    fn test_invalid_context_shares_missing_context_tag() {
        let invalid = ContextError::Invalid("timeoutMs must be greater than zero".to_string());
        assert_eq!(invalid.kind(), ErrorKind::MissingRequiredContext);

        let err: TransactionError = invalid.into();
        assert_eq!(err.code(), "MissingRequiredContext");
        assert_eq!(err.message, "Invalid context: timeoutMs must be greater than zero");
        assert!(!err.retryable);
    }
}
