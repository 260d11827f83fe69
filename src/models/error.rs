use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Canonical failure taxonomy shared by the retry executor, the circuit
/// breaker and the job queue.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    Timeout,
    PlatformUnavailable,
    Network,
    Validation,
    Conflict,
    PermissionDenied,
    Unknown,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::PermissionDenied
        )
    }

    /// Default delay before the next attempt, in seconds.
    pub fn default_retry_after(self) -> Option<u64> {
        match self {
            ErrorKind::RateLimited => Some(300),
            ErrorKind::Timeout => Some(60),
            ErrorKind::PlatformUnavailable => Some(180),
            ErrorKind::Network => Some(30),
            ErrorKind::Unknown => Some(60),
            ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::PermissionDenied => None,
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::Validation | ErrorKind::Conflict => Severity::Low,
            ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::Network => Severity::Medium,
            ErrorKind::Unknown => Severity::Medium,
            ErrorKind::PlatformUnavailable | ErrorKind::PermissionDenied => Severity::High,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A classified failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub suggested_retry_after_seconds: Option<u64>,
    pub raw_message: String,
}

impl ErrorRecord {
    /// Record carrying the taxonomy defaults for `kind`.
    pub fn from_kind(kind: ErrorKind, raw_message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            retryable: kind.is_retryable(),
            suggested_retry_after_seconds: kind.default_retry_after(),
            raw_message: raw_message.into(),
        }
    }
}
