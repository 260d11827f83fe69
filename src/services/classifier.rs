use serde::{Deserialize, Serialize};

use crate::models::error::{ErrorKind, ErrorRecord};

/// Failure signal as reported by a platform adapter, before classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct RawError {
    /// HTTP status returned by the platform, if any.
    pub status: Option<u16>,
    /// Platform or transport error code (e.g. `RATE_LIMITED`, `ECONNRESET`).
    pub code: Option<String>,
    pub message: String,
    /// Platform-provided `Retry-After`, in seconds.
    pub retry_after: Option<u64>,
}

impl RawError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Classify a raw failure. Explicit status or error codes win; the message
/// heuristics only run when the adapter supplied neither.
pub fn classify(raw: &RawError) -> ErrorRecord {
    let kind = raw
        .status
        .and_then(kind_for_status)
        .or_else(|| raw.code.as_deref().and_then(kind_for_code))
        .or_else(|| {
            if raw.status.is_none() && raw.code.is_none() {
                kind_for_message(&raw.message)
            } else {
                None
            }
        })
        .unwrap_or(ErrorKind::Unknown);

    let mut record = ErrorRecord::from_kind(kind, raw.message.clone());
    if record.retryable {
        if let Some(after) = raw.retry_after {
            record.suggested_retry_after_seconds = Some(after);
        }
    }
    record
}

fn kind_for_status(status: u16) -> Option<ErrorKind> {
    match status {
        429 => Some(ErrorKind::RateLimited),
        408 | 504 => Some(ErrorKind::Timeout),
        500 | 502 | 503 => Some(ErrorKind::PlatformUnavailable),
        400 | 404 | 422 => Some(ErrorKind::Validation),
        409 => Some(ErrorKind::Conflict),
        401 | 403 => Some(ErrorKind::PermissionDenied),
        _ => None,
    }
}

fn kind_for_code(code: &str) -> Option<ErrorKind> {
    match code.to_ascii_uppercase().as_str() {
        "RATE_LIMITED" | "RATE_LIMIT_EXCEEDED" | "TOO_MANY_REQUESTS" | "QUOTA_EXCEEDED" => {
            Some(ErrorKind::RateLimited)
        }
        "TIMEOUT" | "ETIMEDOUT" | "ESOCKETTIMEDOUT" | "GATEWAY_TIMEOUT" => Some(ErrorKind::Timeout),
        "SERVICE_UNAVAILABLE" | "MAINTENANCE" | "PLATFORM_UNAVAILABLE" | "INTERNAL_ERROR" => {
            Some(ErrorKind::PlatformUnavailable)
        }
        "NETWORK" | "ECONNRESET" | "ECONNREFUSED" | "ENOTFOUND" | "EAI_AGAIN" | "EPIPE" => {
            Some(ErrorKind::Network)
        }
        "VALIDATION" | "INVALID_PARAMETER" | "INVALID_REQUEST" | "MISSING_FIELD" => {
            Some(ErrorKind::Validation)
        }
        "CONFLICT" | "DUPLICATE" | "ALREADY_EXISTS" => Some(ErrorKind::Conflict),
        "PERMISSION_DENIED" | "FORBIDDEN" | "UNAUTHORIZED" | "INVALID_TOKEN" => {
            Some(ErrorKind::PermissionDenied)
        }
        _ => None,
    }
}

// Order matters: "invalid token" is a permission problem, not validation.
const MESSAGE_PATTERNS: &[(&[&str], ErrorKind)] = &[
    (
        &["rate limit", "too many requests", "throttl", "quota"],
        ErrorKind::RateLimited,
    ),
    (&["timed out", "timeout", "deadline exceeded"], ErrorKind::Timeout),
    (
        &[
            "unauthorized",
            "forbidden",
            "permission",
            "access denied",
            "invalid token",
            "token expired",
        ],
        ErrorKind::PermissionDenied,
    ),
    (
        &["duplicate", "already exists", "conflict"],
        ErrorKind::Conflict,
    ),
    (
        &["service unavailable", "maintenance", "bad gateway", "unavailable"],
        ErrorKind::PlatformUnavailable,
    ),
    (
        &[
            "connection reset",
            "connection refused",
            "network",
            "dns",
            "socket hang up",
        ],
        ErrorKind::Network,
    ),
    (
        &["validation", "invalid", "required field", "missing", "malformed"],
        ErrorKind::Validation,
    ),
];

fn kind_for_message(message: &str) -> Option<ErrorKind> {
    let lowered = message.to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lowered.contains(n)))
        .map(|(_, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::error::Severity;

    #[test]
    fn test_status_codes() {
        let cases = [
            (429, ErrorKind::RateLimited),
            (408, ErrorKind::Timeout),
            (504, ErrorKind::Timeout),
            (503, ErrorKind::PlatformUnavailable),
            (502, ErrorKind::PlatformUnavailable),
            (422, ErrorKind::Validation),
            (400, ErrorKind::Validation),
            (409, ErrorKind::Conflict),
            (401, ErrorKind::PermissionDenied),
            (403, ErrorKind::PermissionDenied),
        ];
        for (status, expected) in cases {
            let record = classify(&RawError::with_status(status, "whatever"));
            assert_eq!(record.kind, expected, "status {status}");
        }
    }

    #[test]
    fn test_policy_table() {
        let cases = [
            (ErrorKind::RateLimited, true, Some(300)),
            (ErrorKind::Timeout, true, Some(60)),
            (ErrorKind::PlatformUnavailable, true, Some(180)),
            (ErrorKind::Network, true, Some(30)),
            (ErrorKind::Validation, false, None),
            (ErrorKind::Conflict, false, None),
            (ErrorKind::PermissionDenied, false, None),
            (ErrorKind::Unknown, true, Some(60)),
        ];
        for (kind, retryable, delay) in cases {
            let record = ErrorRecord::from_kind(kind, "x");
            assert_eq!(record.retryable, retryable, "{kind}");
            assert_eq!(record.suggested_retry_after_seconds, delay, "{kind}");
        }
    }

    #[test]
    fn test_signal_beats_message() {
        // Message says "rate limit" but the platform said 409.
        let raw = RawError::with_status(409, "rate limit exceeded while inserting");
        assert_eq!(classify(&raw).kind, ErrorKind::Conflict);

        let raw = RawError::with_code("ECONNRESET", "validation failed");
        assert_eq!(classify(&raw).kind, ErrorKind::Network);
    }

    #[test]
    fn test_unmatched_explicit_code_does_not_fall_back_to_message() {
        let raw = RawError::with_status(418, "invalid teapot");
        assert_eq!(classify(&raw).kind, ErrorKind::Unknown);
    }

    #[test]
    fn test_message_heuristics() {
        let cases = [
            ("Too Many Requests", ErrorKind::RateLimited),
            ("request timed out after 30s", ErrorKind::Timeout),
            ("Service Unavailable", ErrorKind::PlatformUnavailable),
            ("connection reset by peer", ErrorKind::Network),
            ("price is invalid", ErrorKind::Validation),
            ("SKU already exists", ErrorKind::Conflict),
            ("Invalid token", ErrorKind::PermissionDenied),
            ("access denied for shop", ErrorKind::PermissionDenied),
        ];
        for (message, expected) in cases {
            assert_eq!(classify(&RawError::message(message)).kind, expected, "{message}");
        }
    }

    #[test]
    fn test_unknown_defaults() {
        let record = classify(&RawError::message("something odd happened"));
        assert_eq!(record.kind, ErrorKind::Unknown);
        assert_eq!(record.severity, Severity::Medium);
        assert!(record.retryable);
        assert_eq!(record.suggested_retry_after_seconds, Some(60));
        assert_eq!(record.raw_message, "something odd happened");
    }

    #[test]
    fn test_retry_after_overrides_default_delay() {
        let raw = RawError {
            status: Some(429),
            retry_after: Some(12),
            message: "slow down".into(),
            ..Default::default()
        };
        assert_eq!(classify(&raw).suggested_retry_after_seconds, Some(12));

        let raw = RawError {
            status: Some(422),
            retry_after: Some(12),
            message: "bad".into(),
            ..Default::default()
        };
        assert_eq!(classify(&raw).suggested_retry_after_seconds, None);
    }

    #[test]
    fn test_deterministic() {
        let raw = RawError::message("gateway timeout");
        assert_eq!(classify(&raw), classify(&raw));
    }
}
