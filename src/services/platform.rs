use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use std::time::Duration;

use crate::models::error::{ErrorKind, ErrorRecord};
use crate::services::classifier::{classify, RawError};

/// Capability exposed by every marketplace client. Implementations build and
/// sign their own requests; the queue only sees the outcome.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    async fn perform_request(
        &self,
        platform: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, RawError>;
}

/// Outcome of one guarded call to an external dependency.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("platform error: {0}")]
    Platform(#[from] RawError),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Dependency-level unavailability, not a property of the job.
    #[error("circuit for {key} is open, retry in {retry_in:?}")]
    CircuitOpen { key: String, retry_in: Duration },
}

impl CallError {
    /// Classify this failure with the shared taxonomy.
    pub fn record(&self) -> ErrorRecord {
        match self {
            CallError::Platform(raw) => classify(raw),
            CallError::Timeout(after) => {
                ErrorRecord::from_kind(ErrorKind::Timeout, format!("attempt timed out after {after:?}"))
            }
            CallError::CircuitOpen { .. } => {
                let mut record =
                    ErrorRecord::from_kind(ErrorKind::PlatformUnavailable, self.to_string());
                record.retryable = false;
                record
            }
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }
}

/// Generic adapter that forwards payloads to a signing gateway over HTTP.
pub struct HttpPlatformAdapter {
    http: Client,
    base_url: String,
}

impl HttpPlatformAdapter {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PlatformAdapter for HttpPlatformAdapter {
    async fn perform_request(
        &self,
        platform: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, RawError> {
        let url = format!("{}/{}/requests", self.base_url, platform);

        let response = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(serde_json::Value::Null);
            }
            return response.json().await.map_err(transport_error);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        let code = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("code").and_then(|c| c.as_str()).map(str::to_string));

        Err(RawError {
            status: Some(status.as_u16()),
            code,
            message: if body.is_empty() {
                status.to_string()
            } else {
                body
            },
            retry_after,
        })
    }
}

fn transport_error(err: reqwest::Error) -> RawError {
    let code = if err.is_timeout() {
        Some("TIMEOUT")
    } else if err.is_connect() || err.is_request() {
        Some("NETWORK")
    } else {
        None
    };
    RawError {
        status: err.status().map(|s| s.as_u16()),
        code: code.map(str::to_string),
        message: err.to_string(),
        retry_after: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let record = CallError::Timeout(Duration::from_secs(5)).record();
        assert_eq!(record.kind, ErrorKind::Timeout);
        assert!(record.retryable);
    }

    #[test]
    fn test_circuit_open_is_not_retryable() {
        let err = CallError::CircuitOpen {
            key: "shopee".into(),
            retry_in: Duration::from_secs(10),
        };
        assert!(!err.record().retryable);
        assert!(err.is_circuit_open());
    }

    #[test]
    fn test_platform_error_uses_classifier() {
        let err = CallError::from(RawError::with_status(429, "slow down"));
        assert_eq!(err.record().kind, ErrorKind::RateLimited);
    }
}
