use serde::Deserialize;
use std::time::Duration;

use crate::services::circuit_breaker::CircuitBreakerConfig;
use crate::services::queue::QueueConfig;
use crate::services::retry::RetryPolicy;
use crate::services::worker::WorkerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Redis connection string for the audit event stream. Events are only
    /// logged when unset.
    pub redis_url: Option<String>,

    /// Base URL of the platform request gateway
    #[serde(default = "default_platform_base_url")]
    pub platform_base_url: String,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,

    /// Reaper cadence; must be shorter than the lease.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Hard per-attempt timeout on platform calls
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: i32,

    #[serde(default = "default_per_job_estimate_secs")]
    pub per_job_estimate_secs: u64,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,

    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    #[serde(default = "default_circuit_recovery_secs")]
    pub circuit_recovery_secs: u64,

    /// Upper bound on dead letters requeued by one bulk retry
    #[serde(default = "default_dead_letter_retry_cap")]
    pub dead_letter_retry_cap: usize,

    /// Prometheus listener for the worker binary, e.g. `0.0.0.0:9100`
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_db_max_connections() -> u32 {
    20
}

fn default_platform_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_lease_duration_secs() -> u64 {
    300
}

fn default_reaper_interval_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_job_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> i32 {
    3
}

fn default_per_job_estimate_secs() -> u64 {
    30
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_retry_jitter() -> f64 {
    0.2
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_recovery_secs() -> u64 {
    60
}

fn default_dead_letter_retry_cap() -> usize {
    100
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make backoff arithmetic panic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(ConfigError::Invalid(format!(
                "RETRY_JITTER must be between 0 and 1, got {}",
                self.retry_jitter
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: self.retry_jitter,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            default_max_attempts: self.default_max_attempts,
            lease_duration: Duration::from_secs(self.lease_duration_secs),
            per_job_estimate: Duration::from_secs(self.per_job_estimate_secs),
            ..QueueConfig::default()
        }
    }

    pub fn circuit_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            recovery_timeout: Duration::from_secs(self.circuit_recovery_secs),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            concurrency: self.worker_concurrency,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            lease_duration: Duration::from_secs(self.lease_duration_secs),
            reaper_interval: Duration::from_secs(self.reaper_interval_secs),
            retry: self.retry_policy(),
        }
    }

    /// Settings that would let the reaper steal leases from healthy workers.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.reaper_interval_secs >= self.lease_duration_secs {
            warnings.push(format!(
                "REAPER_INTERVAL_SECS ({}) should be shorter than LEASE_DURATION_SECS ({})",
                self.reaper_interval_secs, self.lease_duration_secs
            ));
        }
        let policy = self.retry_policy();
        let worst_case: Duration = (1..policy.max_attempts)
            .map(|a| policy.backoff(a).mul_f64(1.0 + policy.effective_jitter()))
            .sum::<Duration>()
            + Duration::from_secs(self.job_timeout_secs) * policy.max_attempts;
        if worst_case >= Duration::from_secs(self.lease_duration_secs) {
            warnings.push(format!(
                "worst-case job execution ({}s) exceeds LEASE_DURATION_SECS ({})",
                worst_case.as_secs(),
                self.lease_duration_secs
            ));
        }
        warnings
    }
}
