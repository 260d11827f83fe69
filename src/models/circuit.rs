use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Snapshot of one dependency's breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitState {
    pub key: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count_in_half_open: u32,
    /// Seconds since the circuit last opened.
    pub opened_secs_ago: Option<f64>,
    /// Seconds since the last counted failure.
    pub last_failure_secs_ago: Option<f64>,
}
