use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::circuit::{BreakerState, CircuitState};
use crate::services::events::{publish, EventSink, QueueEvent};
use crate::services::platform::CallError;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive retryable failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before admitting a trial.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: BreakerState,
    failure_count: u32,
    success_count_in_half_open: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    trial_started_at: Option<Instant>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count_in_half_open: 0,
            opened_at: None,
            last_failure_at: None,
            trial_started_at: None,
        }
    }

    fn snapshot(&self, key: &str, now: Instant) -> CircuitState {
        CircuitState {
            key: key.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            success_count_in_half_open: self.success_count_in_half_open,
            opened_secs_ago: self.opened_at.map(|t| now.duration_since(t).as_secs_f64()),
            last_failure_secs_ago: self
                .last_failure_at
                .map(|t| now.duration_since(t).as_secs_f64()),
        }
    }
}

type Transition = (BreakerState, BreakerState);

/// Per-key circuit breaker. Each key has its own mutex; the lock is only
/// held while deciding admission and while recording an outcome, never
/// across the guarded call.
///
/// State is held in this process only. Separate worker processes keep
/// independent breakers for the same platform.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, Arc<Mutex<Circuit>>>>,
    events: Option<Arc<dyn EventSink>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    fn circuit(&self, key: &str) -> Arc<Mutex<Circuit>> {
        let mut circuits = self.circuits.lock();
        circuits
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Circuit::new())))
            .clone()
    }

    /// Run `operation` through the breaker for `key`.
    pub async fn execute<T, F, Fut>(&self, key: &str, operation: F) -> Result<T, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let circuit = self.circuit(key);

        let admitted = self.admit(key, &mut circuit.lock());
        let transition = match admitted {
            Ok(transition) => transition,
            Err(retry_in) => {
                tracing::debug!(key, retry_in_ms = retry_in.as_millis() as u64, "Circuit open, rejecting call");
                return Err(CallError::CircuitOpen {
                    key: key.to_string(),
                    retry_in,
                });
            }
        };
        self.announce(key, transition).await;

        let result = operation().await;

        let transition = {
            let mut c = circuit.lock();
            match &result {
                Ok(_) => self.on_success(&mut c),
                Err(e) if e.record().retryable && !e.is_circuit_open() => {
                    self.on_failure(&mut c)
                }
                Err(_) => {
                    // Bad input, not dependency health: free the trial slot.
                    c.trial_started_at = None;
                    None
                }
            }
        };
        self.announce(key, transition).await;

        result
    }

    /// Decide whether a call may proceed. `Err` carries the remaining cooldown.
    fn admit(&self, key: &str, c: &mut Circuit) -> Result<Option<Transition>, Duration> {
        let now = Instant::now();
        match c.state {
            BreakerState::Closed => Ok(None),
            BreakerState::Open => {
                let opened_at = c.opened_at.unwrap_or(now);
                let reopen_at = opened_at + self.config.recovery_timeout;
                if now >= reopen_at {
                    c.state = BreakerState::HalfOpen;
                    c.success_count_in_half_open = 0;
                    c.trial_started_at = Some(now);
                    tracing::info!(key, "Circuit half-open, admitting trial call");
                    Ok(Some((BreakerState::Open, BreakerState::HalfOpen)))
                } else {
                    Err(reopen_at - now)
                }
            }
            BreakerState::HalfOpen => match c.trial_started_at {
                // A trial that outlived the recovery window was abandoned.
                Some(started) if now < started + self.config.recovery_timeout => {
                    Err(started + self.config.recovery_timeout - now)
                }
                _ => {
                    c.trial_started_at = Some(now);
                    Ok(None)
                }
            },
        }
    }

    fn on_success(&self, c: &mut Circuit) -> Option<Transition> {
        match c.state {
            BreakerState::HalfOpen => {
                c.success_count_in_half_open += 1;
                c.state = BreakerState::Closed;
                c.failure_count = 0;
                c.opened_at = None;
                c.trial_started_at = None;
                Some((BreakerState::HalfOpen, BreakerState::Closed))
            }
            BreakerState::Closed => {
                c.failure_count = 0;
                None
            }
            // A call admitted while closed finished after another worker opened it.
            BreakerState::Open => None,
        }
    }

    fn on_failure(&self, c: &mut Circuit) -> Option<Transition> {
        let now = Instant::now();
        c.last_failure_at = Some(now);
        match c.state {
            BreakerState::Closed => {
                c.failure_count += 1;
                if c.failure_count >= self.config.failure_threshold {
                    c.state = BreakerState::Open;
                    c.opened_at = Some(now);
                    Some((BreakerState::Closed, BreakerState::Open))
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                c.failure_count += 1;
                c.state = BreakerState::Open;
                c.opened_at = Some(now);
                c.trial_started_at = None;
                Some((BreakerState::HalfOpen, BreakerState::Open))
            }
            BreakerState::Open => None,
        }
    }

    async fn announce(&self, key: &str, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };

        match to {
            BreakerState::Open => tracing::warn!(key, %from, %to, "Circuit opened"),
            _ => tracing::info!(key, %from, %to, "Circuit transition"),
        }
        metrics::counter!(
            "sync_circuit_transitions_total",
            "key" => key.to_string(),
            "to" => to.to_string()
        )
        .increment(1);

        if let Some(events) = &self.events {
            publish(
                events.as_ref(),
                QueueEvent::CircuitTransition {
                    key: key.to_string(),
                    from,
                    to,
                },
            )
            .await;
        }
    }

    /// Snapshot of one key. Unknown keys report a fresh closed circuit.
    pub fn get_state(&self, key: &str) -> CircuitState {
        let now = Instant::now();
        let circuits = self.circuits.lock();
        match circuits.get(key) {
            Some(c) => c.lock().snapshot(key, now),
            None => Circuit::new().snapshot(key, now),
        }
    }

    pub fn all_states(&self) -> Vec<CircuitState> {
        let now = Instant::now();
        let circuits = self.circuits.lock();
        let mut states: Vec<_> = circuits
            .iter()
            .map(|(key, c)| c.lock().snapshot(key, now))
            .collect();
        states.sort_by(|a, b| a.key.cmp(&b.key));
        states
    }
}
