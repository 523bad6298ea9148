use serde::Deserialize;
use std::time::Duration;

/// Bounded exponential backoff, parameterised at construction and carried
/// by value. Task application and DLQ writes use separate policies.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    #[serde(with = "humantime_serde")]
    pub initial_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,
    /// Multiplier applied per attempt. May be fractional.
    pub backoff_factor: f64,
    /// Total execution attempts before giving up, including the first.
    pub max_attempts: u32,
    /// Proportional jitter in `[0, 1]`: each interval is scaled by a random
    /// factor in `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
}

impl RetryPolicy {
    /// Default policy for applying one replication task.
    pub fn task_default() -> Self {
        Self {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(2),
            backoff_factor: 1.2,
            max_attempts: 10,
            jitter: 0.1,
        }
    }

    /// Default policy for DLQ writes. More patient: exhausting it halts the
    /// shard's processor.
    pub fn dlq_default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_factor: 1.5,
            max_attempts: 20,
            jitter: 0.1,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn start(self) -> RetryState {
        RetryState {
            policy: self,
            attempt: 0,
        }
    }
}

/// Mutable cursor over a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    /// Interval to wait before the next attempt, or `None` once
    /// `max_attempts` executions have been spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt + 1 >= self.policy.max_attempts {
            return None;
        }
        let base = self.policy.initial_interval.as_secs_f64()
            * self.policy.backoff_factor.powi(self.attempt as i32);
        let capped = base.min(self.policy.max_interval.as_secs_f64());

        let scale = if self.policy.jitter > 0.0 {
            1.0 + self.policy.jitter * (2.0 * rand::random::<f64>() - 1.0)
        } else {
            1.0
        };

        self.attempt += 1;
        Some(Duration::from_secs_f64(capped * scale.max(0.0)))
    }

    /// Attempts spent so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget accumulated attempts, so the next failure backs off from the
    /// initial interval again.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
