use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A dynamically-updatable configuration cell.
///
/// Clones share the underlying value: components capture the `Property` at
/// construction and call [`Property::get`] at each use site, so an operator
/// (or a test) can retune a running subsystem through [`Property::set`].
#[derive(Debug, Clone, Default)]
pub struct Property<T>(Arc<RwLock<T>>);

impl<T: Copy> Property<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn get(&self) -> T {
        *self.0.read().unwrap()
    }

    pub fn set(&self, value: T) {
        *self.0.write().unwrap() = value;
    }
}

/// Dynamic knobs of the replication subsystem. Cheap to clone; clones share
/// every cell.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sleep between polls when the source had no tasks for the shard.
    pub no_task_retry_wait: Property<Duration>,
    /// Long-poll fetches per second against one source cluster. Shared by
    /// every shard of that source.
    pub fetch_qps: Property<u32>,
    /// Most fetch requests coalesced into a single RPC.
    pub fetch_batch_limit: Property<usize>,
    /// Server-side long-poll window of the admin RPC.
    pub long_poll_timeout: Property<Duration>,
    /// Extra grace on top of `long_poll_timeout` before a processor deems
    /// its reply lost and re-requests.
    pub reply_wait_slack: Property<Duration>,
    /// Probability in `[0, 1]` of injecting a synthetic transient error
    /// ahead of each task execution. Zero outside chaos testing.
    pub error_injection_rate: Property<f64>,
    /// Backoff for applying one replication task.
    pub task_retry_policy: Property<RetryPolicy>,
    /// Backoff for DLQ writes. Exhausting it halts the processor.
    pub dlq_retry_policy: Property<RetryPolicy>,
    /// How often the processor persists its ack level to the shard.
    pub flush_interval: Property<Duration>,
    /// Sync-shard heartbeats older than this are dropped instead of being
    /// forwarded to the engine.
    pub sync_shard_staleness: Property<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_values(&ConfigValues::default())
    }
}

impl Config {
    pub fn from_values(values: &ConfigValues) -> Self {
        Self {
            no_task_retry_wait: Property::new(values.no_task_retry_wait),
            fetch_qps: Property::new(values.fetch_qps),
            fetch_batch_limit: Property::new(values.fetch_batch_limit),
            long_poll_timeout: Property::new(values.long_poll_timeout),
            reply_wait_slack: Property::new(values.reply_wait_slack),
            error_injection_rate: Property::new(values.error_injection_rate),
            task_retry_policy: Property::new(values.task_retry_policy),
            dlq_retry_policy: Property::new(values.dlq_retry_policy),
            flush_interval: Property::new(values.flush_interval),
            sync_shard_staleness: Property::new(values.sync_shard_staleness),
        }
    }
}

/// Plain-value snapshot of [`Config`], deserializable from a deployment's
/// override file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigValues {
    #[serde(with = "humantime_serde")]
    pub no_task_retry_wait: Duration,
    pub fetch_qps: u32,
    pub fetch_batch_limit: usize,
    #[serde(with = "humantime_serde")]
    pub long_poll_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub reply_wait_slack: Duration,
    pub error_injection_rate: f64,
    pub task_retry_policy: RetryPolicy,
    pub dlq_retry_policy: RetryPolicy,
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub sync_shard_staleness: Duration,
}

impl Default for ConfigValues {
    fn default() -> Self {
        Self {
            no_task_retry_wait: Duration::from_secs(2),
            fetch_qps: 100,
            fetch_batch_limit: 128,
            long_poll_timeout: Duration::from_secs(30),
            reply_wait_slack: Duration::from_secs(5),
            error_injection_rate: 0.0,
            task_retry_policy: RetryPolicy::task_default(),
            dlq_retry_policy: RetryPolicy::dlq_default(),
            flush_interval: Duration::from_secs(5),
            sync_shard_staleness: Duration::from_secs(600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_updates_are_shared_across_clones() {
        let config = Config::default();
        let view = config.clone();

        config.fetch_qps.set(7);
        assert_eq!(view.fetch_qps.get(), 7);

        view.no_task_retry_wait.set(Duration::from_millis(1));
        assert_eq!(config.no_task_retry_wait.get(), Duration::from_millis(1));
    }

    #[test]
    fn values_deserialize_with_humantime_durations() {
        let values: ConfigValues = serde_json::from_value(serde_json::json!({
            "no_task_retry_wait": "100ms",
            "fetch_qps": 25,
            "task_retry_policy": {
                "initial_interval": "50ms",
                "max_interval": "2s",
                "backoff_factor": 1.2,
                "max_attempts": 5,
                "jitter": 0.0,
            },
        }))
        .unwrap();

        assert_eq!(values.no_task_retry_wait, Duration::from_millis(100));
        assert_eq!(values.fetch_qps, 25);
        assert_eq!(values.task_retry_policy.max_attempts, 5);
        // Unset knobs keep their defaults.
        assert_eq!(values.long_poll_timeout, Duration::from_secs(30));
    }
}
