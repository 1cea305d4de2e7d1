//! Configuration for the sync layer

use std::env;
use std::time::Duration;

use serde::Deserialize;

/// Top-level sync configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub endpoint: String,
    /// Optional API key attached to every request body as `apiKey`.
    pub api_key: Option<String>,
    pub request: RequestConfig,
    pub queue: QueueConfig,
    pub bulk: BulkConfig,
    pub circuit: CircuitConfig,
}

/// Request client tuning
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    /// Per-attempt deadline.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub max_retries: u32,
    /// Base delay; attempt N sleeps `retry_delay * (N + 1)` (linear, no jitter).
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
}

/// Mutation queue tuning
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub max_retries: u32,
    /// Auto-sync flush period.
    #[serde(with = "duration_ms")]
    pub sync_interval: Duration,
    /// KV key the serialized queue lives under.
    pub queue_key: String,
    /// KV key for the last successful sync marker.
    pub last_sync_key: String,
}

/// Chunked bulk sync tuning
#[derive(Debug, Clone, Deserialize)]
pub struct BulkConfig {
    /// Max records per sync request. Bounded by the backend's per-invocation
    /// execution-time budget.
    pub chunk_size: usize,
    /// Pause between chunks, skipped after the final one.
    #[serde(with = "duration_ms")]
    pub chunk_delay: Duration,
    /// Circuit name guarding chunk requests.
    pub circuit_name: String,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    #[serde(with = "duration_ms")]
    pub open_timeout: Duration,
    pub half_open_max_calls: u32,
    pub on_closed_success: ClosedSuccessPolicy,
}

/// What a success while Closed does to the failure count.
///
/// Decay (decrement by one, never below zero) dampens sensitivity to
/// isolated failures; Reset clears the count outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosedSuccessPolicy {
    Decay,
    Reset,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            endpoint: String::new(),
            api_key: None,
            request: RequestConfig::default(),
            queue: QueueConfig::default(),
            bulk: BulkConfig::default(),
            circuit: CircuitConfig::default(),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        RequestConfig {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            max_retries: 3,
            sync_interval: Duration::from_secs(30),
            queue_key: "sync_queue".to_string(),
            last_sync_key: "last_sync".to_string(),
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        BulkConfig {
            chunk_size: 500,
            chunk_delay: Duration::from_secs(1),
            circuit_name: "sync_columns".to_string(),
        }
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        CircuitConfig {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            on_closed_success: ClosedSuccessPolicy::Decay,
        }
    }
}

impl SyncConfig {
    /// Build a config from `SYNC_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = SyncConfig::default();

        SyncConfig {
            endpoint: env::var("SYNC_ENDPOINT").unwrap_or(defaults.endpoint),
            api_key: env::var("SYNC_API_KEY").ok(),
            request: RequestConfig {
                timeout: env_duration_ms("SYNC_TIMEOUT_MS", defaults.request.timeout),
                max_retries: env_u32("SYNC_MAX_RETRIES", defaults.request.max_retries),
                retry_delay: env_duration_ms("SYNC_RETRY_DELAY_MS", defaults.request.retry_delay),
            },
            queue: QueueConfig {
                max_retries: env_u32("SYNC_QUEUE_MAX_RETRIES", defaults.queue.max_retries),
                sync_interval: env_duration_ms("SYNC_INTERVAL_MS", defaults.queue.sync_interval),
                queue_key: defaults.queue.queue_key,
                last_sync_key: defaults.queue.last_sync_key,
            },
            bulk: BulkConfig {
                chunk_size: env::var("SYNC_CHUNK_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.bulk.chunk_size),
                chunk_delay: env_duration_ms("SYNC_CHUNK_DELAY_MS", defaults.bulk.chunk_delay),
                circuit_name: defaults.bulk.circuit_name,
            },
            circuit: defaults.circuit,
        }
    }
}

fn env_u32(key: &str, fallback: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn env_duration_ms(key: &str, fallback: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(fallback)
}

/// Serde helper: durations on the wire are integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
