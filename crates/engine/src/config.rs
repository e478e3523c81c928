//! Executor tuning knobs.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for the executor.
///
/// Durations are read and written as integer milliseconds
/// (`retry_base_delay_ms`, `default_node_timeout_ms`, `node_timeouts_ms`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of times a retryable node failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    #[serde(rename = "retry_base_delay_ms", with = "millis")]
    pub retry_base_delay: Duration,
    /// Upper bound on concurrently executing nodes within one run.
    /// `1` executes strictly sequentially.
    pub max_parallel_nodes: usize,
    /// Timeout for node types without an entry in `node_timeouts`.
    #[serde(rename = "default_node_timeout_ms", with = "millis")]
    pub default_node_timeout: Duration,
    /// Per node-type timeouts.
    #[serde(rename = "node_timeouts_ms", with = "millis_map")]
    pub node_timeouts: BTreeMap<String, Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            max_parallel_nodes: 4,
            default_node_timeout: Duration::from_secs(30),
            node_timeouts: BTreeMap::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn timeout_for(&self, node_type: &str) -> Duration {
        self.node_timeouts
            .get(node_type)
            .copied()
            .unwrap_or(self.default_node_timeout)
    }

    /// Back-off before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    pub fn with_timeout(mut self, node_type: impl Into<String>, timeout: Duration) -> Self {
        self.node_timeouts.insert(node_type.into(), timeout);
        self
    }

    /// Batch size used by the scheduler; never zero.
    pub(crate) fn parallelism(&self) -> usize {
        self.max_parallel_nodes.max(1)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod millis_map {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(m: &BTreeMap<String, Duration>, s: S) -> Result<S::Ok, S::Error> {
        m.iter()
            .map(|(k, v)| (k, u64::try_from(v.as_millis()).unwrap_or(u64::MAX)))
            .collect::<BTreeMap<_, _>>()
            .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, Duration>, D::Error> {
        let raw = BTreeMap::<String, u64>::deserialize(d)?;
        Ok(raw.into_iter().map(|(k, v)| (k, Duration::from_millis(v))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: ExecutorConfig = serde_json::from_value(json!({
            "max_parallel_nodes": 1,
            "node_timeouts_ms": { "invoice_fetch": 5000 }
        }))
        .unwrap();

        assert_eq!(config.max_parallel_nodes, 1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout_for("invoice_fetch"), Duration::from_secs(5));
        assert_eq!(config.timeout_for("sort"), Duration::from_secs(30));
    }

    #[test]
    fn backoff_is_exponential() {
        let config = ExecutorConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn zero_parallelism_is_clamped() {
        let config = ExecutorConfig { max_parallel_nodes: 0, ..Default::default() };
        assert_eq!(config.parallelism(), 1);
    }
}
