//! Layered scheduler configuration. Deserialized the way the rest of the
//! ambient stack in this space reads settings: a `serde`-derived struct with
//! sane defaults, loadable from TOML/env by the embedding harness via the
//! `config` crate (left to the caller — this crate only defines the shape).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::preemption::DEFAULT_GPU_PREEMPTION_WEIGHT;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently in-flight ticks (§5). Distinct workspaces
    /// tick in parallel up to this bound; a single workspace is always
    /// serialized by the external work queue regardless of this setting.
    pub max_concurrent_ticks: usize,

    /// Per store-call timeout (§5); on expiry the tick aborts and
    /// re-enqueues.
    #[serde(with = "duration_millis")]
    pub store_call_timeout: Duration,

    /// Bounded exponential backoff for transient store errors (§5, §7).
    pub backoff: BackoffConfig,

    /// The GPU term's weight in the preemption score (§4.6, §9): a single
    /// 8-GPU victim should outrank many CPU-heavy ones.
    pub gpu_preemption_weight: i64,

    /// The resource-name key used for this deployment's GPU vendor, e.g.
    /// `nvidia.com/gpu` or `amd.com/gpu`. A single workspace/node-flavor is
    /// assumed homogeneous in vendor (§3).
    pub gpu_vendor_key: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_concurrent_ticks: 1,
            store_call_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            gpu_preemption_weight: DEFAULT_GPU_PREEMPTION_WEIGHT,
            gpu_vendor_key: "nvidia.com/gpu".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    pub multiplier: f64,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// Capped exponential backoff with full jitter (§5): synchronizing
    /// retries across many workspaces is avoided by scaling a random
    /// fraction of the capped delay rather than the delay itself.
    pub fn delay_for_attempt(&self, attempt: u32, jitter: f64) -> Duration {
        debug_assert!((0.0..=1.0).contains(&jitter));
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped * jitter)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
