use crate::error::{Result, SwitchyardError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root of `switchyard.toml`. Every field has a default, so partial files are valid.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SwitchyardConfig {
    pub registry: RegistryConfig,
    pub fast_tier: FastTierConfig,
    pub durable_tier: DurableTierConfig,
    pub coordinator: CoordinatorConfig,
    pub session: SessionConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// How long a discovery result may be served from cache.
    pub cache_ttl_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            retry_attempts: 5,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 2_000,
            cache_ttl_ms: 2_000,
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FastTierConfig {
    pub timeout_ms: u64,
    /// Payloads at or above this size always go to the durable tier.
    pub size_threshold_bytes: usize,
}

impl Default for FastTierConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            size_threshold_bytes: 64 * 1024,
        }
    }
}

impl FastTierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DurableTierConfig {
    pub timeout_ms: u64,
}

impl Default for DurableTierConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl DurableTierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Attempts per backend call on transient failure.
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Optimistic write attempts before a version conflict is surfaced.
    pub max_conflict_retries: u32,
    pub promotion_rate_per_sec: u32,
    pub promotion_burst: u32,
    /// Fast-tier TTL given to promoted objects that carry no TTL of their own.
    pub promotion_ttl_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_base_delay_ms: 25,
            retry_max_delay_ms: 500,
            max_conflict_retries: 8,
            promotion_rate_per_sec: 50,
            promotion_burst: 100,
            promotion_ttl_secs: 300,
        }
    }
}

impl CoordinatorConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn promotion_ttl(&self) -> Duration {
        Duration::from_secs(self.promotion_ttl_secs)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1_800,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl SwitchyardConfig {
    /// Parses a TOML document and validates it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SwitchyardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SwitchyardError::Serialization {
            format: "TOML".to_string(),
            message: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, bool); 11] = [
            ("registry.timeout_ms", self.registry.timeout_ms > 0),
            ("registry.retry_attempts", self.registry.retry_attempts > 0),
            ("registry.cache_ttl_ms", self.registry.cache_ttl_ms > 0),
            ("fast_tier.timeout_ms", self.fast_tier.timeout_ms > 0),
            (
                "fast_tier.size_threshold_bytes",
                self.fast_tier.size_threshold_bytes > 0,
            ),
            ("durable_tier.timeout_ms", self.durable_tier.timeout_ms > 0),
            ("coordinator.retry_attempts", self.coordinator.retry_attempts > 0),
            (
                "coordinator.max_conflict_retries",
                self.coordinator.max_conflict_retries > 0,
            ),
            (
                "coordinator.promotion_rate_per_sec",
                self.coordinator.promotion_rate_per_sec > 0,
            ),
            ("coordinator.promotion_burst", self.coordinator.promotion_burst > 0),
            ("session.idle_timeout_secs", self.session.idle_timeout_secs > 0),
        ];

        match checks.iter().find(|(_, ok)| !ok) {
            Some((field, _)) => Err(SwitchyardError::config(format!(
                "{} must be greater than zero",
                field
            ))),
            None => Ok(()),
        }
    }
}
