//! Registry domain model.
//!
//! Service registrations, discovery filters, health summaries and KV entries.
//! These types are technology-agnostic; registry adapters translate them to and from
//! their own wire formats.

use crate::error::{Result, SwitchyardError};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use strum::Display;

static SERVICE_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,62}$").expect("valid regex"));

static METADATA_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-]{1,128}$").expect("valid regex"));

/// Health of one registered instance as last reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Unknown instances are served: no check configured is not a failure.
    pub fn is_servable(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

/// How the registry decides whether an instance is alive.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthCheck {
    /// No check. The instance is trusted until deregistered.
    #[default]
    None,
    /// The owning process must renew within `ttl_secs`, otherwise the instance turns
    /// unhealthy. After `deregister_after_secs` of being unhealthy it is removed.
    Ttl {
        ttl_secs: u64,
        #[serde(default)]
        deregister_after_secs: Option<u64>,
    },
    /// The registry polls an HTTP endpoint.
    Http { url: String, interval_secs: u64 },
    /// The registry opens a TCP connection.
    Tcp { address: String, interval_secs: u64 },
}

/// A registered service instance.
///
/// `service_id` is unique per process instance; `service_name` is shared by all
/// instances of the same service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub service_id: String,
    pub service_name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub health_check: HealthCheck,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub status: HealthStatus,
}

impl ServiceRegistration {
    /// Creates a registration with a generated `"{service_name}-{uuid}"` id.
    pub fn new(service_name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let service_name = service_name.into();
        Self {
            service_id: format!("{}-{}", service_name, uuid::Uuid::new_v4()),
            service_name,
            address: address.into(),
            port,
            tags: BTreeSet::new(),
            capabilities: BTreeSet::new(),
            metadata: BTreeMap::new(),
            health_check: HealthCheck::None,
            registered_at: Utc::now(),
            status: HealthStatus::Unknown,
        }
    }

    /// Creates a registration with the endpoint-derived id
    /// `"{service_name}-{address}-{port}"`.
    ///
    /// Registering the same endpoint again updates that instance instead of adding one.
    pub fn for_endpoint(
        service_name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        let registration = Self::new(service_name, address, port);
        let service_id = format!(
            "{}-{}-{}",
            registration.service_name, registration.address, registration.port
        );
        registration.with_id(service_id)
    }

    pub fn with_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheck) -> Self {
        self.health_check = health_check;
        self
    }

    /// Rejects malformed names, ports, addresses and metadata before any network call.
    pub fn validate(&self) -> Result<()> {
        validate_service_name(&self.service_name)?;

        if self.service_id.trim().is_empty() {
            return Err(SwitchyardError::validation("service_id must not be empty"));
        }
        if self.service_id.contains('/') || self.service_id.chars().any(char::is_whitespace) {
            return Err(SwitchyardError::validation(format!(
                "service_id '{}' must not contain '/' or whitespace",
                self.service_id
            )));
        }
        if self.port == 0 {
            return Err(SwitchyardError::validation(format!(
                "service '{}' has invalid port 0",
                self.service_name
            )));
        }
        if self.address.trim().is_empty() || self.address.chars().any(char::is_whitespace) {
            return Err(SwitchyardError::validation(format!(
                "service '{}' has invalid address '{}'",
                self.service_name, self.address
            )));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(SwitchyardError::validation("tags must not be empty strings"));
        }
        if self.capabilities.iter().any(|c| c.trim().is_empty()) {
            return Err(SwitchyardError::validation(
                "capabilities must not be empty strings",
            ));
        }
        if let Some(key) = self
            .metadata
            .keys()
            .find(|k| !METADATA_KEY_PATTERN.is_match(k))
        {
            return Err(SwitchyardError::validation(format!(
                "metadata key '{}' must match [A-Za-z0-9_-]{{1,128}}",
                key
            )));
        }
        match &self.health_check {
            HealthCheck::Ttl { ttl_secs: 0, .. } => Err(SwitchyardError::validation(
                "ttl health check needs a non-zero ttl",
            )),
            HealthCheck::Http { interval_secs: 0, .. } | HealthCheck::Tcp { interval_secs: 0, .. } => {
                Err(SwitchyardError::validation(
                    "health check interval must be non-zero",
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Validates a service name used for registration or lookup.
pub fn validate_service_name(name: &str) -> Result<()> {
    if SERVICE_NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(SwitchyardError::validation(format!(
            "invalid service name '{}'",
            name
        )))
    }
}

/// Tag and capability constraints for discovery. All listed values must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceFilter {
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl ServiceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.capabilities.is_empty()
    }

    pub fn matches_tags(&self, registration: &ServiceRegistration) -> bool {
        self.tags.is_subset(&registration.tags)
    }

    pub fn matches_capabilities(&self, registration: &ServiceRegistration) -> bool {
        self.capabilities.is_subset(&registration.capabilities)
    }

    pub fn matches(&self, registration: &ServiceRegistration) -> bool {
        self.matches_tags(registration) && self.matches_capabilities(registration)
    }
}

/// Health of one instance inside a [`ServiceHealth`] summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub service_id: String,
    pub address: String,
    pub port: u16,
    pub status: HealthStatus,
}

/// Aggregated health of every instance registered under one service name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service_name: String,
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub instances: Vec<InstanceHealth>,
}

impl ServiceHealth {
    pub fn from_instances(service_name: &str, instances: &[ServiceRegistration]) -> Self {
        let instances: Vec<InstanceHealth> = instances
            .iter()
            .map(|r| InstanceHealth {
                service_id: r.service_id.clone(),
                address: r.address.clone(),
                port: r.port,
                status: r.status,
            })
            .collect();
        let healthy = instances
            .iter()
            .filter(|i| i.status == HealthStatus::Healthy)
            .count();
        let unhealthy = instances
            .iter()
            .filter(|i| i.status == HealthStatus::Unhealthy)
            .count();
        Self {
            service_name: service_name.to_string(),
            total: instances.len(),
            healthy,
            unhealthy,
            instances,
        }
    }
}

/// A value in the registry's shared KV namespace.
///
/// `version` increases monotonically with every write to the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub version: u64,
}

impl ConfigEntry {
    /// The value as UTF-8, if it is valid UTF-8.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn librarian() -> ServiceRegistration {
        ServiceRegistration::new("Librarian", "10.0.0.5", 8080)
            .with_tag("smart_city")
            .with_capability("search")
            .with_metadata("version", "1.2.0")
    }

    #[test]
    fn test_generated_id_uses_service_name() {
        let reg = librarian();
        assert!(reg.service_id.starts_with("Librarian-"));
        assert!(reg.validate().is_ok());
    }

    #[test]
    fn test_endpoint_id_is_stable() {
        let first = ServiceRegistration::for_endpoint("Librarian", "10.0.0.5", 8080);
        let second = ServiceRegistration::for_endpoint("Librarian", "10.0.0.5", 8080)
            .with_metadata("version", "2");
        assert_eq!(first.service_id, "Librarian-10.0.0.5-8080");
        assert_eq!(first.service_id, second.service_id);
        assert_ne!(
            first.service_id,
            ServiceRegistration::for_endpoint("Librarian", "10.0.0.6", 8080).service_id
        );
        assert!(first.validate().is_ok());
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(librarian().with_id("").validate().is_err());
        assert!(librarian().with_id("a/b").validate().is_err());

        let mut reg = librarian();
        reg.port = 0;
        assert!(reg.validate().unwrap_err().is_validation());

        let mut reg = librarian();
        reg.service_name = "bad name!".to_string();
        assert!(reg.validate().is_err());

        let mut reg = librarian();
        reg.address = " ".to_string();
        assert!(reg.validate().is_err());

        assert!(librarian().with_metadata("bad key", "x").validate().is_err());
        assert!(
            librarian()
                .with_health_check(HealthCheck::Ttl {
                    ttl_secs: 0,
                    deregister_after_secs: None
                })
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_filter_matching() {
        let reg = librarian();
        assert!(ServiceFilter::new().matches(&reg));
        assert!(ServiceFilter::new().tag("smart_city").matches(&reg));
        assert!(ServiceFilter::new().capability("search").matches(&reg));
        assert!(!ServiceFilter::new().tag("other").matches(&reg));
        assert!(!ServiceFilter::new()
            .tag("smart_city")
            .capability("write")
            .matches(&reg));
    }

    #[test]
    fn test_service_health_counts() {
        let mut a = librarian();
        a.status = HealthStatus::Healthy;
        let mut b = librarian();
        b.status = HealthStatus::Unhealthy;
        let c = librarian();

        let health = ServiceHealth::from_instances("Librarian", &[a, b, c]);
        assert_eq!(health.total, 3);
        assert_eq!(health.healthy, 1);
        assert_eq!(health.unhealthy, 1);
    }

    #[test]
    fn test_health_check_serde_shape() {
        let check = HealthCheck::Ttl {
            ttl_secs: 10,
            deregister_after_secs: Some(60),
        };
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["kind"], "ttl");
        assert_eq!(json["ttl_secs"], 10);
        let back: HealthCheck = serde_json::from_value(json).unwrap();
        assert_eq!(back, check);
    }
}
