//! Registry adapter trait.
//!
//! Defines the contract every concrete registry technology binding must satisfy.

use super::model::{ConfigEntry, HealthStatus, ServiceFilter, ServiceRegistration};
use super::watch::{ConfigCallback, ServiceCallback, WatchHandle};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;

/// Raw errors surfaced by a registry adapter.
///
/// Adapters never retry on their own; these errors are classified and retried by the
/// service registry abstraction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// The registry could not be reached.
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// The registry did not answer in time.
    #[error("registry call timed out after {0:?}")]
    Timeout(Duration),

    /// The referenced service instance does not exist.
    #[error("service instance not found: {0}")]
    NotFound(String),

    /// A KV compare-and-set lost against a concurrent writer.
    #[error("compare-and-set mismatch on '{key}' (expected version {expected})")]
    CasMismatch { key: String, expected: u64 },

    /// The registry refused the request as malformed.
    #[error("registry rejected request: {0}")]
    Rejected(String),

    /// Unexpected response shape or status.
    #[error("registry protocol error: {0}")]
    Protocol(String),

    /// Payload could not be encoded or decoded.
    #[error("registry serialization error: {0}")]
    Serialization(String),
}

impl RegistryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// A thin binding to one concrete service-mesh/registry technology.
///
/// Implementations translate calls to the technology's wire protocol and surface its
/// failures as [`RegistryError`] without interpretation.
#[async_trait]
pub trait RegistryAdapter: Send + Sync {
    /// Short name of the backing technology, used in logs.
    fn backend_name(&self) -> &'static str;

    /// Registers or re-registers an instance. Re-registering the same `service_id`
    /// replaces its metadata.
    async fn register(&self, registration: &ServiceRegistration) -> RegistryResult<()>;

    /// Removes an instance.
    async fn deregister(&self, service_id: &str) -> RegistryResult<()>;

    /// Returns every instance of `service_name` with its current health status.
    ///
    /// Only the tag part of `filter` is guaranteed to be applied; capability filtering
    /// is left to the caller.
    async fn discover(
        &self,
        service_name: &str,
        filter: &ServiceFilter,
    ) -> RegistryResult<Vec<ServiceRegistration>>;

    /// Lists every known service name with the union of its instance tags.
    async fn list_services(&self) -> RegistryResult<BTreeMap<String, BTreeSet<String>>>;

    /// Reports a health transition for an instance (TTL check pass/fail).
    async fn update_health(&self, service_id: &str, status: HealthStatus) -> RegistryResult<()>;

    /// Starts delivering membership snapshots of `service_name` to `callback`.
    fn watch(&self, service_name: &str, callback: ServiceCallback) -> WatchHandle;

    /// Unconditionally writes a KV value.
    async fn kv_put(&self, key: &str, value: &[u8]) -> RegistryResult<()>;

    /// Writes only if the current version equals `expected_version`.
    /// An expected version of `0` means "only if the key does not exist".
    async fn kv_cas(&self, key: &str, value: &[u8], expected_version: u64) -> RegistryResult<()>;

    async fn kv_get(&self, key: &str) -> RegistryResult<Option<ConfigEntry>>;

    /// Deletes a key. Deleting a missing key succeeds.
    async fn kv_delete(&self, key: &str) -> RegistryResult<()>;

    /// Starts delivering the value of `key` to `callback` on every change.
    fn kv_watch(&self, key: &str, callback: ConfigCallback) -> WatchHandle;
}
