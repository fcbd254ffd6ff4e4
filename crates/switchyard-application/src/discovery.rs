//! Discovery facade.
//!
//! The single entry point components use for registration, discovery and shared
//! configuration. Everything behind it, including the registry technology, can be
//! swapped by constructing the facade over a different adapter.

use crate::registry::RegistryService;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use switchyard_core::registry::{
    ConfigCallback, ConfigEntry, HealthStatus, ServiceCallback, ServiceFilter, ServiceHealth,
    ServiceRegistration, WatchHandle,
};
use switchyard_core::{CallOptions, Result};
use tracing::debug;

#[derive(Clone)]
pub struct DiscoveryFacade {
    registry: Arc<RegistryService>,
}

impl DiscoveryFacade {
    pub fn new(registry: Arc<RegistryService>) -> Self {
        Self { registry }
    }

    /// Registers `registration`, returning its service id.
    ///
    /// Calling this again with the same `service_id` updates the instance in place.
    pub async fn register_service(&self, registration: ServiceRegistration) -> Result<String> {
        self.registry
            .register(&registration, &CallOptions::new())
            .await?;
        Ok(registration.service_id)
    }

    /// Startup registration keyed by endpoint: the id is
    /// `"{service_name}-{address}-{port}"`, so re-invoking it after a metadata change
    /// updates the same instance.
    pub async fn register<T, C>(
        &self,
        service_name: &str,
        address: &str,
        port: u16,
        tags: T,
        capabilities: C,
        metadata: BTreeMap<String, String>,
    ) -> Result<String>
    where
        T: IntoIterator,
        T::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let mut registration = ServiceRegistration::for_endpoint(service_name, address, port);
        registration.tags = tags.into_iter().map(Into::into).collect();
        registration.capabilities = capabilities.into_iter().map(Into::into).collect();
        registration.metadata = metadata;
        self.register_service(registration).await
    }

    /// Removes an instance. Removing an instance that is already gone succeeds.
    pub async fn deregister_service(&self, service_id: &str) -> Result<()> {
        match self.registry.deregister(service_id, &CallOptions::new()).await {
            Err(e) if e.is_not_found() => {
                debug!(service_id = %service_id, "Instance already deregistered");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn discover(
        &self,
        service_name: &str,
        filter: Option<&ServiceFilter>,
    ) -> Result<Vec<ServiceRegistration>> {
        self.discover_with(service_name, filter, &CallOptions::new())
            .await
    }

    /// [`discover`](Self::discover) with a per-call timeout or cancellation token.
    pub async fn discover_with(
        &self,
        service_name: &str,
        filter: Option<&ServiceFilter>,
        options: &CallOptions,
    ) -> Result<Vec<ServiceRegistration>> {
        let default_filter = ServiceFilter::default();
        self.registry
            .discover(service_name, filter.unwrap_or(&default_filter), options)
            .await
    }

    pub fn watch(&self, service_name: &str, callback: ServiceCallback) -> Result<WatchHandle> {
        self.registry.watch(service_name, callback)
    }

    pub async fn list_services(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        self.registry.list_services(&CallOptions::new()).await
    }

    pub async fn service_health(&self, service_name: &str) -> Result<ServiceHealth> {
        self.registry
            .service_health(service_name, &CallOptions::new())
            .await
    }

    /// Reports a TTL-check pass or failure for an instance.
    pub async fn report_health(&self, service_id: &str, status: HealthStatus) -> Result<()> {
        self.registry
            .update_health(service_id, status, &CallOptions::new())
            .await
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<ConfigEntry>> {
        self.registry.kv_get(key, &CallOptions::new()).await
    }

    /// Writes shared config with compare-and-set against the version just read.
    ///
    /// # Errors
    ///
    /// `Conflict` if another writer changed the key in between. Re-read and retry.
    pub async fn set_config(&self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        let options = CallOptions::new();
        let expected = self
            .registry
            .kv_get(key, &options)
            .await?
            .map_or(0, |entry| entry.version);
        self.registry
            .kv_cas(key, value.as_ref(), expected, &options)
            .await
    }

    /// Writes only if the key is still at `expected_version` (0 for absent).
    pub async fn compare_and_set_config(
        &self,
        key: &str,
        value: impl AsRef<[u8]>,
        expected_version: u64,
    ) -> Result<()> {
        self.registry
            .kv_cas(key, value.as_ref(), expected_version, &CallOptions::new())
            .await
    }

    pub async fn delete_config(&self, key: &str) -> Result<()> {
        self.registry.kv_delete(key, &CallOptions::new()).await
    }

    pub fn watch_config(&self, key: &str, callback: ConfigCallback) -> Result<WatchHandle> {
        self.registry.kv_watch(key, callback)
    }
}
