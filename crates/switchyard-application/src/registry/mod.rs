//! Service registry abstraction.
//!
//! Wraps a [`RegistryAdapter`] with input validation, bounded retries, error
//! classification, a short discovery cache and health-aware filtering. Callers above
//! this layer never see adapter-specific errors.

mod cache;

pub use cache::DiscoveryCache;

use crate::retry::RetryPolicy;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use switchyard_core::config::RegistryConfig;
use switchyard_core::registry::{
    ConfigCallback, ConfigEntry, HealthStatus, RegistryAdapter, ServiceCallback, ServiceFilter,
    ServiceHealth, ServiceRegistration, WatchHandle, validate_service_name,
};
use switchyard_core::{CallOptions, Result, SwitchyardError};
use tracing::{debug, info};

pub struct RegistryService {
    adapter: Arc<dyn RegistryAdapter>,
    retry: RetryPolicy,
    cache: Arc<DiscoveryCache>,
    /// One adapter watch per service with cached results; any change it reports
    /// invalidates that service's cache entries.
    health_watches: DashMap<String, WatchHandle>,
}

impl RegistryService {
    pub fn new(adapter: Arc<dyn RegistryAdapter>, config: &RegistryConfig) -> Self {
        let retry = RetryPolicy::new(
            adapter.backend_name(),
            config.retry_attempts,
            config.retry_base_delay(),
            config.retry_max_delay(),
            config.timeout(),
        );
        Self {
            adapter,
            retry,
            cache: Arc::new(DiscoveryCache::new(config.cache_ttl())),
            health_watches: DashMap::new(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.adapter.backend_name()
    }

    /// Registers or re-registers an instance after validating it.
    pub async fn register(
        &self,
        registration: &ServiceRegistration,
        options: &CallOptions,
    ) -> Result<()> {
        registration.validate()?;
        self.retry
            .run("register", options, || self.adapter.register(registration))
            .await?;
        self.cache.invalidate_service(&registration.service_name);
        info!(
            service_name = %registration.service_name,
            service_id = %registration.service_id,
            backend = self.adapter.backend_name(),
            "Service registered"
        );
        Ok(())
    }

    /// Removes an instance. An unknown id is reported as `NotFound`.
    pub async fn deregister(&self, service_id: &str, options: &CallOptions) -> Result<()> {
        if service_id.trim().is_empty() {
            return Err(SwitchyardError::validation("service_id must not be empty"));
        }
        self.retry
            .run("deregister", options, || self.adapter.deregister(service_id))
            .await?;
        self.cache.clear();
        info!(service_id = %service_id, "Service deregistered");
        Ok(())
    }

    /// Returns the servable instances of `service_name` matching every tag and
    /// capability in `filter`. No match is an empty list, not an error.
    pub async fn discover(
        &self,
        service_name: &str,
        filter: &ServiceFilter,
        options: &CallOptions,
    ) -> Result<Vec<ServiceRegistration>> {
        validate_service_name(service_name)?;

        if let Some(cached) = self.cache.get(service_name, filter) {
            debug!(service_name = %service_name, count = cached.len(), "Discovery cache hit");
            return Ok(cached);
        }

        self.ensure_health_watch(service_name);
        let instances = self
            .retry
            .run("discover", options, || self.adapter.discover(service_name, filter))
            .await?;

        let servable: Vec<ServiceRegistration> = instances
            .into_iter()
            .filter(|r| filter.matches(r) && r.status.is_servable())
            .collect();

        debug!(
            service_name = %service_name,
            count = servable.len(),
            "Discovered service instances"
        );
        self.cache.insert(service_name, filter, servable.clone());
        self.release_idle_watches();
        Ok(servable)
    }

    pub async fn list_services(
        &self,
        options: &CallOptions,
    ) -> Result<BTreeMap<String, BTreeSet<String>>> {
        self.retry
            .run("list_services", options, || self.adapter.list_services())
            .await
    }

    /// Health summary over every instance, servable or not.
    pub async fn service_health(
        &self,
        service_name: &str,
        options: &CallOptions,
    ) -> Result<ServiceHealth> {
        validate_service_name(service_name)?;
        let filter = ServiceFilter::default();
        let instances = self
            .retry
            .run("service_health", options, || {
                self.adapter.discover(service_name, &filter)
            })
            .await?;
        Ok(ServiceHealth::from_instances(service_name, &instances))
    }

    /// Reports a health transition and invalidates cached discovery results.
    pub async fn update_health(
        &self,
        service_id: &str,
        status: HealthStatus,
        options: &CallOptions,
    ) -> Result<()> {
        if service_id.trim().is_empty() {
            return Err(SwitchyardError::validation("service_id must not be empty"));
        }
        self.retry
            .run("update_health", options, || {
                self.adapter.update_health(service_id, status)
            })
            .await?;
        self.cache.clear();
        debug!(service_id = %service_id, status = %status, "Health updated");
        Ok(())
    }

    /// Delivers servable-only membership snapshots of `service_name`.
    ///
    /// Every snapshot drops cached results for the service, so discovery never serves
    /// an instance a watch has already seen go unhealthy.
    pub fn watch(&self, service_name: &str, callback: ServiceCallback) -> Result<WatchHandle> {
        validate_service_name(service_name)?;
        let cache = self.cache.clone();
        let name = service_name.to_string();
        let filtered: ServiceCallback = Arc::new(move |instances: Vec<ServiceRegistration>| {
            cache.invalidate_service(&name);
            let servable = instances
                .into_iter()
                .filter(|r| r.status.is_servable())
                .collect();
            callback(servable);
        });
        Ok(self.adapter.watch(service_name, filtered))
    }

    /// Starts the cache-invalidating watch for `service_name` if none is running.
    ///
    /// The adapter's first delivery is the membership at subscription time and only
    /// sets the baseline. Every later delivery is a membership or health change.
    fn ensure_health_watch(&self, service_name: &str) {
        if self.health_watches.contains_key(service_name) {
            return;
        }
        let cache = self.cache.clone();
        let name = service_name.to_string();
        let baseline_seen = AtomicBool::new(false);
        let callback: ServiceCallback = Arc::new(move |_: Vec<ServiceRegistration>| {
            if baseline_seen.swap(true, Ordering::SeqCst) {
                debug!(service_name = %name, "Registry change seen, dropping cached discovery");
                cache.invalidate_service(&name);
            }
        });
        let handle = self.adapter.watch(service_name, callback);
        // A concurrent caller may have won the race; the losing handle is dropped and
        // cancelled.
        self.health_watches
            .entry(service_name.to_string())
            .or_insert(handle);
    }

    /// Cancels watches of services that no longer have cached results.
    fn release_idle_watches(&self) {
        self.health_watches
            .retain(|service_name, _| self.cache.has_service(service_name));
    }

    pub async fn kv_get(&self, key: &str, options: &CallOptions) -> Result<Option<ConfigEntry>> {
        validate_key(key)?;
        self.retry
            .run("kv_get", options, || self.adapter.kv_get(key))
            .await
    }

    pub async fn kv_put(&self, key: &str, value: &[u8], options: &CallOptions) -> Result<()> {
        validate_key(key)?;
        self.retry
            .run("kv_put", options, || self.adapter.kv_put(key, value))
            .await
    }

    /// Compare-and-set. A lost race surfaces as `Conflict`.
    pub async fn kv_cas(
        &self,
        key: &str,
        value: &[u8],
        expected_version: u64,
        options: &CallOptions,
    ) -> Result<()> {
        validate_key(key)?;
        self.retry
            .run("kv_cas", options, || {
                self.adapter.kv_cas(key, value, expected_version)
            })
            .await
    }

    pub async fn kv_delete(&self, key: &str, options: &CallOptions) -> Result<()> {
        validate_key(key)?;
        self.retry
            .run("kv_delete", options, || self.adapter.kv_delete(key))
            .await
    }

    pub fn kv_watch(&self, key: &str, callback: ConfigCallback) -> Result<WatchHandle> {
        validate_key(key)?;
        Ok(self.adapter.kv_watch(key, callback))
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.chars().any(char::is_whitespace) {
        return Err(SwitchyardError::validation(format!(
            "invalid config key '{}'",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use switchyard_core::registry::HealthCheck;
    use switchyard_infrastructure::InMemoryRegistry;

    fn service(adapter: &InMemoryRegistry) -> RegistryService {
        let config = RegistryConfig {
            retry_attempts: 3,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            ..RegistryConfig::default()
        };
        RegistryService::new(Arc::new(adapter.clone()), &config)
    }

    fn librarian(id: &str) -> ServiceRegistration {
        ServiceRegistration::new("Librarian", "10.0.0.5", 8080)
            .with_id(id)
            .with_tag("smart_city")
            .with_capability("search")
    }

    #[tokio::test]
    async fn test_validation_happens_before_network() {
        let adapter = InMemoryRegistry::new();
        adapter.faults().set_available(false);
        let registry = service(&adapter);

        let mut bad = librarian("lib-1");
        bad.port = 0;
        let err = registry.register(&bad, &CallOptions::new()).await.unwrap_err();
        assert!(err.is_validation());

        let err = registry
            .discover("bad name", &ServiceFilter::new(), &CallOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_discover_filters_capabilities_and_health() {
        let adapter = InMemoryRegistry::new();
        let registry = service(&adapter);
        let options = CallOptions::new();
        registry
            .register(&librarian("lib-1"), &options)
            .await
            .expect("Should register");
        registry
            .register(
                &ServiceRegistration::new("Librarian", "10.0.0.6", 8080)
                    .with_id("lib-2")
                    .with_tag("smart_city"),
                &options,
            )
            .await
            .unwrap();

        let search = registry
            .discover("Librarian", &ServiceFilter::new().capability("search"), &options)
            .await
            .unwrap();
        assert_eq!(search.len(), 1);

        registry
            .update_health("lib-1", HealthStatus::Unhealthy, &options)
            .await
            .unwrap();
        let search = registry
            .discover("Librarian", &ServiceFilter::new().capability("search"), &options)
            .await
            .unwrap();
        assert!(search.is_empty());

        let health = registry.service_health("Librarian", &options).await.unwrap();
        assert_eq!(health.total, 2);
        assert_eq!(health.unhealthy, 1);
    }

    #[tokio::test]
    async fn test_unknown_tag_returns_empty() {
        let adapter = InMemoryRegistry::new();
        let registry = service(&adapter);
        let options = CallOptions::new();
        registry
            .register(
                &ServiceRegistration::new("Librarian", "10.0.0.5", 8080).with_tag("other"),
                &options,
            )
            .await
            .unwrap();

        let found = registry
            .discover("Librarian", &ServiceFilter::new().tag("smart_city"), &options)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_surfaces_transient_after_retries() {
        let adapter = InMemoryRegistry::new();
        let registry = service(&adapter);
        adapter.faults().set_available(false);

        let err = registry
            .discover("Librarian", &ServiceFilter::new(), &CallOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_registry_times_out() {
        let adapter = InMemoryRegistry::new();
        let registry = service(&adapter);
        adapter.faults().set_latency(Duration::from_secs(10));

        let err = registry
            .list_services(&CallOptions::new().with_timeout(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_cached_result_is_served_within_ttl() {
        let adapter = InMemoryRegistry::new();
        let registry = service(&adapter);
        let options = CallOptions::new();
        registry
            .register(&librarian("lib-1"), &options)
            .await
            .expect("Should register");
        let first = registry
            .discover("Librarian", &ServiceFilter::new(), &options)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        adapter.faults().set_available(false);
        let cached = registry
            .discover("Librarian", &ServiceFilter::new(), &options)
            .await
            .unwrap();
        assert_eq!(cached, first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_hides_unhealthy_instances() {
        let adapter = InMemoryRegistry::new();
        let registry = service(&adapter);
        let options = CallOptions::new();
        registry
            .register(
                &librarian("lib-1").with_health_check(HealthCheck::Ttl {
                    ttl_secs: 5,
                    deregister_after_secs: None,
                }),
                &options,
            )
            .await
            .unwrap();

        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = registry
            .watch(
                "Librarian",
                Arc::new(move |instances: Vec<ServiceRegistration>| {
                    sink.lock().unwrap().push(instances.len());
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_secs(7)).await;
        handle.shutdown().await;

        let delivered = seen.lock().unwrap().clone();
        assert_eq!(delivered.first(), Some(&1));
        assert_eq!(delivered.last(), Some(&0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lapsed_ttl_check_invalidates_cache_without_caller_watch() {
        let adapter = InMemoryRegistry::new();
        let config = RegistryConfig {
            cache_ttl_ms: 60_000,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            ..RegistryConfig::default()
        };
        let registry = RegistryService::new(Arc::new(adapter.clone()), &config);
        let options = CallOptions::new();
        registry
            .register(
                &librarian("lib-1").with_health_check(HealthCheck::Ttl {
                    ttl_secs: 1,
                    deregister_after_secs: None,
                }),
                &options,
            )
            .await
            .expect("Should register");

        let found = registry
            .discover("Librarian", &ServiceFilter::new(), &options)
            .await
            .expect("Should discover");
        assert_eq!(found.len(), 1);

        // TTL lapses well inside the cache TTL, nobody renews it
        tokio::time::sleep(Duration::from_secs(3)).await;
        let found = registry
            .discover("Librarian", &ServiceFilter::new(), &options)
            .await
            .expect("Should discover");
        assert!(found.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_watch_released_with_cache() {
        let adapter = InMemoryRegistry::new();
        let config = RegistryConfig {
            cache_ttl_ms: 1_000,
            ..RegistryConfig::default()
        };
        let registry = RegistryService::new(Arc::new(adapter.clone()), &config);
        let options = CallOptions::new();
        registry
            .register(&librarian("lib-1"), &options)
            .await
            .expect("Should register");

        registry
            .discover("Librarian", &ServiceFilter::new(), &options)
            .await
            .expect("Should discover");
        assert!(registry.health_watches.contains_key("Librarian"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        registry
            .discover("Postman", &ServiceFilter::new(), &options)
            .await
            .expect("Should discover");
        assert!(!registry.health_watches.contains_key("Librarian"));
        assert!(registry.health_watches.contains_key("Postman"));
    }

    #[tokio::test]
    async fn test_kv_key_validation() {
        let adapter = InMemoryRegistry::new();
        let registry = service(&adapter);
        assert!(
            registry
                .kv_put("/leading", b"x", &CallOptions::new())
                .await
                .unwrap_err()
                .is_validation()
        );
    }
}
