use dashmap::DashMap;
use std::time::Duration;
use switchyard_core::registry::{ServiceFilter, ServiceRegistration};
use tokio::time::Instant;

struct CachedDiscovery {
    instances: Vec<ServiceRegistration>,
    fetched_at: Instant,
}

/// Short-lived cache of filtered discovery results keyed by (service name, filter).
///
/// Entries older than the TTL are treated as absent. Any health change or membership
/// change seen by a watch invalidates the affected service.
pub struct DiscoveryCache {
    entries: DashMap<(String, ServiceFilter), CachedDiscovery>,
    ttl: Duration,
}

impl DiscoveryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Gets a fresh cached result.
    pub fn get(&self, service_name: &str, filter: &ServiceFilter) -> Option<Vec<ServiceRegistration>> {
        let key = (service_name.to_string(), filter.clone());
        let entry = self.entries.get(&key)?;
        if entry.fetched_at.elapsed() < self.ttl {
            return Some(entry.instances.clone());
        }
        drop(entry);
        self.entries.remove(&key);
        None
    }

    /// Stores a result and sweeps every expired entry.
    pub fn insert(&self, service_name: &str, filter: &ServiceFilter, instances: Vec<ServiceRegistration>) {
        self.entries
            .retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        self.entries.insert(
            (service_name.to_string(), filter.clone()),
            CachedDiscovery {
                instances,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drops every cached result for `service_name`.
    pub fn invalidate_service(&self, service_name: &str) {
        self.entries.retain(|(name, _), _| name != service_name);
    }

    /// Whether any result for `service_name` is cached, fresh or not.
    pub fn has_service(&self, service_name: &str) -> bool {
        self.entries.iter().any(|entry| entry.key().0 == service_name)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str) -> ServiceRegistration {
        ServiceRegistration::new("Librarian", "10.0.0.5", 8080).with_id(id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = DiscoveryCache::new(Duration::from_secs(2));
        let filter = ServiceFilter::new();
        cache.insert("Librarian", &filter, vec![instance("a")]);

        assert_eq!(cache.get("Librarian", &filter).unwrap().len(), 1);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(cache.get("Librarian", &filter).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_sweeps_expired_filters() {
        let cache = DiscoveryCache::new(Duration::from_secs(2));
        cache.insert("Librarian", &ServiceFilter::new().tag("a"), vec![instance("a")]);
        cache.insert("Librarian", &ServiceFilter::new().tag("b"), vec![instance("b")]);
        tokio::time::advance(Duration::from_secs(3)).await;

        cache.insert("Postman", &ServiceFilter::new(), vec![]);
        assert_eq!(cache.len(), 1);
        assert!(!cache.has_service("Librarian"));
        assert!(cache.has_service("Postman"));
    }

    #[tokio::test]
    async fn test_keyed_by_filter_and_invalidated_by_service() {
        let cache = DiscoveryCache::new(Duration::from_secs(60));
        let all = ServiceFilter::new();
        let tagged = ServiceFilter::new().tag("smart_city");
        cache.insert("Librarian", &all, vec![instance("a"), instance("b")]);
        cache.insert("Librarian", &tagged, vec![instance("a")]);
        cache.insert("Postman", &all, vec![]);

        assert_eq!(cache.get("Librarian", &tagged).unwrap().len(), 1);
        cache.invalidate_service("Librarian");
        assert!(cache.get("Librarian", &all).is_none());
        assert!(cache.get("Postman", &all).is_some());
    }
}
