//! In-process registry adapter.
//!
//! Behaves like a single Consul agent: instances are keyed by `service_id`, TTL
//! checks turn an instance critical when not renewed in time and remove it after
//! `deregister_after_secs`, and the KV namespace carries a global modify index used
//! for compare-and-set. HTTP and TCP checks are recorded but never run.

use crate::fault::FaultSwitch;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use switchyard_core::registry::{
    ConfigCallback, ConfigEntry, HealthCheck, HealthStatus, RegistryAdapter, RegistryError,
    RegistryResult, ServiceCallback, ServiceFilter, ServiceRegistration, WatchHandle,
    notify_unless_cancelled,
};
use tokio::sync::watch;
use tokio::time::Instant;

const BACKEND: &str = "memory-registry";

/// How often watch loops re-evaluate TTL expiry without a write happening.
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

struct Instance {
    registration: ServiceRegistration,
    last_pass: Instant,
    reported: Option<HealthStatus>,
    failed_at: Option<Instant>,
}

impl Instance {
    fn ttl(&self) -> Option<Duration> {
        match self.registration.health_check {
            HealthCheck::Ttl { ttl_secs, .. } => Some(Duration::from_secs(ttl_secs)),
            _ => None,
        }
    }

    fn unhealthy_since(&self, now: Instant) -> Option<Instant> {
        if self.reported == Some(HealthStatus::Unhealthy) {
            return self.failed_at;
        }
        let expires = self.last_pass + self.ttl()?;
        (now > expires).then_some(expires)
    }

    fn status_at(&self, now: Instant) -> HealthStatus {
        if self.unhealthy_since(now).is_some() {
            HealthStatus::Unhealthy
        } else {
            self.reported.unwrap_or(HealthStatus::Healthy)
        }
    }

    fn reapable_at(&self, now: Instant) -> bool {
        let HealthCheck::Ttl {
            deregister_after_secs: Some(after),
            ..
        } = self.registration.health_check
        else {
            return false;
        };
        self.unhealthy_since(now)
            .is_some_and(|since| now >= since + Duration::from_secs(after))
    }

    fn snapshot(&self, now: Instant) -> ServiceRegistration {
        let mut registration = self.registration.clone();
        registration.status = self.status_at(now);
        registration
    }
}

struct KvEntry {
    value: Vec<u8>,
    modify_index: u64,
}

#[derive(Default)]
struct State {
    instances: HashMap<String, Instance>,
    kv: HashMap<String, KvEntry>,
    modify_index: u64,
}

struct Shared {
    state: Mutex<State>,
    service_changes: watch::Sender<u64>,
    kv_changes: watch::Sender<u64>,
    faults: FaultSwitch,
}

/// Registry adapter holding everything in process memory.
#[derive(Clone)]
pub struct InMemoryRegistry {
    shared: Arc<Shared>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                service_changes: watch::Sender::new(0),
                kv_changes: watch::Sender::new(0),
                faults: FaultSwitch::default(),
            }),
        }
    }

    /// Simulated outage and latency.
    pub fn faults(&self) -> &FaultSwitch {
        &self.shared.faults
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self) -> RegistryResult<()> {
        if self.shared.faults.pass().await {
            Ok(())
        } else {
            Err(RegistryError::Unavailable(format!(
                "{} is not reachable",
                BACKEND
            )))
        }
    }

    fn notify_services(&self) {
        self.shared.service_changes.send_modify(|n| *n += 1);
    }

    fn notify_kv(&self) {
        self.shared.kv_changes.send_modify(|n| *n += 1);
    }

    /// Removes instances past their deregister-after window.
    fn reap(&self, state: &mut State, now: Instant) -> bool {
        let before = state.instances.len();
        state.instances.retain(|id, instance| {
            let keep = !instance.reapable_at(now);
            if !keep {
                tracing::info!(service_id = %id, "Deregistering critical instance");
            }
            keep
        });
        before != state.instances.len()
    }

    fn instances_of(&self, service_name: &str, filter: &ServiceFilter) -> Vec<ServiceRegistration> {
        let now = Instant::now();
        let mut state = self.state();
        let reaped = self.reap(&mut state, now);
        let mut found: Vec<ServiceRegistration> = state
            .instances
            .values()
            .filter(|i| i.registration.service_name == service_name)
            .filter(|i| filter.matches_tags(&i.registration))
            .map(|i| i.snapshot(now))
            .collect();
        drop(state);
        if reaped {
            self.notify_services();
        }
        found.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        found
    }

    fn kv_entry(&self, key: &str) -> Option<ConfigEntry> {
        self.state().kv.get(key).map(|entry| ConfigEntry {
            key: key.to_string(),
            value: entry.value.clone(),
            version: entry.modify_index,
        })
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryAdapter for InMemoryRegistry {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn register(&self, registration: &ServiceRegistration) -> RegistryResult<()> {
        self.enter().await?;
        let now = Instant::now();
        {
            let mut state = self.state();
            let mut registration = registration.clone();
            registration.status = HealthStatus::Healthy;
            state.instances.insert(
                registration.service_id.clone(),
                Instance {
                    registration,
                    last_pass: now,
                    reported: None,
                    failed_at: None,
                },
            );
        }
        self.notify_services();
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> RegistryResult<()> {
        self.enter().await?;
        let removed = self.state().instances.remove(service_id).is_some();
        if !removed {
            return Err(RegistryError::NotFound(service_id.to_string()));
        }
        self.notify_services();
        Ok(())
    }

    async fn discover(
        &self,
        service_name: &str,
        filter: &ServiceFilter,
    ) -> RegistryResult<Vec<ServiceRegistration>> {
        self.enter().await?;
        Ok(self.instances_of(service_name, filter))
    }

    async fn list_services(&self) -> RegistryResult<BTreeMap<String, BTreeSet<String>>> {
        self.enter().await?;
        let now = Instant::now();
        let mut state = self.state();
        self.reap(&mut state, now);
        let mut services: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for instance in state.instances.values() {
            services
                .entry(instance.registration.service_name.clone())
                .or_default()
                .extend(instance.registration.tags.iter().cloned());
        }
        Ok(services)
    }

    async fn update_health(&self, service_id: &str, status: HealthStatus) -> RegistryResult<()> {
        self.enter().await?;
        let now = Instant::now();
        {
            let mut state = self.state();
            let instance = state
                .instances
                .get_mut(service_id)
                .ok_or_else(|| RegistryError::NotFound(service_id.to_string()))?;
            match status {
                HealthStatus::Healthy => {
                    instance.last_pass = now;
                    instance.reported = Some(HealthStatus::Healthy);
                    instance.failed_at = None;
                }
                HealthStatus::Unhealthy => {
                    if instance.reported != Some(HealthStatus::Unhealthy) {
                        instance.failed_at = Some(now);
                    }
                    instance.reported = Some(HealthStatus::Unhealthy);
                }
                HealthStatus::Unknown => {
                    instance.last_pass = now;
                    instance.reported = Some(HealthStatus::Unknown);
                    instance.failed_at = None;
                }
            }
        }
        self.notify_services();
        Ok(())
    }

    fn watch(&self, service_name: &str, callback: ServiceCallback) -> WatchHandle {
        let registry = self.clone();
        let service_name = service_name.to_string();
        let mut changes = self.shared.service_changes.subscribe();

        WatchHandle::spawn(move |token| async move {
            let filter = ServiceFilter::default();
            let mut last: Option<Vec<ServiceRegistration>> = None;
            loop {
                if registry.shared.faults.is_available() {
                    let snapshot = registry.instances_of(&service_name, &filter);
                    if last.as_ref() != Some(&snapshot) {
                        if !notify_unless_cancelled(&token, &callback, snapshot.clone()) {
                            break;
                        }
                        last = Some(snapshot);
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(WATCH_POLL_INTERVAL) => {}
                }
            }
            tracing::debug!(service_name = %service_name, "Service watch stopped");
        })
    }

    async fn kv_put(&self, key: &str, value: &[u8]) -> RegistryResult<()> {
        self.enter().await?;
        {
            let mut state = self.state();
            state.modify_index += 1;
            let modify_index = state.modify_index;
            state.kv.insert(
                key.to_string(),
                KvEntry {
                    value: value.to_vec(),
                    modify_index,
                },
            );
        }
        self.notify_kv();
        Ok(())
    }

    async fn kv_cas(&self, key: &str, value: &[u8], expected_version: u64) -> RegistryResult<()> {
        self.enter().await?;
        {
            let mut state = self.state();
            let current = state.kv.get(key).map(|e| e.modify_index).unwrap_or(0);
            if current != expected_version {
                return Err(RegistryError::CasMismatch {
                    key: key.to_string(),
                    expected: expected_version,
                });
            }
            state.modify_index += 1;
            let modify_index = state.modify_index;
            state.kv.insert(
                key.to_string(),
                KvEntry {
                    value: value.to_vec(),
                    modify_index,
                },
            );
        }
        self.notify_kv();
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> RegistryResult<Option<ConfigEntry>> {
        self.enter().await?;
        Ok(self.kv_entry(key))
    }

    async fn kv_delete(&self, key: &str) -> RegistryResult<()> {
        self.enter().await?;
        let removed = self.state().kv.remove(key).is_some();
        if removed {
            self.notify_kv();
        }
        Ok(())
    }

    fn kv_watch(&self, key: &str, callback: ConfigCallback) -> WatchHandle {
        let registry = self.clone();
        let key = key.to_string();
        let mut changes = self.shared.kv_changes.subscribe();

        WatchHandle::spawn(move |token| async move {
            let mut last: Option<Option<ConfigEntry>> = None;
            loop {
                if registry.shared.faults.is_available() {
                    let current = registry.kv_entry(&key);
                    if last.as_ref() != Some(&current) {
                        if !notify_unless_cancelled(&token, &callback, current.clone()) {
                            break;
                        }
                        last = Some(current);
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(key = %key, "KV watch stopped");
        })
    }
}
