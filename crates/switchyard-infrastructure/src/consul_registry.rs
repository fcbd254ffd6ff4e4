//! Consul HTTP registry adapter.
//!
//! Translates registry calls to the Consul agent HTTP API:
//!
//! - `PUT  /v1/agent/service/register` / `deregister/{id}`
//! - `GET  /v1/health/service/{name}` (blocking queries drive `watch`)
//! - `GET  /v1/catalog/services`
//! - `PUT  /v1/agent/check/{pass|fail|warn}/service:{id}`
//! - `/v1/kv/{key}` with `?cas=` for compare-and-set
//!
//! Capabilities travel as tags prefixed `capability:`. The registration time and the
//! health-check descriptor travel in service `Meta`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use switchyard_core::registry::{
    ConfigCallback, ConfigEntry, HealthCheck, HealthStatus, RegistryAdapter, RegistryError,
    RegistryResult, ServiceCallback, ServiceFilter, ServiceRegistration, WatchHandle,
    notify_unless_cancelled,
};

const BACKEND: &str = "consul";
const CAPABILITY_TAG_PREFIX: &str = "capability:";
const META_REGISTERED_AT: &str = "switchyard-registered-at";
const META_HEALTH_CHECK: &str = "switchyard-health-check";
const INDEX_HEADER: &str = "X-Consul-Index";

/// Long-poll wait for blocking queries.
const BLOCKING_WAIT: Duration = Duration::from_secs(30);
/// Pause after a failed blocking query before polling again.
const WATCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    client: Client,
    base_url: String,
    token: Option<String>,
    blocking_wait: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    address: String,
    port: u16,
    tags: Vec<String>,
    meta: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    check: Option<AgentCheck>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "PascalCase")]
struct AgentCheck {
    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    ttl: Option<String>,
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    http: Option<String>,
    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    tcp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deregister_critical_service_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthServiceEntry {
    service: CatalogService,
    #[serde(default)]
    checks: Vec<HealthCheckEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    meta: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthCheckEntry {
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvPair {
    key: String,
    #[serde(default)]
    value: Option<String>,
    modify_index: u64,
}

impl ConsulRegistry {
    /// Creates an adapter for the agent at `base_url` (e.g. `http://127.0.0.1:8500`).
    pub fn new(base_url: impl Into<String>) -> RegistryResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| RegistryError::Protocol(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            blocking_wait: BLOCKING_WAIT,
        })
    }

    /// Sends `X-Consul-Token` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Overrides the long-poll wait used by watches.
    pub fn with_blocking_wait(mut self, wait: Duration) -> Self {
        self.blocking_wait = wait;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header("X-Consul-Token", token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RegistryResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(classify_transport_error)?;
        check_status(response).await
    }

    fn to_agent_registration(registration: &ServiceRegistration) -> RegistryResult<AgentServiceRegistration> {
        let mut tags: Vec<String> = registration.tags.iter().cloned().collect();
        tags.extend(
            registration
                .capabilities
                .iter()
                .map(|c| format!("{}{}", CAPABILITY_TAG_PREFIX, c)),
        );

        let mut meta = registration.metadata.clone();
        meta.insert(
            META_REGISTERED_AT.to_string(),
            registration.registered_at.to_rfc3339(),
        );
        meta.insert(
            META_HEALTH_CHECK.to_string(),
            serde_json::to_string(&registration.health_check)
                .map_err(|e| RegistryError::Serialization(e.to_string()))?,
        );

        let check = match &registration.health_check {
            HealthCheck::None => None,
            HealthCheck::Ttl {
                ttl_secs,
                deregister_after_secs,
            } => Some(AgentCheck {
                ttl: Some(format!("{}s", ttl_secs)),
                deregister_critical_service_after: deregister_after_secs.map(|s| format!("{}s", s)),
                status: Some("passing".to_string()),
                ..AgentCheck::default()
            }),
            HealthCheck::Http { url, interval_secs } => Some(AgentCheck {
                http: Some(url.clone()),
                interval: Some(format!("{}s", interval_secs)),
                ..AgentCheck::default()
            }),
            HealthCheck::Tcp {
                address,
                interval_secs,
            } => Some(AgentCheck {
                tcp: Some(address.clone()),
                interval: Some(format!("{}s", interval_secs)),
                ..AgentCheck::default()
            }),
        };

        Ok(AgentServiceRegistration {
            id: registration.service_id.clone(),
            name: registration.service_name.clone(),
            address: registration.address.clone(),
            port: registration.port,
            tags,
            meta,
            check,
        })
    }

    fn from_health_entry(entry: HealthServiceEntry) -> ServiceRegistration {
        let mut tags = BTreeSet::new();
        let mut capabilities = BTreeSet::new();
        for tag in entry.service.tags.unwrap_or_default() {
            match tag.strip_prefix(CAPABILITY_TAG_PREFIX) {
                Some(capability) => {
                    capabilities.insert(capability.to_string());
                }
                None => {
                    tags.insert(tag);
                }
            }
        }

        let mut metadata = entry.service.meta.unwrap_or_default();
        let registered_at = metadata
            .remove(META_REGISTERED_AT)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let health_check = metadata
            .remove(META_HEALTH_CHECK)
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        ServiceRegistration {
            service_id: entry.service.id,
            service_name: entry.service.service,
            address: entry.service.address,
            port: entry.service.port,
            tags,
            capabilities,
            metadata,
            health_check,
            registered_at,
            status: aggregate_status(&entry.checks),
        }
    }

    /// One health query, optionally blocking until the index moves past `index`.
    async fn health_service(
        &self,
        service_name: &str,
        filter: &ServiceFilter,
        index: Option<u64>,
    ) -> RegistryResult<(Vec<ServiceRegistration>, Option<u64>)> {
        let mut query: Vec<(&str, String)> =
            filter.tags.iter().map(|t| ("tag", t.clone())).collect();
        let mut request = self.client.get(self.url(&format!("/v1/health/service/{}", service_name)));
        if let Some(index) = index {
            query.push(("index", index.to_string()));
            query.push(("wait", format!("{}s", self.blocking_wait.as_secs().max(1))));
            request = request.timeout(self.blocking_wait + Duration::from_secs(5));
        }
        let response = self.send(request.query(&query)).await?;
        let next_index = consul_index(&response);
        let entries: Vec<HealthServiceEntry> = response
            .json()
            .await
            .map_err(|e| RegistryError::Protocol(e.to_string()))?;

        let mut registrations: Vec<ServiceRegistration> =
            entries.into_iter().map(Self::from_health_entry).collect();
        registrations.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        Ok((registrations, next_index))
    }

    async fn kv_read(&self, key: &str, index: Option<u64>) -> RegistryResult<(Option<ConfigEntry>, Option<u64>)> {
        let mut request = self.client.get(self.url(&format!("/v1/kv/{}", key)));
        if let Some(index) = index {
            request = request
                .query(&[
                    ("index", index.to_string()),
                    ("wait", format!("{}s", self.blocking_wait.as_secs().max(1))),
                ])
                .timeout(self.blocking_wait + Duration::from_secs(5));
        }

        let response = match self.send(request).await {
            Ok(response) => response,
            Err(RegistryError::NotFound(_)) => return Ok((None, None)),
            Err(e) => return Err(e),
        };
        let next_index = consul_index(&response);
        let pairs: Vec<KvPair> = response
            .json()
            .await
            .map_err(|e| RegistryError::Protocol(e.to_string()))?;

        let entry = match pairs.into_iter().next() {
            Some(pair) => {
                let value = match pair.value {
                    Some(encoded) => BASE64
                        .decode(encoded)
                        .map_err(|e| RegistryError::Serialization(e.to_string()))?,
                    None => Vec::new(),
                };
                Some(ConfigEntry {
                    key: pair.key,
                    value,
                    version: pair.modify_index,
                })
            }
            None => None,
        };
        Ok((entry, next_index))
    }

    async fn kv_write(&self, key: &str, value: &[u8], cas: Option<u64>) -> RegistryResult<bool> {
        let mut request = self
            .client
            .put(self.url(&format!("/v1/kv/{}", key)))
            .body(value.to_vec());
        if let Some(cas) = cas {
            request = request.query(&[("cas", cas.to_string())]);
        }
        let response = self.send(request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| RegistryError::Protocol(e.to_string()))?;
        Ok(body.trim() == "true")
    }
}

fn consul_index(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Any critical check makes the instance unhealthy; all passing makes it healthy.
fn aggregate_status(checks: &[HealthCheckEntry]) -> HealthStatus {
    if checks.iter().any(|c| c.status == "critical") {
        HealthStatus::Unhealthy
    } else if checks.iter().all(|c| c.status == "passing") {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unknown
    }
}

fn classify_transport_error(err: reqwest::Error) -> RegistryError {
    if err.is_timeout() {
        RegistryError::Timeout(Duration::ZERO)
    } else if err.is_connect() || err.is_request() {
        RegistryError::Unavailable(err.to_string())
    } else {
        RegistryError::Protocol(err.to_string())
    }
}

async fn check_status(response: Response) -> RegistryResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => RegistryError::NotFound(body),
        StatusCode::BAD_REQUEST => RegistryError::Rejected(body),
        StatusCode::TOO_MANY_REQUESTS => RegistryError::Unavailable(body),
        s if s.is_server_error() => RegistryError::Unavailable(format!("{}: {}", s, body)),
        s => RegistryError::Protocol(format!("{}: {}", s, body)),
    })
}

#[async_trait]
impl RegistryAdapter for ConsulRegistry {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn register(&self, registration: &ServiceRegistration) -> RegistryResult<()> {
        let body = Self::to_agent_registration(registration)?;
        self.send(
            self.client
                .put(self.url("/v1/agent/service/register"))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> RegistryResult<()> {
        self.send(
            self.client
                .put(self.url(&format!("/v1/agent/service/deregister/{}", service_id))),
        )
        .await?;
        Ok(())
    }

    async fn discover(
        &self,
        service_name: &str,
        filter: &ServiceFilter,
    ) -> RegistryResult<Vec<ServiceRegistration>> {
        let (registrations, _) = self.health_service(service_name, filter, None).await?;
        Ok(registrations)
    }

    async fn list_services(&self) -> RegistryResult<BTreeMap<String, BTreeSet<String>>> {
        let response = self
            .send(self.client.get(self.url("/v1/catalog/services")))
            .await?;
        let services: BTreeMap<String, Vec<String>> = response
            .json()
            .await
            .map_err(|e| RegistryError::Protocol(e.to_string()))?;
        Ok(services
            .into_iter()
            .map(|(name, tags)| {
                let tags = tags
                    .into_iter()
                    .filter(|t| !t.starts_with(CAPABILITY_TAG_PREFIX))
                    .collect();
                (name, tags)
            })
            .collect())
    }

    async fn update_health(&self, service_id: &str, status: HealthStatus) -> RegistryResult<()> {
        let verb = match status {
            HealthStatus::Healthy => "pass",
            HealthStatus::Unhealthy => "fail",
            HealthStatus::Unknown => "warn",
        };
        self.send(
            self.client
                .put(self.url(&format!("/v1/agent/check/{}/service:{}", verb, service_id))),
        )
        .await?;
        Ok(())
    }

    fn watch(&self, service_name: &str, callback: ServiceCallback) -> WatchHandle {
        let registry = self.clone();
        let service_name = service_name.to_string();

        WatchHandle::spawn(move |token| async move {
            let filter = ServiceFilter::default();
            let mut index: Option<u64> = None;
            let mut last: Option<Vec<ServiceRegistration>> = None;
            loop {
                let result = tokio::select! {
                    _ = token.cancelled() => break,
                    result = registry.health_service(&service_name, &filter, index) => result,
                };
                match result {
                    Ok((snapshot, next_index)) => {
                        // A reset index means the agent restarted; start over.
                        index = match (index, next_index) {
                            (Some(old), Some(new)) if new < old => None,
                            (_, next) => next,
                        };
                        if last.as_ref() != Some(&snapshot) {
                            if !notify_unless_cancelled(&token, &callback, snapshot.clone()) {
                                break;
                            }
                            last = Some(snapshot);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(service_name = %service_name, error = %e, "Consul watch query failed");
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(WATCH_ERROR_BACKOFF) => {}
                        }
                    }
                }
            }
            tracing::debug!(service_name = %service_name, "Consul service watch stopped");
        })
    }

    async fn kv_put(&self, key: &str, value: &[u8]) -> RegistryResult<()> {
        if self.kv_write(key, value, None).await? {
            Ok(())
        } else {
            Err(RegistryError::Protocol(format!("KV write of '{}' was refused", key)))
        }
    }

    async fn kv_cas(&self, key: &str, value: &[u8], expected_version: u64) -> RegistryResult<()> {
        if self.kv_write(key, value, Some(expected_version)).await? {
            Ok(())
        } else {
            Err(RegistryError::CasMismatch {
                key: key.to_string(),
                expected: expected_version,
            })
        }
    }

    async fn kv_get(&self, key: &str) -> RegistryResult<Option<ConfigEntry>> {
        let (entry, _) = self.kv_read(key, None).await?;
        Ok(entry)
    }

    async fn kv_delete(&self, key: &str) -> RegistryResult<()> {
        match self
            .send(self.client.delete(self.url(&format!("/v1/kv/{}", key))))
            .await
        {
            Ok(_) | Err(RegistryError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn kv_watch(&self, key: &str, callback: ConfigCallback) -> WatchHandle {
        let registry = self.clone();
        let key = key.to_string();

        WatchHandle::spawn(move |token| async move {
            let mut index: Option<u64> = None;
            let mut last: Option<Option<ConfigEntry>> = None;
            loop {
                let result = tokio::select! {
                    _ = token.cancelled() => break,
                    result = registry.kv_read(&key, index) => result,
                };
                match result {
                    Ok((entry, next_index)) => {
                        // Missing keys answer 404 without an index; fall back to polling.
                        let blocked = index.is_some() && next_index.is_some();
                        index = next_index;
                        if last.as_ref() != Some(&entry) {
                            if !notify_unless_cancelled(&token, &callback, entry.clone()) {
                                break;
                            }
                            last = Some(entry);
                        }
                        if !blocked {
                            tokio::select! {
                                _ = token.cancelled() => break,
                                _ = tokio::time::sleep(WATCH_ERROR_BACKOFF) => {}
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Consul KV watch query failed");
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(WATCH_ERROR_BACKOFF) => {}
                        }
                    }
                }
            }
            tracing::debug!(key = %key, "Consul KV watch stopped");
        })
    }
}
