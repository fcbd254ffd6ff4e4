use super::{HealthArg, print_json};
use anyhow::{Context, Result};
use std::sync::Arc;
use switchyard_application::DiscoveryFacade;
use switchyard_core::registry::{HealthCheck, ServiceFilter, ServiceRegistration};
use tracing::info;

pub struct RegisterArgs {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub id: Option<String>,
    pub tags: Vec<String>,
    pub capabilities: Vec<String>,
    pub metadata: Vec<(String, String)>,
    pub ttl_check: Option<u64>,
}

impl RegisterArgs {
    fn into_registration(self) -> ServiceRegistration {
        let mut registration = match self.id {
            Some(id) => ServiceRegistration::new(self.name, self.address, self.port).with_id(id),
            None => ServiceRegistration::for_endpoint(self.name, self.address, self.port),
        };
        registration.tags.extend(self.tags);
        registration.capabilities.extend(self.capabilities);
        registration.metadata.extend(self.metadata);
        if let Some(ttl_secs) = self.ttl_check {
            registration = registration.with_health_check(HealthCheck::Ttl {
                ttl_secs,
                deregister_after_secs: None,
            });
        }
        registration
    }
}

pub async fn register(facade: &DiscoveryFacade, args: RegisterArgs) -> Result<()> {
    let registration = args.into_registration();
    let service_name = registration.service_name.clone();
    let service_id = facade
        .register_service(registration)
        .await
        .with_context(|| format!("Failed to register '{}'", service_name))?;
    println!("{}", service_id);
    Ok(())
}

pub async fn deregister(facade: &DiscoveryFacade, service_id: &str) -> Result<()> {
    facade
        .deregister_service(service_id)
        .await
        .with_context(|| format!("Failed to deregister '{}'", service_id))?;
    println!("Deregistered {}", service_id);
    Ok(())
}

pub async fn discover(
    facade: &DiscoveryFacade,
    name: &str,
    tags: Vec<String>,
    capabilities: Vec<String>,
) -> Result<()> {
    let filter = tags
        .into_iter()
        .fold(ServiceFilter::new(), |filter, tag| filter.tag(tag));
    let filter = capabilities
        .into_iter()
        .fold(filter, |filter, capability| filter.capability(capability));

    let instances = facade.discover(name, Some(&filter)).await?;
    print_json(&instances)
}

pub async fn services(facade: &DiscoveryFacade) -> Result<()> {
    print_json(&facade.list_services().await?)
}

pub async fn health(facade: &DiscoveryFacade, name: &str) -> Result<()> {
    print_json(&facade.service_health(name).await?)
}

pub async fn report_health(
    facade: &DiscoveryFacade,
    service_id: &str,
    status: HealthArg,
) -> Result<()> {
    facade.report_health(service_id, status.into()).await?;
    println!("Reported {:?} for {}", status, service_id);
    Ok(())
}

/// Prints one JSON line per change notification until Ctrl-C.
pub async fn watch(facade: &DiscoveryFacade, name: &str) -> Result<()> {
    let handle = facade.watch(
        name,
        Arc::new(|instances: Vec<ServiceRegistration>| {
            match serde_json::to_string(&instances) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("Failed to encode instances: {}", e),
            }
        }),
    )?;
    info!(service_name = %name, "Watching for changes, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    handle.shutdown().await;
    Ok(())
}
