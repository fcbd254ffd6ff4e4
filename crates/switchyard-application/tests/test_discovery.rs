use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_application::{DiscoveryFacade, RegistryService};
use switchyard_core::config::RegistryConfig;
use switchyard_core::registry::{
    ConfigEntry, HealthStatus, ServiceFilter, ServiceRegistration,
};
use switchyard_infrastructure::InMemoryRegistry;

fn facade() -> (DiscoveryFacade, InMemoryRegistry) {
    let adapter = InMemoryRegistry::new();
    let config = RegistryConfig {
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 10,
        ..RegistryConfig::default()
    };
    let registry = RegistryService::new(Arc::new(adapter.clone()), &config);
    (DiscoveryFacade::new(Arc::new(registry)), adapter)
}

fn librarian(id: &str) -> ServiceRegistration {
    ServiceRegistration::new("Librarian", "10.0.0.5", 8080)
        .with_id(id)
        .with_tag("knowledge")
        .with_capability("search")
}

#[tokio::test]
async fn test_registered_instance_is_discoverable() {
    let (facade, _) = facade();
    let registration = librarian("lib-1").with_metadata("version", "1.0.0");
    facade
        .register_service(registration.clone())
        .await
        .expect("Should register");

    let found = facade
        .discover("Librarian", None)
        .await
        .expect("Should discover");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].service_id, "lib-1");
    assert_eq!(found[0].metadata["version"], "1.0.0");
}

#[tokio::test]
async fn test_reregistration_never_duplicates() {
    let (facade, _) = facade();
    for version in ["1.0.0", "1.1.0", "1.2.0"] {
        facade
            .register_service(librarian("lib-1").with_metadata("version", version))
            .await
            .expect("Should register");
    }

    let health = facade
        .service_health("Librarian")
        .await
        .expect("Should read health");
    assert_eq!(health.total, 1);

    let found = facade.discover("Librarian", None).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].metadata["version"], "1.2.0");
}

#[tokio::test]
async fn test_startup_register_reinvoked_with_new_metadata() {
    let (facade, _) = facade();
    let mut ids = Vec::new();
    for version in ["1", "2"] {
        let metadata = BTreeMap::from([("version".to_string(), version.to_string())]);
        let id = facade
            .register(
                "Librarian",
                "10.0.0.5",
                8080,
                ["knowledge"],
                ["search"],
                metadata,
            )
            .await
            .expect("Should register");
        ids.push(id);
    }
    assert_eq!(ids[0], ids[1]);

    let health = facade
        .service_health("Librarian")
        .await
        .expect("Should read health");
    assert_eq!(health.total, 1);

    let found = facade.discover("Librarian", None).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].metadata["version"], "2");
}

#[tokio::test]
async fn test_unmatched_tag_is_empty_not_error() {
    let (facade, _) = facade();
    facade.register_service(librarian("lib-1")).await.unwrap();

    let filter = ServiceFilter::new().tag("smart_city");
    let found = facade
        .discover("Librarian", Some(&filter))
        .await
        .expect("Filter miss should not be an error");
    assert!(found.is_empty());

    let unknown = facade
        .discover("NoSuchService", None)
        .await
        .expect("Unknown service should not be an error");
    assert!(unknown.is_empty());
}

#[tokio::test]
async fn test_reported_failure_hides_instance() {
    let (facade, _) = facade();
    facade.register_service(librarian("lib-1")).await.unwrap();
    facade.register_service(librarian("lib-2")).await.unwrap();
    assert_eq!(facade.discover("Librarian", None).await.unwrap().len(), 2);

    facade
        .report_health("lib-2", HealthStatus::Unhealthy)
        .await
        .expect("Should report health");
    let found = facade.discover("Librarian", None).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].service_id, "lib-1");
}

#[tokio::test(start_paused = true)]
async fn test_registry_outage_is_transient_after_retries() {
    let (facade, adapter) = facade();
    adapter.faults().set_available(false);

    let err = facade
        .register_service(librarian("lib-1"))
        .await
        .unwrap_err();
    assert!(err.is_transient());

    adapter.faults().set_available(true);
    facade
        .register_service(librarian("lib-1"))
        .await
        .expect("Should register after recovery");
}

#[tokio::test]
async fn test_list_services_includes_tags() {
    let (facade, _) = facade();
    facade
        .register(
            "Postman",
            "10.0.0.9",
            9000,
            ["messaging"],
            Vec::<String>::new(),
            BTreeMap::new(),
        )
        .await
        .unwrap();
    facade.register_service(librarian("lib-1")).await.unwrap();

    let services = facade.list_services().await.expect("Should list services");
    assert!(services["Postman"].contains("messaging"));
    assert!(services["Librarian"].contains("knowledge"));
}

#[tokio::test]
async fn test_config_watch_and_lost_update() {
    let (facade, _) = facade();
    let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handle = facade
        .watch_config(
            "features/insights",
            Arc::new(move |entry: Option<ConfigEntry>| {
                let value = entry.and_then(|e| e.value_str().map(str::to_string));
                sink.lock().unwrap().push(value);
            }),
        )
        .expect("Should start watch");

    facade.set_config("features/insights", "on").await.unwrap();
    let version = facade
        .get_config("features/insights")
        .await
        .unwrap()
        .expect("Should exist")
        .version;

    // Another writer gets there first
    facade.set_config("features/insights", "off").await.unwrap();
    let err = facade
        .compare_and_set_config("features/insights", "on-again", version)
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.shutdown().await;

    let delivered = seen.lock().unwrap().clone();
    assert_eq!(delivered.last(), Some(&Some("off".to_string())));
    assert!(!delivered.contains(&Some("on-again".to_string())));
}
