use super::print_json;
use anyhow::{Result, bail};
use serde_json::json;
use switchyard_application::DiscoveryFacade;

pub async fn get(facade: &DiscoveryFacade, key: &str) -> Result<()> {
    let Some(entry) = facade.get_config(key).await? else {
        bail!("Config key '{}' not found", key);
    };
    print_json(&json!({
        "key": entry.key,
        "value": String::from_utf8_lossy(&entry.value),
        "version": entry.version,
    }))
}

pub async fn set(
    facade: &DiscoveryFacade,
    key: &str,
    value: &str,
    expected_version: Option<u64>,
) -> Result<()> {
    match expected_version {
        Some(version) => facade.compare_and_set_config(key, value, version).await?,
        None => facade.set_config(key, value).await?,
    }
    println!("Set {}", key);
    Ok(())
}

pub async fn delete(facade: &DiscoveryFacade, key: &str) -> Result<()> {
    facade.delete_config(key).await?;
    println!("Deleted {}", key);
    Ok(())
}
