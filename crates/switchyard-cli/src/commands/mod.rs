pub mod config;
pub mod service;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use switchyard_application::{DiscoveryFacade, RegistryService};
use switchyard_core::registry::HealthStatus;
use switchyard_infrastructure::{ConfigService, ConsulRegistry};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HealthArg {
    Healthy,
    Unhealthy,
    Unknown,
}

impl From<HealthArg> for HealthStatus {
    fn from(arg: HealthArg) -> Self {
        match arg {
            HealthArg::Healthy => HealthStatus::Healthy,
            HealthArg::Unhealthy => HealthStatus::Unhealthy,
            HealthArg::Unknown => HealthStatus::Unknown,
        }
    }
}

/// Builds the discovery facade over a Consul agent.
pub fn connect(
    consul_addr: &str,
    token: Option<&str>,
    config_path: Option<&Path>,
) -> Result<DiscoveryFacade> {
    let config_service = match config_path {
        Some(path) => ConfigService::from_path(path),
        None => ConfigService::new(),
    };
    let config = config_service
        .get_config()
        .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let mut adapter = ConsulRegistry::new(consul_addr)
        .with_context(|| format!("Invalid Consul address: {}", consul_addr))?;
    if let Some(token) = token {
        adapter = adapter.with_token(token);
    }
    debug!(consul_addr, "Connecting to registry");

    let registry = RegistryService::new(Arc::new(adapter), &config.registry);
    Ok(DiscoveryFacade::new(Arc::new(registry)))
}

pub fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("version=1.2.0").expect("Should parse"),
            ("version".to_string(), "1.2.0".to_string())
        );
        assert_eq!(
            parse_key_value("url=http://x?a=b").expect("Should parse").1,
            "http://x?a=b"
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=v").is_err());
    }
}
