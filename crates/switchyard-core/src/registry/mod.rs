//! Registry domain module.
//!
//! # Module Structure
//!
//! - `model`: registrations, filters, health summaries, KV entries
//! - `adapter`: the `RegistryAdapter` trait and its raw error type
//! - `watch`: cancellable watch handles and callback types

mod adapter;
mod model;
mod watch;

pub use adapter::{RegistryAdapter, RegistryError, RegistryResult};
pub use model::{
    ConfigEntry, HealthCheck, HealthStatus, InstanceHealth, ServiceFilter, ServiceHealth,
    ServiceRegistration, validate_service_name,
};
pub use watch::{ConfigCallback, ServiceCallback, WatchHandle, notify_unless_cancelled};
