//! Concrete backends for the Switchyard coordination core.
//!
//! # Module Structure
//!
//! - Registry adapters: `memory_registry`, `consul_registry`
//! - Fast tier: `memory_fast_store`, `redis_fast_store`
//! - Durable tier: `memory_durable_store`, `dir_durable_store` (on `storage`)
//! - Ambient: `config_service`, `paths`, `fault`

pub mod config_service;
pub mod consul_registry;
pub mod dir_durable_store;
pub mod fault;
pub mod memory_durable_store;
pub mod memory_fast_store;
pub mod memory_registry;
pub mod paths;
pub mod redis_fast_store;
pub mod storage;

pub use crate::config_service::ConfigService;
pub use crate::consul_registry::ConsulRegistry;
pub use crate::dir_durable_store::DirDurableStore;
pub use crate::fault::FaultSwitch;
pub use crate::memory_durable_store::InMemoryDurableStore;
pub use crate::memory_fast_store::InMemoryFastStore;
pub use crate::memory_registry::InMemoryRegistry;
pub use crate::paths::SwitchyardPaths;
pub use crate::redis_fast_store::RedisFastStore;
