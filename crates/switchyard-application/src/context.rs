//! Explicit wiring of every coordination service.

use crate::coordinator::StateCoordinator;
use crate::discovery::DiscoveryFacade;
use crate::registry::RegistryService;
use crate::session::{ConversationStore, SessionManager};
use crate::workflow::WorkflowCorrelator;
use std::sync::Arc;
use switchyard_core::registry::RegistryAdapter;
use switchyard_core::state::{DurableStore, FastStore};
use switchyard_core::{Result, SwitchyardConfig};
use switchyard_infrastructure::{InMemoryDurableStore, InMemoryFastStore, InMemoryRegistry};
use tracing::info;

/// All services built from one configuration and one set of backends.
///
/// Components receive the services they need from here at construction time; nothing
/// is looked up through process-wide globals.
pub struct ServiceContext {
    config: SwitchyardConfig,
    discovery: DiscoveryFacade,
    coordinator: Arc<StateCoordinator>,
    sessions: Arc<SessionManager>,
    conversations: Arc<ConversationStore>,
    workflows: Arc<WorkflowCorrelator>,
}

impl ServiceContext {
    /// Validates `config` and wires the services over the given backends.
    pub fn new(
        config: SwitchyardConfig,
        adapter: Arc<dyn RegistryAdapter>,
        fast: Arc<dyn FastStore>,
        durable: Arc<dyn DurableStore>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(RegistryService::new(adapter.clone(), &config.registry));
        let coordinator = Arc::new(StateCoordinator::new(
            fast.clone(),
            durable.clone(),
            &config,
        ));
        let sessions = Arc::new(SessionManager::new(coordinator.clone(), &config.session));
        let conversations = Arc::new(ConversationStore::new(
            coordinator.clone(),
            sessions.clone(),
        ));
        let workflows = Arc::new(WorkflowCorrelator::new(
            coordinator.clone(),
            sessions.clone(),
        ));

        info!(
            registry = adapter.backend_name(),
            fast_tier = fast.backend_name(),
            durable_tier = durable.backend_name(),
            "Service context ready"
        );

        Ok(Self {
            config,
            discovery: DiscoveryFacade::new(registry),
            coordinator,
            sessions,
            conversations,
            workflows,
        })
    }

    /// Everything in-process: for tests and single-process deployments.
    pub fn in_memory(config: SwitchyardConfig) -> Result<Self> {
        Self::new(
            config,
            Arc::new(InMemoryRegistry::new()),
            Arc::new(InMemoryFastStore::new()),
            Arc::new(InMemoryDurableStore::new()),
        )
    }

    pub fn config(&self) -> &SwitchyardConfig {
        &self.config
    }

    pub fn discovery(&self) -> &DiscoveryFacade {
        &self.discovery
    }

    pub fn coordinator(&self) -> &Arc<StateCoordinator> {
        &self.coordinator
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn workflows(&self) -> &Arc<WorkflowCorrelator> {
        &self.workflows
    }
}
