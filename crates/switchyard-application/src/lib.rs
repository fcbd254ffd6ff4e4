//! Application layer for Switchyard.
//!
//! Services that coordinate the domain layer and the concrete backends: the service
//! registry abstraction and discovery facade, the tiered state coordinator, and the
//! session, conversation and workflow services built on top of it.

pub mod context;
pub mod coordinator;
pub mod discovery;
pub mod registry;
pub mod retry;
pub mod session;
pub mod workflow;

pub use context::ServiceContext;
pub use coordinator::{CoordinatorStats, StateCoordinator, TierHealth};
pub use discovery::DiscoveryFacade;
pub use registry::RegistryService;
pub use retry::RetryPolicy;
pub use session::{ConversationStore, SessionManager};
pub use workflow::WorkflowCorrelator;
