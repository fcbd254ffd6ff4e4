//! Session services.
//!
//! # Module Structure
//!
//! - `manager`: session lifecycle and the session's orchestrator context
//! - `conversation`: transcript persistence keyed by conversation key

mod conversation;
mod manager;

pub use conversation::ConversationStore;
pub use manager::SessionManager;

pub(crate) use manager::validate_conversation;
