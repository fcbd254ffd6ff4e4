//! Session domain module.
//!
//! # Module Structure
//!
//! - `model`: the session record and its orchestrator context
//! - `conversation`: conversation turns and transcripts

mod conversation;
mod model;

pub use conversation::{ConversationTranscript, ConversationTurn, TurnRole};
pub use model::{ConversationRef, OrchestratorContext, Session};
