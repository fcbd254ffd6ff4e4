//! Session domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Pointer from a session to a conversation persisted elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRef {
    pub conversation_key: String,
    pub agent_name: String,
    /// Workflow this conversation belongs to. Always a workflow of the same session.
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ConversationRef {
    pub fn new(conversation_key: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            conversation_key: conversation_key.into(),
            agent_name: agent_name.into(),
            workflow_id: None,
            message_count: 0,
            last_message_at: None,
        }
    }
}

/// Which workflows and enabling services a session is currently driving.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorContext {
    #[serde(default)]
    pub active_workflows: Vec<String>,
    /// Enabling service name to last reported status.
    #[serde(default)]
    pub enabling_services_in_use: HashMap<String, String>,
}

/// A user session.
///
/// `expires_at` is kept at `last_activity_at + idle_timeout`, and only a touch moves
/// `last_activity_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub state: Map<String, Value>,
    #[serde(default)]
    pub orchestrator_context: OrchestratorContext,
    #[serde(default)]
    pub conversations: HashMap<String, ConversationRef>,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        idle_timeout: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            created_at: now,
            expires_at: now + idle_timeout,
            last_activity_at: now,
            state: Map::new(),
            orchestrator_context: OrchestratorContext::default(),
            conversations: HashMap::new(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Shallow merge: top-level keys in `partial` replace existing ones.
    pub fn merge_state(&mut self, partial: Map<String, Value>) {
        for (key, value) in partial {
            self.state.insert(key, value);
        }
    }

    /// Records activity at `now` and pushes `expires_at` forward, never backward.
    pub fn touch(&mut self, now: DateTime<Utc>, idle_timeout: chrono::Duration) {
        let next_activity = now.max(self.last_activity_at);
        self.last_activity_at = next_activity;
        self.expires_at = (next_activity + idle_timeout).max(self.expires_at);
    }

    pub fn has_workflow(&self, workflow_id: &str) -> bool {
        self.orchestrator_context
            .active_workflows
            .iter()
            .any(|w| w == workflow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn idle() -> chrono::Duration {
        chrono::Duration::minutes(30)
    }

    #[test]
    fn test_new_session_expiry() {
        let session = Session::new("s-1", "user-1", idle());
        assert_eq!(session.expires_at, session.last_activity_at + idle());
        assert!(!session.is_expired_at(Utc::now()));
        assert!(session.is_expired_at(session.expires_at));
    }

    #[test]
    fn test_merge_state_is_shallow() {
        let mut session = Session::new("s-1", "user-1", idle());
        session.state.insert("a".into(), json!({"x": 1, "y": 2}));
        session.state.insert("b".into(), json!(1));

        let mut partial = Map::new();
        partial.insert("a".into(), json!({"x": 9}));
        partial.insert("c".into(), json!("new"));
        session.merge_state(partial);

        assert_eq!(session.state["a"], json!({"x": 9}));
        assert_eq!(session.state["b"], json!(1));
        assert_eq!(session.state["c"], json!("new"));
    }

    #[test]
    fn test_touch_never_moves_backward() {
        let mut session = Session::new("s-1", "user-1", idle());
        let before = session.expires_at;

        session.touch(session.last_activity_at - chrono::Duration::seconds(10), idle());
        assert_eq!(session.expires_at, before);

        let later = session.last_activity_at + chrono::Duration::seconds(60);
        session.touch(later, idle());
        assert_eq!(session.last_activity_at, later);
        assert_eq!(session.expires_at, later + idle());
        assert!(session.expires_at >= session.last_activity_at + idle());
    }
}
