//! Session lifecycle on top of the state coordinator.

use crate::coordinator::StateCoordinator;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::config::SessionConfig;
use switchyard_core::session::{ConversationRef, Session};
use switchyard_core::state::{Contribution, StateKind, StateWrite};
use switchyard_core::{Result, SwitchyardError};
use tracing::{debug, info};
use uuid::Uuid;

const COMPONENT: &str = "session_manager";

pub(crate) fn session_object_id(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// Owns every session record.
///
/// Sessions are short-lived, session-scoped state with a TTL, so the coordinator keeps
/// them on the fast tier and the TTL is the expiry mechanism. There is no reaper: an
/// evicted session simply reads as `NotFound`. When the fast tier is down and a session
/// lands on the durable tier, `expires_at` is checked on every read instead.
pub struct SessionManager {
    coordinator: Arc<StateCoordinator>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(coordinator: Arc<StateCoordinator>, config: &SessionConfig) -> Self {
        Self {
            coordinator,
            idle_timeout: config.idle_timeout(),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn idle(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.idle_timeout)
            .map_err(|e| SwitchyardError::config(format!("session idle timeout: {}", e)))
    }

    /// Creates a session expiring after the idle timeout.
    ///
    /// `context`, if given, seeds the session's `state` map.
    pub async fn create_session(
        &self,
        user_id: &str,
        context: Option<Map<String, Value>>,
    ) -> Result<Session> {
        if user_id.trim().is_empty() {
            return Err(SwitchyardError::validation("user_id must not be empty"));
        }

        let session_id = Uuid::new_v4().to_string();
        let mut session = Session::new(&session_id, user_id, self.idle()?);
        if let Some(context) = context {
            session.merge_state(context);
        }

        let write = StateWrite::new(
            session_object_id(&session_id),
            StateKind::Session,
            serde_json::to_value(&session)?,
            Contribution::component(COMPONENT),
        )
        .owned_by(&session_id)
        .with_ttl(self.idle_timeout);
        let stored = self.coordinator.create(write).await?;

        info!(
            session_id = %session_id,
            user_id = %user_id,
            tier = %stored.tier,
            expires_at = %session.expires_at,
            "Session created"
        );
        Ok(session)
    }

    /// # Errors
    ///
    /// `NotFound` if the session never existed, was destroyed or has expired.
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        validate_session_id(session_id)?;
        let session: Session = self
            .coordinator
            .get_as(&session_object_id(session_id))
            .await?
            .ok_or_else(|| SwitchyardError::not_found("session", session_id))?;

        if session.is_expired_at(Utc::now()) {
            debug!(session_id = %session_id, "Session past expires_at");
            return Err(SwitchyardError::not_found("session", session_id));
        }
        Ok(session)
    }

    /// Records activity: pushes `expires_at` forward and restarts the fast-tier TTL.
    pub async fn touch_session(&self, session_id: &str) -> Result<Session> {
        let idle = self.idle()?;
        self.mutate(session_id, Some(self.idle_timeout), |session| {
            session.touch(Utc::now(), idle);
            Ok(())
        })
        .await
    }

    /// Shallow-merges `partial` into the session state. Last write wins per key.
    pub async fn update_session_state(
        &self,
        session_id: &str,
        partial: Map<String, Value>,
    ) -> Result<Session> {
        self.mutate(session_id, None, |session| {
            session.merge_state(partial.clone());
            Ok(())
        })
        .await
    }

    /// Deletes a session. Destroying a missing session succeeds.
    pub async fn destroy_session(&self, session_id: &str) -> Result<()> {
        validate_session_id(session_id)?;
        let existed = self
            .coordinator
            .delete(&session_object_id(session_id))
            .await?;
        if existed {
            info!(session_id = %session_id, "Session destroyed");
        } else {
            debug!(session_id = %session_id, "Session already gone");
        }
        Ok(())
    }

    /// Links a conversation that is not bound to any workflow.
    pub async fn attach_conversation(
        &self,
        session_id: &str,
        conversation_key: &str,
        agent_name: &str,
    ) -> Result<ConversationRef> {
        validate_conversation(conversation_key, agent_name)?;
        let session = self
            .mutate(session_id, None, |session| {
                session
                    .conversations
                    .entry(conversation_key.to_string())
                    .and_modify(|r| r.agent_name = agent_name.to_string())
                    .or_insert_with(|| ConversationRef::new(conversation_key, agent_name));
                Ok(())
            })
            .await?;
        conversation_ref(&session, conversation_key)
    }

    // ============================================================================
    // Orchestrator context, maintained by the workflow correlator
    // ============================================================================

    pub(crate) async fn link_workflow(&self, session_id: &str, workflow_id: &str) -> Result<()> {
        self.mutate(session_id, None, |session| {
            if !session.has_workflow(workflow_id) {
                session
                    .orchestrator_context
                    .active_workflows
                    .push(workflow_id.to_string());
            }
            Ok(())
        })
        .await
        .map(|_| ())
    }

    pub(crate) async fn unlink_workflow(&self, session_id: &str, workflow_id: &str) -> Result<()> {
        self.mutate(session_id, None, |session| {
            session
                .orchestrator_context
                .active_workflows
                .retain(|w| w != workflow_id);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    pub(crate) async fn mark_enabling_service(
        &self,
        session_id: &str,
        service_name: &str,
        status: &str,
    ) -> Result<()> {
        self.mutate(session_id, None, |session| {
            session
                .orchestrator_context
                .enabling_services_in_use
                .insert(service_name.to_string(), status.to_string());
            Ok(())
        })
        .await
        .map(|_| ())
    }

    /// Inserts or rebinds a conversation ref, keeping its message counters.
    pub(crate) async fn upsert_conversation_ref(
        &self,
        session_id: &str,
        reference: ConversationRef,
    ) -> Result<ConversationRef> {
        let key = reference.conversation_key.clone();
        let session = self
            .mutate(session_id, None, |session| {
                session
                    .conversations
                    .entry(key.clone())
                    .and_modify(|existing| {
                        existing.agent_name = reference.agent_name.clone();
                        existing.workflow_id = reference.workflow_id.clone();
                    })
                    .or_insert_with(|| reference.clone());
                Ok(())
            })
            .await?;
        conversation_ref(&session, &key)
    }

    pub(crate) async fn record_conversation_activity(
        &self,
        session_id: &str,
        conversation_key: &str,
        message_count: u64,
        last_message_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.mutate(session_id, None, |session| {
            let reference = session
                .conversations
                .get_mut(conversation_key)
                .ok_or_else(|| SwitchyardError::not_found("conversation", conversation_key))?;
            reference.message_count = reference.message_count.max(message_count);
            reference.last_message_at = reference.last_message_at.max(last_message_at);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    /// Optimistic update of a live session.
    async fn mutate<F>(
        &self,
        session_id: &str,
        renew_ttl: Option<Duration>,
        mut apply: F,
    ) -> Result<Session>
    where
        F: FnMut(&mut Session) -> Result<()>,
    {
        validate_session_id(session_id)?;
        self.coordinator
            .update_as(
                &session_object_id(session_id),
                &Contribution::component(COMPONENT),
                renew_ttl,
                |session: &mut Session| {
                    if session.is_expired_at(Utc::now()) {
                        return Err(SwitchyardError::not_found("session", session_id));
                    }
                    apply(session)
                },
            )
            .await
            .map_err(|e| match e {
                SwitchyardError::NotFound {
                    entity_type: "state object",
                    ..
                } => SwitchyardError::not_found("session", session_id),
                other => other,
            })
    }
}

fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(SwitchyardError::validation("session_id must not be empty"));
    }
    Ok(())
}

pub(crate) fn validate_conversation(conversation_key: &str, agent_name: &str) -> Result<()> {
    if conversation_key.trim().is_empty() {
        return Err(SwitchyardError::validation(
            "conversation_key must not be empty",
        ));
    }
    if agent_name.trim().is_empty() {
        return Err(SwitchyardError::validation("agent_name must not be empty"));
    }
    Ok(())
}

fn conversation_ref(session: &Session, conversation_key: &str) -> Result<ConversationRef> {
    session
        .conversations
        .get(conversation_key)
        .cloned()
        .ok_or_else(|| SwitchyardError::internal("conversation ref missing after update"))
}
