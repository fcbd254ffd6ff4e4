//! Conversation transcripts persisted as durable-tier state.
//!
//! Agents keep no authoritative history of their own: every turn is appended to the
//! transcript stored under the conversation key, so an agent restart never loses it.

use super::manager::SessionManager;
use crate::coordinator::StateCoordinator;
use std::sync::Arc;
use switchyard_core::session::{ConversationRef, ConversationTranscript, ConversationTurn};
use switchyard_core::state::{Contribution, StateKind, StateWrite};
use switchyard_core::{Result, SwitchyardError};
use tracing::{debug, warn};

const COMPONENT: &str = "conversation_store";

pub(crate) fn conversation_object_id(conversation_key: &str) -> String {
    format!("conversation:{}", conversation_key)
}

pub struct ConversationStore {
    coordinator: Arc<StateCoordinator>,
    sessions: Arc<SessionManager>,
}

impl ConversationStore {
    pub fn new(coordinator: Arc<StateCoordinator>, sessions: Arc<SessionManager>) -> Self {
        Self {
            coordinator,
            sessions,
        }
    }

    /// Appends a turn to a conversation attached to `session_id`.
    ///
    /// The first turn creates the transcript. The session's conversation ref is bumped
    /// afterwards; failing that is logged and does not fail the append.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session is gone or the conversation was never attached to it.
    pub async fn append_turn(
        &self,
        session_id: &str,
        conversation_key: &str,
        turn: ConversationTurn,
    ) -> Result<ConversationTranscript> {
        let session = self.sessions.get_session(session_id).await?;
        let reference = session
            .conversations
            .get(conversation_key)
            .ok_or_else(|| SwitchyardError::not_found("conversation", conversation_key))?;
        let contribution = Contribution::component(COMPONENT).via(&reference.agent_name);

        let appended = self
            .append_existing(session_id, conversation_key, &contribution, &turn)
            .await;
        let transcript = match appended {
            Err(e) if is_missing_transcript(&e) => {
                self.create_transcript(session_id, reference, &contribution, &turn)
                    .await?
            }
            other => other?,
        };

        if let Err(e) = self
            .sessions
            .record_conversation_activity(
                session_id,
                conversation_key,
                transcript.turns.len() as u64,
                transcript.last_message_at(),
            )
            .await
        {
            warn!(
                session_id = %session_id,
                conversation_key = %conversation_key,
                error = %e,
                "Failed to update conversation ref"
            );
        }

        debug!(
            conversation_key = %conversation_key,
            turns = transcript.turns.len(),
            "Conversation turn appended"
        );
        Ok(transcript)
    }

    /// The full transcript of a conversation.
    pub async fn history(&self, conversation_key: &str) -> Result<ConversationTranscript> {
        self.coordinator
            .get_as(&conversation_object_id(conversation_key))
            .await?
            .ok_or_else(|| SwitchyardError::not_found("conversation", conversation_key))
    }

    async fn append_existing(
        &self,
        session_id: &str,
        conversation_key: &str,
        contribution: &Contribution,
        turn: &ConversationTurn,
    ) -> Result<ConversationTranscript> {
        self.coordinator
            .update_as(
                &conversation_object_id(conversation_key),
                contribution,
                None,
                |transcript: &mut ConversationTranscript| {
                    if transcript.session_id != session_id {
                        return Err(SwitchyardError::validation(format!(
                            "conversation '{}' belongs to another session",
                            conversation_key
                        )));
                    }
                    transcript.turns.push(turn.clone());
                    Ok(())
                },
            )
            .await
    }

    async fn create_transcript(
        &self,
        session_id: &str,
        reference: &ConversationRef,
        contribution: &Contribution,
        turn: &ConversationTurn,
    ) -> Result<ConversationTranscript> {
        let key = reference.conversation_key.as_str();
        let mut transcript = ConversationTranscript::new(key, session_id, &reference.agent_name);
        transcript.workflow_id = reference.workflow_id.clone();
        transcript.turns.push(turn.clone());

        let write = StateWrite::new(
            conversation_object_id(key),
            StateKind::ConversationTranscript,
            serde_json::to_value(&transcript)?,
            contribution.clone(),
        )
        .owned_by(session_id)
        .promotable(true);

        match self.coordinator.create(write).await {
            Ok(object) => object.payload_as(),
            // Lost the race to create it; append to the winner's transcript.
            Err(e) if e.is_conflict() => {
                self.append_existing(session_id, key, contribution, turn)
                    .await
            }
            Err(e) => Err(e),
        }
    }
}

fn is_missing_transcript(err: &SwitchyardError) -> bool {
    matches!(
        err,
        SwitchyardError::NotFound {
            entity_type: "state object",
            ..
        }
    )
}
