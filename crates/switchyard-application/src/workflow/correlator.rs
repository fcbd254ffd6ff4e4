use crate::coordinator::StateCoordinator;
use crate::session::{SessionManager, validate_conversation};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use switchyard_core::session::ConversationRef;
use switchyard_core::state::{Contribution, StateKind, StateQuery, StateWrite};
use switchyard_core::workflow::{DelegationEntry, WorkflowCorrelation, WorkflowStatus};
use switchyard_core::{Result, SwitchyardError};
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "workflow_correlator";

const SERVICE_IN_PROGRESS: &str = "in_progress";
const SERVICE_COMPLETED: &str = "completed";

fn workflow_object_id(workflow_id: &str) -> String {
    format!("workflow:{}", workflow_id)
}

/// Tracks orchestrator workflows and their delegation chains.
///
/// A workflow moves `pending → active → {completed, failed}`. Once terminal, every
/// mutation is rejected with `WorkflowAlreadyTerminal` and the record is left as is.
/// Concurrent delegations under one workflow are serialized by the coordinator's
/// optimistic writes, and the chain stays ordered by `started_at`.
pub struct WorkflowCorrelator {
    coordinator: Arc<StateCoordinator>,
    sessions: Arc<SessionManager>,
}

impl WorkflowCorrelator {
    pub fn new(coordinator: Arc<StateCoordinator>, sessions: Arc<SessionManager>) -> Self {
        Self {
            coordinator,
            sessions,
        }
    }

    /// Opens a `pending` workflow for a live session and returns its id.
    pub async fn start_workflow(&self, session_id: &str, orchestrator_name: &str) -> Result<String> {
        if orchestrator_name.trim().is_empty() {
            return Err(SwitchyardError::validation(
                "orchestrator_name must not be empty",
            ));
        }
        self.sessions.get_session(session_id).await?;

        let workflow_id = format!("wf-{}", Uuid::new_v4());
        let correlation = WorkflowCorrelation::new(&workflow_id, session_id, orchestrator_name);
        let write = StateWrite::new(
            workflow_object_id(&workflow_id),
            StateKind::WorkflowGraph,
            serde_json::to_value(&correlation)?,
            Contribution::component(COMPONENT).orchestrator(orchestrator_name),
        )
        .owned_by(session_id)
        .promotable(true);
        self.coordinator.create(write).await?;

        if let Err(e) = self.sessions.link_workflow(session_id, &workflow_id).await {
            warn!(
                workflow_id = %workflow_id,
                session_id = %session_id,
                error = %e,
                "Workflow started but session context not updated"
            );
        }

        info!(
            workflow_id = %workflow_id,
            session_id = %session_id,
            orchestrator = %orchestrator_name,
            "Workflow started"
        );
        Ok(workflow_id)
    }

    /// Appends an open delegation entry. Call this before the delegated call runs.
    ///
    /// The first delegation moves the workflow from `pending` to `active`.
    pub async fn record_delegation(
        &self,
        workflow_id: &str,
        enabling_service_name: &str,
    ) -> Result<WorkflowCorrelation> {
        validate_service(enabling_service_name)?;
        let contribution = Contribution::component(COMPONENT).via(enabling_service_name);
        let correlation = self
            .mutate(workflow_id, &contribution, |workflow| {
                let now = Utc::now();
                workflow.push_delegation(DelegationEntry::open(enabling_service_name, now));
                if workflow.status == WorkflowStatus::Pending {
                    workflow.status = WorkflowStatus::Active;
                }
                workflow.updated_at = now;
                Ok(())
            })
            .await?;

        self.mark_service(&correlation, enabling_service_name, SERVICE_IN_PROGRESS)
            .await;
        debug!(
            workflow_id = %workflow_id,
            enabling_service = %enabling_service_name,
            open = correlation.open_delegations(),
            "Delegation recorded"
        );
        Ok(correlation)
    }

    /// Closes the most recently started open entry for `enabling_service_name`.
    ///
    /// # Errors
    ///
    /// `NotFound` if that service has no open entry.
    pub async fn complete_delegation(
        &self,
        workflow_id: &str,
        enabling_service_name: &str,
        result_summary: Option<Value>,
    ) -> Result<WorkflowCorrelation> {
        validate_service(enabling_service_name)?;
        let contribution = Contribution::component(COMPONENT).via(enabling_service_name);
        let correlation = self
            .mutate(workflow_id, &contribution, |workflow| {
                let now = Utc::now();
                let entry = workflow
                    .latest_open_delegation_mut(enabling_service_name)
                    .ok_or_else(|| {
                        SwitchyardError::not_found(
                            "delegation",
                            format!("{}/{}", workflow_id, enabling_service_name),
                        )
                    })?;
                entry.completed_at = Some(now);
                entry.result_summary = result_summary.clone();
                workflow.updated_at = now;
                Ok(())
            })
            .await?;

        self.mark_service(&correlation, enabling_service_name, SERVICE_COMPLETED)
            .await;
        debug!(
            workflow_id = %workflow_id,
            enabling_service = %enabling_service_name,
            "Delegation completed"
        );
        Ok(correlation)
    }

    /// Moves the workflow to `completed` or `failed`.
    pub async fn complete_workflow(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
    ) -> Result<WorkflowCorrelation> {
        if !status.is_terminal() {
            return Err(SwitchyardError::validation(format!(
                "workflow can only be completed as completed or failed, not {}",
                status
            )));
        }
        let contribution = Contribution::component(COMPONENT);
        let correlation = self
            .mutate(workflow_id, &contribution, |workflow| {
                if !workflow.status.can_transition_to(status) {
                    return Err(SwitchyardError::validation(format!(
                        "workflow '{}' cannot move from {} to {}",
                        workflow_id, workflow.status, status
                    )));
                }
                let now = Utc::now();
                workflow.status = status;
                workflow.finished_at = Some(now);
                workflow.updated_at = now;
                Ok(())
            })
            .await?;

        if let Err(e) = self
            .sessions
            .unlink_workflow(&correlation.session_id, workflow_id)
            .await
        {
            warn!(
                workflow_id = %workflow_id,
                error = %e,
                "Workflow finished but session context not updated"
            );
        }
        info!(
            workflow_id = %workflow_id,
            status = %status,
            delegations = correlation.delegation_chain.len(),
            "Workflow finished"
        );
        Ok(correlation)
    }

    /// Binds a conversation to the workflow and to the workflow's session.
    pub async fn attach_conversation(
        &self,
        workflow_id: &str,
        conversation_key: &str,
        agent_name: &str,
    ) -> Result<ConversationRef> {
        validate_conversation(conversation_key, agent_name)?;
        let contribution = Contribution::component(COMPONENT).via(agent_name);
        let correlation = self
            .mutate(workflow_id, &contribution, |workflow| {
                if !workflow.conversation_refs.iter().any(|k| k == conversation_key) {
                    workflow.conversation_refs.push(conversation_key.to_string());
                }
                workflow.updated_at = Utc::now();
                Ok(())
            })
            .await?;

        let mut reference = ConversationRef::new(conversation_key, agent_name);
        reference.workflow_id = Some(workflow_id.to_string());
        self.sessions
            .upsert_conversation_ref(&correlation.session_id, reference)
            .await
    }

    pub async fn get_workflow_state(&self, workflow_id: &str) -> Result<WorkflowCorrelation> {
        self.coordinator
            .get_as(&workflow_object_id(workflow_id))
            .await?
            .ok_or_else(|| SwitchyardError::not_found("workflow", workflow_id))
    }

    /// Every workflow of a session, oldest first.
    pub async fn list_session_workflows(&self, session_id: &str) -> Result<Vec<WorkflowCorrelation>> {
        let query = StateQuery::new()
            .owner(session_id)
            .kind(StateKind::WorkflowGraph);
        let mut workflows = self
            .coordinator
            .query(&query)
            .await?
            .iter()
            .map(|object| object.payload_as::<WorkflowCorrelation>())
            .collect::<Result<Vec<_>>>()?;
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(workflows)
    }

    /// Optimistic update of a non-terminal workflow.
    async fn mutate<F>(
        &self,
        workflow_id: &str,
        contribution: &Contribution,
        mut apply: F,
    ) -> Result<WorkflowCorrelation>
    where
        F: FnMut(&mut WorkflowCorrelation) -> Result<()>,
    {
        self.coordinator
            .update_as(
                &workflow_object_id(workflow_id),
                contribution,
                None,
                |workflow: &mut WorkflowCorrelation| {
                    if workflow.status.is_terminal() {
                        return Err(SwitchyardError::workflow_terminal(
                            workflow_id,
                            workflow.status,
                        ));
                    }
                    apply(workflow)
                },
            )
            .await
            .map_err(|e| match e {
                SwitchyardError::NotFound {
                    entity_type: "state object",
                    ..
                } => SwitchyardError::not_found("workflow", workflow_id),
                other => other,
            })
    }

    async fn mark_service(&self, workflow: &WorkflowCorrelation, service_name: &str, status: &str) {
        if let Err(e) = self
            .sessions
            .mark_enabling_service(&workflow.session_id, service_name, status)
            .await
        {
            warn!(
                workflow_id = %workflow.workflow_id,
                enabling_service = %service_name,
                error = %e,
                "Session context not updated"
            );
        }
    }
}

fn validate_service(enabling_service_name: &str) -> Result<()> {
    if enabling_service_name.trim().is_empty() {
        return Err(SwitchyardError::validation(
            "enabling_service_name must not be empty",
        ));
    }
    Ok(())
}
