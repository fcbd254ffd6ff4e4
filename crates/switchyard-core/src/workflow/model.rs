//! Workflow correlation model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// Lifecycle of a workflow.
///
/// `pending -> active -> {completed, failed}`. A pending workflow may also finish
/// directly. Terminal states never change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Active, Completed)
                | (Active, Failed)
        )
    }
}

/// One call an orchestrator made to an enabling service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationEntry {
    pub enabling_service_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result_summary: Option<Value>,
}

impl DelegationEntry {
    pub fn open(enabling_service_name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            enabling_service_name: enabling_service_name.into(),
            started_at,
            completed_at: None,
            result_summary: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.completed_at.is_none()
    }
}

/// Links a session to one orchestrator-driven unit of work and its delegated calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCorrelation {
    pub workflow_id: String,
    pub session_id: String,
    pub orchestrator_name: String,
    pub status: WorkflowStatus,
    /// Append-only, ordered by `started_at`.
    #[serde(default)]
    pub delegation_chain: Vec<DelegationEntry>,
    #[serde(default)]
    pub conversation_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowCorrelation {
    pub fn new(
        workflow_id: impl Into<String>,
        session_id: impl Into<String>,
        orchestrator_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            session_id: session_id.into(),
            orchestrator_name: orchestrator_name.into(),
            status: WorkflowStatus::Pending,
            delegation_chain: Vec::new(),
            conversation_refs: Vec::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Inserts an entry keeping the chain sorted by `started_at`.
    /// Entries with equal timestamps keep append order.
    pub fn push_delegation(&mut self, entry: DelegationEntry) {
        let position = self
            .delegation_chain
            .partition_point(|e| e.started_at <= entry.started_at);
        self.delegation_chain.insert(position, entry);
    }

    /// The most recently started unclosed entry for `service_name`.
    pub fn latest_open_delegation_mut(
        &mut self,
        service_name: &str,
    ) -> Option<&mut DelegationEntry> {
        self.delegation_chain
            .iter_mut()
            .rev()
            .find(|e| e.enabling_service_name == service_name && e.is_open())
    }

    pub fn open_delegations(&self) -> usize {
        self.delegation_chain.iter().filter(|e| e.is_open()).count()
    }
}
