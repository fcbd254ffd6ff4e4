//! State object domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use strum::Display;

/// Backend tier holding a state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tier {
    /// Low-latency, TTL-capable key-value store.
    Fast,
    /// Persistent, queryable document store.
    Durable,
}

/// What a state object represents. Drives tier placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StateKind {
    /// A user session record.
    Session,
    /// Short-lived workflow or UI state.
    Ephemeral,
    /// Conversation turns persisted on behalf of an agent.
    ConversationTranscript,
    /// A workflow correlation and its delegation chain.
    WorkflowGraph,
    /// Any other artifact that must outlive its session.
    Artifact,
}

impl StateKind {
    /// Kinds that must survive beyond session TTL or be queried by non-key fields.
    pub fn is_durable_artifact(&self) -> bool {
        matches!(
            self,
            StateKind::ConversationTranscript | StateKind::WorkflowGraph | StateKind::Artifact
        )
    }
}

/// Which component(s) produced a state object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub created_by_component: String,
    #[serde(default)]
    pub orchestrator_name: Option<String>,
    /// Causal trail of every later contributor. Append-only.
    #[serde(default)]
    pub enabling_services_chain: Vec<String>,
}

impl Provenance {
    pub fn new(contribution: &Contribution) -> Self {
        Self {
            created_by_component: contribution.component.clone(),
            orchestrator_name: contribution.orchestrator_name.clone(),
            enabling_services_chain: contribution.enabling_service.iter().cloned().collect(),
        }
    }

    /// Folds a later contribution into the trail without overwriting earlier entries.
    ///
    /// The contributor is recorded as its enabling service when it names one, otherwise
    /// as its component. Repeated writes by the creating component or by the most
    /// recent contributor do not grow the chain.
    pub fn merge(&mut self, contribution: &Contribution) {
        if self.orchestrator_name.is_none() {
            self.orchestrator_name = contribution.orchestrator_name.clone();
        }

        let entry = contribution
            .enabling_service
            .as_deref()
            .unwrap_or(&contribution.component);

        let is_creator = contribution.enabling_service.is_none()
            && entry == self.created_by_component;
        let is_latest = self.enabling_services_chain.last().map(String::as_str) == Some(entry);

        if !is_creator && !is_latest {
            self.enabling_services_chain.push(entry.to_string());
        }
    }
}

/// Identifies the writer of a state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub component: String,
    pub orchestrator_name: Option<String>,
    pub enabling_service: Option<String>,
}

impl Contribution {
    pub fn component(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            orchestrator_name: None,
            enabling_service: None,
        }
    }

    pub fn orchestrator(mut self, orchestrator_name: impl Into<String>) -> Self {
        self.orchestrator_name = Some(orchestrator_name.into());
        self
    }

    pub fn via(mut self, enabling_service: impl Into<String>) -> Self {
        self.enabling_service = Some(enabling_service.into());
        self
    }
}

/// A stored unit of state with its placement and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateObject {
    pub object_id: String,
    #[serde(default)]
    pub owner_session_id: Option<String>,
    pub kind: StateKind,
    pub tier: Tier,
    pub payload: Value,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Requested time-to-live in milliseconds, if the object is short-lived.
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    /// Whether a durable copy may be re-materialized on the fast tier after a miss.
    #[serde(default)]
    pub promotion_eligible: bool,
}

impl StateObject {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }

    /// Serialized payload size in bytes.
    pub fn payload_size(&self) -> usize {
        serde_json::to_vec(&self.payload).map(|v| v.len()).unwrap_or(usize::MAX)
    }

    /// Deserializes the payload into a concrete type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// A request to store state through the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct StateWrite {
    pub object_id: String,
    pub owner_session_id: Option<String>,
    pub kind: StateKind,
    pub payload: Value,
    pub ttl: Option<Duration>,
    pub promotion_eligible: bool,
    pub contribution: Contribution,
}

impl StateWrite {
    pub fn new(
        object_id: impl Into<String>,
        kind: StateKind,
        payload: Value,
        contribution: Contribution,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            owner_session_id: None,
            kind,
            payload,
            ttl: None,
            promotion_eligible: false,
            contribution,
        }
    }

    pub fn owned_by(mut self, session_id: impl Into<String>) -> Self {
        self.owner_session_id = Some(session_id.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn promotable(mut self, eligible: bool) -> Self {
        self.promotion_eligible = eligible;
        self
    }
}

/// Query over durable-tier state by non-key fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateQuery {
    pub owner_session_id: Option<String>,
    pub kind: Option<StateKind>,
    pub orchestrator_name: Option<String>,
    pub limit: Option<usize>,
}

impl StateQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, session_id: impl Into<String>) -> Self {
        self.owner_session_id = Some(session_id.into());
        self
    }

    pub fn kind(mut self, kind: StateKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn orchestrator(mut self, orchestrator_name: impl Into<String>) -> Self {
        self.orchestrator_name = Some(orchestrator_name.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Translates the query into document conditions over serialized `StateObject`s.
    pub fn to_filter(&self) -> super::DocumentFilter {
        let mut filter = super::DocumentFilter::new();
        if let Some(owner) = &self.owner_session_id {
            filter = filter.eq("owner_session_id", Value::String(owner.clone()));
        }
        if let Some(kind) = self.kind {
            filter = filter.eq("kind", Value::String(kind.to_string()));
        }
        if let Some(orchestrator) = &self.orchestrator_name {
            filter = filter.eq(
                "provenance.orchestrator_name",
                Value::String(orchestrator.clone()),
            );
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        filter
    }
}
