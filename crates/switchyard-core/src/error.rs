//! Error types for Switchyard.
//!
//! `SwitchyardError` is the only error type callers above the core ever see.
//! Backend-specific failures (`RegistryError`, `StoreError`) are classified into it
//! by the registry abstraction and the state coordinator through the `From` impls
//! at the bottom of this module.

use crate::registry::RegistryError;
use crate::state::StoreError;
use crate::workflow::WorkflowStatus;
use thiserror::Error;

/// A shared error type for the whole coordination core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SwitchyardError {
    /// Registry or store temporarily unreachable. Eligible for bounded retry.
    #[error("Transient infrastructure error ({backend}): {message}")]
    TransientInfra {
        backend: &'static str,
        message: String,
    },

    /// Session, workflow, service or state object absent.
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Compare-and-set mismatch. The caller must re-read and retry.
    #[error("Conflict on '{key}': {message}")]
    Conflict { key: String, message: String },

    /// Mutation attempted on a completed or failed workflow.
    #[error("Workflow '{workflow_id}' is already {status}")]
    WorkflowAlreadyTerminal {
        workflow_id: String,
        status: WorkflowStatus,
    },

    /// Malformed registration or session input, rejected before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The call was cancelled cooperatively through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwitchyardError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a TransientInfra error
    pub fn transient(backend: &'static str, message: impl Into<String>) -> Self {
        Self::TransientInfra {
            backend,
            message: message.into(),
        }
    }

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates a Conflict error
    pub fn conflict(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a WorkflowAlreadyTerminal error
    pub fn workflow_terminal(workflow_id: impl Into<String>, status: WorkflowStatus) -> Self {
        Self::WorkflowAlreadyTerminal {
            workflow_id: workflow_id.into(),
            status,
        }
    }

    /// Creates a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Whether the retry policy may attempt this call again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientInfra { .. })
    }

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a Conflict error
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if this is a WorkflowAlreadyTerminal error
    pub fn is_workflow_terminal(&self) -> bool {
        matches!(self, Self::WorkflowAlreadyTerminal { .. })
    }

    /// Check if this is a Validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a Cancelled error
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// ============================================================================
// Classification of raw backend errors
// ============================================================================

impl From<RegistryError> for SwitchyardError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unavailable(message) => Self::transient("registry", message),
            RegistryError::Timeout(elapsed) => {
                Self::transient("registry", format!("timed out after {:?}", elapsed))
            }
            RegistryError::NotFound(id) => Self::not_found("service", id),
            RegistryError::CasMismatch { key, expected } => Self::conflict(
                key,
                format!("compare-and-set expected version {}", expected),
            ),
            RegistryError::Rejected(message) => Self::Validation(message),
            RegistryError::Protocol(message) => Self::Internal(format!("registry: {}", message)),
            RegistryError::Serialization(message) => Self::Serialization {
                format: "registry".to_string(),
                message,
            },
        }
    }
}

impl From<StoreError> for SwitchyardError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { backend, message } => Self::transient(backend, message),
            StoreError::Timeout { backend, elapsed } => {
                Self::transient(backend, format!("timed out after {:?}", elapsed))
            }
            StoreError::NotFound(key) => Self::not_found("state object", key),
            StoreError::Conflict { key, message } => Self::conflict(key, message),
            StoreError::Backend { backend, message } => {
                Self::Internal(format!("{}: {}", backend, message))
            }
            StoreError::Serialization(message) => Self::Serialization {
                format: "JSON".to_string(),
                message,
            },
        }
    }
}

impl From<serde_json::Error> for SwitchyardError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for SwitchyardError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for `Result<T, SwitchyardError>`.
pub type Result<T> = std::result::Result<T, SwitchyardError>;
