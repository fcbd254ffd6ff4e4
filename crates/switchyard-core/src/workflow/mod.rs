//! Workflow correlation domain module.

mod model;

pub use model::{DelegationEntry, WorkflowCorrelation, WorkflowStatus};
