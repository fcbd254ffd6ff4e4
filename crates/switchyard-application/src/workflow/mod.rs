//! Orchestrator workflow correlation.

mod correlator;

pub use correlator::WorkflowCorrelator;
