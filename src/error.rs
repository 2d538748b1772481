//! Engine Error Types
//!
//! Errors surfaced to callers of the public API. Faults raised by a unit's
//! own logic never leave the engine as errors: they are recorded on the job,
//! which is then marked `FAILED`.

use thiserror::Error;

use crate::store::StoreError;
use crate::workflow::state::{JobId, JobState};
use crate::workflow::validator::DefinitionError;

/// Errors returned by the dispatcher, engine and registry.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A workflow or job references a unit path nothing is registered under.
    #[error("Unknown unit '{node}' in workflow '{workflow}'")]
    UnknownNode { workflow: String, node: String },

    /// A decision selected a successor that does not exist.
    #[error("Decision '{decision}' returned branch {index}, but only {successors} successor(s) exist")]
    BranchIndex {
        decision: String,
        index: usize,
        successors: usize,
    },

    /// External input did not match the waiting step's declared shape.
    #[error("Input rejected by '{unit}': {reason}")]
    Validation { unit: String, reason: String },

    /// The job is not in a state that allows the requested operation.
    #[error("Job {job} is {state}; cannot {operation}")]
    InvalidState {
        job: JobId,
        state: JobState,
        operation: &'static str,
    },

    /// A unit's own logic raised a fault.
    #[error("Unit '{unit}' failed: {message}")]
    StepExecution { unit: String, message: String },

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Invalid workflow definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The dispatch queue refused a message.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

impl EngineError {
    /// Returns true for errors that leave persisted state untouched and may be
    /// retried by the caller with corrected arguments.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::InvalidState { .. })
    }
}
