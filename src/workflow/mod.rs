//! Workflow Definition Module
//!
//! Graph model, load-time validation and the persisted job record.
//!
//! # Structure
//!
//! - [`model`]: Workflow graph and the start marker
//! - [`parser`]: YAML loading
//! - [`validator`]: Structural checks run at load time
//! - [`state`]: Job, lifecycle state and execution log

pub mod model;
pub mod parser;
pub mod state;
pub mod validator;

pub use model::{WorkflowDefinition, START};
pub use parser::{load_workflow, parse_workflow, ParseError};
pub use state::{ExecutionLog, Job, JobId, JobState, LogEntry};
pub use validator::{validate_workflow, DefinitionError};
