//! Units of Work
//!
//! User code plugs into the engine by implementing [`Step`] or [`Decision`].
//! A step produces a result from the previous result (and optionally from
//! external input); a decision routes the job by returning the index of the
//! successor edge to follow.
//!
//! # Example
//!
//! ```
//! use serde_json::{json, Value};
//! use waypoint::units::{InputSchema, FieldType, Step, StepContext, StepError};
//!
//! struct Greet;
//!
//! impl Step for Greet {
//!     fn input_schema(&self) -> Option<InputSchema> {
//!         Some(InputSchema::new().required("name", FieldType::String))
//!     }
//!
//!     fn run(
//!         &self,
//!         ctx: &mut StepContext<'_>,
//!         _input: &Value,
//!         external_input: Option<&Value>,
//!     ) -> Result<Value, StepError> {
//!         let name = external_input
//!             .and_then(|data| data["name"].as_str())
//!             .ok_or("name missing")?;
//!         ctx.print(format!("greeting {}", name));
//!         Ok(json!(format!("hello {}", name)))
//!     }
//! }
//! ```

pub mod context;
pub mod registry;
pub mod schema;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use context::StepContext;
pub use registry::{Discovered, ModuleBuilder, ModuleScan, Registry, RegistryError};
pub use schema::{FieldSpec, FieldType, InputSchema};

/// The two executable kinds of unit.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Step,
    Decision,
}

/// Everything the catalog can record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Step,
    Decision,
    Workflow,
}

impl From<UnitKind> for DefinitionKind {
    fn from(kind: UnitKind) -> Self {
        match kind {
            UnitKind::Step => Self::Step,
            UnitKind::Decision => Self::Decision,
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step => f.write_str("step"),
            Self::Decision => f.write_str("decision"),
            Self::Workflow => f.write_str("workflow"),
        }
    }
}

/// A fault raised by a unit's own logic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StepError {
    message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// A unit that produces a result.
///
/// Results must be plain JSON values: they are persisted between
/// execution attempts.
pub trait Step: Send + Sync {
    /// Shape of the external input this step waits for. A step that
    /// declares a schema pauses the job until input is provided.
    fn input_schema(&self) -> Option<InputSchema> {
        None
    }

    /// Executes the step with the previous result and any external input.
    fn run(
        &self,
        ctx: &mut StepContext<'_>,
        input: &Value,
        external_input: Option<&Value>,
    ) -> Result<Value, StepError>;
}

/// A unit that selects which successor edge to follow.
pub trait Decision: Send + Sync {
    /// Returns the index into the decision's ordered successor list.
    fn decide(&self, ctx: &mut StepContext<'_>, input: &Value) -> Result<usize, StepError>;
}

/// A resolved, executable unit.
#[derive(Clone)]
pub enum Unit {
    Step(Arc<dyn Step>),
    Decision(Arc<dyn Decision>),
}

impl Unit {
    pub fn kind(&self) -> UnitKind {
        match self {
            Self::Step(_) => UnitKind::Step,
            Self::Decision(_) => UnitKind::Decision,
        }
    }

    /// Declared external input shape; decisions never take external input.
    pub fn input_schema(&self) -> Option<InputSchema> {
        match self {
            Self::Step(step) => step.input_schema(),
            Self::Decision(_) => None,
        }
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(_) => f.write_str("Unit::Step"),
            Self::Decision(_) => f.write_str("Unit::Decision"),
        }
    }
}

/// The built-in unit at [`crate::workflow::START`]. Produces null.
pub(crate) struct Start;

impl Step for Start {
    fn run(
        &self,
        _ctx: &mut StepContext<'_>,
        _input: &Value,
        _external_input: Option<&Value>,
    ) -> Result<Value, StepError> {
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ExecutionLog;

    #[test]
    fn test_step_error_conversions() {
        let err: StepError = "no such file".into();
        assert_eq!(err.to_string(), "no such file");

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: StepError = io.into();
        assert_eq!(err.message(), "missing");
    }

    #[test]
    fn test_unit_kind_and_schema() {
        let unit = Unit::Step(Arc::new(Start));
        assert_eq!(unit.kind(), UnitKind::Step);
        assert!(unit.input_schema().is_none());
    }

    #[test]
    fn test_start_produces_null() {
        let log = ExecutionLog::new();
        let mut ctx = StepContext::new(1, "start", &log);
        let result = Start.run(&mut ctx, &Value::Null, None).unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn test_definition_kind_from_unit_kind() {
        assert_eq!(DefinitionKind::from(UnitKind::Decision), DefinitionKind::Decision);
        assert_eq!(DefinitionKind::Workflow.to_string(), "workflow");
    }
}
