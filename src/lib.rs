//! Waypoint - Persistent Workflow Execution Engine
//!
//! Runs user-defined units of work arranged as a directed graph. Progress is
//! persisted after every unit, so a run survives process restarts, branches
//! at decisions, and can pause mid-flight until external input arrives.
//!
//! # Architecture
//!
//! - [`workflow`]: Graph definitions, validation, jobs and the execution log
//! - [`units`]: Step and decision traits, input schemas and the registry
//! - [`execution`]: The advancement loop
//! - [`dispatch`]: Public entry points and execution queues
//! - [`watchdog`]: Background catalog synchronization
//! - [`store`]: Job and catalog persistence
//! - [`output`]: Per-job diagnostic log sinks
//! - [`config`]: Engine settings
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::{json, Value};
//! use waypoint::dispatch::{Dispatcher, LocalQueue};
//! use waypoint::execution::Engine;
//! use waypoint::output::MemorySink;
//! use waypoint::store::MemoryStore;
//! use waypoint::units::{ModuleBuilder, Registry, Step, StepContext, StepError};
//! use waypoint::workflow::{JobState, WorkflowDefinition, START};
//!
//! struct Hello;
//!
//! impl Step for Hello {
//!     fn run(
//!         &self,
//!         ctx: &mut StepContext<'_>,
//!         _input: &Value,
//!         _external_input: Option<&Value>,
//!     ) -> Result<Value, StepError> {
//!         ctx.print("hello");
//!         Ok(json!("done"))
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(Registry::new());
//!     registry.register_module("app", |m: &mut ModuleBuilder| {
//!         m.step("Hello", Hello)
//!             .workflow(WorkflowDefinition::new("Greet").edge(START, ["app.Hello"]));
//!     });
//!     registry.scan("app")?;
//!
//!     let engine = Arc::new(Engine::new(
//!         registry,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(MemorySink::new()),
//!     ));
//!     let dispatcher = Dispatcher::new(engine, Arc::new(LocalQueue::new()));
//!
//!     let job = dispatcher.execute_synchronously("app.Greet")?;
//!     assert_eq!(dispatcher.state(job)?, JobState::Finished);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod execution;
pub mod output;
pub mod store;
pub mod units;
pub mod watchdog;
pub mod workflow;

// Re-export commonly used types
pub use config::EngineConfig;
pub use dispatch::{Dispatcher, Queue};
pub use error::EngineError;
pub use execution::{Engine, Outcome};
pub use units::{Decision, Registry, Step, StepContext, StepError};
pub use watchdog::Watchdog;
pub use workflow::{Job, JobId, JobState, WorkflowDefinition, START};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Waypoint";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "Waypoint");
    }

    #[test]
    fn test_start_marker() {
        assert_eq!(START, "waypoint.steps.__start__");
        let workflow = WorkflowDefinition::new("Empty");
        assert!(workflow.is_empty());
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
