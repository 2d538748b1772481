//! Workflow Execution Module
//!
//! Runs jobs through their workflow graphs.
//!
//! # Architecture
//!
//! - [`engine`]: Advancement loop, lease handling and persistence per unit
//! - [`step`]: Fault-isolated invocation of a single step or decision

pub mod engine;
pub mod step;

pub use engine::{Engine, Outcome};
pub use step::{execute_decision, execute_step, Execution};
