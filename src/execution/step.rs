//! Individual Unit Execution
//!
//! Runs a single step or decision with fault isolation:
//! - The unit receives the previous result and a [`StepContext`]
//! - Errors returned by the unit and panics inside it both become a
//!   [`StepError`]; neither escapes to the caller
//! - Diagnostic output is returned alongside the outcome so the engine can
//!   route it to the job's log sink

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use log::debug;
use serde_json::Value;

use crate::units::{Decision, Step, StepContext, StepError};
use crate::workflow::{ExecutionLog, JobId};

/// Outcome of one unit invocation plus the text it emitted.
#[derive(Debug)]
pub struct Execution<T> {
    pub outcome: Result<T, StepError>,
    pub output: Vec<String>,
}

/// Executes a step against the job's log.
///
/// # Arguments
///
/// * `step` - The step to run
/// * `job_id` - Job the step runs for
/// * `path` - Stable path of the step
/// * `log` - The job's execution log; its last result is the step input
/// * `external_input` - Data provided for this position, if any
pub fn execute_step(
    step: &dyn Step,
    job_id: JobId,
    path: &str,
    log: &ExecutionLog,
    external_input: Option<&Value>,
) -> Execution<Value> {
    debug!("Job {}: running step '{}'", job_id, path);

    let input = log.last_result();
    let mut ctx = StepContext::new(job_id, path, log);
    let outcome = guarded(|| step.run(&mut ctx, input, external_input));

    Execution {
        outcome,
        output: ctx.into_output(),
    }
}

/// Executes a decision against the job's log.
pub fn execute_decision(
    decision: &dyn Decision,
    job_id: JobId,
    path: &str,
    log: &ExecutionLog,
) -> Execution<usize> {
    debug!("Job {}: running decision '{}'", job_id, path);

    let input = log.last_result();
    let mut ctx = StepContext::new(job_id, path, log);
    let outcome = guarded(|| decision.decide(&mut ctx, input));

    Execution {
        outcome,
        output: ctx.into_output(),
    }
}

/// Runs unit code, converting a panic into a [`StepError`].
fn guarded<T>(f: impl FnOnce() -> Result<T, StepError>) -> Result<T, StepError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(StepError::new(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
