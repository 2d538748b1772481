//! Workflow Execution Engine
//!
//! Advances a job through its workflow graph one unit at a time:
//! - Takes the job's execution lease (`PENDING`/`INPUT_RECEIVED` -> `ONGOING`)
//! - Routes through decisions without yielding control
//! - Suspends at steps that wait for external input
//! - Persists the job after every unit so a later attempt can resume
//! - Converts unit faults into a `FAILED` job instead of an error
//!
//! Attempts against a job another attempt already holds are no-ops, which
//! makes queue redelivery harmless.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::error::EngineError;
use crate::output::LogSink;
use crate::store::{JobStore, StoreError};
use crate::units::{Registry, Unit, UnitKind};
use crate::workflow::{Job, JobId, JobState, LogEntry};

use super::step::{execute_decision, execute_step};

/// Where an execution attempt left the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The job was not dispatchable; nothing ran
    Skipped(JobState),
    /// Paused at a step waiting for external input
    InputRequired,
    Finished,
    Failed,
}

impl Outcome {
    /// The job state this outcome corresponds to.
    pub fn state(&self) -> JobState {
        match self {
            Self::Skipped(state) => *state,
            Self::InputRequired => JobState::InputRequired,
            Self::Finished => JobState::Finished,
            Self::Failed => JobState::Failed,
        }
    }
}

/// Workflow execution engine.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use waypoint::execution::Engine;
/// use waypoint::output::MemorySink;
/// use waypoint::store::MemoryStore;
/// use waypoint::units::Registry;
///
/// let engine = Engine::new(
///     Arc::new(Registry::new()),
///     Arc::new(MemoryStore::new()),
///     Arc::new(MemorySink::new()),
/// );
/// assert!(engine.advance(1).is_err()); // no such job
/// ```
pub struct Engine {
    registry: Arc<Registry>,
    jobs: Arc<dyn JobStore>,
    sink: Arc<dyn LogSink>,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, jobs: Arc<dyn JobStore>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            registry,
            jobs,
            sink,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// Runs one execution attempt for a job.
    ///
    /// Returns once the job is suspended or terminal. Errors are reserved
    /// for storage failures and unknown jobs; faults inside units end in
    /// [`Outcome::Failed`].
    pub fn advance(&self, job_id: JobId) -> Result<Outcome, EngineError> {
        let mut job = self.jobs.get_job(job_id)?;

        if !job.state.is_dispatchable() {
            debug!("Job {} is {}; attempt skipped", job.id, job.state);
            return Ok(Outcome::Skipped(job.state));
        }

        job.begin()?;
        match self.jobs.update_job(&mut job) {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                info!("Job {} was claimed by another attempt", job_id);
                return Ok(Outcome::Skipped(JobState::Ongoing));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Job {} ({}) running from '{}'",
            job.id, job.workflow, job.pointer
        );
        match self.run(&mut job) {
            Err(EngineError::Store(e)) => {
                error!(
                    "Job {} interrupted at '{}' by a storage failure: {}",
                    job_id, job.pointer, e
                );
                self.abandon(job_id, &e);
                Err(EngineError::Store(e))
            }
            other => other,
        }
    }

    /// Marks a job failed after a storage error cut its run short, so it is
    /// not left holding the lease. Best effort only.
    fn abandon(&self, job_id: JobId, cause: &StoreError) {
        let mut job = match self.jobs.get_job(job_id) {
            Ok(job) if job.state == JobState::Ongoing => job,
            Ok(_) => return,
            Err(e) => {
                error!("Job {} may remain ONGOING: {}", job_id, e);
                return;
            }
        };

        let reason = format!("Storage failure: {}", cause);
        let unit = job.pointer.clone();
        self.flush(job_id, &unit, &[format!("FAILED: {}", reason)]);
        job.record(LogEntry::failure(unit, UnitKind::Step, None, reason));

        let released = job
            .fail()
            .and_then(|()| self.jobs.update_job(&mut job).map_err(EngineError::from));
        if let Err(e) = released {
            error!("Job {} may remain ONGOING: {}", job_id, e);
        }
    }

    /// The advancement loop. The caller holds the lease.
    fn run(&self, job: &mut Job) -> Result<Outcome, EngineError> {
        let Some(workflow) = self.registry.workflow(&job.workflow) else {
            let reason = EngineError::WorkflowNotFound(job.workflow.clone()).to_string();
            let entry = LogEntry::failure(job.pointer.clone(), UnitKind::Step, None, reason);
            return self.fail(job, entry);
        };

        loop {
            let path = job.pointer.clone();

            let successors = match workflow.successors(&path) {
                Ok(next) => next.to_vec(),
                Err(e) => {
                    let entry = LogEntry::failure(path, UnitKind::Step, None, e.to_string());
                    return self.fail(job, entry);
                }
            };

            let Some(unit) = self.registry.unit(&path) else {
                let reason = EngineError::UnknownNode {
                    workflow: workflow.path.clone(),
                    node: path.clone(),
                }
                .to_string();
                let entry = LogEntry::failure(path, UnitKind::Step, None, reason);
                return self.fail(job, entry);
            };

            match unit {
                Unit::Decision(decision) => {
                    let exec = execute_decision(decision.as_ref(), job.id, &path, &job.log);
                    self.flush(job.id, &path, &exec.output);

                    let index = match exec.outcome {
                        Ok(index) => index,
                        Err(e) => {
                            let reason = EngineError::StepExecution {
                                unit: path.clone(),
                                message: e.to_string(),
                            }
                            .to_string();
                            let entry = LogEntry::failure(path, UnitKind::Decision, None, reason);
                            return self.fail(job, entry);
                        }
                    };

                    let Some(next) = successors.get(index) else {
                        let reason = EngineError::BranchIndex {
                            decision: path.clone(),
                            index,
                            successors: successors.len(),
                        }
                        .to_string();
                        let entry = LogEntry::failure(path, UnitKind::Decision, None, reason);
                        return self.fail(job, entry);
                    };

                    debug!("Job {}: '{}' chose branch {} -> '{}'", job.id, path, index, next);
                    job.record(LogEntry::decision(path, index));
                    job.move_to(next.clone());
                    self.jobs.update_job(job)?;
                }

                Unit::Step(step) => {
                    if step.input_schema().is_some() && job.external_input.is_none() {
                        job.require_input()?;
                        self.jobs.update_job(job)?;
                        info!("Job {} waiting for input at '{}'", job.id, path);
                        return Ok(Outcome::InputRequired);
                    }

                    let external = job.take_external_input();
                    let exec =
                        execute_step(step.as_ref(), job.id, &path, &job.log, external.as_ref());
                    self.flush(job.id, &path, &exec.output);

                    let result = match exec.outcome {
                        Ok(result) => result,
                        Err(e) => {
                            let reason = EngineError::StepExecution {
                                unit: path.clone(),
                                message: e.to_string(),
                            }
                            .to_string();
                            let entry = LogEntry::failure(path, UnitKind::Step, external, reason);
                            return self.fail(job, entry);
                        }
                    };

                    job.record(LogEntry::step(path.clone(), external, result));

                    match successors.first() {
                        Some(next) => {
                            debug!("Job {}: '{}' done -> '{}'", job.id, path, next);
                            job.move_to(next.clone());
                            self.jobs.update_job(job)?;
                        }
                        None => {
                            job.finish()?;
                            self.jobs.update_job(job)?;
                            info!("Job {} finished at '{}'", job.id, path);
                            return Ok(Outcome::Finished);
                        }
                    }
                }
            }
        }
    }

    /// Records a fault and marks the job failed. The pointer stays on the
    /// failing unit.
    fn fail(&self, job: &mut Job, entry: LogEntry) -> Result<Outcome, EngineError> {
        let reason = entry.error.clone().unwrap_or_default();
        error!("Job {} failed at '{}': {}", job.id, entry.unit, reason);

        self.flush(job.id, &entry.unit, &[format!("FAILED: {}", reason)]);
        job.record(entry);
        job.fail()?;
        self.jobs.update_job(job)?;
        Ok(Outcome::Failed)
    }

    /// Routes unit output to the job's log sink. Sink failures are logged
    /// and never fail the job.
    fn flush(&self, job_id: JobId, unit: &str, lines: &[String]) {
        if let Err(e) = self.sink.append(job_id, unit, lines) {
            warn!("Failed to write log output for job {}: {}", job_id, e);
        }
    }
}
