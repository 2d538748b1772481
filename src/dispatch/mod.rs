//! Job Dispatcher
//!
//! Public entry points for running workflows:
//! - [`Dispatcher::order_execution`]: create a job and queue its first attempt
//! - [`Dispatcher::provide_external_input`]: resume a paused job through the queue
//! - [`Dispatcher::execute_synchronously`]: run a new job on the calling thread
//!   until it pauses or ends
//!
//! Attempts are handed to a [`Queue`]; the queue decides where and when
//! [`Engine::advance`] runs.

pub mod queue;

use std::sync::Arc;

use log::info;
use serde_json::Value;

use crate::error::EngineError;
use crate::execution::{Engine, Outcome};
use crate::store::{JobStore, StoreError};
use crate::workflow::{ExecutionLog, Job, JobId, JobState};

pub use queue::{LocalQueue, WorkerPool};

/// Transport for execution attempts, delivered at least once.
pub trait Queue: Send + Sync {
    fn enqueue(&self, job: JobId) -> Result<(), EngineError>;
}

/// Creates jobs and routes execution attempts to a queue.
pub struct Dispatcher {
    engine: Arc<Engine>,
    queue: Arc<dyn Queue>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>, queue: Arc<dyn Queue>) -> Self {
        Self { engine, queue }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn jobs(&self) -> &Arc<dyn JobStore> {
        self.engine.jobs()
    }

    fn create_job(&self, workflow: &str) -> Result<Job, EngineError> {
        if self.engine.registry().workflow(workflow).is_none() {
            return Err(EngineError::WorkflowNotFound(workflow.to_string()));
        }
        let job = self.jobs().create_job(workflow)?;
        info!("Created job {} for workflow '{}'", job.id, workflow);
        Ok(job)
    }

    /// Creates a `PENDING` job and queues one execution attempt.
    ///
    /// Returns the new job's identifier without waiting for execution.
    pub fn order_execution(&self, workflow: &str) -> Result<JobId, EngineError> {
        let job = self.create_job(workflow)?;
        self.queue.enqueue(job.id)?;
        Ok(job.id)
    }

    /// Creates a job and runs it on the calling thread until it needs input
    /// or reaches a terminal state.
    pub fn execute_synchronously(&self, workflow: &str) -> Result<JobId, EngineError> {
        let job = self.create_job(workflow)?;
        self.engine.advance(job.id)?;
        Ok(job.id)
    }

    /// Stores external input for a paused job and queues its next attempt.
    ///
    /// # Errors
    ///
    /// * [`EngineError::InvalidState`] unless the job is `INPUT_REQUIRED`
    /// * [`EngineError::Validation`] if `data` does not match the waiting
    ///   step's input schema
    ///
    /// Neither error changes the stored job.
    pub fn provide_external_input(&self, job_id: JobId, data: Value) -> Result<(), EngineError> {
        self.accept_input(job_id, data)?;
        self.queue.enqueue(job_id)
    }

    /// Like [`provide_external_input`](Self::provide_external_input), but
    /// resumes the job on the calling thread.
    pub fn provide_external_input_sync(
        &self,
        job_id: JobId,
        data: Value,
    ) -> Result<Outcome, EngineError> {
        self.accept_input(job_id, data)?;
        self.engine.advance(job_id)
    }

    fn accept_input(&self, job_id: JobId, data: Value) -> Result<(), EngineError> {
        let mut job = self.jobs().get_job(job_id)?;

        if job.state != JobState::InputRequired {
            return Err(EngineError::InvalidState {
                job: job.id,
                state: job.state,
                operation: "provide external input",
            });
        }

        let unit = self.engine.registry().unit(&job.pointer).ok_or_else(|| {
            EngineError::UnknownNode {
                workflow: job.workflow.clone(),
                node: job.pointer.clone(),
            }
        })?;

        if let Some(schema) = unit.input_schema() {
            schema.validate(&data).map_err(|reason| EngineError::Validation {
                unit: job.pointer.clone(),
                reason,
            })?;
        }

        job.receive_input(data)?;
        self.jobs().update_job(&mut job)?;
        info!("Job {} received input for '{}'", job.id, job.pointer);
        Ok(())
    }

    pub fn job(&self, job_id: JobId) -> Result<Job, EngineError> {
        Ok(self.jobs().get_job(job_id)?)
    }

    pub fn jobs_list(&self) -> Result<Vec<Job>, EngineError> {
        Ok(self.jobs().list_jobs()?)
    }

    pub fn state(&self, job_id: JobId) -> Result<JobState, EngineError> {
        Ok(self.job(job_id)?.state)
    }

    /// Path of the unit the job will run next or is waiting at.
    pub fn pointer(&self, job_id: JobId) -> Result<String, EngineError> {
        Ok(self.job(job_id)?.pointer)
    }

    pub fn log(&self, job_id: JobId) -> Result<ExecutionLog, EngineError> {
        Ok(self.job(job_id)?.log)
    }

    /// Diagnostic text captured for the job.
    pub fn log_text(&self, job_id: JobId) -> Result<String, EngineError> {
        self.jobs().get_job(job_id)?;
        let text = self.engine.sink().read(job_id).map_err(StoreError::from)?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemorySink;
    use crate::store::MemoryStore;
    use crate::units::{
        Decision, FieldType, InputSchema, ModuleBuilder, Registry, Step, StepContext, StepError,
    };
    use crate::workflow::{WorkflowDefinition, START};
    use serde_json::json;

    struct StepX;

    impl Step for StepX {
        fn run(
            &self,
            _ctx: &mut StepContext<'_>,
            _input: &Value,
            _external_input: Option<&Value>,
        ) -> Result<Value, StepError> {
            Ok(json!("x"))
        }
    }

    struct StepNeedsInput;

    impl Step for StepNeedsInput {
        fn input_schema(&self) -> Option<InputSchema> {
            Some(InputSchema::new().required("file", FieldType::String))
        }

        fn run(
            &self,
            ctx: &mut StepContext<'_>,
            _input: &Value,
            external_input: Option<&Value>,
        ) -> Result<Value, StepError> {
            let file = external_input
                .and_then(|data| data["file"].as_str())
                .unwrap_or_default()
                .to_string();
            ctx.print(format!("got {}", file));
            Ok(Value::String(file))
        }
    }

    struct Decide;

    impl Decision for Decide {
        fn decide(&self, _ctx: &mut StepContext<'_>, _input: &Value) -> Result<usize, StepError> {
            Ok(1)
        }
    }

    struct Raises;

    impl Step for Raises {
        fn run(
            &self,
            _ctx: &mut StepContext<'_>,
            _input: &Value,
            _external_input: Option<&Value>,
        ) -> Result<Value, StepError> {
            Err("cannot open file".into())
        }
    }

    fn module(m: &mut ModuleBuilder) {
        m.step("StepX", StepX)
            .step("StepNeedsInput", StepNeedsInput)
            .step("A", StepX)
            .step("B", StepX)
            .step("Raises", Raises)
            .decision("Decide", Decide)
            .workflow(WorkflowDefinition::new("A").edge(START, ["s.StepX"]))
            .workflow(WorkflowDefinition::new("B").edge(START, ["s.StepNeedsInput"]))
            .workflow(
                WorkflowDefinition::new("C")
                    .edge(START, ["s.Decide"])
                    .edge("s.Decide", ["s.A", "s.B"]),
            )
            .workflow(WorkflowDefinition::new("E").edge(START, ["s.Raises"]));
    }

    fn setup() -> (Dispatcher, Arc<LocalQueue>) {
        let registry = Arc::new(Registry::new());
        registry.register_module("s", module);
        registry.scan("s").unwrap();

        let engine = Arc::new(Engine::new(
            registry,
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySink::new()),
        ));
        let queue = Arc::new(LocalQueue::new());
        (Dispatcher::new(engine, queue.clone()), queue)
    }

    fn drain(dispatcher: &Dispatcher, queue: &LocalQueue) {
        for (_, result) in queue.run_pending(dispatcher.engine()) {
            result.unwrap();
        }
    }

    #[test]
    fn test_order_execution_queues_pending_job() {
        let (dispatcher, queue) = setup();
        let id = dispatcher.order_execution("s.A").unwrap();

        assert_eq!(dispatcher.state(id).unwrap(), JobState::Pending);
        assert_eq!(queue.len(), 1);

        drain(&dispatcher, &queue);
        assert_eq!(dispatcher.state(id).unwrap(), JobState::Finished);
        let units: Vec<String> = dispatcher.log(id).unwrap().units().map(String::from).collect();
        assert_eq!(units, vec![START.to_string(), "s.StepX".to_string()]);
    }

    #[test]
    fn test_order_unknown_workflow() {
        let (dispatcher, queue) = setup();
        assert!(matches!(
            dispatcher.order_execution("s.Nope"),
            Err(EngineError::WorkflowNotFound(_))
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_input_round_trip_through_queue() {
        let (dispatcher, queue) = setup();
        let id = dispatcher.order_execution("s.B").unwrap();
        drain(&dispatcher, &queue);

        assert_eq!(dispatcher.state(id).unwrap(), JobState::InputRequired);
        assert_eq!(dispatcher.pointer(id).unwrap(), "s.StepNeedsInput");

        dispatcher
            .provide_external_input(id, json!({"file": "/tmp/a"}))
            .unwrap();
        assert_eq!(dispatcher.state(id).unwrap(), JobState::InputReceived);

        drain(&dispatcher, &queue);
        assert_eq!(dispatcher.state(id).unwrap(), JobState::Finished);
        assert!(dispatcher.log_text(id).unwrap().contains("got /tmp/a"));
    }

    #[test]
    fn test_invalid_input_is_rejected_without_mutation() {
        let (dispatcher, _queue) = setup();
        let id = dispatcher.execute_synchronously("s.B").unwrap();
        let before = dispatcher.job(id).unwrap();

        let err = dispatcher
            .provide_external_input(id, json!({"path": "/tmp/a"}))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
        assert!(err.to_string().contains("file"));

        let err = dispatcher
            .provide_external_input(id, json!({"file": 3}))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));

        assert_eq!(dispatcher.job(id).unwrap(), before);
    }

    #[test]
    fn test_synchronous_resume() {
        let (dispatcher, queue) = setup();
        let id = dispatcher.execute_synchronously("s.B").unwrap();
        assert_eq!(dispatcher.state(id).unwrap(), JobState::InputRequired);

        let outcome = dispatcher
            .provide_external_input_sync(id, json!({"file": "/tmp/a", "extra": true}))
            .unwrap();
        assert_eq!(outcome, Outcome::Finished);
        assert!(queue.is_empty());

        let log = dispatcher.log(id).unwrap();
        assert_eq!(log.last_result(), &json!("/tmp/a"));
    }

    #[test]
    fn test_decision_branch_is_taken() {
        let (dispatcher, _queue) = setup();
        let id = dispatcher.execute_synchronously("s.C").unwrap();

        let log = dispatcher.log(id).unwrap();
        let units: Vec<&str> = log.units().collect();
        assert_eq!(units, vec![START, "s.Decide", "s.B"]);
        assert_eq!(dispatcher.state(id).unwrap(), JobState::Finished);
    }

    #[test]
    fn test_input_for_finished_job_is_invalid() {
        let (dispatcher, _queue) = setup();
        let id = dispatcher.execute_synchronously("s.A").unwrap();
        let log_before = dispatcher.log(id).unwrap();

        let err = dispatcher
            .provide_external_input(id, json!({"file": "/tmp/a"}))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState { state: JobState::Finished, .. }
        ));
        assert!(err.is_rejection());
        assert_eq!(dispatcher.log(id).unwrap(), log_before);
    }

    #[test]
    fn test_failing_step_marks_job_failed() {
        let (dispatcher, _queue) = setup();
        let id = dispatcher.execute_synchronously("s.E").unwrap();

        assert_eq!(dispatcher.state(id).unwrap(), JobState::Failed);
        let log = dispatcher.log(id).unwrap();
        assert_eq!(log.last().unwrap().unit, "s.Raises");
        let text = dispatcher.log_text(id).unwrap();
        assert!(text.contains("s.Raises"));
        assert!(text.contains("cannot open file"));
    }

    #[test]
    fn test_redelivered_attempt_is_noop() {
        let (dispatcher, queue) = setup();
        let id = dispatcher.order_execution("s.A").unwrap();

        let mut job = dispatcher.job(id).unwrap();
        job.begin().unwrap();
        dispatcher.engine().jobs().update_job(&mut job).unwrap();

        queue.enqueue(id).unwrap();
        let results = queue.run_pending(dispatcher.engine());
        assert_eq!(results.len(), 2);
        for (_, result) in results {
            assert_eq!(result.unwrap(), Outcome::Skipped(JobState::Ongoing));
        }
        assert!(dispatcher.log(id).unwrap().is_empty());
    }

    #[test]
    fn test_log_text_for_missing_job() {
        let (dispatcher, _queue) = setup();
        assert!(matches!(
            dispatcher.log_text(42),
            Err(EngineError::Store(StoreError::JobNotFound(42)))
        ));
    }
}
