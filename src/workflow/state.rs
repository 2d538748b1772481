//! Job State and Execution Log
//!
//! A [`Job`] is one run of a workflow. Everything a later attempt needs to
//! resume the run lives on the job record: the graph pointer, the lifecycle
//! state, external input waiting to be consumed and the append-only
//! [`ExecutionLog`]. The whole record serializes to JSON so it can be
//! persisted between execution attempts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::START;
use crate::error::EngineError;
use crate::units::UnitKind;

/// Job identifier assigned by the job store.
pub type JobId = u64;

static NULL: Value = Value::Null;

/// Lifecycle state of a job.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Created, not yet started
    Pending,
    /// An execution attempt holds the job
    Ongoing,
    /// Paused until external data arrives
    InputRequired,
    /// External data stored, waiting for the next attempt
    InputReceived,
    /// Terminal: a unit faulted
    Failed,
    /// Terminal: the graph was exhausted
    Finished,
}

impl JobState {
    /// Returns the canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Ongoing => "ONGOING",
            Self::InputRequired => "INPUT_REQUIRED",
            Self::InputReceived => "INPUT_RECEIVED",
            Self::Failed => "FAILED",
            Self::Finished => "FINISHED",
        }
    }

    /// Returns true for states no further transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Finished)
    }

    /// Returns true if an execution attempt may take the job.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Pending | Self::InputReceived)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Ongoing)
                | (Ongoing, Ongoing)
                | (Ongoing, InputRequired)
                | (InputRequired, InputReceived)
                | (InputReceived, Ongoing)
                | (Ongoing, Finished)
                | (Ongoing, Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed unit of work.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Stable path of the unit that ran
    pub unit: String,

    /// Whether the unit was a step or a decision
    pub kind: UnitKind,

    /// External input consumed at this position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_input: Option<Value>,

    /// Value produced by a step; always null for decisions
    #[serde(default)]
    pub result: Value,

    /// Successor index chosen by a decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<usize>,

    /// Fault text if the unit failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

impl LogEntry {
    /// Entry for a step that produced a result.
    pub fn step(unit: impl Into<String>, external_input: Option<Value>, result: Value) -> Self {
        Self {
            unit: unit.into(),
            kind: UnitKind::Step,
            external_input,
            result,
            branch: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    /// Entry for a decision that routed to a successor.
    pub fn decision(unit: impl Into<String>, branch: usize) -> Self {
        Self {
            unit: unit.into(),
            kind: UnitKind::Decision,
            external_input: None,
            result: Value::Null,
            branch: Some(branch),
            error: None,
            recorded_at: Utc::now(),
        }
    }

    /// Entry for a unit that faulted.
    pub fn failure(
        unit: impl Into<String>,
        kind: UnitKind,
        external_input: Option<Value>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            unit: unit.into(),
            kind,
            external_input,
            result: Value::Null,
            branch: None,
            error: Some(error.into()),
            recorded_at: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Append-only record of a job's executed units.
///
/// Doubles as the job's working memory: units read earlier results from it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct ExecutionLog {
    entries: Vec<LogEntry>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the result of the latest successful step, skipping decisions.
    ///
    /// Null when no step has run yet.
    pub fn last_result(&self) -> &Value {
        self.entries
            .iter()
            .rev()
            .find(|e| e.kind == UnitKind::Step && !e.is_failure())
            .map(|e| &e.result)
            .unwrap_or(&NULL)
    }

    /// Returns the latest result recorded for a given unit.
    pub fn result_of(&self, unit: &str) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.unit == unit && e.kind == UnitKind::Step && !e.is_failure())
            .map(|e| &e.result)
    }

    /// Iterates over the unit paths in execution order.
    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.unit.as_str())
    }
}

/// One execution instance of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,

    /// Stable path of the workflow being run
    pub workflow: String,

    /// Unit to execute next (or the unit waiting for input)
    pub pointer: String,

    pub state: JobState,

    pub log: ExecutionLog,

    /// External data supplied for the unit at `pointer`, not yet consumed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_input: Option<Value>,

    /// Incremented by the store on every successful write
    #[serde(default)]
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a pending job positioned at the start marker.
    pub fn new(id: JobId, workflow: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            workflow: workflow.into(),
            pointer: START.to_string(),
            state: JobState::Pending,
            log: ExecutionLog::new(),
            external_input: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: JobState, operation: &'static str) -> Result<(), EngineError> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::InvalidState {
                job: self.id,
                state: self.state,
                operation,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Takes the execution lease: `PENDING`/`INPUT_RECEIVED` -> `ONGOING`.
    pub fn begin(&mut self) -> Result<(), EngineError> {
        if !self.state.is_dispatchable() {
            return Err(EngineError::InvalidState {
                job: self.id,
                state: self.state,
                operation: "start an execution attempt",
            });
        }
        self.transition(JobState::Ongoing, "start an execution attempt")
    }

    /// Pauses the job until external input arrives.
    pub fn require_input(&mut self) -> Result<(), EngineError> {
        self.transition(JobState::InputRequired, "wait for external input")
    }

    /// Stores external input for the current position.
    pub fn receive_input(&mut self, data: Value) -> Result<(), EngineError> {
        self.transition(JobState::InputReceived, "provide external input")?;
        self.external_input = Some(data);
        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), EngineError> {
        self.transition(JobState::Finished, "finish")
    }

    pub fn fail(&mut self) -> Result<(), EngineError> {
        self.transition(JobState::Failed, "fail")
    }

    /// Appends an entry to the execution log.
    pub fn record(&mut self, entry: LogEntry) {
        self.log.push(entry);
        self.updated_at = Utc::now();
    }

    /// Moves the graph pointer to another unit.
    pub fn move_to(&mut self, unit: impl Into<String>) {
        self.pointer = unit.into();
        self.updated_at = Utc::now();
    }

    /// Removes and returns the external input for the current position.
    pub fn take_external_input(&mut self) -> Option<Value> {
        self.external_input.take()
    }
}
