//! Step Execution Context
//!
//! Handed to every unit while it runs. Gives read access to the job's
//! execution log and collects the diagnostic text the unit emits, which the
//! engine routes to the job's log sink afterwards.

use crate::workflow::{ExecutionLog, JobId};

/// Per-invocation view of the running job.
pub struct StepContext<'a> {
    job_id: JobId,
    unit: &'a str,
    log: &'a ExecutionLog,
    output: Vec<String>,
}

impl<'a> StepContext<'a> {
    pub fn new(job_id: JobId, unit: &'a str, log: &'a ExecutionLog) -> Self {
        Self {
            job_id,
            unit,
            log,
            output: Vec::new(),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Stable path of the unit being executed.
    pub fn unit(&self) -> &str {
        self.unit
    }

    /// Results and inputs of every unit executed so far.
    pub fn log(&self) -> &ExecutionLog {
        self.log
    }

    /// Emits a line of diagnostic output to the job's log.
    pub fn print(&mut self, line: impl Into<String>) {
        self.output.push(line.into());
    }

    /// Lines emitted so far.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub(crate) fn into_output(self) -> Vec<String> {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::LogEntry;
    use serde_json::json;

    #[test]
    fn test_context_collects_output() {
        let log = ExecutionLog::new();
        let mut ctx = StepContext::new(5, "app.Validate", &log);
        ctx.print("checking file");
        ctx.print(format!("size: {}", 42));

        assert_eq!(ctx.job_id(), 5);
        assert_eq!(ctx.unit(), "app.Validate");
        assert_eq!(ctx.output(), ["checking file", "size: 42"]);
        assert_eq!(ctx.into_output().len(), 2);
    }

    #[test]
    fn test_context_exposes_log() {
        let mut log = ExecutionLog::new();
        log.push(LogEntry::step("app.A", None, json!(1)));

        let ctx = StepContext::new(1, "app.B", &log);
        assert_eq!(ctx.log().last_result(), &json!(1));
    }
}
