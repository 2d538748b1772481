//! Job Log Sinks
//!
//! Diagnostic text a unit emits while running is captured per job and can be
//! read back by job identifier. Each line is stamped with the time it was
//! recorded and the unit that produced it:
//!
//! ```text
//! 2026-10-18T07:00:00.000Z demo.ValidateFileStep: Received file for validation: /tmp/a.json
//! ```
//!
//! - [`MemorySink`]: keeps text in memory
//! - [`FileSink`]: appends to `logs/job_{id}.log`

pub mod file;

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};

use crate::workflow::JobId;

pub use file::FileSink;

/// Per-job destination for diagnostic output.
pub trait LogSink: Send + Sync {
    /// Appends lines produced by `unit` to the job's log.
    fn append(&self, job: JobId, unit: &str, lines: &[String]) -> io::Result<()>;

    /// Returns the job's full log text; empty if nothing was written.
    fn read(&self, job: JobId) -> io::Result<String>;
}

/// Formats lines the way every sink stores them.
pub fn format_lines(unit: &str, lines: &[String]) -> String {
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    lines
        .iter()
        .flat_map(|line| line.lines())
        .map(|line| format!("{} {}: {}\n", stamp, unit, line))
        .collect()
}

/// Sink keeping each job's text in memory.
#[derive(Default)]
pub struct MemorySink {
    logs: Mutex<HashMap<JobId, String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, String>> {
        self.logs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LogSink for MemorySink {
    fn append(&self, job: JobId, unit: &str, lines: &[String]) -> io::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        self.lock()
            .entry(job)
            .or_default()
            .push_str(&format_lines(unit, lines));
        Ok(())
    }

    fn read(&self, job: JobId) -> io::Result<String> {
        Ok(self.lock().get(&job).cloned().unwrap_or_default())
    }
}
