//! File-backed job log sink.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;

use super::{format_lines, LogSink};
use crate::workflow::JobId;

/// Appends each job's output to `{dir}/job_{id}.log`.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of a job's log file.
    pub fn path_for(&self, job: JobId) -> PathBuf {
        self.dir.join(format!("job_{}.log", job))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl LogSink for FileSink {
    fn append(&self, job: JobId, unit: &str, lines: &[String]) -> io::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let path = self.path_for(job);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(format_lines(unit, lines).as_bytes())?;
        debug!("Appended {} line(s) to {}", lines.len(), path.display());
        Ok(())
    }

    fn read(&self, job: JobId) -> io::Result<String> {
        match fs::read_to_string(self.path_for(job)) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }
}
