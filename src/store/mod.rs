//! Persistent Store
//!
//! The engine treats storage as an opaque collaborator behind two traits:
//! [`JobStore`] for job records and [`CatalogStore`] for catalog entries and
//! the watchdog flag. Two backends are provided:
//!
//! - [`MemoryStore`]: process-local, for tests and embedding
//! - [`FileStore`]: JSON files under a state directory, survives restarts
//!
//! Job writes are optimistic: a write only succeeds if the stored version
//! still matches the version the writer read.

pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::units::DefinitionKind;
use crate::workflow::{Job, JobId};

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {job} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        job: JobId,
        expected: u64,
        found: u64,
    },

    #[error("Catalog entry '{path}' rejected: {reason}")]
    Constraint { path: String, reason: String },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage for job records.
pub trait JobStore: Send + Sync {
    /// Allocates an identifier and persists a new pending job.
    fn create_job(&self, workflow: &str) -> Result<Job, StoreError>;

    fn get_job(&self, id: JobId) -> Result<Job, StoreError>;

    /// Replaces the stored job if its version still equals `job.version`.
    ///
    /// On success `job.version` is incremented to the newly stored version;
    /// on [`StoreError::Conflict`] nothing is written.
    fn update_job(&self, job: &mut Job) -> Result<(), StoreError>;

    /// All jobs, ordered by identifier.
    fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;
}

/// A catalog record for a step, decision or workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub path: String,
    pub name: String,
    pub kind: DefinitionKind,
    pub registered_at: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn new(path: impl Into<String>, name: impl Into<String>, kind: DefinitionKind) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            kind,
            registered_at: Utc::now(),
        }
    }
}

/// Storage for catalog entries and the watchdog singleton flag.
pub trait CatalogStore: Send + Sync {
    /// Inserts an entry unless one with the same path exists.
    ///
    /// Returns true if the entry was inserted. Existing entries are never
    /// modified.
    fn insert_if_absent(&self, entry: CatalogEntry) -> Result<bool, StoreError>;

    fn get_entry(&self, path: &str) -> Result<Option<CatalogEntry>, StoreError>;

    /// All entries, ordered by path.
    fn list_entries(&self) -> Result<Vec<CatalogEntry>, StoreError>;

    fn watchdog_running(&self) -> Result<bool, StoreError>;

    /// Sets the watchdog flag if it is clear. Returns false if another
    /// process already holds it.
    fn claim_watchdog(&self) -> Result<bool, StoreError>;

    fn release_watchdog(&self) -> Result<(), StoreError>;
}

/// Rejects entries the catalog cannot hold.
pub(crate) fn check_entry(entry: &CatalogEntry) -> Result<(), StoreError> {
    if entry.path.trim().is_empty() || entry.path.contains(char::is_whitespace) {
        return Err(StoreError::Constraint {
            path: entry.path.clone(),
            reason: "path must be non-empty and contain no whitespace".to_string(),
        });
    }
    Ok(())
}

/// Version check shared by the backends.
pub(crate) fn check_version(stored: &Job, job: &Job) -> Result<(), StoreError> {
    if stored.version != job.version {
        return Err(StoreError::Conflict {
            job: job.id,
            expected: job.version,
            found: stored.version,
        });
    }
    Ok(())
}
