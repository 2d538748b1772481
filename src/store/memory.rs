//! In-memory store backend.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{check_entry, check_version, CatalogEntry, CatalogStore, JobStore, StoreError};
use crate::workflow::{Job, JobId};

#[derive(Default)]
struct Inner {
    next_id: JobId,
    jobs: BTreeMap<JobId, Job>,
    catalog: BTreeMap<String, CatalogEntry>,
    watchdog_running: bool,
}

/// Store keeping everything in process memory behind one lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JobStore for MemoryStore {
    fn create_job(&self, workflow: &str) -> Result<Job, StoreError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let job = Job::new(inner.next_id, workflow);
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::JobNotFound(id))
    }

    fn update_job(&self, job: &mut Job) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let stored = inner.jobs.get(&job.id).ok_or(StoreError::JobNotFound(job.id))?;
        check_version(stored, job)?;

        job.version += 1;
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.lock().jobs.values().cloned().collect())
    }
}

impl CatalogStore for MemoryStore {
    fn insert_if_absent(&self, entry: CatalogEntry) -> Result<bool, StoreError> {
        check_entry(&entry)?;
        let mut inner = self.lock();
        if inner.catalog.contains_key(&entry.path) {
            return Ok(false);
        }
        inner.catalog.insert(entry.path.clone(), entry);
        Ok(true)
    }

    fn get_entry(&self, path: &str) -> Result<Option<CatalogEntry>, StoreError> {
        Ok(self.lock().catalog.get(path).cloned())
    }

    fn list_entries(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self.lock().catalog.values().cloned().collect())
    }

    fn watchdog_running(&self) -> Result<bool, StoreError> {
        Ok(self.lock().watchdog_running)
    }

    fn claim_watchdog(&self) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.watchdog_running {
            return Ok(false);
        }
        inner.watchdog_running = true;
        Ok(true)
    }

    fn release_watchdog(&self) -> Result<(), StoreError> {
        self.lock().watchdog_running = false;
        Ok(())
    }
}
