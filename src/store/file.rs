//! JSON file store backend.
//!
//! Layout under the state directory:
//!
//! ```text
//! .waypoint/
//!   jobs/job_{id}.json
//!   catalog.json
//!   watchdog.json
//!   store.lock
//! ```
//!
//! Each write goes to a temporary file that is renamed into place, so a
//! reader never sees a half-written record. Every operation holds an
//! exclusive advisory lock on `store.lock`, which serializes read-check-write
//! sequences across all processes sharing the directory. That lock is what
//! makes the `ONGOING` transition a lease and keeps job ids unique.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{check_entry, check_version, CatalogEntry, CatalogStore, JobStore, StoreError};
use crate::workflow::{Job, JobId};

const JOBS_DIR: &str = "jobs";
const CATALOG_FILE: &str = "catalog.json";
const WATCHDOG_FILE: &str = "watchdog.json";
const LOCK_FILE: &str = "store.lock";

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WatchdogRecord {
    running: bool,
    updated_at: DateTime<Utc>,
}

/// Exclusive hold on the store lock file, released on drop.
struct StoreLock(File);

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.0) {
            warn!("Failed to release store lock: {}", e);
        }
    }
}

/// Store persisting records as pretty-printed JSON files.
///
/// Any number of instances, in any number of processes, may share a root.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(JOBS_DIR))?;
        info!("Using state directory: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Blocks until this caller holds the store-wide lock.
    fn lock(&self) -> Result<StoreLock, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE))?;
        FileExt::lock_exclusive(&file)?;
        Ok(StoreLock(file))
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.root.join(JOBS_DIR).join(format!("job_{}.json", id))
    }

    fn job_ids(&self) -> Result<Vec<JobId>, StoreError> {
        let mut ids: Vec<JobId> = fs::read_dir(self.root.join(JOBS_DIR))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                name.strip_prefix("job_")?
                    .strip_suffix(".json")?
                    .parse::<JobId>()
                    .ok()
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn load_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(read_json(&self.root.join(CATALOG_FILE))?.unwrap_or_default())
    }

    fn load_watchdog(&self) -> Result<bool, StoreError> {
        let record: Option<WatchdogRecord> = read_json(&self.root.join(WATCHDOG_FILE))?;
        Ok(record.map(|r| r.running).unwrap_or(false))
    }

    fn save_watchdog(&self, running: bool) -> Result<(), StoreError> {
        let record = WatchdogRecord {
            running,
            updated_at: Utc::now(),
        };
        write_json(&self.root.join(WATCHDOG_FILE), &record)
    }
}

/// Reads a JSON file, returning `None` if it does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes JSON through a temporary file renamed into place.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

impl JobStore for FileStore {
    fn create_job(&self, workflow: &str) -> Result<Job, StoreError> {
        let _lock = self.lock()?;
        let id = self.job_ids()?.last().copied().unwrap_or(0) + 1;
        let job = Job::new(id, workflow);
        write_json(&self.job_path(id), &job)?;
        Ok(job)
    }

    fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        let _lock = self.lock()?;
        read_json(&self.job_path(id))?.ok_or(StoreError::JobNotFound(id))
    }

    fn update_job(&self, job: &mut Job) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let path = self.job_path(job.id);
        let stored: Job = read_json(&path)?.ok_or(StoreError::JobNotFound(job.id))?;
        check_version(&stored, job)?;

        job.version += 1;
        if let Err(e) = write_json(&path, job) {
            job.version -= 1;
            return Err(e);
        }
        Ok(())
    }

    fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let _lock = self.lock()?;
        let mut jobs = Vec::new();
        for id in self.job_ids()? {
            match read_json::<Job>(&self.job_path(id)) {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable job record {}: {}", id, e),
            }
        }
        Ok(jobs)
    }
}

impl CatalogStore for FileStore {
    fn insert_if_absent(&self, entry: CatalogEntry) -> Result<bool, StoreError> {
        check_entry(&entry)?;
        let _lock = self.lock()?;
        let mut catalog = self.load_catalog()?;
        if catalog.iter().any(|e| e.path == entry.path) {
            return Ok(false);
        }
        catalog.push(entry);
        catalog.sort_by(|a, b| a.path.cmp(&b.path));
        write_json(&self.root.join(CATALOG_FILE), &catalog)?;
        Ok(true)
    }

    fn get_entry(&self, path: &str) -> Result<Option<CatalogEntry>, StoreError> {
        let _lock = self.lock()?;
        Ok(self.load_catalog()?.into_iter().find(|e| e.path == path))
    }

    fn list_entries(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        let _lock = self.lock()?;
        self.load_catalog()
    }

    fn watchdog_running(&self) -> Result<bool, StoreError> {
        let _lock = self.lock()?;
        self.load_watchdog()
    }

    fn claim_watchdog(&self) -> Result<bool, StoreError> {
        let _lock = self.lock()?;
        if self.load_watchdog()? {
            return Ok(false);
        }
        self.save_watchdog(true)?;
        Ok(true)
    }

    fn release_watchdog(&self) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        self.save_watchdog(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::DefinitionKind;
    use crate::workflow::{JobState, LogEntry, START};
    use serde_json::Value;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::tempdir;

    fn shared_stores(root: &Path, count: usize) -> Vec<Arc<FileStore>> {
        (0..count)
            .map(|_| Arc::new(FileStore::open(root).unwrap()))
            .collect()
    }

    #[test]
    fn test_open_creates_layout() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().join(".waypoint");
        let store = FileStore::open(&root).unwrap();
        assert!(root.join("jobs").is_dir());
        assert_eq!(store.root(), root.as_path());
    }

    #[test]
    fn test_job_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let id = {
            let store = FileStore::open(temp_dir.path()).unwrap();
            let mut job = store.create_job("app.W").unwrap();
            job.begin().unwrap();
            job.record(LogEntry::step(START, None, Value::Null));
            store.update_job(&mut job).unwrap();
            job.id
        };

        let store = FileStore::open(temp_dir.path()).unwrap();
        let job = store.get_job(id).unwrap();
        assert_eq!(job.state, JobState::Ongoing);
        assert_eq!(job.log.len(), 1);
        assert_eq!(job.version, 1);
    }

    #[test]
    fn test_ids_continue_after_reopen() {
        let temp_dir = tempdir().unwrap();
        FileStore::open(temp_dir.path())
            .unwrap()
            .create_job("app.W")
            .unwrap();

        let store = FileStore::open(temp_dir.path()).unwrap();
        let job = store.create_job("app.W").unwrap();
        assert_eq!(job.id, 2);
        assert_eq!(store.list_jobs().unwrap().len(), 2);
    }

    #[test]
    fn test_stale_update_conflicts() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        let job = store.create_job("app.W").unwrap();

        let mut first = job.clone();
        let mut second = job;
        first.begin().unwrap();
        store.update_job(&mut first).unwrap();

        second.begin().unwrap();
        assert!(matches!(
            store.update_job(&mut second),
            Err(StoreError::Conflict { .. })
        ));
        assert_eq!(store.get_job(first.id).unwrap().version, 1);
    }

    #[test]
    fn test_lease_is_exclusive_across_stores() {
        let temp_dir = tempdir().unwrap();
        let stores = shared_stores(temp_dir.path(), 4);

        for _ in 0..50 {
            let id = stores[0].create_job("app.W").unwrap().id;
            let barrier = Arc::new(Barrier::new(stores.len()));

            let handles: Vec<_> = stores
                .iter()
                .cloned()
                .map(|store| {
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        let mut job = store.get_job(id).unwrap();
                        barrier.wait();
                        job.begin().unwrap();
                        match store.update_job(&mut job) {
                            Ok(()) => true,
                            Err(StoreError::Conflict { .. }) => false,
                            Err(e) => panic!("unexpected store error: {}", e),
                        }
                    })
                })
                .collect();

            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1, "job {} leased {} times", id, winners);
            assert_eq!(stores[1].get_job(id).unwrap().version, 1);
        }
    }

    #[test]
    fn test_concurrent_creates_get_distinct_ids() {
        let temp_dir = tempdir().unwrap();
        let stores = shared_stores(temp_dir.path(), 4);

        let handles: Vec<_> = stores
            .iter()
            .cloned()
            .map(|store| {
                thread::spawn(move || {
                    (0..10)
                        .map(|_| store.create_job("app.W").unwrap().id)
                        .collect::<Vec<JobId>>()
                })
            })
            .collect();

        let mut ids: Vec<JobId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 40);
        assert_eq!(stores[0].list_jobs().unwrap().len(), 40);
    }

    #[test]
    fn test_missing_job() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        assert!(matches!(store.get_job(7), Err(StoreError::JobNotFound(7))));
    }

    #[test]
    fn test_catalog_persists_and_is_append_only() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        assert!(store
            .insert_if_absent(CatalogEntry::new("app.B", "B", DefinitionKind::Step))
            .unwrap());
        assert!(store
            .insert_if_absent(CatalogEntry::new("app.A", "A", DefinitionKind::Decision))
            .unwrap());
        assert!(!store
            .insert_if_absent(CatalogEntry::new("app.A", "A", DefinitionKind::Step))
            .unwrap());

        let reopened = FileStore::open(temp_dir.path()).unwrap();
        let entries = reopened.list_entries().unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["app.A", "app.B"]);
        assert_eq!(
            reopened.get_entry("app.A").unwrap().map(|e| e.kind),
            Some(DefinitionKind::Decision)
        );
    }

    #[test]
    fn test_watchdog_flag_persists() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        assert!(!store.watchdog_running().unwrap());
        assert!(store.claim_watchdog().unwrap());

        let other_process = FileStore::open(temp_dir.path()).unwrap();
        assert!(!other_process.claim_watchdog().unwrap());

        store.release_watchdog().unwrap();
        assert!(other_process.claim_watchdog().unwrap());
    }
}
