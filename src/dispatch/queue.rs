//! Dispatch queue implementations.
//!
//! - [`LocalQueue`]: in-process FIFO drained explicitly by the caller
//! - [`WorkerPool`]: tokio workers pulling attempts from a channel, each
//!   attempt running on the blocking thread pool

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use super::Queue;
use crate::error::EngineError;
use crate::execution::{Engine, Outcome};
use crate::workflow::JobId;

/// FIFO of pending execution attempts, drained with [`LocalQueue::run_pending`].
#[derive(Default)]
pub struct LocalQueue {
    pending: Mutex<VecDeque<JobId>>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<JobId>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn pop(&self) -> Option<JobId> {
        self.lock().pop_front()
    }

    /// Runs every queued attempt in order on the calling thread.
    pub fn run_pending(&self, engine: &Engine) -> Vec<(JobId, Result<Outcome, EngineError>)> {
        let mut results = Vec::new();
        while let Some(job) = self.pop() {
            results.push((job, engine.advance(job)));
        }
        results
    }
}

impl Queue for LocalQueue {
    fn enqueue(&self, job: JobId) -> Result<(), EngineError> {
        self.lock().push_back(job);
        Ok(())
    }
}

/// Upper bound on concurrent attempts in one pool.
pub const MAX_WORKERS: usize = 4096;

/// Clamps a requested worker count into `1..=MAX_WORKERS`.
fn pool_size(workers: usize) -> usize {
    let size = workers.clamp(1, MAX_WORKERS);
    if size != workers {
        warn!("Worker count {} out of range, using {}", workers, size);
    }
    size
}

/// Background workers consuming execution attempts.
///
/// Must be created inside a tokio runtime.
pub struct WorkerPool {
    tx: Mutex<Option<mpsc::UnboundedSender<JobId>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Starts a pool running at most `workers` attempts at a time.
    pub fn spawn(engine: Arc<Engine>, workers: usize) -> Self {
        let workers = pool_size(workers);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_workers(engine, rx, workers));
        info!("Started worker pool with {} worker(s)", workers);

        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stops accepting work and waits for queued attempts to finish.
    pub async fn shutdown(&self) {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
        drop(tx);

        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Worker pool terminated abnormally: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

impl Queue for WorkerPool {
    fn enqueue(&self, job: JobId) -> Result<(), EngineError> {
        let guard = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        let tx = guard
            .as_ref()
            .ok_or_else(|| EngineError::Dispatch("worker pool is shut down".to_string()))?;
        tx.send(job)
            .map_err(|_| EngineError::Dispatch(format!("cannot enqueue job {}", job)))
    }
}

async fn run_workers(engine: Arc<Engine>, mut rx: mpsc::UnboundedReceiver<JobId>, workers: usize) {
    let permits = Arc::new(Semaphore::new(workers));

    while let Some(job) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let engine = Arc::clone(&engine);

        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || engine.advance(job)).await;
            drop(permit);
            match result {
                Ok(Ok(outcome)) => debug!("Job {} attempt ended: {:?}", job, outcome),
                Ok(Err(e)) => error!("Job {} attempt failed: {}", job, e),
                Err(e) => error!("Job {} attempt aborted: {}", job, e),
            }
        });
    }

    // Every permit back means no attempt is still running.
    let all = match u32::try_from(workers) {
        Ok(all) => all,
        Err(_) => {
            error!("Cannot drain {} worker permits", workers);
            return;
        }
    };
    if permits.acquire_many(all).await.is_err() {
        error!("Worker permits closed before draining");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemorySink;
    use crate::store::{JobStore, MemoryStore};
    use crate::units::{ModuleBuilder, Registry, Step, StepContext, StepError};
    use crate::workflow::{JobState, WorkflowDefinition, START};
    use serde_json::Value;

    struct Noop;

    impl Step for Noop {
        fn run(
            &self,
            _ctx: &mut StepContext<'_>,
            _input: &Value,
            _external_input: Option<&Value>,
        ) -> Result<Value, StepError> {
            Ok(Value::Null)
        }
    }

    fn engine() -> (Arc<Engine>, Arc<MemoryStore>) {
        let registry = Arc::new(Registry::new());
        registry.register_module("q", |m: &mut ModuleBuilder| {
            m.step("A", Noop)
                .workflow(WorkflowDefinition::new("Flow").edge(START, ["q.A"]));
        });
        registry.scan("q").unwrap();

        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(Engine::new(registry, store.clone(), Arc::new(MemorySink::new())));
        (engine, store)
    }

    #[test]
    fn test_local_queue_fifo() {
        let (engine, store) = engine();
        let queue = LocalQueue::new();
        let first = store.create_job("q.Flow").unwrap().id;
        let second = store.create_job("q.Flow").unwrap().id;

        queue.enqueue(first).unwrap();
        queue.enqueue(second).unwrap();
        queue.enqueue(first).unwrap();
        assert_eq!(queue.len(), 3);

        let results = queue.run_pending(&engine);
        let order: Vec<JobId> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![first, second, first]);
        assert!(matches!(results[2].1, Ok(Outcome::Skipped(JobState::Finished))));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_worker_pool_runs_jobs() {
        let (engine, store) = engine();
        let pool = WorkerPool::spawn(engine, 2);

        let ids: Vec<JobId> = (0..4)
            .map(|_| store.create_job("q.Flow").unwrap().id)
            .collect();
        for id in &ids {
            pool.enqueue(*id).unwrap();
        }
        pool.shutdown().await;

        for id in ids {
            assert_eq!(store.get_job(id).unwrap().state, JobState::Finished);
        }
    }

    #[test]
    fn test_pool_size_is_clamped() {
        assert_eq!(pool_size(0), 1);
        assert_eq!(pool_size(8), 8);
        assert_eq!(pool_size(usize::MAX), MAX_WORKERS);
        assert!(u32::try_from(pool_size(usize::MAX)).is_ok());
    }

    #[tokio::test]
    async fn test_oversized_pool_drains_on_shutdown() {
        let (engine, store) = engine();
        let pool = WorkerPool::spawn(engine, usize::MAX);

        let id = store.create_job("q.Flow").unwrap().id;
        pool.enqueue(id).unwrap();
        pool.shutdown().await;

        assert_eq!(store.get_job(id).unwrap().state, JobState::Finished);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let (engine, _) = engine();
        let pool = WorkerPool::spawn(engine, 1);
        pool.shutdown().await;
        assert!(matches!(pool.enqueue(1), Err(EngineError::Dispatch(_))));
    }
}
