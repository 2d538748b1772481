//! Catalog Synchronizer
//!
//! The watchdog keeps the persistent catalog in step with the registered
//! modules. Each tick:
//!
//! 1. Registers the built-in start step
//! 2. Rescans step modules, then decision modules if they are a different list
//! 3. Rescans workflow modules
//! 4. Inserts every definition whose path is not yet in the catalog
//!
//! Entries are never removed or rewritten, so jobs referencing a path that
//! disappeared from user code can still be looked up. A failure on one entry
//! is logged and skipped.
//!
//! Only one watchdog runs per deployment: [`Watchdog::start`] claims the
//! store's running flag and [`Watchdog::stop`] clears it.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::store::{CatalogEntry, CatalogStore};
use crate::units::{DefinitionKind, ModuleScan, Registry};
use crate::workflow::START;

const START_NAME: &str = "__start__";

const UNIT_KINDS: [DefinitionKind; 2] = [DefinitionKind::Step, DefinitionKind::Decision];
const WORKFLOW_KINDS: [DefinitionKind; 1] = [DefinitionKind::Workflow];

/// What one synchronization pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Paths newly added to the catalog
    pub inserted: Vec<String>,
    /// Definitions already present
    pub existing: usize,
    /// Paths or modules that could not be registered, with the reason
    pub failed: Vec<(String, String)>,
    /// Declarations a module scan rejected
    pub rejected: Vec<String>,
}

/// Module lists and registry access shared with the background thread.
struct Synchronizer {
    registry: Arc<Registry>,
    catalog: Arc<dyn CatalogStore>,
    steps: Vec<String>,
    decisions: Vec<String>,
    workflows: Vec<String>,
}

impl Synchronizer {
    fn tick(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let mut scans: HashMap<String, ModuleScan> = HashMap::new();

        self.register(
            CatalogEntry::new(START, START_NAME, DefinitionKind::Step),
            &mut report,
        );

        self.register_modules(&self.steps, &UNIT_KINDS, &mut scans, &mut report);
        if self.decisions != self.steps {
            self.register_modules(&self.decisions, &UNIT_KINDS, &mut scans, &mut report);
        }
        self.register_modules(&self.workflows, &WORKFLOW_KINDS, &mut scans, &mut report);

        if !report.inserted.is_empty() || !report.failed.is_empty() {
            info!(
                "Catalog sync: {} new, {} existing, {} failed",
                report.inserted.len(),
                report.existing,
                report.failed.len()
            );
        } else {
            debug!("Catalog sync: {} existing", report.existing);
        }
        report
    }

    fn register_modules(
        &self,
        modules: &[String],
        kinds: &[DefinitionKind],
        scans: &mut HashMap<String, ModuleScan>,
        report: &mut SyncReport,
    ) {
        for module in modules {
            if !scans.contains_key(module) {
                match self.registry.scan(module) {
                    Ok(scan) => {
                        report.rejected.extend(scan.rejected.iter().cloned());
                        scans.insert(module.clone(), scan);
                    }
                    Err(e) => {
                        warn!("Skipping module '{}': {}", module, e);
                        report.failed.push((module.clone(), e.to_string()));
                        continue;
                    }
                }
            }

            let Some(scan) = scans.get(module) else {
                continue;
            };
            for found in scan.of_kinds(kinds) {
                self.register(
                    CatalogEntry::new(found.path.as_str(), found.name.as_str(), found.kind),
                    report,
                );
            }
        }
    }

    fn register(&self, entry: CatalogEntry, report: &mut SyncReport) {
        let path = entry.path.clone();
        let kind = entry.kind;
        match self.catalog.insert_if_absent(entry) {
            Ok(true) => {
                info!("Registered {} '{}'", kind, path);
                report.inserted.push(path);
            }
            Ok(false) => report.existing += 1,
            Err(e) => {
                warn!("Skipping automatic mapping of '{}': {}", path, e);
                report.failed.push((path, e.to_string()));
            }
        }
    }
}

struct Running {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Periodic catalog synchronizer with an explicit start/stop lifecycle.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use waypoint::config::EngineConfig;
/// use waypoint::store::MemoryStore;
/// use waypoint::units::Registry;
/// use waypoint::watchdog::Watchdog;
///
/// let watchdog = Watchdog::new(
///     Arc::new(Registry::new()),
///     Arc::new(MemoryStore::new()),
///     &EngineConfig::default(),
/// );
/// let report = watchdog.sync_catalog();
/// assert_eq!(report.inserted, vec!["waypoint.steps.__start__".to_string()]);
/// ```
pub struct Watchdog {
    sync: Arc<Synchronizer>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl Watchdog {
    pub fn new(
        registry: Arc<Registry>,
        catalog: Arc<dyn CatalogStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            sync: Arc::new(Synchronizer {
                registry,
                catalog,
                steps: config.steps.clone(),
                decisions: config.decision_modules().to_vec(),
                workflows: config.workflows.clone(),
            }),
            interval: config.watchdog_interval(),
            running: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one synchronization pass on the calling thread.
    pub fn sync_catalog(&self) -> SyncReport {
        self.sync.tick()
    }

    /// True if this instance owns the running background loop.
    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Starts the background loop; the first pass runs immediately.
    ///
    /// Returns false without starting anything if a loop is already running
    /// in this or another process sharing the store.
    pub fn start(&self) -> Result<bool, EngineError> {
        let mut running = self.lock();
        if running.is_some() {
            debug!("Watchdog already running in this process");
            return Ok(false);
        }
        if !self.sync.catalog.claim_watchdog()? {
            info!("Watchdog already running elsewhere; not starting");
            return Ok(false);
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let sync = Arc::clone(&self.sync);
        let interval = self.interval;

        let thread = thread::spawn(move || loop {
            sync.tick();
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        info!("Watchdog started (interval {:?})", interval);
        *running = Some(Running {
            stop: stop_tx,
            thread,
        });
        Ok(true)
    }

    /// Stops the background loop and clears the running flag.
    ///
    /// Does nothing if this instance did not start a loop.
    pub fn stop(&self) -> Result<(), EngineError> {
        let Some(running) = self.lock().take() else {
            return Ok(());
        };

        let _ = running.stop.send(());
        if running.thread.join().is_err() {
            error!("Watchdog thread panicked");
        }
        self.sync.catalog.release_watchdog()?;
        info!("Watchdog stopped");
        Ok(())
    }

    /// Clears a running flag left behind by a process that exited without
    /// stopping its watchdog.
    pub fn reset(&self) -> Result<(), EngineError> {
        warn!("Clearing watchdog running flag");
        self.sync.catalog.release_watchdog()?;
        Ok(())
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Failed to stop watchdog: {}", e);
        }
    }
}
