//! Unit and Workflow Registry
//!
//! Maps stable paths (`module.Name`) to executable units and validated
//! workflow definitions. User code is grouped into modules: a module is a
//! loader function that declares steps, decisions and workflows on a
//! [`ModuleBuilder`]. Scanning a module re-invokes its loader, so replacing a
//! loader and scanning again picks up changed definitions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use thiserror::Error;

use super::{Decision, DefinitionKind, Start, Step, Unit, UnitKind};
use crate::workflow::validator::{validate_workflow, DefinitionError};
use crate::workflow::{parse_workflow, WorkflowDefinition, START};

/// Loader declaring the contents of one module.
pub type ModuleLoader = Arc<dyn Fn(&mut ModuleBuilder) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("No module registered at '{0}'")]
    UnknownModule(String),
}

/// Collects the declarations of one module during a scan.
pub struct ModuleBuilder {
    module: String,
    units: Vec<(String, Unit)>,
    workflows: Vec<WorkflowDefinition>,
    rejected: Vec<String>,
}

impl ModuleBuilder {
    fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
            units: Vec::new(),
            workflows: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Returns the stable path a name receives inside this module.
    pub fn path(&self, name: &str) -> String {
        format!("{}.{}", self.module, name)
    }

    pub fn step(&mut self, name: &str, step: impl Step + 'static) -> &mut Self {
        self.units.push((name.to_string(), Unit::Step(Arc::new(step))));
        self
    }

    pub fn decision(&mut self, name: &str, decision: impl Decision + 'static) -> &mut Self {
        self.units
            .push((name.to_string(), Unit::Decision(Arc::new(decision))));
        self
    }

    /// Declares a workflow; its path becomes `module.name`.
    pub fn workflow(&mut self, workflow: WorkflowDefinition) -> &mut Self {
        self.workflows.push(workflow);
        self
    }

    /// Declares a workflow written in YAML. Parse failures are reported in
    /// the scan result instead of aborting the module.
    pub fn workflow_yaml(&mut self, yaml: &str) -> &mut Self {
        match parse_workflow(yaml) {
            Ok(workflow) => self.workflows.push(workflow),
            Err(e) => self
                .rejected
                .push(format!("{}: {}", self.module, e)),
        }
        self
    }
}

/// A definition found while scanning a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub path: String,
    pub name: String,
    pub kind: DefinitionKind,
}

/// Result of scanning one module.
#[derive(Debug, Clone, Default)]
pub struct ModuleScan {
    pub module: String,
    pub discovered: Vec<Discovered>,
    /// Declarations that failed to load, with the reason
    pub rejected: Vec<String>,
}

impl ModuleScan {
    /// Discovered definitions of the given kinds.
    pub fn of_kinds<'a>(
        &'a self,
        kinds: &'a [DefinitionKind],
    ) -> impl Iterator<Item = &'a Discovered> + 'a {
        self.discovered.iter().filter(move |d| kinds.contains(&d.kind))
    }
}

/// Process-wide lookup from stable path to code.
pub struct Registry {
    loaders: RwLock<HashMap<String, ModuleLoader>>,
    units: RwLock<HashMap<String, Unit>>,
    workflows: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Registry {
    /// Creates a registry holding only the built-in start unit.
    pub fn new() -> Self {
        let mut units: HashMap<String, Unit> = HashMap::new();
        units.insert(START.to_string(), Unit::Step(Arc::new(Start)));

        Self {
            loaders: RwLock::new(HashMap::new()),
            units: RwLock::new(units),
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) the loader for a module.
    ///
    /// Nothing becomes resolvable until the module is scanned.
    pub fn register_module<F>(&self, module: impl Into<String>, loader: F)
    where
        F: Fn(&mut ModuleBuilder) + Send + Sync + 'static,
    {
        let module = module.into();
        debug!("Registered module loader '{}'", module);
        write(&self.loaders).insert(module, Arc::new(loader));
    }

    pub fn has_module(&self, module: &str) -> bool {
        read(&self.loaders).contains_key(module)
    }

    /// Re-runs a module's loader and refreshes the units and workflows it
    /// declares.
    ///
    /// Workflows are validated against every unit known after the module's
    /// own units are in place; invalid ones are listed in
    /// [`ModuleScan::rejected`] and stay unresolvable.
    pub fn scan(&self, module: &str) -> Result<ModuleScan, RegistryError> {
        let loader = read(&self.loaders)
            .get(module)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownModule(module.to_string()))?;

        let mut builder = ModuleBuilder::new(module);
        (loader.as_ref())(&mut builder);

        let mut scan = ModuleScan {
            module: module.to_string(),
            discovered: Vec::new(),
            rejected: builder.rejected,
        };

        {
            let mut units = write(&self.units);
            for (name, unit) in builder.units {
                let path = format!("{}.{}", module, name);
                scan.discovered.push(Discovered {
                    path: path.clone(),
                    name,
                    kind: unit.kind().into(),
                });
                units.insert(path, unit);
            }
        }

        for workflow in builder.workflows {
            let path = format!("{}.{}", module, workflow.name);
            let workflow = workflow.with_path(path.clone());

            match validate_workflow(&workflow, |node| self.kind_of(node)) {
                Ok(()) => {
                    scan.discovered.push(Discovered {
                        path: path.clone(),
                        name: workflow.name.clone(),
                        kind: DefinitionKind::Workflow,
                    });
                    write(&self.workflows).insert(path, Arc::new(workflow));
                }
                Err(e) => {
                    warn!("Rejected workflow '{}': {}", path, e);
                    scan.rejected.push(e.to_string());
                }
            }
        }

        debug!(
            "Scanned module '{}': {} definitions, {} rejected",
            module,
            scan.discovered.len(),
            scan.rejected.len()
        );
        Ok(scan)
    }

    /// Scans several modules, logging and skipping unknown ones.
    pub fn scan_all(&self, modules: &[String]) -> Vec<ModuleScan> {
        let scans: Vec<ModuleScan> = modules
            .iter()
            .filter_map(|module| match self.scan(module) {
                Ok(scan) => Some(scan),
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            })
            .collect();

        info!(
            "Loaded {} module(s): {} units, {} workflows",
            scans.len(),
            read(&self.units).len(),
            read(&self.workflows).len()
        );
        scans
    }

    /// Registers a workflow outside of any module, validating it first.
    pub fn add_workflow(&self, workflow: WorkflowDefinition) -> Result<(), DefinitionError> {
        validate_workflow(&workflow, |node| self.kind_of(node))?;
        write(&self.workflows).insert(workflow.path.clone(), Arc::new(workflow));
        Ok(())
    }

    /// Resolves a unit path to executable code.
    pub fn unit(&self, path: &str) -> Option<Unit> {
        read(&self.units).get(path).cloned()
    }

    pub fn kind_of(&self, path: &str) -> Option<UnitKind> {
        read(&self.units).get(path).map(Unit::kind)
    }

    pub fn workflow(&self, path: &str) -> Option<Arc<WorkflowDefinition>> {
        read(&self.workflows).get(path).cloned()
    }

    /// Paths of all resolvable workflows, sorted.
    pub fn workflow_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = read(&self.workflows).keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
