//! Workflow Validation
//!
//! Structural checks run when a workflow definition is loaded into the
//! registry, never while a job is being advanced:
//! - The start marker exists and has exactly one successor
//! - Every unit in the graph resolves to a registered step or decision
//! - Decisions have at least two successors, steps at most one
//! - Every unit is reachable from the start marker
//!
//! Cycles are allowed; a decision may route back to an earlier step.

use std::collections::{BTreeSet, VecDeque};

use log::{debug, info};
use thiserror::Error;

use super::model::{WorkflowDefinition, START};
use crate::units::UnitKind;

/// Reasons a workflow definition is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("Workflow '{0}' has no edges")]
    EmptyWorkflow(String),

    #[error("Workflow '{0}' does not declare the start marker")]
    MissingStart(String),

    #[error("Workflow '{workflow}': start marker must have exactly one successor, found {found}")]
    StartArity { workflow: String, found: usize },

    #[error("Workflow '{workflow}' references unknown unit '{node}'")]
    UnknownNode { workflow: String, node: String },

    #[error("Workflow '{workflow}': decision '{node}' needs at least two successors, found {found}")]
    DecisionArity {
        workflow: String,
        node: String,
        found: usize,
    },

    #[error("Workflow '{workflow}': step '{node}' may have at most one successor, found {found}")]
    StepArity {
        workflow: String,
        node: String,
        found: usize,
    },

    #[error("Workflow '{workflow}': unit '{node}' is not reachable from the start marker")]
    Unreachable { workflow: String, node: String },
}

/// Collects every problem with a workflow definition.
///
/// `kind_of` resolves a unit path to its registered kind; `None` means
/// nothing is registered under that path.
pub fn check_workflow<F>(workflow: &WorkflowDefinition, kind_of: F) -> Vec<DefinitionError>
where
    F: Fn(&str) -> Option<UnitKind>,
{
    let name = workflow.path.clone();
    let mut errors = Vec::new();

    if workflow.is_empty() {
        errors.push(DefinitionError::EmptyWorkflow(name));
        return errors;
    }

    match workflow.graph.get(START) {
        None => {
            errors.push(DefinitionError::MissingStart(name));
            return errors;
        }
        Some(next) if next.len() != 1 => errors.push(DefinitionError::StartArity {
            workflow: name.clone(),
            found: next.len(),
        }),
        Some(_) => {}
    }

    for node in workflow.nodes() {
        if node == START {
            continue;
        }

        let found = workflow.successors(node).map(<[String]>::len).unwrap_or(0);

        match kind_of(node) {
            None => errors.push(DefinitionError::UnknownNode {
                workflow: name.clone(),
                node: node.to_string(),
            }),
            Some(UnitKind::Decision) if found < 2 => {
                errors.push(DefinitionError::DecisionArity {
                    workflow: name.clone(),
                    node: node.to_string(),
                    found,
                })
            }
            Some(UnitKind::Step) if found > 1 => errors.push(DefinitionError::StepArity {
                workflow: name.clone(),
                node: node.to_string(),
                found,
            }),
            Some(_) => {}
        }
    }

    let reachable = reachable_from_start(workflow);
    for node in workflow.nodes() {
        if !reachable.contains(node) {
            errors.push(DefinitionError::Unreachable {
                workflow: name.clone(),
                node: node.to_string(),
            });
        }
    }

    errors
}

/// Validates a workflow definition, returning the first problem found.
pub fn validate_workflow<F>(
    workflow: &WorkflowDefinition,
    kind_of: F,
) -> Result<(), DefinitionError>
where
    F: Fn(&str) -> Option<UnitKind>,
{
    info!("Validating workflow '{}'", workflow.path);

    if let Some(first) = check_workflow(workflow, kind_of).into_iter().next() {
        return Err(first);
    }

    debug!(
        "Workflow '{}' validated: {} units",
        workflow.path,
        workflow.len()
    );
    Ok(())
}

/// Breadth-first walk from the start marker.
fn reachable_from_start(workflow: &WorkflowDefinition) -> BTreeSet<&str> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    seen.insert(START);
    queue.push_back(START);

    while let Some(current) = queue.pop_front() {
        let Some(next) = workflow.graph.get(current) else {
            continue;
        };
        for successor in next {
            if seen.insert(successor.as_str()) {
                queue.push_back(successor.as_str());
            }
        }
    }

    seen
}
