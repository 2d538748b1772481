//! Workflow Data Model
//!
//! A workflow is an adjacency map from a unit path to the ordered list of
//! unit paths that may follow it. Execution always begins at [`START`].
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: FileUpload
//! graph:
//!   waypoint.steps.__start__: [demo.ValidateFileStep]
//!   demo.ValidateFileStep: [demo.FileTypeDecision]
//!   demo.FileTypeDecision: [demo.JsonFileHandleStep, demo.OtherFileHandleStep]
//!   demo.JsonFileHandleStep: [demo.FileHandlingCheckStep]
//!   demo.OtherFileHandleStep: [demo.FileHandlingCheckStep]
//! ```
//!
//! Nodes that never appear as a key are terminal: they have no successors.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::validator::DefinitionError;

/// Stable path of the built-in unit every workflow starts from.
pub const START: &str = "waypoint.steps.__start__";

/// An immutable workflow graph identified by a stable path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkflowDefinition {
    /// Stable identifier (`module.Name`), assigned on registration
    #[serde(default)]
    pub path: String,

    /// Short name as declared by the user
    pub name: String,

    /// Unit path -> ordered successor paths
    pub graph: BTreeMap<String, Vec<String>>,
}

impl WorkflowDefinition {
    /// Creates an empty workflow. The path defaults to the name until the
    /// registry places it inside a module.
    ///
    /// # Example
    ///
    /// ```
    /// use waypoint::workflow::{WorkflowDefinition, START};
    ///
    /// let workflow = WorkflowDefinition::new("Upload")
    ///     .edge(START, ["app.Validate"])
    ///     .edge("app.Validate", ["app.Store"]);
    ///
    /// assert_eq!(workflow.first_unit(), Some("app.Validate"));
    /// ```
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into().trim().to_string();
        Self {
            path: name.clone(),
            name,
            graph: BTreeMap::new(),
        }
    }

    /// Sets the stable path for this workflow.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Declares the ordered successors of `from`, replacing any previous list.
    pub fn edge<I, S>(mut self, from: impl Into<String>, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.graph
            .insert(from.into(), to.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the ordered successors of a unit.
    ///
    /// Units that only appear as a successor are terminal and yield an empty
    /// slice. Units absent from the graph altogether are an error.
    pub fn successors(&self, node: &str) -> Result<&[String], DefinitionError> {
        if let Some(next) = self.graph.get(node) {
            return Ok(next);
        }
        if self.graph.values().any(|next| next.iter().any(|n| n == node)) {
            return Ok(&[]);
        }
        Err(DefinitionError::UnknownNode {
            workflow: self.path.clone(),
            node: node.to_string(),
        })
    }

    /// Returns true if the unit appears anywhere in the graph.
    pub fn contains(&self, node: &str) -> bool {
        self.successors(node).is_ok()
    }

    /// Returns every unit path mentioned by the graph.
    pub fn nodes(&self) -> BTreeSet<&str> {
        let mut nodes: BTreeSet<&str> = self.graph.keys().map(String::as_str).collect();
        for next in self.graph.values() {
            nodes.extend(next.iter().map(String::as_str));
        }
        nodes
    }

    /// Returns the first user unit, i.e. the single successor of [`START`].
    pub fn first_unit(&self) -> Option<&str> {
        self.graph
            .get(START)
            .and_then(|next| next.first())
            .map(String::as_str)
    }

    /// Returns the number of distinct units in the graph.
    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    /// Returns true if the graph declares no edges.
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}
