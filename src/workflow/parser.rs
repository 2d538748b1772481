//! Workflow Parser
//!
//! Loads workflow definitions written in YAML. Parsing only checks the
//! document shape; graph validation happens when the definition is
//! registered, because it needs to know which units exist.

use std::fs;
use std::path::Path;

use log::{debug, info};
use thiserror::Error;

use super::model::WorkflowDefinition;

/// Errors raised while reading a workflow document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read workflow file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse workflow YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Workflow document has an empty name")]
    MissingName,
}

/// Parses a workflow definition from YAML text.
///
/// # Example
///
/// ```
/// use waypoint::workflow::parse_workflow;
///
/// let workflow = parse_workflow(r#"
/// name: Upload
/// graph:
///   waypoint.steps.__start__: [app.Validate]
/// "#).unwrap();
///
/// assert_eq!(workflow.name, "Upload");
/// ```
pub fn parse_workflow(yaml: &str) -> Result<WorkflowDefinition, ParseError> {
    let mut workflow: WorkflowDefinition = serde_yaml::from_str(yaml)?;

    workflow.name = workflow.name.trim().to_string();
    if workflow.name.is_empty() {
        return Err(ParseError::MissingName);
    }
    if workflow.path.is_empty() {
        workflow.path = workflow.name.clone();
    }

    debug!(
        "Parsed workflow '{}' with {} edge lists",
        workflow.name,
        workflow.graph.len()
    );
    Ok(workflow)
}

/// Loads a workflow definition from a YAML file.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<WorkflowDefinition, ParseError> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;

    parse_workflow(&content)
}

/// Writes a workflow definition to a YAML file.
pub fn save_workflow(
    workflow: &WorkflowDefinition,
    path: impl AsRef<Path>,
) -> Result<(), ParseError> {
    let path = path.as_ref();
    let yaml = serde_yaml::to_string(workflow)?;
    fs::write(path, yaml).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    info!("Workflow saved to: {}", path.display());
    Ok(())
}
