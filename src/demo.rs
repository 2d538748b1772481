//! Sample file-handling workflow shipped with the CLI.
//!
//! ```text
//! start -> ValidateFileStep -> FileTypeDecision -+-> JsonFileHandleStep  -+-> FileHandlingCheckStep
//!                                                +-> OtherFileHandleStep -+
//! ```
//!
//! `ValidateFileStep` pauses the job until a `file` path is provided.

use std::fs;
use std::path::Path;

use serde_json::{json, Value};

use waypoint::units::{
    Decision, FieldType, InputSchema, ModuleBuilder, Registry, Step, StepContext, StepError,
};

pub const MODULE: &str = "demo";

/// Path of the sample workflow.
pub const WORKFLOW: &str = "demo.FileHandling";

const FILE_HANDLING_YAML: &str = r#"
name: FileHandling
graph:
  waypoint.steps.__start__: [demo.ValidateFileStep]
  demo.ValidateFileStep: [demo.FileTypeDecision]
  demo.FileTypeDecision: [demo.JsonFileHandleStep, demo.OtherFileHandleStep]
  demo.JsonFileHandleStep: [demo.FileHandlingCheckStep]
  demo.OtherFileHandleStep: [demo.FileHandlingCheckStep]
"#;

/// Registers the demo module with a registry.
pub fn register(registry: &Registry) {
    registry.register_module(MODULE, load);
}

fn load(m: &mut ModuleBuilder) {
    m.step("ValidateFileStep", ValidateFileStep)
        .decision("FileTypeDecision", FileTypeDecision)
        .step("JsonFileHandleStep", JsonFileHandleStep)
        .step("OtherFileHandleStep", OtherFileHandleStep)
        .step("FileHandlingCheckStep", FileHandlingCheckStep)
        .workflow_yaml(FILE_HANDLING_YAML);
}

fn file_of(value: &Value) -> Result<&str, StepError> {
    value
        .as_str()
        .ok_or_else(|| StepError::new(format!("expected a file path, got {}", value)))
}

/// Checks that the provided path is a readable file.
struct ValidateFileStep;

impl Step for ValidateFileStep {
    fn input_schema(&self) -> Option<InputSchema> {
        Some(InputSchema::new().required("file", FieldType::String))
    }

    fn run(
        &self,
        ctx: &mut StepContext<'_>,
        _input: &Value,
        external_input: Option<&Value>,
    ) -> Result<Value, StepError> {
        let file = external_input
            .and_then(|data| data["file"].as_str())
            .ok_or("no file provided")?;
        ctx.print(format!("Received file for validation: {}", file));

        if !Path::new(file).is_file() {
            ctx.print(format!("{}: is not a file.", file));
            return Err(StepError::new(format!("{} is not a file.", file)));
        }
        fs::File::open(file)?;

        Ok(json!(file))
    }
}

/// Routes `.json` files to branch 0 and everything else to branch 1.
struct FileTypeDecision;

impl Decision for FileTypeDecision {
    fn decide(&self, ctx: &mut StepContext<'_>, input: &Value) -> Result<usize, StepError> {
        ctx.print(format!("FileTypeDecision received input: {}", input));
        let file = file_of(input)?;

        let is_json = Path::new(file)
            .extension()
            .map(|ext| ext == "json")
            .unwrap_or(false);
        Ok(if is_json { 0 } else { 1 })
    }
}

struct JsonFileHandleStep;

impl Step for JsonFileHandleStep {
    fn run(
        &self,
        ctx: &mut StepContext<'_>,
        input: &Value,
        _external_input: Option<&Value>,
    ) -> Result<Value, StepError> {
        let file = file_of(input)?;
        let document: Value = serde_json::from_str(&fs::read_to_string(file)?)?;

        let keys = document.as_object().map(|o| o.len()).unwrap_or(0);
        ctx.print(format!("{}: valid JSON with {} top-level key(s)", file, keys));
        Ok(json!({ "file": file, "kind": "json", "keys": keys }))
    }
}

struct OtherFileHandleStep;

impl Step for OtherFileHandleStep {
    fn run(
        &self,
        ctx: &mut StepContext<'_>,
        input: &Value,
        _external_input: Option<&Value>,
    ) -> Result<Value, StepError> {
        let file = file_of(input)?;
        let bytes = fs::metadata(file)?.len();

        ctx.print(format!("{}: {} byte(s)", file, bytes));
        Ok(json!({ "file": file, "kind": "other", "bytes": bytes }))
    }
}

/// Confirms the handler processed the file the job validated.
struct FileHandlingCheckStep;

impl Step for FileHandlingCheckStep {
    fn run(
        &self,
        ctx: &mut StepContext<'_>,
        input: &Value,
        _external_input: Option<&Value>,
    ) -> Result<Value, StepError> {
        let validated = ctx
            .log()
            .result_of("demo.ValidateFileStep")
            .cloned()
            .unwrap_or(Value::Null);

        if input["file"] != validated {
            return Err(StepError::new(format!(
                "handled {} but validated {}",
                input["file"], validated
            )));
        }

        ctx.print(format!("Handled {} as {}", validated, input["kind"]));
        Ok(json!(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;
    use waypoint::dispatch::{Dispatcher, LocalQueue};
    use waypoint::execution::{Engine, Outcome};
    use waypoint::output::MemorySink;
    use waypoint::store::MemoryStore;
    use waypoint::workflow::JobState;

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(Registry::new());
        register(&registry);
        let scan = registry.scan(MODULE).unwrap();
        assert!(scan.rejected.is_empty());

        let engine = Arc::new(Engine::new(
            registry,
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySink::new()),
        ));
        Dispatcher::new(engine, Arc::new(LocalQueue::new()))
    }

    #[test]
    fn test_json_file_takes_first_branch() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("data.json");
        fs::write(&file, r#"{"a": 1, "b": 2}"#).unwrap();

        let dispatcher = dispatcher();
        let id = dispatcher.execute_synchronously(WORKFLOW).unwrap();
        assert_eq!(dispatcher.pointer(id).unwrap(), "demo.ValidateFileStep");

        let outcome = dispatcher
            .provide_external_input_sync(id, json!({"file": file.to_str().unwrap()}))
            .unwrap();
        assert_eq!(outcome, Outcome::Finished);

        let log = dispatcher.log(id).unwrap();
        let units: Vec<&str> = log.units().collect();
        assert!(units.contains(&"demo.JsonFileHandleStep"));
        assert!(!units.contains(&"demo.OtherFileHandleStep"));
        assert_eq!(log.result_of("demo.JsonFileHandleStep").unwrap()["keys"], 2);
    }

    #[test]
    fn test_other_file_takes_second_branch() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("notes.txt");
        fs::write(&file, "hello").unwrap();

        let dispatcher = dispatcher();
        let id = dispatcher.execute_synchronously(WORKFLOW).unwrap();
        dispatcher
            .provide_external_input_sync(id, json!({"file": file.to_str().unwrap()}))
            .unwrap();

        let log = dispatcher.log(id).unwrap();
        assert!(log.units().any(|u| u == "demo.OtherFileHandleStep"));
        assert_eq!(dispatcher.state(id).unwrap(), JobState::Finished);
        assert!(dispatcher.log_text(id).unwrap().contains("5 byte(s)"));
    }

    #[test]
    fn test_missing_file_fails_job() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("absent.json");

        let dispatcher = dispatcher();
        let id = dispatcher.execute_synchronously(WORKFLOW).unwrap();
        let outcome = dispatcher
            .provide_external_input_sync(id, json!({"file": file.to_str().unwrap()}))
            .unwrap();

        assert_eq!(outcome, Outcome::Failed);
        let text = dispatcher.log_text(id).unwrap();
        assert!(text.contains("is not a file"));
        assert!(text.contains("demo.ValidateFileStep"));
    }
}
