//! External Input Schemas
//!
//! A step declares the shape of the external input it waits for. Input is
//! checked against the shape before it is stored on the job, so a rejected
//! payload never mutates persisted state. Fields not named in the schema
//! are accepted and passed through.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON type a field must have.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Integer => "an integer",
            Self::Number => "a number",
            Self::Boolean => "a boolean",
            Self::Array => "an array",
            Self::Object => "an object",
            Self::Any => "any value",
        }
    }
}

/// A single named field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

/// Declared shape of a step's external input.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSchema {
    fields: Vec<FieldSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field that must be present.
    pub fn required(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            field_type,
            required: true,
        });
        self
    }

    /// Adds a field that may be absent or null.
    pub fn optional(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            field_type,
            required: false,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }

    /// Checks a payload against the schema.
    ///
    /// Returns a human-readable reason on mismatch.
    pub fn validate(&self, data: &Value) -> Result<(), String> {
        let Some(object) = data.as_object() else {
            return Err("external input must be a mapping".to_string());
        };

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required field '{}'", field.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.field_type.matches(value) => {
                    return Err(format!(
                        "field '{}' must be {}",
                        field.name,
                        field.field_type.name()
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file_schema() -> InputSchema {
        InputSchema::new()
            .required("file", FieldType::String)
            .optional("retries", FieldType::Integer)
    }

    #[test]
    fn test_valid_input() {
        let schema = file_schema();
        assert!(schema.validate(&json!({"file": "/tmp/a"})).is_ok());
        assert!(schema.validate(&json!({"file": "/tmp/a", "retries": 3})).is_ok());
        assert!(schema.validate(&json!({"file": "/tmp/a", "extra": true})).is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let err = file_schema().validate(&json!({"retries": 1})).unwrap_err();
        assert_eq!(err, "missing required field 'file'");
    }

    #[test]
    fn test_null_required_field() {
        assert!(file_schema().validate(&json!({"file": null})).is_err());
    }

    #[test]
    fn test_wrong_field_type() {
        let err = file_schema()
            .validate(&json!({"file": "/tmp/a", "retries": "three"}))
            .unwrap_err();
        assert_eq!(err, "field 'retries' must be an integer");
    }

    #[test]
    fn test_non_mapping_rejected() {
        assert!(file_schema().validate(&json!(["/tmp/a"])).is_err());
    }

    #[test]
    fn test_field_type_matching() {
        assert!(FieldType::Number.matches(&json!(1.5)));
        assert!(FieldType::Integer.matches(&json!(7)));
        assert!(!FieldType::Integer.matches(&json!(1.5)));
        assert!(FieldType::Any.matches(&Value::Null));
    }

    #[test]
    fn test_required_fields() {
        let schema = file_schema();
        let names: Vec<&str> = schema.required_fields().collect();
        assert_eq!(names, vec!["file"]);
    }
}
