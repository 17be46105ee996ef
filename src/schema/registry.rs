//! Schema Registry
//!
//! Latest JSON Schema, key properties and compiled validator per stream.
//! Schemas may be replaced mid-run by a later SCHEMA message for the same
//! stream; entries live for the whole run.

use crate::protocol::SchemaMessage;
use crate::schema::metadata::add_metadata_columns_to_schema;
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, Validator};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, error};

/// Fractional digits an `f64` divisor can hold before `multipleOf` checks
/// stop being exact
const MULTIPLE_OF_PRECISION_DIGITS_MAX: usize = 15;

/// Schema registry errors
#[derive(Debug)]
pub enum SchemaError {
    /// SCHEMA message without `key_properties`
    MissingKeyProperties { stream: String },
    /// Schema is not usable as a draft-4 JSON Schema
    InvalidSchema { stream: String, reason: String },
    /// No schema registered for the stream
    UnknownStream { stream: String },
    /// Record failed validation
    Validation { stream: String, errors: Vec<String> },
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaError::MissingKeyProperties { stream } => {
                write!(f, "key_properties field is required (stream '{}')", stream)
            }
            SchemaError::InvalidSchema { stream, reason } => {
                write!(f, "Invalid schema for stream '{}': {}", stream, reason)
            }
            SchemaError::UnknownStream { stream } => {
                write!(f, "No schema registered for stream '{}'", stream)
            }
            SchemaError::Validation { stream, errors } => {
                write!(
                    f,
                    "Record for stream '{}' failed validation: {}",
                    stream,
                    errors.join("; ")
                )
            }
        }
    }
}

impl std::error::Error for SchemaError {}

/// Registered schema of one stream
pub struct StreamSchema {
    pub stream: String,
    /// Schema as validated against, metadata columns included when enabled
    pub json_schema: Value,
    pub key_properties: Vec<String>,
    validator: Validator,
}

impl StreamSchema {
    /// Validate one record against this schema
    pub fn validate(&self, record: &Map<String, Value>) -> Result<(), SchemaError> {
        // Validator borrows the instance; records are objects already.
        let instance = Value::Object(record.clone());
        let mut errors = Vec::new();

        for err in self.validator.iter_errors(&instance) {
            if let ValidationErrorKind::MultipleOf { multiple_of } = &err.kind {
                if fractional_digits(*multiple_of) > MULTIPLE_OF_PRECISION_DIGITS_MAX {
                    error!(
                        "Validation of '{}' at '{}' failed on a multipleOf of {} which exceeds \
                         float precision. Remove the multipleOf constraint from the schema of \
                         stream '{}' to load this data.",
                        self.stream, err.instance_path, multiple_of, self.stream
                    );
                }
            }
            errors.push(format!("{} at '{}'", err, err.instance_path));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Validation {
                stream: self.stream.clone(),
                errors,
            })
        }
    }
}

impl std::fmt::Debug for StreamSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSchema")
            .field("stream", &self.stream)
            .field("key_properties", &self.key_properties)
            .finish_non_exhaustive()
    }
}

/// Stream name → latest schema
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, StreamSchema>,
    add_metadata_columns: bool,
}

impl SchemaRegistry {
    pub fn new(add_metadata_columns: bool) -> Self {
        SchemaRegistry {
            schemas: HashMap::new(),
            add_metadata_columns,
        }
    }

    /// Register or replace the schema of `message.stream`
    pub fn upsert_schema(&mut self, message: &SchemaMessage) -> Result<&StreamSchema, SchemaError> {
        let stream = message.stream.clone();
        let mut json_schema = message.schema.clone();

        if self.add_metadata_columns && !add_metadata_columns_to_schema(&mut json_schema) {
            return Err(SchemaError::InvalidSchema {
                stream,
                reason: "schema must be an object with object 'properties'".to_string(),
            });
        }

        let validator = jsonschema::options()
            .with_draft(Draft::Draft4)
            .should_validate_formats(true)
            .build(&json_schema)
            .map_err(|e| SchemaError::InvalidSchema {
                stream: stream.clone(),
                reason: e.to_string(),
            })?;

        let key_properties = message
            .key_properties
            .clone()
            .ok_or_else(|| SchemaError::MissingKeyProperties {
                stream: stream.clone(),
            })?;

        debug!("Setting schema for {}", stream);

        let schema = StreamSchema {
            stream: stream.clone(),
            json_schema,
            key_properties,
            validator,
        };
        self.schemas.insert(stream.clone(), schema);
        Ok(&self.schemas[&stream])
    }

    pub fn get(&self, stream: &str) -> Option<&StreamSchema> {
        self.schemas.get(stream)
    }

    pub fn contains(&self, stream: &str) -> bool {
        self.schemas.contains_key(stream)
    }

    /// Validate a record against the stream's current schema
    pub fn validate(&self, stream: &str, record: &Map<String, Value>) -> Result<(), SchemaError> {
        self.schemas
            .get(stream)
            .ok_or_else(|| SchemaError::UnknownStream {
                stream: stream.to_string(),
            })?
            .validate(record)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

fn fractional_digits(value: f64) -> usize {
    let rendered = format!("{}", value);
    rendered
        .split_once('.')
        .map(|(_, fraction)| fraction.len())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_message(schema: Value, key_properties: Option<Vec<&str>>) -> SchemaMessage {
        SchemaMessage {
            stream: "users".to_string(),
            schema,
            key_properties: key_properties.map(|k| k.into_iter().map(String::from).collect()),
        }
    }

    fn users_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "email": {"type": ["null", "string"]},
                "updated_at": {"type": ["null", "string"], "format": "date-time"}
            },
            "required": ["id"]
        })
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_upsert_and_validate() {
        let mut registry = SchemaRegistry::new(false);
        registry
            .upsert_schema(&schema_message(users_schema(), Some(vec!["id"])))
            .unwrap();

        assert!(registry.contains("users"));
        assert_eq!(registry.get("users").unwrap().key_properties, vec!["id"]);
        assert!(registry.validate("users", &object(json!({"id": 1, "email": null}))).is_ok());
    }

    #[test]
    fn test_validation_failure_is_reported() {
        let mut registry = SchemaRegistry::new(false);
        registry
            .upsert_schema(&schema_message(users_schema(), Some(vec!["id"])))
            .unwrap();

        let err = registry
            .validate("users", &object(json!({"id": "not-an-int"})))
            .unwrap_err();
        assert!(matches!(err, SchemaError::Validation { ref errors, .. } if errors.len() == 1));

        let err = registry.validate("users", &object(json!({}))).unwrap_err();
        assert!(matches!(err, SchemaError::Validation { .. }));
    }

    #[test]
    fn test_format_checking_enabled() {
        let mut registry = SchemaRegistry::new(false);
        registry
            .upsert_schema(&schema_message(users_schema(), Some(vec!["id"])))
            .unwrap();

        let ok = object(json!({"id": 1, "updated_at": "2021-08-11T06:39:38+00:00"}));
        assert!(registry.validate("users", &ok).is_ok());

        let bad = object(json!({"id": 1, "updated_at": "yesterday"}));
        assert!(registry.validate("users", &bad).is_err());
    }

    #[test]
    fn test_missing_key_properties_is_fatal() {
        let mut registry = SchemaRegistry::new(false);
        let err = registry
            .upsert_schema(&schema_message(users_schema(), None))
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingKeyProperties { .. }));
        assert!(!registry.contains("users"));
    }

    #[test]
    fn test_metadata_columns_are_merged() {
        let mut registry = SchemaRegistry::new(true);
        let schema = registry
            .upsert_schema(&schema_message(users_schema(), Some(vec!["id"])))
            .unwrap();
        assert!(schema.json_schema["properties"]["_sdc_sequence"].is_object());
    }

    #[test]
    fn test_schema_replacement() {
        let mut registry = SchemaRegistry::new(false);
        registry
            .upsert_schema(&schema_message(users_schema(), Some(vec!["id"])))
            .unwrap();
        assert!(registry.validate("users", &object(json!({"name": "x"}))).is_err());

        let relaxed = json!({"type": "object", "properties": {"name": {"type": "string"}}});
        registry
            .upsert_schema(&schema_message(relaxed, Some(vec![])))
            .unwrap();
        assert!(registry.validate("users", &object(json!({"name": "x"}))).is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_high_precision_multiple_of_still_fails() {
        let mut registry = SchemaRegistry::new(false);
        let schema = json!({
            "type": "object",
            "properties": {"amount": {"type": "number", "multipleOf": 1e-20}}
        });
        registry
            .upsert_schema(&schema_message(schema, Some(vec![])))
            .unwrap();

        // 1e-21 / 1e-20 leaves a fractional quotient
        let err = registry
            .validate("users", &object(json!({"amount": 1e-21})))
            .unwrap_err();
        assert!(matches!(err, SchemaError::Validation { .. }));
    }

    #[test]
    fn test_unknown_stream() {
        let registry = SchemaRegistry::new(false);
        let err = registry.validate("nope", &Map::new()).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownStream { .. }));
    }

    #[test]
    fn test_fractional_digits() {
        assert_eq!(fractional_digits(0.01), 2);
        assert_eq!(fractional_digits(5.0), 0);
        assert_eq!(fractional_digits(1e-20), 20);
    }
}
