//! Singer Protocol Messages
//!
//! Each input line is one JSON object whose `type` field selects the
//! message kind. Parsing is strict for the fields the target depends on
//! (`stream`, `record`, `value`) and lenient for everything else.

use serde_json::{Map, Value};
use std::io::Write;
use tracing::{debug, error};

/// Protocol parse errors
#[derive(Debug)]
pub enum ProtocolError {
    /// Line is not valid JSON
    MalformedJson { line: String, source: serde_json::Error },
    /// Line is JSON but not an object
    NotAnObject { line: String },
    /// A field the message kind requires is absent
    MissingField { field: &'static str, line: String },
    /// A field is present with the wrong JSON type
    InvalidField { field: &'static str, expected: &'static str, line: String },
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::MalformedJson { line, source } => {
                write!(f, "Unable to parse line ({}): {}", source, line)
            }
            ProtocolError::NotAnObject { line } => {
                write!(f, "Message is not a JSON object: {}", line)
            }
            ProtocolError::MissingField { field, line } => {
                write!(f, "Line is missing required key '{}': {}", field, line)
            }
            ProtocolError::InvalidField { field, expected, line } => {
                write!(f, "Key '{}' must be {}: {}", field, expected, line)
            }
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::MalformedJson { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// SCHEMA message
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaMessage {
    pub stream: String,
    /// JSON Schema of the stream's records
    pub schema: Value,
    /// `None` when the message omits the key; the registry rejects that
    pub key_properties: Option<Vec<String>>,
}

/// RECORD message
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMessage {
    pub stream: String,
    pub record: Map<String, Value>,
    pub version: Option<Value>,
    /// Passed through verbatim into `_sdc_extracted_at`
    pub time_extracted: Option<Value>,
}

/// ACTIVATE_VERSION message
#[derive(Debug, Clone, PartialEq)]
pub struct ActivateVersionMessage {
    pub stream: Option<String>,
    pub version: Option<Value>,
}

/// One decoded protocol line
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Schema(SchemaMessage),
    Record(RecordMessage),
    State { value: Value },
    ActivateVersion(ActivateVersionMessage),
    /// Unrecognised `type`; logged and ignored
    Unknown { message_type: String, raw: Value },
}

impl Message {
    /// Protocol name of the message kind
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Schema(_) => "SCHEMA",
            Message::Record(_) => "RECORD",
            Message::State { .. } => "STATE",
            Message::ActivateVersion(_) => "ACTIVATE_VERSION",
            Message::Unknown { .. } => "UNKNOWN",
        }
    }
}

/// Decode one input line.
///
/// Malformed JSON is logged with the offending line before the error is
/// returned; the caller treats it as fatal.
pub fn parse_line(line: &str) -> Result<Message, ProtocolError> {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(source) => {
            error!("Unable to parse:\n{}", line);
            return Err(ProtocolError::MalformedJson {
                line: line.to_string(),
                source,
            });
        }
    };

    let Value::Object(mut object) = value else {
        return Err(ProtocolError::NotAnObject {
            line: line.to_string(),
        });
    };

    let message_type = match object.get("type") {
        Some(Value::String(message_type)) => message_type.clone(),
        Some(_) => {
            return Err(ProtocolError::InvalidField {
                field: "type",
                expected: "a string",
                line: line.to_string(),
            })
        }
        None => {
            return Err(ProtocolError::MissingField {
                field: "type",
                line: line.to_string(),
            })
        }
    };

    let message = match message_type.as_str() {
        "SCHEMA" => {
            let stream = required_stream(&object, line)?;
            let schema = object.remove("schema").ok_or_else(|| ProtocolError::MissingField {
                field: "schema",
                line: line.to_string(),
            })?;
            let key_properties = match object.remove("key_properties") {
                None | Some(Value::Null) => None,
                Some(value) => Some(string_list(value, "key_properties", line)?),
            };
            Message::Schema(SchemaMessage {
                stream,
                schema,
                key_properties,
            })
        }
        "RECORD" => {
            let stream = required_stream(&object, line)?;
            let record = match object.remove("record") {
                Some(Value::Object(record)) => record,
                Some(_) => {
                    return Err(ProtocolError::InvalidField {
                        field: "record",
                        expected: "an object",
                        line: line.to_string(),
                    })
                }
                None => {
                    return Err(ProtocolError::MissingField {
                        field: "record",
                        line: line.to_string(),
                    })
                }
            };
            Message::Record(RecordMessage {
                stream,
                record,
                version: object.remove("version"),
                time_extracted: object.remove("time_extracted"),
            })
        }
        "STATE" => {
            let value = object.remove("value").ok_or_else(|| ProtocolError::MissingField {
                field: "value",
                line: line.to_string(),
            })?;
            Message::State { value }
        }
        "ACTIVATE_VERSION" => Message::ActivateVersion(ActivateVersionMessage {
            stream: object.get("stream").and_then(Value::as_str).map(str::to_string),
            version: object.remove("version"),
        }),
        _ => Message::Unknown {
            message_type,
            raw: Value::Object(object),
        },
    };

    Ok(message)
}

fn required_stream(object: &Map<String, Value>, line: &str) -> Result<String, ProtocolError> {
    match object.get("stream") {
        Some(Value::String(stream)) if !stream.is_empty() => Ok(stream.clone()),
        Some(Value::String(_)) => Err(ProtocolError::InvalidField {
            field: "stream",
            expected: "a non-empty string",
            line: line.to_string(),
        }),
        Some(_) => Err(ProtocolError::InvalidField {
            field: "stream",
            expected: "a string",
            line: line.to_string(),
        }),
        None => Err(ProtocolError::MissingField {
            field: "stream",
            line: line.to_string(),
        }),
    }
}

fn string_list(value: Value, field: &'static str, line: &str) -> Result<Vec<String>, ProtocolError> {
    let invalid = || ProtocolError::InvalidField {
        field,
        expected: "an array of strings",
        line: line.to_string(),
    };
    let Value::Array(items) = value else {
        return Err(invalid());
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            _ => Err(invalid()),
        })
        .collect()
}

/// Write the final state as a single JSON line. Nothing is written for `None`.
pub fn emit_state<W: Write>(output: &mut W, state: Option<&Value>) -> std::io::Result<()> {
    if let Some(state) = state {
        let line = serde_json::to_string(state)?;
        debug!("Emitting state {}", line);
        output.write_all(line.as_bytes())?;
        output.write_all(b"\n")?;
        output.flush()?;
    }
    Ok(())
}
