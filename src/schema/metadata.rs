//! `_sdc_*` Metadata Columns
//!
//! Seven synthetic columns describing ingestion provenance. When enabled they
//! are declared on every schema and stamped on every record; when disabled
//! any copies already present on incoming records are stripped.

use crate::protocol::RecordMessage;
use crate::streaming::clock::isoformat;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{json, Map, Value};

pub const SDC_BATCHED_AT: &str = "_sdc_batched_at";
pub const SDC_DELETED_AT: &str = "_sdc_deleted_at";
pub const SDC_EXTRACTED_AT: &str = "_sdc_extracted_at";
pub const SDC_PRIMARY_KEY: &str = "_sdc_primary_key";
pub const SDC_RECEIVED_AT: &str = "_sdc_received_at";
pub const SDC_SEQUENCE: &str = "_sdc_sequence";
pub const SDC_TABLE_VERSION: &str = "_sdc_table_version";

/// All metadata column names
pub const METADATA_COLUMNS: [&str; 7] = [
    SDC_BATCHED_AT,
    SDC_DELETED_AT,
    SDC_EXTRACTED_AT,
    SDC_PRIMARY_KEY,
    SDC_RECEIVED_AT,
    SDC_SEQUENCE,
    SDC_TABLE_VERSION,
];

/// JSON Schema fragments declared for the metadata columns
pub fn metadata_properties() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        SDC_BATCHED_AT.to_string(),
        json!({"type": ["null", "string"], "format": "date-time"}),
    );
    properties.insert(SDC_DELETED_AT.to_string(), json!({"type": ["null", "string"]}));
    properties.insert(
        SDC_EXTRACTED_AT.to_string(),
        json!({"type": ["null", "string"], "format": "date-time"}),
    );
    properties.insert(SDC_PRIMARY_KEY.to_string(), json!({"type": ["null", "string"]}));
    properties.insert(
        SDC_RECEIVED_AT.to_string(),
        json!({"type": ["null", "string"], "format": "date-time"}),
    );
    properties.insert(SDC_SEQUENCE.to_string(), json!({"type": ["integer"]}));
    properties.insert(SDC_TABLE_VERSION.to_string(), json!({"type": ["null", "string"]}));
    properties
}

/// Merge the metadata column definitions into `schema.properties`.
///
/// Returns `false` when the schema is not an object or its `properties` is
/// not an object; a missing `properties` is created.
pub fn add_metadata_columns_to_schema(schema: &mut Value) -> bool {
    let Some(object) = schema.as_object_mut() else {
        return false;
    };
    let properties = object
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(properties) = properties.as_object_mut() else {
        return false;
    };
    properties.extend(metadata_properties());
    true
}

/// Stamp the metadata columns onto the record of `message`.
///
/// `now` is the run timestamp: batched-at and received-at carry it as a naive
/// UTC ISO 8601 string and the sequence is its epoch milliseconds.
pub fn add_metadata(message: &mut RecordMessage, key_properties: &[String], now: &DateTime<FixedOffset>) {
    let utc_now = isoformat(&now.with_timezone(&Utc), 'T', false);
    let deleted_at = message.record.get(SDC_DELETED_AT).cloned().unwrap_or(Value::Null);
    let extracted_at = message.time_extracted.clone().unwrap_or(Value::Null);
    let table_version = message.version.clone().unwrap_or(Value::Null);

    let record = &mut message.record;
    record.insert(SDC_BATCHED_AT.to_string(), Value::String(utc_now.clone()));
    record.insert(SDC_DELETED_AT.to_string(), deleted_at);
    record.insert(SDC_EXTRACTED_AT.to_string(), extracted_at);
    record.insert(SDC_PRIMARY_KEY.to_string(), json!(key_properties));
    record.insert(SDC_RECEIVED_AT.to_string(), Value::String(utc_now));
    record.insert(SDC_SEQUENCE.to_string(), json!(now.timestamp_millis()));
    record.insert(SDC_TABLE_VERSION.to_string(), table_version);
}

/// Remove every metadata column from the record of `message`
pub fn strip_metadata(message: &mut RecordMessage) {
    for column in METADATA_COLUMNS {
        message.record.remove(column);
    }
}

/// Which of the two transforms a run applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataPolicy {
    Add,
    Strip,
}

impl MetadataPolicy {
    pub fn from_flag(add_metadata_columns: bool) -> Self {
        if add_metadata_columns {
            MetadataPolicy::Add
        } else {
            MetadataPolicy::Strip
        }
    }

    pub fn apply(&self, message: &mut RecordMessage, key_properties: &[String], now: &DateTime<FixedOffset>) {
        match self {
            MetadataPolicy::Add => add_metadata(message, key_properties, now),
            MetadataPolicy::Strip => strip_metadata(message),
        }
    }
}
