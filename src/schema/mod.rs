//! Stream Schemas
//!
//! Per-stream JSON Schema registry and the `_sdc_*` metadata transform.

pub mod metadata;
pub mod registry;

pub use metadata::{
    add_metadata, add_metadata_columns_to_schema, strip_metadata, MetadataPolicy, METADATA_COLUMNS,
};
pub use registry::{SchemaError, SchemaRegistry, StreamSchema};
