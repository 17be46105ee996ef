//! Top-level error type of a run.
//!
//! Every fatal condition surfaces here; the binary logs it and exits non-zero.

use crate::config::ConfigError;
use crate::protocol::ProtocolError;
use crate::schema::SchemaError;
use crate::streaming::BufferError;
use crate::upload::{ObjectStoreError, UploadError};

#[derive(Debug)]
pub enum TargetError {
    Config(ConfigError),
    /// Malformed input line or missing message field
    Protocol(ProtocolError),
    /// Ordering, validation or local write failure while buffering
    Buffer(BufferError),
    Upload(UploadError),
    /// Storage client could not be constructed
    Store(ObjectStoreError),
    /// Input, output or working directory I/O
    Io { context: String, source: std::io::Error },
    /// Ingestion task panicked or was cancelled
    Task(String),
}

impl TargetError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TargetError::Io {
            context: context.into(),
            source,
        }
    }
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetError::Config(e) => write!(f, "{}", e),
            TargetError::Protocol(e) => write!(f, "{}", e),
            TargetError::Buffer(e) => write!(f, "{}", e),
            TargetError::Upload(e) => write!(f, "{}", e),
            TargetError::Store(e) => write!(f, "Cannot create storage client: {}", e),
            TargetError::Io { context, source } => write!(f, "{}: {}", context, source),
            TargetError::Task(msg) => write!(f, "Ingestion task failed: {}", msg),
        }
    }
}

impl std::error::Error for TargetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TargetError::Config(e) => Some(e),
            TargetError::Protocol(e) => Some(e),
            TargetError::Buffer(e) => Some(e),
            TargetError::Upload(e) => Some(e),
            TargetError::Store(e) => Some(e),
            TargetError::Io { source, .. } => Some(source),
            TargetError::Task(_) => None,
        }
    }
}

impl From<ConfigError> for TargetError {
    fn from(e: ConfigError) -> Self {
        TargetError::Config(e)
    }
}

impl From<ProtocolError> for TargetError {
    fn from(e: ProtocolError) -> Self {
        TargetError::Protocol(e)
    }
}

impl From<BufferError> for TargetError {
    fn from(e: BufferError) -> Self {
        TargetError::Buffer(e)
    }
}

impl From<SchemaError> for TargetError {
    fn from(e: SchemaError) -> Self {
        TargetError::Buffer(BufferError::Schema(e))
    }
}

impl From<UploadError> for TargetError {
    fn from(e: UploadError) -> Self {
        TargetError::Upload(e)
    }
}

impl From<ObjectStoreError> for TargetError {
    fn from(e: ObjectStoreError) -> Self {
        TargetError::Store(e)
    }
}
