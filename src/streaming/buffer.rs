//! Per-Stream Record Buffers
//!
//! Serialized record lines are held in memory per stream and appended to the
//! stream's local file whenever the pending size crosses `memory_buffer`, and
//! once more at end of input.
//!
//! ## Architecture
//!
//! ```text
//! SCHEMA ─→ SchemaRegistry ─→ StreamBuffer (created once per stream)
//!                                   │
//! RECORD ─→ validate ─→ metadata ─→ pending lines
//!                                   │  pending_bytes > memory_buffer
//!                                   ▼
//!                         Compression::append_to(local_path)
//! ```
//!
//! A stream's local path and remote key are fixed when its buffer is
//! created, so every flush of a run lands in the same file.

use crate::protocol::{RecordMessage, SchemaMessage};
use crate::schema::{MetadataPolicy, SchemaError, SchemaRegistry};
use crate::streaming::codec::Compression;
use crate::streaming::naming::{NamingResolver, StreamPaths};
use crate::upload::UploadTask;
use chrono::{DateTime, FixedOffset};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Default flush threshold in bytes
pub const DEFAULT_MEMORY_BUFFER: usize = 64_000_000;

/// Buffer manager errors
#[derive(Debug)]
pub enum BufferError {
    /// RECORD for a stream that has had no SCHEMA yet
    RecordBeforeSchema { stream: String },
    /// Schema registration or record validation failed
    Schema(SchemaError),
    /// Record could not be serialized
    Serialize { stream: String, source: serde_json::Error },
    /// Local file write failed
    Io { path: PathBuf, source: std::io::Error },
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::RecordBeforeSchema { stream } => write!(
                f,
                "A record for stream {} was encountered before a corresponding schema",
                stream
            ),
            BufferError::Schema(e) => write!(f, "{}", e),
            BufferError::Serialize { stream, source } => {
                write!(f, "Failed to serialize record for stream {}: {}", stream, source)
            }
            BufferError::Io { path, source } => {
                write!(f, "Failed to write {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for BufferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BufferError::Schema(e) => Some(e),
            BufferError::Serialize { source, .. } => Some(source),
            BufferError::Io { source, .. } => Some(source),
            BufferError::RecordBeforeSchema { .. } => None,
        }
    }
}

impl From<SchemaError> for BufferError {
    fn from(e: SchemaError) -> Self {
        BufferError::Schema(e)
    }
}

/// Pending lines and file location of one stream
#[derive(Debug)]
pub struct StreamBuffer {
    stream: String,
    paths: StreamPaths,
    pending: Vec<String>,
    pending_bytes: usize,
    records_flushed: u64,
    flush_count: u32,
}

impl StreamBuffer {
    fn new(stream: String, paths: StreamPaths) -> Self {
        StreamBuffer {
            stream,
            paths,
            pending: Vec::new(),
            pending_bytes: 0,
            records_flushed: 0,
            flush_count: 0,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn local_path(&self) -> &Path {
        &self.paths.local_path
    }

    pub fn remote_key(&self) -> &str {
        &self.paths.remote_key
    }

    /// Lines waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Serialized size of the pending lines, newlines included
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn records_flushed(&self) -> u64 {
        self.records_flushed
    }

    /// Whether any flush has written to the local file this run
    pub fn has_file(&self) -> bool {
        self.flush_count > 0
    }

    fn push(&mut self, line: String) {
        self.pending_bytes += line.len();
        self.pending.push(line);
    }

    /// Append the pending lines to the local file as one encoded chunk.
    ///
    /// An empty buffer is a no-op and creates no file. Returns the number of
    /// records written.
    pub fn flush(&mut self, compression: Compression) -> Result<usize, BufferError> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let path = self.paths.local_path.clone();
        let io_error = |source| BufferError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let mut chunk = Vec::with_capacity(self.pending_bytes);
        for line in &self.pending {
            chunk.extend_from_slice(line.as_bytes());
        }
        let written = compression.append_to(&path, &chunk).map_err(io_error)?;

        let records = self.pending.len();
        debug!(
            "Flushed {} records of stream {} to {} ({} bytes on disk)",
            records,
            self.stream,
            path.display(),
            written
        );

        self.pending.clear();
        self.pending_bytes = 0;
        self.records_flushed += records as u64;
        self.flush_count += 1;

        debug_assert!(self.pending.is_empty(), "Postcondition: pending lines cleared after flush");
        Ok(records)
    }
}

/// Owns every stream buffer of a run together with the schema registry
#[derive(Debug)]
pub struct BufferManager {
    buffers: BTreeMap<String, StreamBuffer>,
    registry: SchemaRegistry,
    naming: NamingResolver,
    compression: Compression,
    memory_buffer: usize,
    metadata: MetadataPolicy,
    run_at: DateTime<FixedOffset>,
}

impl BufferManager {
    pub fn new(
        naming: NamingResolver,
        compression: Compression,
        memory_buffer: usize,
        add_metadata_columns: bool,
        run_at: DateTime<FixedOffset>,
    ) -> Self {
        BufferManager {
            buffers: BTreeMap::new(),
            registry: SchemaRegistry::new(add_metadata_columns),
            naming,
            compression,
            memory_buffer,
            metadata: MetadataPolicy::from_flag(add_metadata_columns),
            run_at,
        }
    }

    /// Register the schema and create the stream's buffer on first sight
    pub fn on_schema(&mut self, message: &SchemaMessage) -> Result<(), BufferError> {
        self.registry.upsert_schema(message)?;

        if !self.buffers.contains_key(&message.stream) {
            let paths = self.naming.resolve(&message.stream, &self.run_at, &Uuid::new_v4());
            info!(
                "Stream {} will be written to {} (remote key {})",
                message.stream,
                paths.local_path.display(),
                paths.remote_key
            );
            self.buffers
                .insert(message.stream.clone(), StreamBuffer::new(message.stream.clone(), paths));
        }
        Ok(())
    }

    /// Validate, transform and buffer one record
    pub fn on_record(&mut self, mut message: RecordMessage) -> Result<(), BufferError> {
        let record_before_schema = || BufferError::RecordBeforeSchema {
            stream: message.stream.clone(),
        };
        let schema = self.registry.get(&message.stream).ok_or_else(record_before_schema)?;
        schema.validate(&message.record)?;
        let key_properties = schema.key_properties.clone();

        self.metadata.apply(&mut message, &key_properties, &self.run_at);

        let mut line = serde_json::to_string(&message.record).map_err(|source| BufferError::Serialize {
            stream: message.stream.clone(),
            source,
        })?;
        line.push('\n');

        let buffer = self
            .buffers
            .get_mut(&message.stream)
            .ok_or_else(|| BufferError::RecordBeforeSchema {
                stream: message.stream.clone(),
            })?;
        buffer.push(line);

        if buffer.pending_bytes() > self.memory_buffer {
            debug!(
                "Stream {} buffer reached {} bytes, flushing",
                buffer.stream(),
                buffer.pending_bytes()
            );
            buffer.flush(self.compression)?;
        }
        Ok(())
    }

    /// Flush every buffer regardless of size
    pub fn flush_all(&mut self) -> Result<usize, BufferError> {
        let mut records = 0;
        for buffer in self.buffers.values_mut() {
            records += buffer.flush(self.compression)?;
        }
        Ok(records)
    }

    /// One upload task per stream whose local file has been written
    pub fn upload_tasks(&self) -> Vec<UploadTask> {
        self.buffers
            .values()
            .filter(|buffer| buffer.has_file())
            .map(|buffer| UploadTask {
                stream: buffer.stream.clone(),
                local_path: buffer.paths.local_path.clone(),
                remote_key: buffer.paths.remote_key.clone(),
            })
            .collect()
    }

    pub fn buffer(&self, stream: &str) -> Option<&StreamBuffer> {
        self.buffers.get(stream)
    }

    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn run_at(&self) -> &DateTime<FixedOffset> {
        &self.run_at
    }
}
