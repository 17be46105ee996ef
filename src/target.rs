//! Target Orchestrator
//!
//! Reads the protocol stream once, dispatches each message, and at end of
//! input flushes every buffer, uploads the files and emits the last state.
//!
//! ## Architecture
//!
//! ```text
//! stdin ─→ parse_line ─→ SCHEMA ─→ BufferManager::on_schema
//!                       RECORD ─→ BufferManager::on_record   (last state cleared)
//!                       STATE  ─→ last state = value
//!                       other  ─→ logged
//! EOF ─→ flush_all ─→ Uploader::upload_all ─→ emit_state ─→ stdout
//! ```
//!
//! Ingestion is sequential and runs on a blocking thread; only the upload
//! stage is concurrent. A state line is written only after every upload of
//! the run has succeeded.

use crate::config::Config;
use crate::error::TargetError;
use crate::protocol::{emit_state, parse_line, Message};
use crate::streaming::{BufferManager, NamingResolver, RunClock};
use crate::upload::{ObjectStore, RetryPolicy, UploadSummary, UploadTask, Uploader, UploaderOptions};
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of ingesting the whole input
#[derive(Debug, Clone, PartialEq)]
pub struct PersistOutcome {
    /// Last STATE value not followed by a RECORD
    pub state: Option<Value>,
    /// Files written during the run
    pub tasks: Vec<UploadTask>,
}

/// Result of a complete run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub lines: u64,
    pub upload: UploadSummary,
    pub state: Option<Value>,
}

/// Single-run message dispatcher
#[derive(Debug)]
pub struct Target {
    buffers: BufferManager,
    last_state: Option<Value>,
    lines: u64,
}

impl Target {
    /// Create the working directory and capture the run timestamp
    pub fn new(config: &Config, clock: &dyn RunClock) -> Result<Self, TargetError> {
        std::fs::create_dir_all(&config.work_dir).map_err(|e| {
            TargetError::io(format!("Cannot create work_dir {}", config.work_dir.display()), e)
        })?;

        let run_at = clock.now(config.timezone_offset);
        debug!("Run timestamp {}", run_at.to_rfc3339());

        let naming = NamingResolver::new(
            config.path_template.clone(),
            config.s3_key_prefix.clone(),
            config.work_dir.clone(),
        );
        let buffers = BufferManager::new(
            naming,
            config.compression,
            config.memory_buffer,
            config.add_metadata_columns,
            run_at,
        );

        Ok(Target {
            buffers,
            last_state: None,
            lines: 0,
        })
    }

    /// Decode and dispatch one input line. Blank lines are logged and skipped.
    pub fn process_line(&mut self, line: &str) -> Result<(), TargetError> {
        if line.trim().is_empty() {
            warn!("Skipping blank input line after {} messages", self.lines);
            return Ok(());
        }
        self.lines += 1;
        let message = parse_line(line)?;
        self.process_message(message)
    }

    pub fn process_message(&mut self, message: Message) -> Result<(), TargetError> {
        match message {
            Message::Schema(schema) => {
                self.buffers.on_schema(&schema)?;
            }
            Message::Record(record) => {
                self.buffers.on_record(record)?;
                self.last_state = None;
            }
            Message::State { value } => {
                debug!("Setting state to {}", value);
                self.last_state = Some(value);
            }
            Message::ActivateVersion(activate) => {
                debug!(
                    "ACTIVATE_VERSION message for stream {}",
                    activate.stream.as_deref().unwrap_or("<none>")
                );
            }
            Message::Unknown { message_type, raw } => {
                warn!("Unknown message type {} in message {}", message_type, raw);
            }
        }
        Ok(())
    }

    /// Consume every line of `input`
    pub fn persist_lines<R: BufRead>(&mut self, input: R) -> Result<(), TargetError> {
        for line in input.lines() {
            let line = line.map_err(|e| TargetError::io("Cannot read input", e))?;
            self.process_line(&line)?;
        }
        Ok(())
    }

    /// Flush every buffer and hand back the files to upload
    pub fn finish(mut self) -> Result<PersistOutcome, TargetError> {
        let records = self.buffers.flush_all()?;
        let tasks = self.buffers.upload_tasks();
        info!(
            "Read {} lines, flushed {} trailing records, {} files to upload",
            self.lines,
            records,
            tasks.len()
        );
        Ok(PersistOutcome {
            state: self.last_state,
            tasks,
        })
    }

    pub fn last_state(&self) -> Option<&Value> {
        self.last_state.as_ref()
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }
}

/// Uploader settings for a production run
pub fn uploader_options(config: &Config) -> UploaderOptions {
    UploaderOptions {
        concurrency_max: config.concurrency_max,
        retry: RetryPolicy::default(),
        remove_local_files: true,
        local: config.local,
        encryption: config.encryption.clone(),
        ..UploaderOptions::default()
    }
}

/// Run the target against `store` with the default uploader settings
pub async fn run<R, W>(
    config: &Config,
    store: Arc<dyn ObjectStore>,
    clock: &dyn RunClock,
    input: R,
    output: &mut W,
) -> Result<RunSummary, TargetError>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let uploader = Uploader::new(store, uploader_options(config));
    run_with(config, uploader, clock, input, output).await
}

/// Ingest `input`, upload the produced files, then write the final state
pub async fn run_with<R, W>(
    config: &Config,
    uploader: Uploader,
    clock: &dyn RunClock,
    input: R,
    output: &mut W,
) -> Result<RunSummary, TargetError>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let mut target = Target::new(config, clock)?;

    let (lines, outcome) = tokio::task::spawn_blocking(move || {
        target.persist_lines(input)?;
        let lines = target.lines();
        target.finish().map(|outcome| (lines, outcome))
    })
    .await
    .map_err(|e| TargetError::Task(e.to_string()))??;

    let upload = uploader.upload_all(outcome.tasks).await?;

    emit_state(output, outcome.state.as_ref()).map_err(|e| TargetError::io("Cannot write state", e))?;
    info!("Exiting normally");

    Ok(RunSummary {
        lines,
        upload,
        state: outcome.state,
    })
}
