//! Singer target that buffers records into JSON Lines files per stream and
//! uploads them to S3.
//!
//! ## Modules
//!
//! - [`protocol`]: SCHEMA / RECORD / STATE / ACTIVATE_VERSION decoding
//! - [`schema`]: schema registry, validation, `_sdc_*` metadata columns
//! - [`streaming`]: per-stream buffers, key naming, compression
//! - [`upload`]: object store clients, retry, concurrent uploader
//! - [`target`]: the run loop tying them together

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod schema;
pub mod streaming;
pub mod target;
pub mod upload;

pub use config::{Config, ConfigError, RawConfig};
pub use error::TargetError;
pub use target::{run, run_with, PersistOutcome, RunSummary, Target};
