//! Stream Files
//!
//! Turns the per-stream record sequence into local JSON Lines files, one per
//! stream per run, ready for upload.
//!
//! ## Architecture
//!
//! ```text
//! RECORD → BufferManager → StreamBuffer → Compression → work_dir/<remote_key>
//!                              ↑
//!                       NamingResolver (path template, run clock)
//! ```

pub mod buffer;
pub mod clock;
pub mod codec;
pub mod naming;

pub use buffer::{BufferError, BufferManager, StreamBuffer, DEFAULT_MEMORY_BUFFER};
pub use clock::{FixedClock, RunClock, SystemClock};
pub use codec::Compression;
pub use naming::{
    apply_prefix, render_key, DateTimeToken, NamingResolver, PathTemplate, StreamPaths, TemplateError,
};
