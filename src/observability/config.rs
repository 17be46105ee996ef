//! Logging Configuration
//!
//! All settings are loaded from environment variables, so the JSON config
//! file stays limited to target settings.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | RUST_LOG | info | `tracing` filter directives |
//! | TARGET_S3_JSONL_LOG_FORMAT | text | `json` for JSON lines |

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Logging configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directives, e.g. `info` or `target_s3_jsonl=debug`
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl LoggingConfig {
    pub const FORMAT_VAR: &'static str = "TARGET_S3_JSONL_LOG_FORMAT";
    pub const DEFAULT_FILTER: &'static str = "info";

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        LoggingConfig {
            filter: lookup("RUST_LOG")
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| Self::DEFAULT_FILTER.to_string()),
            format: lookup(Self::FORMAT_VAR)
                .map(|f| LogFormat::parse(&f))
                .unwrap_or_default(),
        }
    }
}
