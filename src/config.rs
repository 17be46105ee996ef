//! Target Configuration
//!
//! The JSON config file is read once into [`RawConfig`], which rejects
//! unknown keys, then resolved into an immutable [`Config`] that is threaded
//! through the rest of the run.
//!
//! Resolution applies defaults, rewrites deprecated keys (`temp_dir`,
//! `naming_convention`), validates compression and encryption, and fills AWS
//! credentials from the environment when the file leaves them out.

use crate::streaming::codec::Compression;
pub use crate::streaming::naming::DEFAULT_PATH_TEMPLATE;
use crate::streaming::naming::{PathTemplate, TemplateError};
use crate::streaming::DEFAULT_MEMORY_BUFFER;
use crate::upload::{Encryption, DEFAULT_CONCURRENCY_MAX};
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read
    Io { path: PathBuf, source: std::io::Error },
    /// Not valid JSON, wrong value type, or an unknown key
    Parse(serde_json::Error),
    /// `s3_bucket` absent or empty
    MissingBucket,
    UnsupportedCompression(String),
    UnsupportedEncryption(String),
    InvalidTemplate(TemplateError),
    /// A recognised key with an out-of-range value
    InvalidValue { key: &'static str, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Cannot read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "Invalid config: {}", e),
            ConfigError::MissingBucket => write!(f, "Config is missing required key s3_bucket"),
            ConfigError::UnsupportedCompression(c) => {
                write!(f, "Unsupported compression type '{}', expected none, gzip or lzma", c)
            }
            ConfigError::UnsupportedEncryption(e) => {
                write!(f, "Unsupported encryption type '{}', expected none or kms", e)
            }
            ConfigError::InvalidTemplate(e) => write!(f, "Invalid path_template: {}", e),
            ConfigError::InvalidValue { key, reason } => {
                write!(f, "Invalid value for {}: {}", key, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::InvalidTemplate(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<TemplateError> for ConfigError {
    fn from(e: TemplateError) -> Self {
        ConfigError::InvalidTemplate(e)
    }
}

/// Config file as written by the user
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub s3_bucket: Option<String>,
    pub s3_key_prefix: Option<String>,
    pub aws_profile: Option<String>,
    pub aws_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_session_token: Option<String>,
    pub role_arn: Option<String>,
    pub encryption_type: Option<String>,
    pub encryption_key: Option<String>,
    pub compression: Option<String>,
    pub path_template: Option<String>,
    /// Deprecated alias of `path_template` using legacy tokens
    pub naming_convention: Option<String>,
    /// Hours east of UTC
    pub timezone_offset: Option<f64>,
    pub work_dir: Option<String>,
    /// Deprecated alias of `work_dir`
    pub temp_dir: Option<String>,
    pub local: Option<bool>,
    /// Bytes; JSON integers and floats are both accepted
    pub memory_buffer: Option<f64>,
    pub add_metadata_columns: Option<bool>,
    pub concurrency_max: Option<u64>,
}

/// AWS credentials from the config file, else the environment
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub profile: Option<String>,
}

impl AwsCredentials {
    /// Fill unset fields through `lookup`, normally the process environment
    pub fn resolve_with<F>(raw: &RawConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |configured: &Option<String>, var: &str| {
            configured
                .clone()
                .filter(|v| !v.is_empty())
                .or_else(|| lookup(var).filter(|v| !v.is_empty()))
        };
        AwsCredentials {
            access_key_id: pick(&raw.aws_access_key_id, "AWS_ACCESS_KEY_ID"),
            secret_access_key: pick(&raw.aws_secret_access_key, "AWS_SECRET_ACCESS_KEY"),
            session_token: pick(&raw.aws_session_token, "AWS_SESSION_TOKEN"),
            profile: pick(&raw.aws_profile, "AWS_PROFILE"),
        }
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redact(&self.secret_access_key))
            .field("session_token", &redact(&self.session_token))
            .field("profile", &self.profile)
            .finish()
    }
}

/// Resolved, immutable run configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub s3_bucket: String,
    /// Prepended to the file name component of every key
    pub s3_key_prefix: Option<String>,
    pub aws_endpoint_url: Option<String>,
    pub credentials: AwsCredentials,
    pub role_arn: Option<String>,
    pub encryption: Encryption,
    pub compression: Compression,
    /// Compression suffix already applied
    pub path_template: PathTemplate,
    pub timezone_offset: FixedOffset,
    pub work_dir: PathBuf,
    pub local: bool,
    pub memory_buffer: usize,
    pub add_metadata_columns: bool,
    pub concurrency_max: usize,
}

impl Config {
    /// Read and resolve a config file, consulting the process environment
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        Self::from_json_str_with_env(contents, |var| std::env::var(var).ok())
    }

    /// Resolve with an explicit environment lookup
    pub fn from_json_str_with_env<F>(contents: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = serde_json::from_str(contents)?;
        Self::resolve(raw, lookup)
    }

    pub fn resolve<F>(raw: RawConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let s3_bucket = raw
            .s3_bucket
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or(ConfigError::MissingBucket)?;

        let compression_name = raw.compression.as_deref().unwrap_or("none");
        let compression = Compression::parse(compression_name)
            .ok_or_else(|| ConfigError::UnsupportedCompression(compression_name.to_string()))?;

        let encryption = Encryption::resolve(raw.encryption_type.as_deref(), raw.encryption_key.as_deref())?;

        let template = match (&raw.path_template, &raw.naming_convention) {
            (Some(path_template), naming_convention) => {
                if naming_convention.is_some() {
                    warn!("Both path_template and naming_convention are set, ignoring naming_convention");
                }
                PathTemplate::parse(path_template)?
            }
            (None, Some(naming_convention)) => {
                warn!("naming_convention is deprecated, use path_template with {{date_time}} tokens instead");
                PathTemplate::from_legacy(naming_convention)?
            }
            (None, None) => PathTemplate::default(),
        };
        let path_template = match compression.suffix() {
            Some(suffix) => template.with_suffix(suffix),
            None => template,
        };

        let work_dir = match (&raw.work_dir, &raw.temp_dir) {
            (Some(work_dir), _) => work_dir.clone(),
            (None, Some(temp_dir)) => {
                warn!("temp_dir is deprecated, use work_dir instead");
                temp_dir.clone()
            }
            (None, None) => std::env::temp_dir().to_string_lossy().into_owned(),
        };
        let work_dir = expand_home(&work_dir);

        let timezone_offset = match raw.timezone_offset {
            None => utc(),
            Some(hours) => offset_from_hours(hours)?,
        };

        let memory_buffer = match raw.memory_buffer {
            None => DEFAULT_MEMORY_BUFFER,
            Some(bytes) if bytes.is_finite() && bytes >= 0.0 => bytes as usize,
            Some(bytes) => {
                return Err(ConfigError::InvalidValue {
                    key: "memory_buffer",
                    reason: format!("{} is not a byte count", bytes),
                })
            }
        };

        let concurrency_max = match raw.concurrency_max {
            None => DEFAULT_CONCURRENCY_MAX,
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    key: "concurrency_max",
                    reason: "must be at least 1".to_string(),
                })
            }
            Some(n) => match usize::try_from(n) {
                Ok(n) if n <= Semaphore::MAX_PERMITS => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "concurrency_max",
                        reason: format!("must be at most {}", Semaphore::MAX_PERMITS),
                    })
                }
            },
        };

        let credentials = AwsCredentials::resolve_with(&raw, lookup);

        let config = Config {
            s3_bucket,
            s3_key_prefix: raw.s3_key_prefix.filter(|p| !p.is_empty()),
            aws_endpoint_url: raw.aws_endpoint_url.filter(|u| !u.is_empty()),
            credentials,
            role_arn: raw.role_arn.filter(|r| !r.is_empty()),
            encryption,
            compression,
            path_template,
            timezone_offset,
            work_dir,
            local: raw.local.unwrap_or(false),
            memory_buffer,
            add_metadata_columns: raw.add_metadata_columns.unwrap_or(false),
            concurrency_max,
        };
        info!(
            "Writing to bucket {} with template {} (compression {}, local {})",
            config.s3_bucket, config.path_template, config.compression, config.local
        );
        Ok(config)
    }

    /// Minimal config for tests: local mode, no compression
    pub fn test(work_dir: PathBuf) -> Self {
        Config {
            s3_bucket: "test-bucket".to_string(),
            s3_key_prefix: None,
            aws_endpoint_url: None,
            credentials: AwsCredentials::default(),
            role_arn: None,
            encryption: Encryption::None,
            compression: Compression::None,
            path_template: PathTemplate::default(),
            timezone_offset: utc(),
            work_dir,
            local: true,
            memory_buffer: DEFAULT_MEMORY_BUFFER,
            add_metadata_columns: false,
            concurrency_max: DEFAULT_CONCURRENCY_MAX,
        }
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn offset_from_hours(hours: f64) -> Result<FixedOffset, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: "timezone_offset",
        reason: format!("{} is not an offset in hours between -24 and 24", hours),
    };
    if !hours.is_finite() {
        return Err(invalid());
    }
    let seconds = (hours * 3600.0).round();
    if seconds.abs() >= 86_400.0 {
        return Err(invalid());
    }
    FixedOffset::east_opt(seconds as i32).ok_or_else(invalid)
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        _ => PathBuf::from(path),
    }
}
