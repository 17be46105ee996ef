//! Output Key Naming
//!
//! A path template is parsed once at startup into segments and rendered per
//! stream. The same rendering feeds the remote object key and the local
//! file path, so both stay in step for the whole run.
//!
//! ## Tokens
//!
//! ```text
//! {stream}             stream name
//! {date_time}          run timestamp, e.g. 2022-04-29 06:39:38.321056+00:00
//! {date_time:%Y%m%d}   run timestamp with a strftime format
//! {uuid}               random id, one per stream
//! {{ }}                literal braces
//! ```
//!
//! The deprecated `naming_convention` syntax (`{timestamp}`, `{date}`) is
//! rewritten into `date_time` tokens by [`PathTemplate::from_legacy`].

use crate::streaming::clock::isoformat;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Default template; a compression suffix is appended when enabled
pub const DEFAULT_PATH_TEMPLATE: &str = "{stream}-{date_time:%Y%m%dT%H%M%S}.json";

/// Default legacy format for `{timestamp}`
pub const LEGACY_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";
/// Default legacy format for `{date}`
pub const LEGACY_DATE_FORMAT: &str = "%Y%m%d";

/// Template parse errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// `{name}` with a name outside the supported token set
    UnknownToken(String),
    /// A format spec on a token that does not take one
    UnexpectedFormat { token: String, format: String },
    /// A strftime format chrono cannot render
    InvalidDateFormat(String),
    /// `{` without a closing `}`, or a stray `}`
    UnbalancedBrace { template: String, position: usize },
    /// Empty template string
    Empty,
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateError::UnknownToken(name) => {
                write!(f, "Unknown path template token '{{{}}}'", name)
            }
            TemplateError::UnexpectedFormat { token, format } => {
                write!(f, "Token '{{{}}}' does not accept format '{}'", token, format)
            }
            TemplateError::InvalidDateFormat(format) => {
                write!(f, "Invalid date_time format '{}'", format)
            }
            TemplateError::UnbalancedBrace { template, position } => {
                write!(f, "Unbalanced brace at position {} in '{}'", position, template)
            }
            TemplateError::Empty => write!(f, "Path template is empty"),
        }
    }
}

impl std::error::Error for TemplateError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Stream,
    DateTime(Option<String>),
    Uuid,
}

/// Source for the `{date_time}` token
///
/// Real runs render a timestamp; a pre-rendered string renders as-is and
/// ignores any format spec.
pub trait DateTimeToken {
    fn render(&self, format: Option<&str>) -> String;
}

impl DateTimeToken for DateTime<FixedOffset> {
    fn render(&self, format: Option<&str>) -> String {
        match format {
            Some(format) => self.format(format).to_string(),
            None => isoformat(self, ' ', true),
        }
    }
}

impl DateTimeToken for str {
    fn render(&self, _format: Option<&str>) -> String {
        self.to_string()
    }
}

/// Parsed path template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template in the current token syntax
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        if template.is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        body.push(c);
                    }
                    if !closed {
                        return Err(TemplateError::UnbalancedBrace {
                            template: template.to_string(),
                            position,
                        });
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(parse_token(&body)?);
                }
                '}' => {
                    return Err(TemplateError::UnbalancedBrace {
                        template: template.to_string(),
                        position,
                    });
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(PathTemplate {
            source: template.to_string(),
            segments,
        })
    }

    /// Parse a deprecated `naming_convention` template.
    ///
    /// `{timestamp}` and `{date}` become `date_time` tokens with the legacy
    /// default formats; explicit formats are carried over.
    pub fn from_legacy(template: &str) -> Result<Self, TemplateError> {
        Self::parse(&rewrite_legacy(template))
    }

    /// Same template with a literal suffix (compression extension) appended
    pub fn with_suffix(&self, suffix: &str) -> Self {
        let mut segments = self.segments.clone();
        match segments.last_mut() {
            Some(Segment::Literal(last)) => last.push_str(suffix),
            _ => segments.push(Segment::Literal(suffix.to_string())),
        }
        PathTemplate {
            source: format!("{}{}", self.source, escape_literal(suffix)),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether rendering depends on the per-stream random id
    pub fn uses_uuid(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Uuid))
    }

    /// Render the template for one stream
    pub fn render<D: DateTimeToken + ?Sized>(&self, stream: &str, date_time: &D, uuid: &Uuid) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Stream => out.push_str(stream),
                Segment::DateTime(format) => out.push_str(&date_time.render(format.as_deref())),
                Segment::Uuid => out.push_str(&uuid.to_string()),
            }
        }
        out
    }
}

impl Default for PathTemplate {
    /// [`DEFAULT_PATH_TEMPLATE`], built without parsing
    fn default() -> Self {
        PathTemplate {
            source: DEFAULT_PATH_TEMPLATE.to_string(),
            segments: vec![
                Segment::Stream,
                Segment::Literal("-".to_string()),
                Segment::DateTime(Some(LEGACY_TIMESTAMP_FORMAT.to_string())),
                Segment::Literal(".json".to_string()),
            ],
        }
    }
}

impl std::fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_token(body: &str) -> Result<Segment, TemplateError> {
    let (name, format) = match body.split_once(':') {
        Some((name, format)) => (name, Some(format)),
        None => (body, None),
    };

    match (name, format) {
        ("stream", None) => Ok(Segment::Stream),
        ("uuid", None) => Ok(Segment::Uuid),
        ("date_time", None) => Ok(Segment::DateTime(None)),
        ("date_time", Some(format)) => {
            let invalid = format.is_empty()
                || StrftimeItems::new(format).any(|item| matches!(item, Item::Error));
            if invalid {
                return Err(TemplateError::InvalidDateFormat(format.to_string()));
            }
            Ok(Segment::DateTime(Some(format.to_string())))
        }
        ("stream" | "uuid", Some(format)) => Err(TemplateError::UnexpectedFormat {
            token: name.to_string(),
            format: format.to_string(),
        }),
        _ => Err(TemplateError::UnknownToken(name.to_string())),
    }
}

/// Rewrite legacy tokens in place. Escaped braces are copied untouched, so
/// `{{timestamp}}` stays a literal.
fn rewrite_legacy(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(index) = rest.find(|c: char| c == '{' || c == '}') {
        out.push_str(&rest[..index]);
        let tail = &rest[index..];
        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..2]);
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }
        let Some(end) = tail.find('}') else {
            // Unbalanced; parse reports it
            out.push_str(tail);
            return out;
        };
        out.push('{');
        out.push_str(&rewrite_legacy_token(&tail[1..end]));
        out.push('}');
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

fn rewrite_legacy_token(body: &str) -> String {
    let (name, format) = match body.split_once(':') {
        Some((name, format)) => (name, Some(format)),
        None => (body, None),
    };
    match (name, format) {
        ("timestamp" | "date", Some(format)) => format!("date_time:{}", format),
        ("timestamp", None) => format!("date_time:{}", LEGACY_TIMESTAMP_FORMAT),
        ("date", None) => format!("date_time:{}", LEGACY_DATE_FORMAT),
        _ => body.to_string(),
    }
}

fn escape_literal(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

/// Prepend `prefix` to the file name component of `key`, leaving any
/// directory segments of the key untouched.
pub fn apply_prefix(key: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return key.to_string();
    }
    match key.rsplit_once('/') {
        Some((parent, name)) => format!("{}/{}{}", parent, prefix, name),
        None => format!("{}{}", prefix, key),
    }
}

/// Render a remote key: template, then the optional prefix on the file name
pub fn render_key<D: DateTimeToken + ?Sized>(
    template: &PathTemplate,
    stream: &str,
    date_time: &D,
    uuid: &Uuid,
    prefix: Option<&str>,
) -> String {
    let key = template.render(stream, date_time, uuid);
    match prefix {
        Some(prefix) => apply_prefix(&key, prefix),
        None => key,
    }
}

/// Resolved locations of one stream's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPaths {
    /// Object key relative to the bucket root
    pub remote_key: String,
    /// Absolute local file path
    pub local_path: PathBuf,
}

/// Resolves remote keys and local paths for streams
#[derive(Debug, Clone)]
pub struct NamingResolver {
    template: PathTemplate,
    prefix: Option<String>,
    work_dir: PathBuf,
}

impl NamingResolver {
    pub fn new(template: PathTemplate, prefix: Option<String>, work_dir: PathBuf) -> Self {
        NamingResolver {
            template,
            prefix: prefix.filter(|p| !p.is_empty()),
            work_dir,
        }
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Resolve both locations for `stream`. The local file mirrors the
    /// remote key under the working directory.
    pub fn resolve(&self, stream: &str, date_time: &DateTime<FixedOffset>, uuid: &Uuid) -> StreamPaths {
        let remote_key = render_key(&self.template, stream, date_time, uuid, self.prefix.as_deref());
        let local_path = self.work_dir.join(remote_key.trim_start_matches('/'));
        StreamPaths {
            remote_key,
            local_path,
        }
    }
}
