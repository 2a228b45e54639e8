//! Rendering of `log` records into span event key-values.

use std::fmt::Write as _;

use chrono::Local;
use log::kv;
use log::Record;
use opentelemetry::{Key, KeyValue};

use crate::{keys, Error};

const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const DEFAULT_ERROR_KEY: &str = "err";

/// An ordered mapping from span event keys to format templates.
///
/// Each entry produces one key-value pair per formatted record, in the order
/// the entries were added. Templates may contain `{field}` placeholders
/// (`{{` and `}}` escape literal braces). The recognized fields are:
///
/// | Placeholder     | Value                                          |
/// |-----------------|------------------------------------------------|
/// | `{level}`       | upper-case level name, e.g. `INFO`             |
/// | `{level_lower}` | lower-case level name, e.g. `info`             |
/// | `{message}`     | the rendered log message                       |
/// | `{timestamp}`   | the formatted wall-clock time of the record    |
/// | `{target}`      | the record's target                            |
/// | `{module_path}` | the module path of the log statement, if known |
/// | `{file}`        | the source file of the log statement, if known |
/// | `{line}`        | the source line of the log statement, if known |
///
/// The default spec renders `{event: "{level_lower}", message: "{message}"}`.
/// An explicitly [empty](FormatSpec::empty) spec means "log nothing": every
/// record formats to an empty key-value set, with no error fields injected.
#[derive(Clone, Debug)]
pub struct FormatSpec {
    entries: Vec<(String, String)>,
}

impl FormatSpec {
    /// A spec with no entries. Records formatted against it produce an empty
    /// key-value set.
    pub fn empty() -> Self {
        FormatSpec {
            entries: Vec::new(),
        }
    }

    /// Appends an output key with its format template.
    ///
    /// Adding a key twice keeps the position of the first occurrence and the
    /// template of the last.
    pub fn with_field(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.entries.push((key.into(), template.into()));
        self
    }

    /// Returns `true` if the spec has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FormatSpec {
    fn default() -> Self {
        FormatSpec::empty()
            .with_field("event", "{level_lower}")
            .with_field("message", "{message}")
    }
}

/// The outcome of formatting one log record.
#[derive(Clone, Debug, Default)]
pub struct FormattedLog {
    /// The rendered key-values, in insertion order.
    pub fields: Vec<KeyValue>,
    /// Whether the record carried an error value. The bridge uses this to
    /// tag the span as errored.
    pub is_error: bool,
}

/// Renders a [`log::Record`] into the key-values of one span event.
///
/// Implementations must be pure per call: all derived state (rendered
/// message, timestamps, error text) belongs to the returned [`FormattedLog`],
/// so one formatter instance can serve concurrent `log` calls.
pub trait SpanLogFormatter {
    /// Formats a single record.
    ///
    /// Returns an error only when the record violates the formatter's
    /// key-value contract; a record it cannot say anything about should
    /// format to an empty [`FormattedLog`] instead.
    fn format(&self, record: &Record<'_>) -> Result<FormattedLog, Error>;
}

/// The default [`SpanLogFormatter`], configured by a [`FormatSpec`].
///
/// Produces one key-value pair per spec entry. When the record carries an
/// error value under the configured error key (default `"err"`, matching the
/// `log` crate's `:err` capture modifier), it additionally renders the
/// canonical error shape:
///
/// * `event` = `"error"`
/// * `message` = the error's `Display` output
/// * `error.object` = the error's `Display` output
/// * `error.kind` = the error's `Debug` output
/// * `stack` = the error's `source()` chain, one `caused by:` line per cause
///   (an empty string when the error has no cause)
///
/// Duplicate keys resolve deterministically: spec templates override the
/// error shape, and the record's own key-values override both.
#[derive(Debug)]
pub struct KeyValueFormatter {
    templates: Vec<(Key, Template)>,
    uses_time: bool,
    timestamp_format: String,
    error_key: String,
}

impl KeyValueFormatter {
    /// Compiles the given spec into a formatter.
    ///
    /// Fails if any template references an unknown field or has unbalanced
    /// braces.
    pub fn new(spec: &FormatSpec) -> Result<Self, Error> {
        let templates = spec
            .entries
            .iter()
            .map(|(key, template)| {
                Template::parse(key, template).map(|t| (Key::from(key.clone()), t))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let uses_time = templates.iter().any(|(_, t)| t.uses_time);

        Ok(KeyValueFormatter {
            templates,
            uses_time,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_owned(),
            error_key: DEFAULT_ERROR_KEY.to_owned(),
        })
    }

    /// Sets the `chrono` strftime string used to render `{timestamp}`.
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    /// Sets the record key under which an error value is looked up.
    pub fn with_error_key(mut self, key: impl Into<String>) -> Self {
        self.error_key = key.into();
        self
    }
}

impl Default for KeyValueFormatter {
    fn default() -> Self {
        KeyValueFormatter::new(&FormatSpec::default()).expect("default format spec is valid")
    }
}

impl SpanLogFormatter for KeyValueFormatter {
    fn format(&self, record: &Record<'_>) -> Result<FormattedLog, Error> {
        // An empty spec suppresses all output, including the error shape.
        if self.templates.is_empty() {
            return Ok(FormattedLog::default());
        }

        let message = record.args().to_string();
        // Timestamp rendering is comparatively expensive; do it at most once,
        // and only when some template asks for it.
        let timestamp = self
            .uses_time
            .then(|| Local::now().format(&self.timestamp_format).to_string());
        let fields = RecordFields {
            record,
            message: &message,
            timestamp: timestamp.as_deref(),
        };

        let source = record.key_values();
        let error_value = source.get(kv::Key::from_str(&self.error_key));
        let error = match error_value.as_ref() {
            Some(value) => Some(value.to_borrowed_error().ok_or_else(|| {
                Error::ExpectedError {
                    key: self.error_key.clone(),
                }
            })?),
            None => None,
        };

        let mut out = Vec::with_capacity(self.templates.len());
        if let Some(err) = error {
            let stack = source_chain(err);
            out.push(KeyValue::new(keys::EVENT, "error"));
            out.push(KeyValue::new(keys::MESSAGE, err.to_string()));
            out.push(KeyValue::new(keys::ERROR_OBJECT, err.to_string()));
            out.push(KeyValue::new(keys::ERROR_KIND, format!("{err:?}")));
            out.push(KeyValue::new(keys::STACK, stack));
        }
        for (key, template) in &self.templates {
            upsert(&mut out, KeyValue::new(key.clone(), template.render(&fields)));
        }
        source.visit(&mut ExtraFields {
            out: &mut out,
            error_key: &self.error_key,
        })?;

        Ok(FormattedLog {
            fields: out,
            is_error: error.is_some(),
        })
    }
}

/// Replaces the value of an existing key in place, or appends the pair.
fn upsert(fields: &mut Vec<KeyValue>, kv: KeyValue) {
    match fields.iter_mut().find(|existing| existing.key == kv.key) {
        Some(existing) => existing.value = kv.value,
        None => fields.push(kv),
    }
}

/// Renders the `source()` chain of an error, excluding the error itself.
fn source_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut stack = String::new();
    let mut source = err.source();
    while let Some(cause) = source {
        if !stack.is_empty() {
            stack.push('\n');
        }
        let _ = write!(stack, "caused by: {cause}");
        source = cause.source();
    }
    stack
}

/// Merges the record's own key-values, stringified, over the rendered fields.
struct ExtraFields<'a> {
    out: &'a mut Vec<KeyValue>,
    error_key: &'a str,
}

impl<'kvs> kv::VisitSource<'kvs> for ExtraFields<'_> {
    fn visit_pair(&mut self, key: kv::Key<'kvs>, value: kv::Value<'kvs>) -> Result<(), kv::Error> {
        // The error key is consumed by the error shape, not echoed verbatim.
        if key.as_str() != self.error_key {
            upsert(
                self.out,
                KeyValue::new(key.as_str().to_owned(), value.to_string()),
            );
        }
        Ok(())
    }
}

/// Per-call view of a record with the derived values templates draw from.
struct RecordFields<'a> {
    record: &'a Record<'a>,
    message: &'a str,
    timestamp: Option<&'a str>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Field {
    Level,
    LevelLower,
    Message,
    Timestamp,
    Target,
    ModulePath,
    File,
    Line,
}

impl Field {
    fn parse(name: &str) -> Option<Field> {
        match name {
            "level" => Some(Field::Level),
            "level_lower" => Some(Field::LevelLower),
            "message" => Some(Field::Message),
            "timestamp" => Some(Field::Timestamp),
            "target" => Some(Field::Target),
            "module_path" => Some(Field::ModulePath),
            "file" => Some(Field::File),
            "line" => Some(Field::Line),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// A compiled format template.
#[derive(Debug)]
struct Template {
    segments: Vec<Segment>,
    uses_time: bool,
}

impl Template {
    fn parse(key: &str, template: &str) -> Result<Template, Error> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => {
                                return Err(Error::UnbalancedBraces {
                                    key: key.to_owned(),
                                })
                            }
                        }
                    }
                    let field = Field::parse(&name).ok_or_else(|| Error::UnknownField {
                        key: key.to_owned(),
                        field: name,
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => {
                    return Err(Error::UnbalancedBraces {
                        key: key.to_owned(),
                    })
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let uses_time = segments
            .iter()
            .any(|s| matches!(s, Segment::Field(Field::Timestamp)));
        Ok(Template {
            segments,
            uses_time,
        })
    }

    fn render(&self, fields: &RecordFields<'_>) -> String {
        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Field(Field::Level) => rendered.push_str(fields.record.level().as_str()),
                Segment::Field(Field::LevelLower) => {
                    rendered.push_str(level_lower(fields.record.level()))
                }
                Segment::Field(Field::Message) => rendered.push_str(fields.message),
                Segment::Field(Field::Timestamp) => {
                    rendered.push_str(fields.timestamp.unwrap_or_default())
                }
                Segment::Field(Field::Target) => rendered.push_str(fields.record.target()),
                Segment::Field(Field::ModulePath) => {
                    rendered.push_str(fields.record.module_path().unwrap_or_default())
                }
                Segment::Field(Field::File) => {
                    rendered.push_str(fields.record.file().unwrap_or_default())
                }
                Segment::Field(Field::Line) => {
                    if let Some(line) = fields.record.line() {
                        let _ = write!(rendered, "{line}");
                    }
                }
            }
        }
        rendered
    }
}

fn level_lower(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "error",
        log::Level::Warn => "warn",
        log::Level::Info => "info",
        log::Level::Debug => "debug",
        log::Level::Trace => "trace",
    }
}
