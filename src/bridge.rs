//! The `log::Log` implementation that forwards records onto spans.

use log::{Metadata, Record};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{Context, KeyValue};

use crate::format::{KeyValueFormatter, SpanLogFormatter};
use crate::{keys, Error};

/// The name given to every span event this crate records.
///
/// Span events carry the formatted key-values as attributes; the event name
/// itself is fixed, following the conventional name for log entries migrated
/// from tracing systems without named events.
pub const LOG_EVENT_NAME: &str = "log";

/// A [`log::Log`] implementation that records every log record as an event
/// on the currently active OpenTelemetry span.
///
/// The bridge holds only immutable configuration: a [`SpanLogFormatter`]
/// which turns each record into the event's key-values. Records emitted while
/// no span is active are dropped silently; logging outside a trace is a
/// normal no-op, not a failure.
///
/// Install it as the global logger to have every `log` statement annotate
/// the active span:
///
/// ```
/// use opentelemetry_span_log::SpanLogBridge;
///
/// log::set_boxed_logger(Box::new(SpanLogBridge::new())).unwrap();
/// log::set_max_level(log::LevelFilter::Info);
/// ```
#[derive(Debug)]
pub struct SpanLogBridge<F = KeyValueFormatter> {
    formatter: F,
}

impl SpanLogBridge<KeyValueFormatter> {
    /// A bridge with the default formatter, rendering
    /// `{event: "{level_lower}", message: "{message}"}`.
    pub fn new() -> Self {
        SpanLogBridge {
            formatter: KeyValueFormatter::default(),
        }
    }
}

impl Default for SpanLogBridge<KeyValueFormatter> {
    fn default() -> Self {
        SpanLogBridge::new()
    }
}

impl<F> SpanLogBridge<F>
where
    F: SpanLogFormatter,
{
    /// A bridge using a custom formatter.
    pub fn with_formatter(formatter: F) -> Self {
        SpanLogBridge { formatter }
    }

    /// Forwards one record to the span of the current [`Context`].
    ///
    /// Fails only when the formatter rejects the record; see
    /// [`emit_in_context`](Self::emit_in_context) for the emit semantics.
    pub fn try_emit(&self, record: &Record<'_>) -> Result<(), Error> {
        Context::map_current(|cx| self.emit_in_context(cx, record))
    }

    /// Forwards one record to the span of an explicitly provided [`Context`].
    ///
    /// The explicit context always wins over the ambient current context, so
    /// callers can attach a record to a span that is not active on this
    /// thread. If `cx` has no active span the record is dropped and `Ok(())`
    /// is returned.
    ///
    /// When the formatted record carries an error value, the span is tagged
    /// with the boolean `error` attribute before the event is recorded.
    pub fn emit_in_context(&self, cx: &Context, record: &Record<'_>) -> Result<(), Error> {
        if !cx.has_active_span() {
            return Ok(());
        }

        let formatted = self.formatter.format(record)?;
        let span = cx.span();
        if formatted.is_error {
            span.set_attribute(KeyValue::new(keys::ERROR, true));
        }
        span.add_event(LOG_EVENT_NAME, formatted.fields);
        Ok(())
    }
}

impl<F> log::Log for SpanLogBridge<F>
where
    F: SpanLogFormatter + Send + Sync,
{
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        // Level filtering is the logging facility's job; see
        // `log::set_max_level`.
        true
    }

    fn log(&self, record: &Record<'_>) {
        // A logger must not panic or log recursively; a rejected record is
        // reported on stderr like other logging backends do.
        if let Err(err) = self.try_emit(record) {
            eprintln!("opentelemetry-span-log: failed to forward log record: {err}");
        }
    }

    fn flush(&self) {}
}
