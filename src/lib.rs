//! An appender that bridges log records from the [log crate] onto the
//! currently active OpenTelemetry span.
//!
//! Applications that already use `log` statements get them correlated with
//! their traces without changing call sites: every record emitted while a
//! span is active becomes a key-value [span event] on that span, and records
//! carrying an error value additionally tag the span as errored. Records
//! emitted outside any span are dropped silently.
//!
//! The key-values of each event are produced by a [`SpanLogFormatter`]. The
//! default [`KeyValueFormatter`] is configured by a [`FormatSpec`], a mapping
//! from output keys to `{field}` templates; without configuration it renders
//! `{event: "{level_lower}", message: "{message}"}`. Structured key-values
//! attached to a record (the `log` crate's `kv` support) are merged into the
//! event, stringified.
//!
//! ```
//! use log::{info, LevelFilter};
//! use opentelemetry::trace::{Tracer, TracerProvider};
//! use opentelemetry_sdk::trace::SdkTracerProvider;
//! use opentelemetry_span_log::SpanLogBridge;
//!
//! log::set_boxed_logger(Box::new(SpanLogBridge::new())).unwrap();
//! log::set_max_level(LevelFilter::Info);
//!
//! let provider = SdkTracerProvider::builder().build();
//! let tracer = provider.tracer("example");
//!
//! tracer.in_span("handle-request", |_cx| {
//!     // Recorded on the active span as a span event with the attributes
//!     // `event = "info"`, `message = "request handled"`, `elapsed_ms = "7"`.
//!     info!(elapsed_ms = 7; "request handled");
//! });
//! ```
//!
//! Errors are forwarded in the canonical error shape. Capture them with the
//! `log` crate's `:err` modifier (under the formatter's error key, `"err"` by
//! default):
//!
//! ```
//! # use std::fmt;
//! # #[derive(Debug)]
//! # struct DeployError;
//! # impl fmt::Display for DeployError {
//! #     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//! #         f.write_str("deploy failed")
//! #     }
//! # }
//! # impl std::error::Error for DeployError {}
//! # let e = DeployError;
//! // Records `event = "error"`, `message`, `error.object`, `error.kind` and
//! // `stack`, and sets the span's `error` attribute to true.
//! log::error!(err:err = e; "deploy failed");
//! ```
//!
//! This crate performs no I/O and holds no mutable state; span lifecycle,
//! context propagation and export remain the tracer's responsibility, level
//! filtering the `log` facade's.
//!
//! [log crate]: https://docs.rs/log/latest/log/
//! [span event]: https://opentelemetry.io/docs/specs/otel/trace/api/#add-events

mod bridge;
mod format;

pub use bridge::{SpanLogBridge, LOG_EVENT_NAME};
pub use format::{FormatSpec, FormattedLog, KeyValueFormatter, SpanLogFormatter};

use thiserror::Error as ThisError;

/// Span event keys and span attribute keys used by the canonical error shape.
pub mod keys {
    use opentelemetry::Key;

    /// The kind of event logged; `"error"` for error-shaped entries.
    pub const EVENT: Key = Key::from_static_str("event");

    /// The human-readable message of the entry.
    pub const MESSAGE: Key = Key::from_static_str("message");

    /// The stringified error value itself.
    pub const ERROR_OBJECT: Key = Key::from_static_str("error.object");

    /// The type of the error, rendered from its `Debug` implementation.
    pub const ERROR_KIND: Key = Key::from_static_str("error.kind");

    /// The rendered chain of causes below the error; empty when the error
    /// has no cause.
    pub const STACK: Key = Key::from_static_str("stack");

    /// The span attribute set to `true` when an error-carrying record is
    /// forwarded.
    pub const ERROR: Key = Key::from_static_str("error");
}

/// Errors surfaced while building a formatter or forwarding a record.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// A format template referenced a field this crate does not recognize.
    #[error("unknown field `{field}` in the template for key `{key}`")]
    UnknownField {
        /// The output key whose template is invalid.
        key: String,
        /// The unrecognized field name.
        field: String,
    },

    /// A format template contained an unmatched `{` or `}`.
    #[error("unbalanced braces in the template for key `{key}`; use `{{{{` and `}}}}` for literal braces")]
    UnbalancedBraces {
        /// The output key whose template is invalid.
        key: String,
    },

    /// The value under the configured error key does not implement
    /// `std::error::Error`; capture errors with the `log` crate's `:err`
    /// modifier.
    #[error("the value under the key `{key}` is not an error value")]
    ExpectedError {
        /// The configured error key.
        key: String,
    },

    /// The record's key-value source failed while being visited.
    #[error("failed to read the record's key-values: {0}")]
    KeyValues(#[from] log::kv::Error),
}
