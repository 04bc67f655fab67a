//! Span adapter for store operations.
//!
//! Every facade operation runs inside one `tracing` span. Span names in `tracing` are
//! static, so each span is called `db.operation` and carries its dynamic
//! `<store-kind>.<operation>.<collection>` name in the `otel.name` field, which the
//! OpenTelemetry bridge uses as the exported span name.
//!
//! The adapter checks once, when the store connects, whether spans would be recorded at
//! all. When they would not, every operation gets [`Span::none`] and no attribute or
//! statement is ever computed.

use std::future::Future;

use bson::{Bson, Document as BsonDocument};
use tracing::{
    Dispatch, Instrument, Span, dispatcher, field, info_span, instrument::Instrumented, warn,
};

use crate::error::DocumentStoreResult;

/// Target for all spans and events emitted by the store.
pub const TRACE_TARGET: &str = "doctrail";

/// The query text attached to a span as `db.statement`.
#[derive(Debug, Clone, Copy)]
pub enum Statement<'a> {
    None,
    Filter(&'a BsonDocument),
    Pipeline(&'a [BsonDocument]),
}

impl Statement<'_> {
    fn render(&self) -> Option<String> {
        match self {
            Statement::None => None,
            Statement::Filter(filter) => Some(filter.to_string()),
            Statement::Pipeline(stages) => {
                let stages: Vec<String> = stages.iter().map(ToString::to_string).collect();
                Some(format!("[{}]", stages.join(", ")))
            }
        }
    }
}

/// Creates operation spans for one store handle.
#[derive(Debug, Clone)]
pub struct OpTracer {
    dispatch: Option<Dispatch>,
    store_kind: &'static str,
    recording: bool,
}

impl OpTracer {
    /// Builds a tracer and probes once whether its dispatcher records spans.
    ///
    /// With `dispatch` set, spans are created under that dispatcher; otherwise the
    /// ambient default dispatcher is used.
    pub fn new(dispatch: Option<Dispatch>, store_kind: &'static str) -> Self {
        let recording = scoped(dispatch.as_ref(), || {
            !info_span!(target: TRACE_TARGET, "db.operation").is_disabled()
        });

        Self {
            dispatch,
            store_kind,
            recording,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn store_kind(&self) -> &'static str {
        self.store_kind
    }

    /// Opens the span for `operation` on `collection`.
    pub fn start(&self, operation: &str, collection: &str, statement: Statement<'_>) -> OpSpan {
        if !self.recording {
            return OpSpan {
                span: Span::none(),
                dispatch: None,
            };
        }

        let span = scoped(self.dispatch.as_ref(), || {
            info_span!(
                target: TRACE_TARGET,
                "db.operation",
                otel.name = %format_args!("{}.{}.{}", self.store_kind, operation, collection),
                otel.kind = "client",
                db.system = self.store_kind,
                db.collection = collection,
                db.operation = operation,
                db.statement = field::Empty,
                db.affected_documents = field::Empty,
                db.inserted_id = field::Empty,
                otel.status_code = field::Empty,
                otel.status_message = field::Empty,
            )
        });

        if !span.is_disabled() {
            if let Some(text) = statement.render() {
                span.record("db.statement", text.as_str());
            }
        }

        OpSpan {
            span,
            dispatch: self.dispatch.clone(),
        }
    }
}

/// One operation's span. Closed exactly once, by [`OpSpan::finish`].
#[derive(Debug)]
pub struct OpSpan {
    span: Span,
    dispatch: Option<Dispatch>,
}

impl OpSpan {
    pub fn record_affected(&self, count: u64) {
        self.span.record("db.affected_documents", count);
    }

    pub fn record_inserted_id(&self, id: &Bson) {
        if !self.span.is_disabled() {
            self.span.record("db.inserted_id", field::display(id));
        }
    }

    /// Runs `future` inside this span.
    pub fn instrument<F: Future>(&self, future: F) -> Instrumented<F> {
        future.instrument(self.span.clone())
    }

    /// Sets the span status from `result`, closes the span and hands the result back.
    ///
    /// The not-found condition is an expected outcome and keeps an `OK` status.
    pub fn finish<T>(self, result: DocumentStoreResult<T>) -> DocumentStoreResult<T> {
        if self.span.is_disabled() {
            return result;
        }

        match &result {
            Ok(_) => {
                self.span.record("otel.status_code", "OK");
            }
            Err(err) if err.is_not_found() => {
                self.span.record("otel.status_code", "OK");
            }
            Err(err) => {
                self.span.record("otel.status_code", "ERROR");
                self.span
                    .record("otel.status_message", field::display(err));
                scoped(self.dispatch.as_ref(), || {
                    warn!(
                        target: TRACE_TARGET,
                        parent: &self.span,
                        error = %err,
                        "document store operation failed"
                    );
                });
            }
        }

        result
    }
}

fn scoped<R>(dispatch: Option<&Dispatch>, f: impl FnOnce() -> R) -> R {
    match dispatch {
        Some(dispatch) => dispatcher::with_default(dispatch, f),
        None => f(),
    }
}
