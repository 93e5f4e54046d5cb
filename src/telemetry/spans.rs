//! Span helpers for scheduled tasks.

use std::fmt::Display;

use tracing::{info_span, Span};

/// Fields a task span carries once the task retires.
pub trait SpanExt {
    /// `status` is one of `ok`, `failed`, `faulted` or `cancelled`.
    fn record_retired(&self, status: &'static str, waiters: usize);

    fn record_error(&self, error: &dyn Display);
}

impl SpanExt for Span {
    fn record_retired(&self, status: &'static str, waiters: usize) {
        self.record("status", status);
        self.record("waiters", waiters);
    }

    fn record_error(&self, error: &dyn Display) {
        self.record("error.message", error.to_string().as_str());
    }
}

/// Factory for per-task spans.
pub struct TaskSpan;

impl TaskSpan {
    /// One span per task entry, entered around each poll. Promotion does not
    /// update `priority`; it records the priority at submission.
    pub fn new(kind: &str, name: &str, priority: &str) -> Span {
        info_span!(
            "task",
            kind = %kind,
            name = %name,
            priority = %priority,
            status = tracing::field::Empty,
            waiters = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
