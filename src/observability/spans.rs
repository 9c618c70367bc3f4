//! Spans for the service operations.
//!
//! Every span declares `status`, `error.message` and `latency_ms` up front
//! as empty fields; [`SpanExt`] fills them once the operation settles.

use std::fmt::Display;
use std::time::Instant;

use tracing::field::Empty;
use tracing::{info_span, Span};

pub trait SpanExt {
    fn record_result<T, E: Display>(&self, result: &Result<T, E>);

    /// `latency_ms` since `started`, then the outcome.
    fn complete<T, E: Display>(&self, started: Instant, result: &Result<T, E>);
}

impl SpanExt for Span {
    fn record_result<T, E: Display>(&self, result: &Result<T, E>) {
        let status = if let Err(e) = result {
            self.record("error.message", tracing::field::display(e));
            "error"
        } else {
            "ok"
        };
        self.record("status", status);
    }

    fn complete<T, E: Display>(&self, started: Instant, result: &Result<T, E>) {
        self.record("latency_ms", started.elapsed().as_millis() as u64);
        self.record_result(result);
    }
}

pub struct PipelineSpan;

impl PipelineSpan {
    pub fn track(event_id: &str, category: &str) -> Span {
        info_span!(
            "telemetry.track",
            event_id = %event_id,
            category = %category,
            status = Empty,
            error.message = Empty,
            latency_ms = Empty,
        )
    }

    /// `results` is recorded on success.
    pub fn query(providers: usize) -> Span {
        info_span!(
            "telemetry.query",
            providers,
            results = Empty,
            status = Empty,
            error.message = Empty,
            latency_ms = Empty,
        )
    }

    /// `total_events` is recorded on success.
    pub fn export(format: &str) -> Span {
        info_span!(
            "telemetry.export",
            format = %format,
            total_events = Empty,
            status = Empty,
            error.message = Empty,
            latency_ms = Empty,
        )
    }
}
