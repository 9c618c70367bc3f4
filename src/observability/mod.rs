//! Self-observability: structured logging, spans and pipeline metrics.

mod logging;
mod metrics;
mod spans;
mod store;

pub use self::logging::{init_logging, LogConfig, LogError, LogFormat, LOG_ENV};
pub use self::metrics::{
    PipelineMetrics, EVENTS_FAILED, EVENTS_RATE_LIMITED, EVENTS_REJECTED, EVENTS_TRACKED, EXPORTS,
    QUERIES, QUERY_LATENCY_MS, TRACK_LATENCY_MS,
};
pub use self::spans::{PipelineSpan, SpanExt};
pub use self::store::{HistogramSummary, MetricsSnapshot, MetricsStore};
