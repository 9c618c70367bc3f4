//! Incremental analytics over tracked events.
//!
//! The engine keeps running aggregates only; it never re-reads storage.
//! Named operations expose them as JSON so plugins can rewrite both the
//! parameters and the result through the analytics hooks.

mod stats;

pub use stats::RunningStats;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::AnalyticsConfig;
use crate::event::TelemetryEvent;
use stats::{top_n, Aggregates};

/// Error rate above which an insight is raised.
const ERROR_RATE_WARNING: f64 = 0.1;
/// Mean duration (ms) above which an action is reported as slow.
const SLOW_ACTION_MS: f64 = 5_000.0;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("unknown analytics operation: {0}")]
    UnknownOperation(String),

    #[error("invalid analytics parameters: {0}")]
    InvalidParams(String),

    #[error("analytics is disabled")]
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub level: InsightLevel,
    pub kind: String,
    pub message: String,
}

/// Operations understood by [`AnalyticsEngine::compute`].
pub const OPERATIONS: &[&str] = &["summary", "topCategories", "topActions", "sessions", "durations", "insights"];

pub struct AnalyticsEngine {
    top_n: usize,
    aggregates: RwLock<Aggregates>,
}

impl AnalyticsEngine {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            top_n: config.top_n.max(1),
            aggregates: RwLock::new(Aggregates::default()),
        }
    }

    pub fn record(&self, event: &TelemetryEvent) {
        self.aggregates.write().record(event);
    }

    pub fn total_events(&self) -> u64 {
        self.aggregates.read().total
    }

    /// Run a named operation. `params` may carry a `limit` for ranked
    /// operations.
    pub fn compute(&self, operation: &str, params: &Value) -> Result<Value, AnalyticsError> {
        let limit = match params.get("limit") {
            None | Some(Value::Null) => self.top_n,
            Some(v) => v
                .as_u64()
                .filter(|n| *n > 0)
                .map(|n| n as usize)
                .ok_or_else(|| AnalyticsError::InvalidParams(format!("limit must be a positive integer, got {v}")))?,
        };

        let agg = self.aggregates.read();
        let value = match operation {
            "summary" => {
                let (active, completed, failed) = agg.session_counts();
                let by_type: serde_json::Map<String, Value> = agg
                    .by_type
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), json!(v)))
                    .collect();
                json!({
                    "totalEvents": agg.total,
                    "sessions": { "active": active, "completed": completed, "error": failed },
                    "errorRate": agg.error_rate(),
                    "byType": by_type,
                    "value": agg.values,
                })
            }
            "topCategories" => Value::Array(
                top_n(&agg.by_category, limit)
                    .into_iter()
                    .map(|(category, count)| json!({ "category": category, "count": count }))
                    .collect(),
            ),
            "topActions" => Value::Array(
                top_n(&agg.by_action, limit)
                    .into_iter()
                    .map(|((category, action), count)| {
                        json!({ "category": category, "action": action, "count": count })
                    })
                    .collect(),
            ),
            "sessions" => {
                let (active, completed, failed) = agg.session_counts();
                json!({
                    "total": agg.sessions.len(),
                    "active": active,
                    "completed": completed,
                    "error": failed,
                })
            }
            "durations" => {
                let mut entries: Vec<_> = agg.durations.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                Value::Array(
                    entries
                        .into_iter()
                        .map(|(key, stats)| {
                            json!({
                                "key": key,
                                "count": stats.count,
                                "min": stats.min,
                                "max": stats.max,
                                "mean": stats.mean(),
                            })
                        })
                        .collect(),
                )
            }
            "insights" => {
                drop(agg);
                serde_json::to_value(self.insights()).map_err(|e| AnalyticsError::InvalidParams(e.to_string()))?
            }
            other => return Err(AnalyticsError::UnknownOperation(other.to_string())),
        };
        Ok(value)
    }

    /// Observations worth surfacing, derived from the current aggregates.
    pub fn insights(&self) -> Vec<Insight> {
        let agg = self.aggregates.read();
        let mut insights = Vec::new();
        if agg.total == 0 {
            return insights;
        }

        let error_rate = agg.error_rate();
        if error_rate > ERROR_RATE_WARNING {
            insights.push(Insight {
                level: InsightLevel::Warning,
                kind: "errorRate".into(),
                message: format!("{:.1}% of events are errors", error_rate * 100.0),
            });
        }

        let mut slow: Vec<(&String, f64)> = agg
            .durations
            .iter()
            .filter_map(|(key, stats)| stats.mean().map(|m| (key, m)))
            .filter(|(_, mean)| *mean > SLOW_ACTION_MS)
            .collect();
        slow.sort_by(|a, b| a.0.cmp(b.0));
        for (key, mean) in slow {
            insights.push(Insight {
                level: InsightLevel::Warning,
                kind: "slowAction".into(),
                message: format!("{key} averages {mean:.0}ms"),
            });
        }

        if let Some((category, count)) = top_n(&agg.by_category, 1).into_iter().next() {
            insights.push(Insight {
                level: InsightLevel::Info,
                kind: "topCategory".into(),
                message: format!("{category} accounts for {count} of {} events", agg.total),
            });
        }
        insights
    }

    pub fn reset(&self) {
        *self.aggregates.write() = Aggregates::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{enrich, EventContext, EventType, NewEvent};

    fn engine() -> AnalyticsEngine {
        AnalyticsEngine::new(&AnalyticsConfig::default())
    }

    fn track(engine: &AnalyticsEngine, session: &str, category: &str, event_type: EventType, duration: Option<f64>) {
        let mut input = NewEvent::new(category, "run").session(session).event_type(event_type);
        if let Some(d) = duration {
            input = input.duration_ms(d);
        }
        engine.record(&enrich(input, &EventContext::default()));
    }

    #[test]
    fn test_summary_counts_sessions() {
        let engine = engine();
        track(&engine, "s1", "claude", EventType::Start, None);
        track(&engine, "s1", "claude", EventType::End, None);
        track(&engine, "s2", "claude", EventType::Start, None);
        track(&engine, "s3", "tool", EventType::Error, None);

        let summary = engine.compute("summary", &Value::Null).unwrap();
        assert_eq!(summary["totalEvents"], 4);
        assert_eq!(summary["sessions"]["completed"], 1);
        assert_eq!(summary["sessions"]["active"], 1);
        assert_eq!(summary["sessions"]["error"], 1);
        assert_eq!(summary["errorRate"], 0.25);
    }

    #[test]
    fn test_top_categories_respects_limit() {
        let engine = engine();
        track(&engine, "s", "a", EventType::Custom, None);
        track(&engine, "s", "b", EventType::Custom, None);
        track(&engine, "s", "b", EventType::Custom, None);

        let top = engine.compute("topCategories", &json!({ "limit": 1 })).unwrap();
        assert_eq!(top, json!([{ "category": "b", "count": 2 }]));
        assert!(matches!(
            engine.compute("topCategories", &json!({ "limit": -1 })),
            Err(AnalyticsError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_insights_flag_errors_and_slow_actions() {
        let engine = engine();
        track(&engine, "s", "tool", EventType::Error, Some(9_000.0));
        track(&engine, "s", "tool", EventType::Custom, Some(7_000.0));

        let kinds: Vec<String> = engine.insights().into_iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec!["errorRate", "slowAction", "topCategory"]);
    }

    #[test]
    fn test_unknown_operation() {
        let err = engine().compute("forecast", &Value::Null).unwrap_err();
        assert!(matches!(err, AnalyticsError::UnknownOperation(op) if op == "forecast"));
    }
}
