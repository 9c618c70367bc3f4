//! Query filters shared by every storage provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::model::{EventType, TelemetryEvent};

/// Errors raised by filter validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("limit must be a positive number, got {0}")]
    InvalidLimit(String),

    #[error("offset must be a non-negative number, got {0}")]
    InvalidOffset(String),

    #[error("time range start is after end")]
    InvertedTimeRange,

    #[error("invalid filter field {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl QueryFilter {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reject filters no provider can honour.
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.limit == Some(0) {
            return Err(FilterError::InvalidLimit("0".to_string()));
        }
        if let Some(range) = &self.time_range {
            if range.start > range.end {
                return Err(FilterError::InvertedTimeRange);
            }
        }
        Ok(())
    }

    /// Parse a filter from loosely typed JSON, e.g. from a CLI or plugin.
    ///
    /// `limit` must be a positive integer and `offset` a non-negative one;
    /// strings, fractions and negative numbers are rejected rather than
    /// coerced.
    pub fn from_json(value: &Value) -> Result<Self, FilterError> {
        let obj = value.as_object().ok_or_else(|| FilterError::InvalidField {
            field: "filter".to_string(),
            reason: "expected an object".to_string(),
        })?;

        let limit = match obj.get("limit") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_u64() {
                Some(n) if n > 0 => Some(n as usize),
                _ => return Err(FilterError::InvalidLimit(v.to_string())),
            },
        };
        let offset = match obj.get("offset") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_u64() {
                Some(n) => Some(n as usize),
                None => return Err(FilterError::InvalidOffset(v.to_string())),
            },
        };

        let mut rest = obj.clone();
        rest.remove("limit");
        rest.remove("offset");
        let mut filter: QueryFilter =
            serde_json::from_value(Value::Object(rest)).map_err(|e| FilterError::InvalidField {
                field: "filter".to_string(),
                reason: e.to_string(),
            })?;
        filter.limit = limit;
        filter.offset = offset;
        filter.validate()?;
        Ok(filter)
    }

    /// Check whether an event satisfies every set predicate.
    pub fn matches(&self, event: &TelemetryEvent) -> bool {
        if let Some(session) = &self.session_id {
            if &event.session_id != session {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &event.category != category {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &event.action != action {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if event.event_type != event_type {
                return false;
            }
        }
        if let Some(range) = &self.time_range {
            if !range.contains(event.timestamp) {
                return false;
            }
        }
        true
    }

    /// Filter, then page. Input order is preserved.
    pub fn apply<I>(&self, events: I) -> Vec<TelemetryEvent>
    where
        I: IntoIterator<Item = TelemetryEvent>,
    {
        let matching = events
            .into_iter()
            .filter(|e| self.matches(e))
            .skip(self.offset.unwrap_or(0));
        match self.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{enrich, EventContext, NewEvent};
    use chrono::Duration;
    use serde_json::json;

    fn event(category: &str, session: &str) -> TelemetryEvent {
        enrich(
            NewEvent::new(category, "act").session(session),
            &EventContext::default(),
        )
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        let filter = QueryFilter::default().with_limit(0);
        assert_eq!(filter.validate(), Err(FilterError::InvalidLimit("0".into())));
    }

    #[test]
    fn test_from_json_rejects_bad_limits() {
        assert!(matches!(
            QueryFilter::from_json(&json!({"limit": -5})),
            Err(FilterError::InvalidLimit(_))
        ));
        assert!(matches!(
            QueryFilter::from_json(&json!({"limit": "10"})),
            Err(FilterError::InvalidLimit(_))
        ));
        assert!(matches!(
            QueryFilter::from_json(&json!({"limit": 2.5})),
            Err(FilterError::InvalidLimit(_))
        ));
        assert!(matches!(
            QueryFilter::from_json(&json!({"offset": -1})),
            Err(FilterError::InvalidOffset(_))
        ));
    }

    #[test]
    fn test_from_json_accepts_valid_filter() {
        let filter =
            QueryFilter::from_json(&json!({"sessionId": "s1", "eventType": "end", "limit": 10}))
                .unwrap();
        assert_eq!(filter.session_id.as_deref(), Some("s1"));
        assert_eq!(filter.event_type, Some(EventType::End));
        assert_eq!(filter.limit, Some(10));
    }

    #[test]
    fn test_inverted_time_range_is_rejected() {
        let now = Utc::now();
        let filter = QueryFilter {
            time_range: Some(TimeRange {
                start: now,
                end: now - Duration::seconds(5),
            }),
            ..QueryFilter::default()
        };
        assert_eq!(filter.validate(), Err(FilterError::InvertedTimeRange));
    }

    #[test]
    fn test_apply_filters_and_pages_in_order() {
        let events = vec![
            event("a", "s1"),
            event("b", "s1"),
            event("a", "s2"),
            event("a", "s1"),
        ];
        let filter = QueryFilter {
            category: Some("a".into()),
            offset: Some(1),
            limit: Some(1),
            ..QueryFilter::default()
        };
        let out = filter.apply(events.clone());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, events[2].id);
    }
}
