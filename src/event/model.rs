//! Telemetry event value types.
//!
//! `NewEvent` is what instrumented call sites hand to the pipeline; every
//! field except the classification pair may be omitted. `TelemetryEvent` is
//! the enriched record that plugins, providers and exporters see, and it
//! always carries an id, session id, event type and timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle role of an event within its session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Start,
    Stream,
    End,
    Error,
    #[default]
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stream => "stream",
            Self::End => "end",
            Self::Error => "error",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stream" => Ok(Self::Stream),
            "end" => Ok(Self::End),
            "error" => Ok(Self::Error),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// Environment the event was produced in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl EventContext {
    /// Fill every unset field from `defaults`. Fields already present on
    /// `self` are kept; `extra` keys merge with `self` winning on conflict.
    pub fn merged_over(self, defaults: &EventContext) -> EventContext {
        let mut extra = defaults.extra.clone();
        for (key, value) in self.extra {
            extra.insert(key, value);
        }
        EventContext {
            environment: self.environment.or_else(|| defaults.environment.clone()),
            version: self.version.or_else(|| defaults.version.clone()),
            platform: self.platform.or_else(|| defaults.platform.clone()),
            hostname: self.hostname.or_else(|| defaults.hostname.clone()),
            user_id: self.user_id.or_else(|| defaults.user_id.clone()),
            extra,
        }
    }
}

/// Caller-supplied event before enrichment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub context: EventContext,
}

impl NewEvent {
    pub fn new(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            action: Some(action.into()),
            ..Self::default()
        }
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn duration_ms(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }
}

/// Enriched unit of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub id: String,
    pub session_id: String,
    pub event_type: EventType,
    pub category: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub context: EventContext,
}

/// Session state as derived from the events sharing a session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Error,
}

/// Derive a session's status from its events. Any `error` event marks the
/// session failed; otherwise an `end` event completes it.
pub fn session_status(events: &[TelemetryEvent]) -> SessionStatus {
    if events.iter().any(|e| e.event_type == EventType::Error) {
        SessionStatus::Error
    } else if events.iter().any(|e| e.event_type == EventType::End) {
        SessionStatus::Completed
    } else {
        SessionStatus::Active
    }
}
