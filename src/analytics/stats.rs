//! Incremental aggregates fed by the tracked event stream.

use std::collections::HashMap;

use serde::Serialize;

use crate::event::{EventType, SessionStatus, TelemetryEvent};

/// Running summary of a numeric series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl RunningStats {
    pub fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SessionState {
    pub events: u64,
    pub errors: u64,
    pub ended: bool,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        if self.errors > 0 {
            SessionStatus::Error
        } else if self.ended {
            SessionStatus::Completed
        } else {
            SessionStatus::Active
        }
    }
}

/// Everything the engine accumulates.
#[derive(Debug, Default)]
pub(crate) struct Aggregates {
    pub total: u64,
    pub by_type: HashMap<EventType, u64>,
    pub by_category: HashMap<String, u64>,
    pub by_action: HashMap<(String, String), u64>,
    pub durations: HashMap<String, RunningStats>,
    pub values: RunningStats,
    pub sessions: HashMap<String, SessionState>,
}

impl Aggregates {
    pub fn record(&mut self, event: &TelemetryEvent) {
        self.total += 1;
        *self.by_type.entry(event.event_type).or_default() += 1;
        *self.by_category.entry(event.category.clone()).or_default() += 1;
        *self
            .by_action
            .entry((event.category.clone(), event.action.clone()))
            .or_default() += 1;

        if let Some(duration) = event.duration {
            self.durations
                .entry(format!("{}/{}", event.category, event.action))
                .or_default()
                .record(duration);
        }
        if let Some(value) = event.value {
            self.values.record(value);
        }

        let session = self.sessions.entry(event.session_id.clone()).or_default();
        session.events += 1;
        match event.event_type {
            EventType::Error => session.errors += 1,
            EventType::End => session.ended = true,
            _ => {}
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let errors = self.by_type.get(&EventType::Error).copied().unwrap_or(0);
        errors as f64 / self.total as f64
    }

    pub fn session_counts(&self) -> (u64, u64, u64) {
        self.sessions
            .values()
            .fold((0, 0, 0), |(active, completed, failed), s| match s.status() {
                SessionStatus::Active => (active + 1, completed, failed),
                SessionStatus::Completed => (active, completed + 1, failed),
                SessionStatus::Error => (active, completed, failed + 1),
            })
    }
}

/// Top `n` entries by count, ties broken by key.
pub(crate) fn top_n<K: Clone + Ord>(counts: &HashMap<K, u64>, n: usize) -> Vec<(K, u64)> {
    let mut ranked: Vec<(K, u64)> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        assert_eq!(stats.mean(), None);
        for v in [4.0, 1.0, 7.0] {
            stats.record(v);
        }
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 7.0);
        assert_eq!(stats.mean(), Some(4.0));
    }

    #[test]
    fn test_top_n_orders_by_count_then_key() {
        let counts: HashMap<String, u64> = [("b", 2), ("a", 2), ("c", 5)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        let top = top_n(&counts, 2);
        assert_eq!(top, vec![("c".to_string(), 5), ("a".to_string(), 2)]);
    }
}
