//! Health reporting.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub state: HealthState,
    pub accepting_events: bool,
    pub providers: Vec<String>,
    pub open_circuits: Vec<String>,
    pub plugins: usize,
    pub uptime_secs: u64,
}

/// Not accepting, or every provider's circuit open: unhealthy. Some
/// circuits open: degraded.
pub(crate) fn compute_state(accepting: bool, providers: &[String], open_circuits: &[String]) -> HealthState {
    if !accepting || providers.is_empty() {
        return HealthState::Unhealthy;
    }
    let open = providers.iter().filter(|p| open_circuits.contains(p)).count();
    if open == providers.len() {
        HealthState::Unhealthy
    } else if open > 0 {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_states() {
        let providers = names(&["a", "b"]);
        assert_eq!(compute_state(true, &providers, &[]), HealthState::Healthy);
        assert_eq!(compute_state(true, &providers, &names(&["a"])), HealthState::Degraded);
        assert_eq!(compute_state(true, &providers, &names(&["a", "b"])), HealthState::Unhealthy);
        assert_eq!(compute_state(false, &providers, &[]), HealthState::Unhealthy);
    }
}
