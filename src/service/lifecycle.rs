//! Service lifecycle: admission of `track` calls and drain on shutdown.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;

use super::error::TelemetryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Running,
    Draining,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    Complete,
    Timeout { remaining: u32 },
}

pub(crate) struct Lifecycle {
    state: RwLock<LifecycleState>,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Uninitialized),
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    pub fn start(&self) {
        *self.state.write() = LifecycleState::Running;
    }

    /// Admit one in-flight call. The read lock is held while counting so a
    /// concurrent drain either sees the call or refuses it.
    pub fn enter(&self) -> Result<InFlightGuard, TelemetryError> {
        let state = self.state.read();
        match *state {
            LifecycleState::Running => {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                Ok(InFlightGuard {
                    counter: self.in_flight.clone(),
                    notify: self.notify.clone(),
                })
            }
            LifecycleState::Draining => Err(TelemetryError::ShuttingDown),
            LifecycleState::Uninitialized => Err(TelemetryError::NotInitialized),
        }
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop admitting calls and wait up to `timeout` for in-flight ones.
    pub async fn drain(&self, timeout: Duration) -> DrainResult {
        *self.state.write() = LifecycleState::Draining;

        let idle = tokio::time::timeout(timeout, self.wait_idle()).await;
        match (idle, self.in_flight_count()) {
            (Ok(()), _) | (Err(_), 0) => DrainResult::Complete,
            (Err(_), remaining) => DrainResult::Timeout { remaining },
        }
    }

    async fn wait_idle(&self) {
        loop {
            // Registered before the check so a guard dropped in between
            // still wakes us.
            let released = self.notify.notified();
            if self.in_flight_count() == 0 {
                return;
            }
            released.await;
        }
    }

    pub fn finish(&self) {
        *self.state.write() = LifecycleState::Uninitialized;
    }
}

/// Counts one in-flight call until dropped.
pub(crate) struct InFlightGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_before_start() {
        let lifecycle = Lifecycle::new();
        assert!(matches!(lifecycle.enter(), Err(TelemetryError::NotInitialized)));
        lifecycle.start();
        assert!(lifecycle.enter().is_ok());
    }

    #[tokio::test]
    async fn test_drain_with_nothing_in_flight() {
        let lifecycle = Lifecycle::new();
        lifecycle.start();
        assert_eq!(lifecycle.drain(Duration::from_millis(10)).await, DrainResult::Complete);
        assert!(matches!(lifecycle.enter(), Err(TelemetryError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_drain_waits_for_guard() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.start();
        let guard = lifecycle.enter().unwrap();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });
        let result = lifecycle.drain(Duration::from_secs(5)).await;
        release.await.unwrap();

        assert_eq!(result, DrainResult::Complete);
        assert_eq!(lifecycle.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let lifecycle = Lifecycle::new();
        lifecycle.start();
        let _guard = lifecycle.enter().unwrap();
        let result = lifecycle.drain(Duration::from_millis(10)).await;
        assert_eq!(result, DrainResult::Timeout { remaining: 1 });
    }
}
