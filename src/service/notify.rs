//! Lifecycle and pipeline notifications for subscribers.

use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// What the service reports to its subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServiceEvent {
    Initialized { providers: Vec<String> },
    EventTracked { event_id: String, session_id: String },
    EventError { event_id: String, error: String },
    StorageError { provider: String, operation: String, error: String },
    Shutdown,
}

impl ServiceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized { .. } => "initialized",
            Self::EventTracked { .. } => "event:tracked",
            Self::EventError { .. } => "event:error",
            Self::StorageError { .. } => "storage:error",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Clone)]
pub(crate) struct Notifier {
    sender: broadcast::Sender<ServiceEvent>,
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn emit(&self, event: ServiceEvent) {
        tracing::trace!(notification = event.name(), "service notification");
        // Nobody listening is fine.
        let _ = self.sender.send(event);
    }

    pub fn storage_error(&self, provider: &str, operation: &str, error: impl ToString) {
        self.emit(ServiceEvent::StorageError {
            provider: provider.to_string(),
            operation: operation.to_string(),
            error: error.to_string(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.sender.subscribe()
    }
}
