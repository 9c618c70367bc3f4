//! Event model: the unit of record, its enrichment rules and query filters.

mod enrich;
mod filter;
mod model;

pub use enrich::{enrich, new_id, service_context, UNKNOWN};
pub use filter::{FilterError, QueryFilter, TimeRange};
pub use model::{session_status, EventContext, EventType, NewEvent, SessionStatus, TelemetryEvent};
