pub mod allocator;
pub mod incident;
pub mod priority;
pub mod queue;
pub mod status;

pub use allocator::{DispatchOutcome, Scheduler, TimeoutReason};
pub use incident::{Incident, IncidentId, IncidentStatus};
pub use priority::Priority;
pub use queue::IncidentQueue;
pub use status::StatusManager;
