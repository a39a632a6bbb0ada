//! Simulated rescue units.
//!
//! Each unit is split in two halves:
//! - [`Unit`]: the shared handle the scheduler and dashboard read, and which
//!   incidents keep in their unit slots
//! - [`UnitTwin`]: the task that owns the unit's assignment channel and plays
//!   out the travel and service timeline
//!
//! # Lifecycle
//!
//! 1. The scheduler moves an idle unit to EnRoute with [`Unit`]'s assign step
//!    and then wakes its twin
//! 2. The twin travels to the incident and reports `InProgress` on arrival
//! 3. After the requirement's service time it reports `Completed` and heads
//!    back to base
//! 4. Back at base the unit is Idle again and drops its incident
//!
//! Shutdown cancels any of these waits; the interrupted incident is canceled.

pub mod twin;

pub use twin::{Unit, UnitId, UnitSnapshot, UnitStatus, UnitTwin};
