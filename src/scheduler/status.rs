//! Guarded incident status transitions.
//!
//! [`StatusManager`] is the only writer of an incident's status. Each call to
//! [`StatusManager::transition`] holds the incident's lock for the whole
//! attempt and emits exactly one `INCIDENT_STATUS` event, whatever the
//! outcome. Terminal transitions release the incident's unit references.

use std::sync::Arc;

use crate::scheduler::incident::{Incident, IncidentState, IncidentStatus};
use crate::telemetry::{Counter, DispatchStats, EventCategory, EventSink};

#[derive(Debug, Clone)]
pub struct StatusManager {
    events: EventSink,
    stats: Arc<DispatchStats>,
}

impl StatusManager {
    pub fn new(events: EventSink, stats: Arc<DispatchStats>) -> Self {
        Self { events, stats }
    }

    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    /// Attempt to move `incident` to `requested`.
    ///
    /// Returns `true` when `requested` was committed. A request for a status
    /// that is never a valid target (Waiting, Paused) returns `false` but
    /// still closes the incident as Canceled.
    pub async fn transition(&self, incident: &Incident, requested: IncidentStatus) -> bool {
        let mut state = incident.state.lock().await;
        let current = incident.status();

        if state.released {
            self.events.warn(
                incident.id,
                EventCategory::IncidentStatus,
                format!(
                    "Rejected {} -> {}: incident already closed, status {}",
                    current, requested, current
                ),
            );
            return false;
        }

        let refusal = match requested {
            IncidentStatus::Assigned => {
                if current != IncidentStatus::Waiting {
                    Some("incident is not waiting")
                } else if state.assigned.iter().any(Option::is_none) {
                    Some("not every unit slot is filled")
                } else {
                    None
                }
            }
            IncidentStatus::InProgress => {
                (current == IncidentStatus::InProgress).then_some("already in progress")
            }
            IncidentStatus::Completed => {
                let mut busy = false;
                for unit in state.assigned.iter().flatten() {
                    if unit.is_active_on(incident.id).await {
                        busy = true;
                        break;
                    }
                }
                busy.then_some("units still en route or on scene")
            }
            IncidentStatus::TimedOut | IncidentStatus::Canceled => None,
            IncidentStatus::Waiting | IncidentStatus::Paused => {
                self.commit(incident, &mut state, IncidentStatus::Canceled);
                self.events.warn(
                    incident.id,
                    EventCategory::IncidentStatus,
                    format!(
                        "Invalid target status {} (was {}), incident canceled, status {}",
                        requested,
                        current,
                        IncidentStatus::Canceled
                    ),
                );
                return false;
            }
        };

        if let Some(reason) = refusal {
            self.events.warn(
                incident.id,
                EventCategory::IncidentStatus,
                format!(
                    "Rejected {} -> {}: {}, status {}",
                    current, requested, reason, current
                ),
            );
            return false;
        }

        self.commit(incident, &mut state, requested);
        self.events.info(
            incident.id,
            EventCategory::IncidentStatus,
            format!(
                "{} incident {} -> {}, status {}",
                incident.kind.name, current, requested, requested
            ),
        );
        true
    }

    fn commit(&self, incident: &Incident, state: &mut IncidentState, status: IncidentStatus) {
        incident.status_tx.send_replace(status);
        state.history.push(status);

        match status {
            IncidentStatus::Assigned => self.stats.record(Counter::Assigned),
            IncidentStatus::Completed => self.stats.record(Counter::Completed),
            IncidentStatus::TimedOut => self.stats.record(Counter::TimedOut),
            IncidentStatus::Canceled => self.stats.record(Counter::Canceled),
            _ => {}
        }

        if status.is_terminal() {
            // Units drop their own handle when they get back to Idle.
            state.assigned.clear();
            state.released = true;
        }
    }
}
