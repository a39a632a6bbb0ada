use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::catalog::UnitType;
use crate::geo::{travel_time, Position};
use crate::scheduler::incident::{Incident, IncidentId, IncidentStatus};
use crate::scheduler::StatusManager;
use crate::telemetry::{EventCategory, EventSink};

pub type UnitId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnitStatus {
    Idle,
    EnRoute,
    OnScene,
    Returning,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitStatus::Idle => write!(f, "IDLE"),
            UnitStatus::EnRoute => write!(f, "EN_ROUTE"),
            UnitStatus::OnScene => write!(f, "ON_SCENE"),
            UnitStatus::Returning => write!(f, "RETURNING"),
        }
    }
}

/// The busy half of the lifecycle. A unit in one of these phases always
/// holds exactly one incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActivePhase {
    EnRoute,
    OnScene,
    Returning,
}

impl From<ActivePhase> for UnitStatus {
    fn from(phase: ActivePhase) -> Self {
        match phase {
            ActivePhase::EnRoute => UnitStatus::EnRoute,
            ActivePhase::OnScene => UnitStatus::OnScene,
            ActivePhase::Returning => UnitStatus::Returning,
        }
    }
}

struct Assignment {
    phase: ActivePhase,
    incident: Arc<Incident>,
}

struct UnitState {
    position: Position,
    /// `None` means Idle.
    assignment: Option<Assignment>,
}

impl UnitState {
    fn status(&self) -> UnitStatus {
        self.assignment
            .as_ref()
            .map_or(UnitStatus::Idle, |a| a.phase.into())
    }
}

/// Point-in-time view of a unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitSnapshot {
    pub id: UnitId,
    pub unit_type: String,
    pub status: UnitStatus,
    pub position: Position,
    pub incident_id: Option<IncidentId>,
}

/// Shared handle to one rescue unit.
///
/// Position and phase are written by the unit's own [`UnitTwin`], except for
/// the Idle to EnRoute step, which the scheduler performs through
/// [`Unit::assign`] under the unit's lock.
pub struct Unit {
    pub id: UnitId,
    pub unit_type: Arc<UnitType>,
    state: Mutex<UnitState>,
    wake_tx: mpsc::Sender<Arc<Incident>>,
}

impl Unit {
    /// Create an idle unit parked at its base, plus the receiving end of its
    /// assignment channel for the twin that will drive it.
    pub fn new(id: UnitId, unit_type: Arc<UnitType>) -> (Self, mpsc::Receiver<Arc<Incident>>) {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let unit = Self {
            id,
            state: Mutex::new(UnitState {
                position: unit_type.base,
                assignment: None,
            }),
            unit_type,
            wake_tx,
        };
        (unit, wake_rx)
    }

    pub async fn status(&self) -> UnitStatus {
        self.state.lock().await.status()
    }

    pub async fn position(&self) -> Position {
        self.state.lock().await.position
    }

    pub async fn incident_id(&self) -> Option<IncidentId> {
        self.state
            .lock()
            .await
            .assignment
            .as_ref()
            .map(|a| a.incident.id)
    }

    pub async fn snapshot(&self) -> UnitSnapshot {
        let state = self.state.lock().await;
        UnitSnapshot {
            id: self.id,
            unit_type: self.unit_type.name.clone(),
            status: state.status(),
            position: state.position,
            incident_id: state.assignment.as_ref().map(|a| a.incident.id),
        }
    }

    /// True while the unit is travelling to or working at `incident`.
    pub(crate) async fn is_active_on(&self, incident: IncidentId) -> bool {
        self.state.lock().await.assignment.as_ref().is_some_and(|a| {
            a.incident.id == incident
                && matches!(a.phase, ActivePhase::EnRoute | ActivePhase::OnScene)
        })
    }

    /// Idle to EnRoute with `incident` attached. Returns false if the unit
    /// was not idle.
    pub(crate) async fn assign(&self, incident: Arc<Incident>) -> bool {
        let mut state = self.state.lock().await;
        if state.assignment.is_some() {
            return false;
        }
        state.assignment = Some(Assignment {
            phase: ActivePhase::EnRoute,
            incident,
        });
        true
    }

    /// Undo an [`Unit::assign`] whose twin has not been woken yet.
    pub(crate) async fn withdraw(&self, incident: IncidentId) -> bool {
        let mut state = self.state.lock().await;
        let pending = state
            .assignment
            .as_ref()
            .is_some_and(|a| a.incident.id == incident && a.phase == ActivePhase::EnRoute);
        if pending {
            state.assignment = None;
        }
        pending
    }

    /// Wake the twin for an assignment previously made with [`Unit::assign`].
    pub(crate) fn wake(&self, incident: Arc<Incident>) -> bool {
        self.wake_tx.try_send(incident).is_ok()
    }

    async fn advance(&self, phase: ActivePhase, position: Position) {
        let mut state = self.state.lock().await;
        state.position = position;
        if let Some(assignment) = state.assignment.as_mut() {
            assignment.phase = phase;
        }
    }

    /// Back to Idle, dropping the incident handle.
    async fn finish(&self) -> Option<Arc<Incident>> {
        self.state.lock().await.assignment.take().map(|a| a.incident)
    }
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.id)
            .field("unit_type", &self.unit_type.name)
            .finish()
    }
}

/// The actor driving one [`Unit`] through
/// `Idle -> EnRoute -> OnScene -> Returning -> Idle`.
pub struct UnitTwin {
    unit: Arc<Unit>,
    wake_rx: mpsc::Receiver<Arc<Incident>>,
    status: StatusManager,
    events: EventSink,
    time_unit: Duration,
}

impl UnitTwin {
    pub fn new(
        unit: Arc<Unit>,
        wake_rx: mpsc::Receiver<Arc<Incident>>,
        status: StatusManager,
        events: EventSink,
        time_unit: Duration,
    ) -> Self {
        Self {
            unit,
            wake_rx,
            status,
            events,
            time_unit,
        }
    }

    pub fn unit(&self) -> &Arc<Unit> {
        &self.unit
    }

    /// Serve assignments until `shutdown` is cancelled. Cancellation also
    /// interrupts an incident in progress.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let incident = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                msg = self.wake_rx.recv() => match msg {
                    Some(incident) => incident,
                    None => break,
                },
            };

            self.respond(incident, &shutdown).await;
        }

        tracing::debug!(unit_id = self.unit.id, "Unit twin stopped");
    }

    async fn respond(&self, incident: Arc<Incident>, shutdown: &CancellationToken) {
        let unit = &self.unit;
        let type_name = &unit.unit_type.name;

        if unit.incident_id().await != Some(incident.id) {
            self.events.error(
                unit.id,
                EventCategory::Unit,
                format!(
                    "{} #{} woken for incident {} it was never assigned, ignoring",
                    type_name, unit.id, incident.id
                ),
            );
            return;
        }

        let Some(requirement) = incident.kind.requirement_for(type_name) else {
            self.events.error(
                unit.id,
                EventCategory::Unit,
                format!(
                    "{} #{} has no matching requirement in {} incident {}, canceling it",
                    type_name, unit.id, incident.kind.name, incident.id
                ),
            );
            // The incident cannot be served as planned without this unit.
            unit.finish().await;
            if !incident.status().is_terminal() {
                self.status
                    .transition(&incident, IncidentStatus::Canceled)
                    .await;
            }
            return;
        };
        let service_time = requirement.time_to_manage;

        let origin = unit.position().await;
        let travel = travel_time(origin, incident.location, unit.unit_type.speed);
        self.events.info(
            unit.id,
            EventCategory::Unit,
            format!(
                "{} #{} {} -> {}: en route {} -> {} for incident {}, travel time {}",
                type_name,
                unit.id,
                UnitStatus::Idle,
                UnitStatus::EnRoute,
                origin,
                incident.location,
                incident.id,
                travel
            ),
        );

        if !self.pause(travel, shutdown).await {
            return self.abort(&incident).await;
        }
        unit.advance(ActivePhase::OnScene, incident.location).await;
        self.events.info(
            unit.id,
            EventCategory::Unit,
            format!(
                "{} #{} {} -> {}: arrived at {} for incident {}",
                type_name,
                unit.id,
                UnitStatus::EnRoute,
                UnitStatus::OnScene,
                incident.location,
                incident.id
            ),
        );
        self.status
            .transition(&incident, IncidentStatus::InProgress)
            .await;

        if !self.pause(service_time, shutdown).await {
            return self.abort(&incident).await;
        }
        unit.advance(ActivePhase::Returning, unit.unit_type.base).await;
        self.events.info(
            unit.id,
            EventCategory::Unit,
            format!(
                "{} #{} {} -> {}: finished incident {} after {}, returning to {}",
                type_name,
                unit.id,
                UnitStatus::OnScene,
                UnitStatus::Returning,
                incident.id,
                service_time,
                unit.unit_type.base
            ),
        );
        self.status
            .transition(&incident, IncidentStatus::Completed)
            .await;

        if !self.pause(travel, shutdown).await {
            return self.abort(&incident).await;
        }
        unit.finish().await;
        self.events.info(
            unit.id,
            EventCategory::Unit,
            format!(
                "{} #{} {} -> {}: service completed for incident {}",
                type_name,
                unit.id,
                UnitStatus::Returning,
                UnitStatus::Idle,
                incident.id
            ),
        );
    }

    /// Sleep for `units` time units. Returns false if cancelled first.
    async fn pause(&self, units: u64, shutdown: &CancellationToken) -> bool {
        if units == 0 {
            return true;
        }
        let duration = self
            .time_unit
            .saturating_mul(u32::try_from(units).unwrap_or(u32::MAX));
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn abort(&self, incident: &Incident) {
        self.unit.finish().await;
        self.events.warn(
            self.unit.id,
            EventCategory::Unit,
            format!(
                "{} #{} interrupted by shutdown during incident {}",
                self.unit.unit_type.name, self.unit.id, incident.id
            ),
        );
        if !incident.status().is_terminal() {
            self.status
                .transition(incident, IncidentStatus::Canceled)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IncidentKind, Requirement};
    use crate::telemetry::DispatchStats;

    #[tokio::test(start_paused = true)]
    async fn unit_without_matching_requirement_cancels_incident() {
        let truck = Arc::new(UnitType::new("Truck", 5, Position::new(0, 0)));
        let boat = Arc::new(UnitType::new("Boat", 5, Position::new(0, 0)));
        let kind = Arc::new(IncidentKind {
            name: "Fire".to_string(),
            priority: 2,
            requirements: vec![Requirement {
                unit_type: truck,
                count: 1,
                time_to_manage: 4,
            }],
        });
        let incident = Arc::new(Incident::new(1, kind, Position::new(10, 0)));

        let stats = Arc::new(DispatchStats::default());
        let status = StatusManager::new(EventSink::disabled(), stats.clone());
        let (unit, wake_rx) = Unit::new(7, boat);
        let unit = Arc::new(unit);
        let twin = UnitTwin::new(
            unit.clone(),
            wake_rx,
            status.clone(),
            EventSink::disabled(),
            Duration::from_secs(1),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(twin.run(shutdown.clone()));

        incident.attach_units(&[unit.clone()]).await;
        assert!(status.transition(&incident, IncidentStatus::Assigned).await);
        assert!(unit.assign(incident.clone()).await);
        assert!(unit.wake(incident.clone()));

        let mut watch = incident.subscribe();
        tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|s| s.is_terminal()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(incident.status(), IncidentStatus::Canceled);
        assert!(incident.is_released().await);
        assert_eq!(unit.status().await, UnitStatus::Idle);
        assert_eq!(unit.incident_id().await, None);
        assert_eq!(stats.snapshot().canceled, 1);

        // The twin keeps serving after skipping the assignment.
        assert!(!handle.is_finished());
        shutdown.cancel();
        handle.await.unwrap();
    }
}
