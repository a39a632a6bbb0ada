use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::catalog::IncidentKind;
use crate::geo::{travel_time, Position};
use crate::scheduler::incident::{Incident, IncidentStatus};
use crate::scheduler::priority::Priority;
use crate::scheduler::queue::IncidentQueue;
use crate::scheduler::status::StatusManager;
use crate::telemetry::{EventCategory, EventSink};
use crate::worker::twin::{Unit, UnitId, UnitStatus};

/// Why an incident could not be served in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutReason {
    DeadlineExceeded {
        estimate: u64,
        budget: u64,
    },
    InsufficientUnits {
        unit_type: String,
        needed: usize,
        available: usize,
    },
}

impl std::fmt::Display for TimeoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutReason::DeadlineExceeded { estimate, budget } => write!(
                f,
                "estimated handling time {} exceeds budget {}",
                estimate, budget
            ),
            TimeoutReason::InsufficientUnits {
                unit_type,
                needed,
                available,
            } => write!(
                f,
                "needs {} idle {} units, only {} available",
                needed, unit_type, available
            ),
        }
    }
}

/// What the scheduler did with one incident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Assigned(Vec<UnitId>),
    /// The kind required no units, so there was nothing to wait for.
    Completed,
    TimedOut(TimeoutReason),
    Canceled,
}

/// Worst-case handling time: the slowest requirement bounds completion,
/// since units work in parallel. Travel is measured from each type's base.
pub fn estimate_duration(kind: &IncidentKind, location: Position) -> u64 {
    kind.requirements
        .iter()
        .map(|r| {
            travel_time(r.unit_type.base, location, r.unit_type.speed)
                .saturating_add(r.time_to_manage)
        })
        .max()
        .unwrap_or(0)
}

/// The allocation loop.
///
/// A single scheduler processes incidents one at a time, which is what lets
/// the Idle checks in [`Scheduler::dispatch`] go without a global lock: it is
/// the only component that moves units out of Idle.
pub struct Scheduler {
    queue: Arc<IncidentQueue>,
    units: Vec<Arc<Unit>>,
    status: StatusManager,
    events: EventSink,
}

impl Scheduler {
    pub fn new(
        queue: Arc<IncidentQueue>,
        units: Vec<Arc<Unit>>,
        status: StatusManager,
        events: EventSink,
    ) -> Self {
        Self {
            queue,
            units,
            status,
            events,
        }
    }

    /// Dispatch queued incidents until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(units = self.units.len(), "Scheduler started");

        loop {
            let incident = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                incident = self.queue.take() => incident,
            };
            self.dispatch(incident).await;
        }

        tracing::info!("Scheduler stopped");
    }

    /// Evaluate one dequeued incident and either commit a full set of units to
    /// it or close it. Never requeues.
    pub async fn dispatch(&self, incident: Arc<Incident>) -> DispatchOutcome {
        self.events.info(
            incident.id,
            EventCategory::Scheduler,
            format!(
                "Evaluating {} incident at {} (priority {})",
                incident.kind.name,
                incident.location,
                incident.priority()
            ),
        );

        let Some(priority) = Priority::from_level(incident.priority()) else {
            self.events.warn(
                incident.id,
                EventCategory::Scheduler,
                format!("Invalid priority {}, canceling", incident.priority()),
            );
            self.status
                .transition(&incident, IncidentStatus::Canceled)
                .await;
            return DispatchOutcome::Canceled;
        };

        let estimate = estimate_duration(&incident.kind, incident.location);
        incident.set_estimated_duration(estimate).await;

        if let Some(budget) = priority.budget() {
            if estimate > budget {
                return self
                    .time_out(&incident, TimeoutReason::DeadlineExceeded { estimate, budget })
                    .await;
            }
        }

        let units = match self.allocate(&incident.kind).await {
            Ok(units) => units,
            Err(reason) => return self.time_out(&incident, reason).await,
        };

        if units.is_empty() {
            self.status
                .transition(&incident, IncidentStatus::Assigned)
                .await;
            self.status
                .transition(&incident, IncidentStatus::Completed)
                .await;
            return DispatchOutcome::Completed;
        }

        self.commit(&incident, units, estimate).await
    }

    /// Greedy all-or-nothing selection, in roster order. No unit is state
    /// changed here; a shortfall simply discards the selection.
    async fn allocate(&self, kind: &IncidentKind) -> Result<Vec<Arc<Unit>>, TimeoutReason> {
        let mut selected: Vec<Arc<Unit>> = Vec::with_capacity(kind.total_units());

        for requirement in &kind.requirements {
            let mut found = 0;
            for unit in &self.units {
                if found == requirement.count {
                    break;
                }
                if unit.unit_type.name != requirement.unit_type.name
                    || selected.iter().any(|s| s.id == unit.id)
                {
                    continue;
                }
                if unit.status().await == UnitStatus::Idle {
                    selected.push(unit.clone());
                    found += 1;
                }
            }

            if found < requirement.count {
                return Err(TimeoutReason::InsufficientUnits {
                    unit_type: requirement.unit_type.name.clone(),
                    needed: requirement.count,
                    available: found,
                });
            }
        }

        Ok(selected)
    }

    async fn commit(
        &self,
        incident: &Arc<Incident>,
        units: Vec<Arc<Unit>>,
        estimate: u64,
    ) -> DispatchOutcome {
        incident.attach_units(&units).await;

        let mut committed: Vec<&Arc<Unit>> = Vec::with_capacity(units.len());
        for unit in &units {
            if unit.assign(incident.clone()).await {
                committed.push(unit);
                continue;
            }
            self.events.error(
                incident.id,
                EventCategory::Scheduler,
                format!(
                    "{} #{} left Idle during allocation, rolling back",
                    unit.unit_type.name, unit.id
                ),
            );
            return self.roll_back(incident, &committed).await;
        }

        if !self
            .status
            .transition(incident, IncidentStatus::Assigned)
            .await
        {
            return self.roll_back(incident, &committed).await;
        }

        for unit in &units {
            if !unit.wake(incident.clone()) {
                self.events.error(
                    unit.id,
                    EventCategory::Scheduler,
                    format!(
                        "{} #{} twin is not running, incident {} will stall",
                        unit.unit_type.name, unit.id, incident.id
                    ),
                );
            }
        }

        let roster: Vec<String> = units
            .iter()
            .map(|u| format!("{} #{}", u.unit_type.name, u.id))
            .collect();
        self.events.info(
            incident.id,
            EventCategory::Scheduler,
            format!(
                "Assigned [{}] to {} incident, estimated {} time units",
                roster.join(", "),
                incident.kind.name,
                estimate
            ),
        );

        DispatchOutcome::Assigned(units.iter().map(|u| u.id).collect())
    }

    async fn roll_back(&self, incident: &Incident, committed: &[&Arc<Unit>]) -> DispatchOutcome {
        for unit in committed {
            unit.withdraw(incident.id).await;
        }
        self.status
            .transition(incident, IncidentStatus::Canceled)
            .await;
        DispatchOutcome::Canceled
    }

    async fn time_out(&self, incident: &Incident, reason: TimeoutReason) -> DispatchOutcome {
        self.events.warn(
            incident.id,
            EventCategory::Scheduler,
            format!("{} incident timed out: {}", incident.kind.name, reason),
        );
        self.status
            .transition(incident, IncidentStatus::TimedOut)
            .await;
        DispatchOutcome::TimedOut(reason)
    }
}
