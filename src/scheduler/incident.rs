use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::catalog::IncidentKind;
use crate::geo::Position;
use crate::worker::twin::{Unit, UnitId};

pub type IncidentId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentStatus {
    Waiting,
    Assigned,
    InProgress,
    Paused,
    Completed,
    Canceled,
    TimedOut,
}

impl IncidentStatus {
    /// Completed, Canceled and TimedOut end an incident's life.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IncidentStatus::Completed | IncidentStatus::Canceled | IncidentStatus::TimedOut
        )
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Waiting => write!(f, "WAITING"),
            IncidentStatus::Assigned => write!(f, "ASSIGNED"),
            IncidentStatus::InProgress => write!(f, "IN_PROGRESS"),
            IncidentStatus::Paused => write!(f, "PAUSED"),
            IncidentStatus::Completed => write!(f, "COMPLETED"),
            IncidentStatus::Canceled => write!(f, "CANCELED"),
            IncidentStatus::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// Mutable incident data guarded by the incident's own lock.
#[derive(Default)]
pub(crate) struct IncidentState {
    pub(crate) estimated_duration: Option<u64>,
    /// One slot per required unit, filled by the scheduler at commit time.
    pub(crate) assigned: Vec<Option<Arc<Unit>>>,
    pub(crate) history: Vec<IncidentStatus>,
    /// Set once a terminal transition has dropped the unit references.
    pub(crate) released: bool,
}

/// A reported emergency.
///
/// The status is published through a `watch` channel so readers never need
/// the incident lock; it is only written by
/// [`StatusManager`](crate::scheduler::StatusManager) while holding that lock.
pub struct Incident {
    pub id: IncidentId,
    pub kind: Arc<IncidentKind>,
    pub location: Position,
    pub created_at: DateTime<Utc>,
    pub(crate) status_tx: watch::Sender<IncidentStatus>,
    pub(crate) state: Mutex<IncidentState>,
}

impl Incident {
    pub fn new(id: IncidentId, kind: Arc<IncidentKind>, location: Position) -> Self {
        Self::with_created_at(id, kind, location, Utc::now())
    }

    pub fn with_created_at(
        id: IncidentId,
        kind: Arc<IncidentKind>,
        location: Position,
        created_at: DateTime<Utc>,
    ) -> Self {
        let (status_tx, _) = watch::channel(IncidentStatus::Waiting);
        let state = IncidentState {
            assigned: vec![None; kind.total_units()],
            history: vec![IncidentStatus::Waiting],
            ..Default::default()
        };
        Self {
            id,
            kind,
            location,
            created_at,
            status_tx,
            state: Mutex::new(state),
        }
    }

    pub fn priority(&self) -> i32 {
        self.kind.priority
    }

    pub fn status(&self) -> IncidentStatus {
        *self.status_tx.borrow()
    }

    /// Watch status changes; the receiver starts at the current status.
    pub fn subscribe(&self) -> watch::Receiver<IncidentStatus> {
        self.status_tx.subscribe()
    }

    /// Every status the incident has held, oldest first.
    pub async fn history(&self) -> Vec<IncidentStatus> {
        self.state.lock().await.history.clone()
    }

    pub async fn estimated_duration(&self) -> Option<u64> {
        self.state.lock().await.estimated_duration
    }

    pub(crate) async fn set_estimated_duration(&self, estimate: u64) {
        self.state.lock().await.estimated_duration = Some(estimate);
    }

    /// Ids of the units currently attached; empty once released.
    pub async fn assigned_unit_ids(&self) -> Vec<UnitId> {
        self.state
            .lock()
            .await
            .assigned
            .iter()
            .flatten()
            .map(|u| u.id)
            .collect()
    }

    pub async fn is_released(&self) -> bool {
        self.state.lock().await.released
    }

    /// Fill the unit slots in order. Extra units beyond the slot count are ignored.
    pub(crate) async fn attach_units(&self, units: &[Arc<Unit>]) {
        let mut state = self.state.lock().await;
        for (slot, unit) in state.assigned.iter_mut().zip(units) {
            *slot = Some(unit.clone());
        }
    }
}

impl std::fmt::Debug for Incident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incident")
            .field("id", &self.id)
            .field("kind", &self.kind.name)
            .field("priority", &self.kind.priority)
            .field("location", &self.location)
            .field("status", &self.status())
            .finish()
    }
}
