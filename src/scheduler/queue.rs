use std::cmp::Reverse;
use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};

use crate::error::{DispatchError, Result};
use crate::scheduler::incident::{Incident, IncidentId, IncidentStatus};
use crate::telemetry::{Counter, DispatchStats, EventCategory, EventSink};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Queued incident as shown on the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedIncident {
    pub id: IncidentId,
    pub kind: String,
    pub priority: i32,
    pub status: IncidentStatus,
}

/// Bounded queue of incidents awaiting dispatch.
///
/// `take` always yields the highest-priority Waiting incident, oldest first
/// within a priority. Producers never block on `put`: a full queue drops the
/// incident.
#[derive(Debug)]
pub struct IncidentQueue {
    items: Mutex<VecDeque<Arc<Incident>>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
    events: EventSink,
    stats: Arc<DispatchStats>,
}

impl IncidentQueue {
    pub fn new(events: EventSink, stats: Arc<DispatchStats>) -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY, events, stats)
    }

    pub fn with_capacity(capacity: usize, events: EventSink, stats: Arc<DispatchStats>) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            events,
            stats,
        }
    }

    /// Enqueue an incident. A full queue drops it and returns `QueueFull`.
    pub async fn put(&self, incident: Arc<Incident>) -> Result<()> {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            drop(items);
            self.stats.record(Counter::Dropped);
            self.events.warn(
                incident.id,
                EventCategory::Queue,
                format!(
                    "Queue full ({} incidents), dropping {} incident",
                    self.capacity, incident.kind.name
                ),
            );
            return Err(DispatchError::QueueFull(self.capacity));
        }

        self.log_queued(&incident);
        items.push_back(incident);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue an incident, waiting for free capacity instead of dropping it.
    pub async fn put_wait(&self, incident: Arc<Incident>) {
        loop {
            let space = self.not_full.notified();
            {
                let mut items = self.items.lock().await;
                if items.len() < self.capacity {
                    self.log_queued(&incident);
                    items.push_back(incident);
                    drop(items);
                    self.not_empty.notify_one();
                    return;
                }
            }
            space.await;
        }
    }

    /// Remove and return the next incident to dispatch, waiting until one is
    /// eligible. Cancel-safe: nothing is removed unless it is returned.
    pub async fn take(&self) -> Arc<Incident> {
        loop {
            let available = self.not_empty.notified();
            if let Some(incident) = self.try_take().await {
                return incident;
            }
            available.await;
        }
    }

    /// Non-blocking `take`.
    pub async fn try_take(&self) -> Option<Arc<Incident>> {
        let mut items = self.items.lock().await;
        let index = next_index(&items)?;
        // VecDeque::remove shifts the tail, keeping insertion order intact.
        let incident = items.remove(index)?;
        drop(items);
        self.not_full.notify_one();
        Some(incident)
    }

    fn log_queued(&self, incident: &Incident) {
        self.events.info(
            incident.id,
            EventCategory::Queue,
            format!(
                "Queued {} incident (priority {}) at {}",
                incident.kind.name,
                incident.priority(),
                incident.location
            ),
        );
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub async fn is_full(&self) -> bool {
        self.items.lock().await.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue contents in insertion order.
    pub async fn snapshot(&self) -> Vec<QueuedIncident> {
        self.items
            .lock()
            .await
            .iter()
            .map(|i| QueuedIncident {
                id: i.id,
                kind: i.kind.name.clone(),
                priority: i.priority(),
                status: i.status(),
            })
            .collect()
    }
}

/// Highest priority among Waiting incidents; the lowest index wins ties.
fn next_index(items: &VecDeque<Arc<Incident>>) -> Option<usize> {
    items
        .iter()
        .enumerate()
        .filter(|(_, incident)| incident.status() == IncidentStatus::Waiting)
        .min_by_key(|(index, incident)| (Reverse(incident.priority()), *index))
        .map(|(index, _)| index)
}
