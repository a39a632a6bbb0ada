use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::config::{DispatchConfig, EventLogConfig};
use crate::dashboard::{run_dashboard, DashboardState};
use crate::error::Result;
use crate::ingest::{run_listener, Ingestor};
use crate::scheduler::{IncidentQueue, IncidentStatus, Scheduler, StatusManager};
use crate::telemetry::{DispatchStats, EventSink, EventWriter};
use crate::worker::{Unit, UnitId, UnitStatus, UnitTwin};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Start the event writer if the config asks for any output.
///
/// The writer exits once every clone of the returned sink is dropped, so
/// await the handle only after the center has shut down.
pub fn start_event_writer(config: &EventLogConfig) -> (EventSink, Option<JoinHandle<()>>) {
    if !config.is_enabled() {
        return (EventSink::disabled(), None);
    }
    let (sink, rx) = EventSink::channel(config.capacity);
    let writer = EventWriter::new(config.path.clone(), config.mirror_addr.clone());
    (sink, Some(tokio::spawn(writer.run(rx))))
}

/// Wires the queue, scheduler, units and intake together.
pub struct DispatchCenter {
    config: DispatchConfig,
    events: EventSink,
    stats: Arc<DispatchStats>,
    queue: Arc<IncidentQueue>,
    status: StatusManager,
    units: Vec<Arc<Unit>>,
    twins: Vec<UnitTwin>,
    ingestor: Arc<Ingestor>,
}

impl DispatchCenter {
    /// Build every component. Units are numbered from 1 in catalog order.
    pub fn new(config: DispatchConfig, catalog: Catalog, events: EventSink) -> Self {
        let catalog = Arc::new(catalog);
        let stats = Arc::new(DispatchStats::default());
        let queue = Arc::new(IncidentQueue::with_capacity(
            config.queue_capacity,
            events.clone(),
            stats.clone(),
        ));
        let status = StatusManager::new(events.clone(), stats.clone());

        let mut units = Vec::with_capacity(catalog.total_units());
        let mut twins = Vec::with_capacity(catalog.total_units());
        let mut next_id: UnitId = 1;
        for pool in &catalog.unit_pools {
            for _ in 0..pool.count {
                let (unit, wake_rx) = Unit::new(next_id, pool.unit_type.clone());
                let unit = Arc::new(unit);
                twins.push(UnitTwin::new(
                    unit.clone(),
                    wake_rx,
                    status.clone(),
                    events.clone(),
                    config.time_unit,
                ));
                units.push(unit);
                next_id += 1;
            }
        }

        let ingestor = Arc::new(Ingestor::new(
            catalog,
            queue.clone(),
            events.clone(),
            stats.clone(),
        ));

        Self {
            config,
            events,
            stats,
            queue,
            status,
            units,
            twins,
            ingestor,
        }
    }

    pub fn units(&self) -> &[Arc<Unit>] {
        &self.units
    }

    pub fn queue(&self) -> &Arc<IncidentQueue> {
        &self.queue
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    pub fn dashboard_state(&self) -> DashboardState {
        DashboardState {
            units: self.units.clone().into(),
            queue: self.queue.clone(),
            ingestor: self.ingestor.clone(),
            stats: self.stats.clone(),
            events: self.events.clone(),
        }
    }

    /// Run every component until `shutdown` is cancelled, then drain.
    ///
    /// Startup order:
    /// 1. Bind the ingestion listener (the only fallible step)
    /// 2. Spawn one twin per unit
    /// 3. Spawn the scheduler, the listener and the optional dashboard
    ///
    /// On shutdown, intake (listener, open connections, dashboard) and the
    /// scheduler stop first. Incidents still queued are canceled. Busy units
    /// get up to the drain timeout to return to base before they are
    /// interrupted.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = match self.config.listen_addr {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };

        let dashboard_state = self.dashboard_state();
        let Self {
            config,
            events,
            stats,
            queue,
            status,
            units,
            twins,
            ingestor,
        } = self;

        tracing::info!(
            units = units.len(),
            queue_capacity = queue.capacity(),
            time_unit_ms = config.time_unit.as_millis() as u64,
            "Starting dispatch center"
        );

        let units_token = CancellationToken::new();
        let twin_handles: Vec<JoinHandle<()>> = twins
            .into_iter()
            .map(|twin| tokio::spawn(twin.run(units_token.clone())))
            .collect();

        let scheduler = Scheduler::new(queue.clone(), units.clone(), status.clone(), events);
        let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

        let listener_handle = listener.map(|listener| {
            tokio::spawn(run_listener(listener, ingestor, shutdown.clone()))
        });

        let dashboard_handle = config.dashboard_addr.map(|addr| {
            tokio::spawn(run_dashboard(addr, dashboard_state, shutdown.clone()))
        });

        shutdown.cancelled().await;
        tracing::info!("Shutdown requested, stopping intake");

        // Every intake path must be closed before the queue is drained, or a
        // late submission would be left Waiting.
        if let Some(handle) = listener_handle {
            log_join("ingestion listener", handle).await;
        }
        if let Some(handle) = dashboard_handle {
            log_join("dashboard", handle).await;
        }
        log_join("scheduler", scheduler_handle).await;

        let mut abandoned = 0;
        while let Some(incident) = queue.try_take().await {
            if incident.status() == IncidentStatus::Waiting {
                status.transition(&incident, IncidentStatus::Canceled).await;
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            tracing::warn!(abandoned, "Canceled incidents still waiting in the queue");
        }

        let drained = tokio::time::timeout(config.drain_timeout, wait_until_idle(&units))
            .await
            .is_ok();
        if drained {
            tracing::info!("All units back at base");
        } else {
            tracing::warn!(
                timeout_ms = config.drain_timeout.as_millis() as u64,
                "Drain timeout elapsed, interrupting busy units"
            );
        }
        units_token.cancel();
        for handle in twin_handles {
            log_join("unit twin", handle).await;
        }

        let summary = stats.snapshot();
        tracing::info!(
            received = summary.received,
            assigned = summary.assigned,
            completed = summary.completed,
            timed_out = summary.timed_out,
            canceled = summary.canceled,
            dropped = summary.dropped,
            "Dispatch center stopped"
        );
        Ok(())
    }
}

async fn wait_until_idle(units: &[Arc<Unit>]) {
    let mut interval = tokio::time::interval(DRAIN_POLL_INTERVAL);
    loop {
        interval.tick().await;
        let mut busy = 0;
        for unit in units {
            if unit.status().await != UnitStatus::Idle {
                busy += 1;
            }
        }
        if busy == 0 {
            return;
        }
        tracing::debug!(busy, "Waiting for units to return");
    }
}

async fn log_join(task: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        tracing::error!(task, error = %e, "Task ended abnormally");
    }
}
