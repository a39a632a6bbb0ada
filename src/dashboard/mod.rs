use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::DispatchError;
use crate::ingest::{IncidentRequest, Ingestor, SubmitAck};
use crate::scheduler::queue::QueuedIncident;
use crate::scheduler::IncidentQueue;
use crate::telemetry::{DispatchStats, EventSink, StatsSnapshot};
use crate::worker::{Unit, UnitSnapshot, UnitStatus};

#[derive(Clone)]
pub struct DashboardState {
    pub units: Arc<[Arc<Unit>]>,
    pub queue: Arc<IncidentQueue>,
    pub ingestor: Arc<Ingestor>,
    pub stats: Arc<DispatchStats>,
    pub events: EventSink,
}

#[derive(Serialize)]
struct QueueResponse {
    capacity: usize,
    length: usize,
    incidents: Vec<QueuedIncident>,
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    counters: StatsSnapshot,
    events_dropped: u64,
    queue_length: usize,
    units_total: usize,
    units_idle: usize,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/units", get(list_units_handler))
        .route("/api/queue", get(queue_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/incidents", post(submit_incident_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn snapshot_units(units: &[Arc<Unit>]) -> Vec<UnitSnapshot> {
    let mut out = Vec::with_capacity(units.len());
    for unit in units {
        out.push(unit.snapshot().await);
    }
    out
}

async fn list_units_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(snapshot_units(&state.units).await)
}

async fn queue_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let incidents = state.queue.snapshot().await;
    Json(QueueResponse {
        capacity: state.queue.capacity(),
        length: incidents.len(),
        incidents,
    })
}

async fn stats_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let units = snapshot_units(&state.units).await;
    Json(StatsResponse {
        counters: state.stats.snapshot(),
        events_dropped: state.events.dropped(),
        queue_length: state.queue.len().await,
        units_total: units.len(),
        units_idle: units
            .iter()
            .filter(|u| u.status == UnitStatus::Idle)
            .count(),
    })
}

async fn submit_incident_handler(
    State(state): State<DashboardState>,
    Json(payload): Json<IncidentRequest>,
) -> impl IntoResponse {
    let result = state.ingestor.submit(&payload).await;
    let code = match &result {
        Ok(_) => StatusCode::OK,
        Err(DispatchError::QueueFull(_)) => StatusCode::SERVICE_UNAVAILABLE,
        Err(DispatchError::UnknownIncidentKind(_)) | Err(DispatchError::OutOfBounds { .. }) => {
            StatusCode::BAD_REQUEST
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(SubmitAck::from_result(&result)))
}
