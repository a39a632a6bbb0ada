
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use rescue_dispatch::error::DispatchError;
use rescue_dispatch::ingest::{run_listener, IncidentRequest, Ingestor, SubmitClient};
use rescue_dispatch::scheduler::{IncidentQueue, IncidentStatus};
use rescue_dispatch::telemetry::{DispatchStats, EventSink};
use test_harness::test_catalog;

fn ingestor(capacity: usize) -> (Arc<Ingestor>, Arc<IncidentQueue>, Arc<DispatchStats>) {
    let stats = Arc::new(DispatchStats::default());
    let queue = Arc::new(IncidentQueue::with_capacity(
        capacity,
        EventSink::disabled(),
        stats.clone(),
    ));
    let ingestor = Ingestor::new(
        Arc::new(test_catalog()),
        queue.clone(),
        EventSink::disabled(),
        stats.clone(),
    );
    (Arc::new(ingestor), queue, stats)
}

#[tokio::test]
async fn test_admit_builds_waiting_incident() {
    let (ingestor, _queue, _stats) = ingestor(4);

    let incident = ingestor.admit(&IncidentRequest::new("Fire", 10, 20)).unwrap();
    assert_eq!(incident.id, 1);
    assert_eq!(incident.kind.name, "Fire");
    assert_eq!(incident.priority(), 2);
    assert_eq!(incident.status(), IncidentStatus::Waiting);
    assert_eq!(incident.location.x, 10);
    assert_eq!(incident.location.y, 20);

    let next = ingestor.admit(&IncidentRequest::new("Crash", 0, 0)).unwrap();
    assert_eq!(next.id, 2);
}

#[tokio::test]
async fn test_admit_rejects_out_of_bounds() {
    let (ingestor, _queue, _stats) = ingestor(4);

    for (x, y) in [(-1, 0), (0, -1), (100, 0), (0, 100)] {
        let err = ingestor
            .admit(&IncidentRequest::new("Fire", x, y))
            .unwrap_err();
        assert!(
            matches!(err, DispatchError::OutOfBounds { width: 100, height: 100, .. }),
            "({}, {}) should be out of bounds, got {}",
            x,
            y,
            err
        );
    }
    assert!(ingestor.admit(&IncidentRequest::new("Fire", 99, 99)).is_ok());
}

#[tokio::test]
async fn test_admit_rejects_unknown_kind() {
    let (ingestor, _queue, _stats) = ingestor(4);

    let err = ingestor
        .admit(&IncidentRequest::new("Meteor", 1, 1))
        .unwrap_err();
    assert!(matches!(err, DispatchError::UnknownIncidentKind(name) if name == "Meteor"));

    // Rejected requests do not consume ids.
    let incident = ingestor.admit(&IncidentRequest::new("Fire", 1, 1)).unwrap();
    assert_eq!(incident.id, 1);
}

#[tokio::test]
async fn test_submit_enqueues_and_counts() {
    let (ingestor, queue, stats) = ingestor(1);

    let id = ingestor
        .submit(&IncidentRequest::new("Fire", 5, 5))
        .await
        .unwrap();
    assert_eq!(queue.len().await, 1);
    assert_eq!(queue.take().await.id, id);

    ingestor
        .submit(&IncidentRequest::new("Meteor", 5, 5))
        .await
        .unwrap_err();

    let snap = stats.snapshot();
    assert_eq!(snap.received, 2);
    assert_eq!(snap.rejected, 1);
}

#[tokio::test]
async fn test_submit_reports_full_queue() {
    let (ingestor, queue, stats) = ingestor(1);

    ingestor
        .submit(&IncidentRequest::new("Fire", 5, 5))
        .await
        .unwrap();
    let err = ingestor
        .submit(&IncidentRequest::new("Fire", 6, 6))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::QueueFull(1)));
    assert_eq!(queue.len().await, 1);
    assert_eq!(stats.snapshot().dropped, 1);
}

#[tokio::test]
async fn test_handle_line_rejects_malformed_json() {
    let (ingestor, queue, _stats) = ingestor(4);

    let err = ingestor.handle_line("{not json").await.unwrap_err();
    assert!(matches!(err, DispatchError::MalformedRequest(_)));
    assert!(queue.is_empty().await);

    let id = ingestor
        .handle_line(r#"{"name":"Checkup","x":3,"y":4,"timestamp":"2024-05-01T12:00:00Z"}"#)
        .await
        .unwrap();
    let incident = queue.take().await;
    assert_eq!(incident.id, id);
    assert_eq!(incident.created_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
}

#[tokio::test]
async fn test_tcp_listener_roundtrip() {
    let (ingestor, queue, _stats) = ingestor(4);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(run_listener(listener, ingestor, shutdown.clone()));

    let mut client = SubmitClient::connect(addr).await.unwrap();

    let ack = client
        .send(&IncidentRequest::new("Fire", 10, 0))
        .await
        .unwrap();
    assert!(ack.accepted);
    assert_eq!(ack.incident_id, Some(1));
    assert!(ack.error.is_none());

    let ack = client
        .send(&IncidentRequest::new("Meteor", 10, 0))
        .await
        .unwrap();
    assert!(!ack.accepted);
    assert!(ack.error.unwrap().contains("Meteor"));

    assert_eq!(queue.len().await, 1);

    shutdown.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn test_listener_closes_open_connections_before_returning() {
    let (ingestor, queue, _stats) = ingestor(4);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(run_listener(listener, ingestor, shutdown.clone()));

    let mut client = SubmitClient::connect(addr).await.unwrap();
    let ack = client
        .send(&IncidentRequest::new("Fire", 10, 0))
        .await
        .unwrap();
    assert!(ack.accepted);

    shutdown.cancel();
    server.await.unwrap();

    // The connection task is gone once the listener returns, so nothing
    // more can reach the queue through it.
    assert!(client
        .send(&IncidentRequest::new("Fire", 20, 0))
        .await
        .is_err());
    assert_eq!(queue.len().await, 1);
}
