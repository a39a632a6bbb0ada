
use std::sync::Arc;
use std::time::Duration;

use rescue_dispatch::error::DispatchError;
use rescue_dispatch::scheduler::{IncidentQueue, IncidentStatus};
use rescue_dispatch::telemetry::{DispatchStats, EventSink};
use test_harness::{ambulance, incident, kind, queue, status_manager, truck};

#[tokio::test]
async fn test_take_highest_priority_first() {
    let truck = truck();
    let routine = kind("Checkup", 0, &[(&truck, 1, 1)]);
    let urgent = kind("Crash", 1, &[(&truck, 1, 1)]);
    let critical = kind("Fire", 2, &[(&truck, 1, 1)]);

    let q = queue(10);
    q.put(incident(1, &routine, 1, 1)).await.unwrap();
    q.put(incident(2, &critical, 1, 1)).await.unwrap();
    q.put(incident(3, &urgent, 1, 1)).await.unwrap();
    q.put(incident(4, &critical, 1, 1)).await.unwrap();

    let mut order = Vec::new();
    for _ in 0..4 {
        order.push(q.take().await.id);
    }
    assert_eq!(order, vec![2, 4, 3, 1]);
    assert!(q.is_empty().await);
}

#[tokio::test]
async fn test_fifo_within_priority() {
    let fire = kind("Fire", 2, &[(&truck(), 1, 1)]);
    let q = queue(10);
    for id in 1..=5 {
        q.put(incident(id, &fire, 0, 0)).await.unwrap();
    }
    for id in 1..=5 {
        assert_eq!(q.take().await.id, id);
    }
}

#[tokio::test]
async fn test_remaining_order_preserved_after_removal() {
    let truck = truck();
    let low = kind("Checkup", 0, &[(&truck, 1, 1)]);
    let high = kind("Fire", 2, &[(&truck, 1, 1)]);

    let q = queue(10);
    q.put(incident(1, &low, 0, 0)).await.unwrap();
    q.put(incident(2, &high, 0, 0)).await.unwrap();
    q.put(incident(3, &low, 0, 0)).await.unwrap();

    assert_eq!(q.take().await.id, 2);
    let ids: Vec<u64> = q.snapshot().await.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test]
async fn test_full_queue_drops_incident() {
    let truck = truck();
    let low = kind("Checkup", 0, &[(&truck, 1, 1)]);
    let high = kind("Fire", 2, &[(&truck, 1, 1)]);

    let stats = Arc::new(DispatchStats::default());
    let q = IncidentQueue::with_capacity(3, EventSink::disabled(), stats.clone());
    q.put(incident(1, &low, 0, 0)).await.unwrap();
    q.put(incident(2, &high, 0, 0)).await.unwrap();
    q.put(incident(3, &low, 0, 0)).await.unwrap();
    assert!(q.is_full().await);

    let err = q.put(incident(4, &high, 0, 0)).await.unwrap_err();
    assert!(matches!(err, DispatchError::QueueFull(3)));
    assert_eq!(q.len().await, 3);
    assert_eq!(stats.snapshot().dropped, 1);

    // The dropped incident never shows up; the best of the original three does.
    assert_eq!(q.take().await.id, 2);
}

#[tokio::test]
async fn test_take_skips_incidents_that_are_not_waiting() {
    let fire = kind("Fire", 2, &[(&truck(), 1, 1)]);
    let checkup = kind("Checkup", 0, &[(&ambulance(), 1, 1)]);
    let status = status_manager();

    let q = queue(10);
    let canceled = incident(1, &fire, 0, 0);
    q.put(canceled.clone()).await.unwrap();
    q.put(incident(2, &checkup, 0, 0)).await.unwrap();

    status.transition(&canceled, IncidentStatus::Canceled).await;

    assert_eq!(q.take().await.id, 2);
    assert!(q.try_take().await.is_none());
    // The stale entry is left in place, not handed out.
    assert_eq!(q.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_take_blocks_until_put() {
    let fire = kind("Fire", 2, &[(&truck(), 1, 1)]);
    let q = queue(10);

    assert!(
        tokio::time::timeout(Duration::from_secs(5), q.take())
            .await
            .is_err(),
        "take should block on an empty queue"
    );

    let consumer = {
        let q = q.clone();
        tokio::spawn(async move { q.take().await.id })
    };
    tokio::task::yield_now().await;

    q.put(incident(9, &fire, 0, 0)).await.unwrap();
    assert_eq!(consumer.await.unwrap(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_put_wait_waits_for_capacity() {
    let fire = kind("Fire", 2, &[(&truck(), 1, 1)]);
    let q = queue(1);
    q.put(incident(1, &fire, 0, 0)).await.unwrap();

    let producer = {
        let q = q.clone();
        let second = incident(2, &fire, 0, 0);
        tokio::spawn(async move { q.put_wait(second).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!producer.is_finished());
    assert_eq!(q.len().await, 1);

    assert_eq!(q.take().await.id, 1);
    producer.await.unwrap();
    assert_eq!(q.take().await.id, 2);
}
