
use std::time::Duration;

use tokio::time::Instant;

use rescue_dispatch::geo::Position;
use rescue_dispatch::scheduler::{DispatchOutcome, IncidentStatus};
use rescue_dispatch::worker::UnitStatus;
use test_harness::{
    ambulance, fire_kind, incident, kind, queue, status_manager, truck, wait_for_status,
    wait_for_unit, Fleet,
};

const PATIENCE: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn test_fire_lifecycle_timing() {
    let truck = truck();
    let fleet = Fleet::spawn(&[&truck], status_manager());
    let scheduler = fleet.scheduler(queue(4));
    let unit = fleet.units[0].clone();

    let fire = incident(1, &fire_kind(&truck), 10, 0);
    let start = Instant::now();
    assert_eq!(
        scheduler.dispatch(fire.clone()).await,
        DispatchOutcome::Assigned(vec![1])
    );

    assert!(wait_for_status(&fire, IncidentStatus::InProgress, PATIENCE).await);
    assert_eq!(start.elapsed(), Duration::from_secs(2));
    assert_eq!(unit.status().await, UnitStatus::OnScene);
    assert_eq!(unit.position().await, Position::new(10, 0));

    assert!(wait_for_status(&fire, IncidentStatus::Completed, PATIENCE).await);
    assert_eq!(start.elapsed(), Duration::from_secs(6));
    assert_eq!(unit.status().await, UnitStatus::Returning);
    assert!(fire.is_released().await);

    assert!(wait_for_unit(&unit, UnitStatus::Idle, PATIENCE).await);
    let back = start.elapsed();
    assert!(back >= Duration::from_secs(8) && back < Duration::from_secs(9));
    assert_eq!(unit.position().await, Position::new(0, 0));
    assert_eq!(unit.incident_id().await, None);

    assert_eq!(
        fire.history().await,
        vec![
            IncidentStatus::Waiting,
            IncidentStatus::Assigned,
            IncidentStatus::InProgress,
            IncidentStatus::Completed
        ]
    );

    fleet.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_completion_waits_for_last_unit() {
    let truck = truck(); // speed 5
    let ambulance = ambulance(); // speed 10
    let fleet = Fleet::spawn(&[&truck, &ambulance], status_manager());
    let scheduler = fleet.scheduler(queue(4));

    // Ambulance: travel 2, service 1. Truck: travel 4, service 5.
    let crash = kind("Crash", 2, &[(&truck, 1, 5), (&ambulance, 1, 1)]);
    let event = incident(1, &crash, 20, 0);
    let start = Instant::now();
    scheduler.dispatch(event.clone()).await;

    assert!(wait_for_status(&event, IncidentStatus::InProgress, PATIENCE).await);
    assert_eq!(start.elapsed(), Duration::from_secs(2));

    assert!(wait_for_status(&event, IncidentStatus::Completed, PATIENCE).await);
    assert_eq!(start.elapsed(), Duration::from_secs(9));

    // The ambulance was done long before; its early completion was refused.
    assert_eq!(
        event.history().await,
        vec![
            IncidentStatus::Waiting,
            IncidentStatus::Assigned,
            IncidentStatus::InProgress,
            IncidentStatus::Completed
        ]
    );

    fleet.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unit_reusable_after_return() {
    let truck = truck();
    let fleet = Fleet::spawn(&[&truck], status_manager());
    let scheduler = fleet.scheduler(queue(4));
    let fire_kind = fire_kind(&truck);

    let first = incident(1, &fire_kind, 10, 0);
    scheduler.dispatch(first.clone()).await;
    assert!(wait_for_unit(&fleet.units[0], UnitStatus::Idle, PATIENCE).await);
    assert_eq!(first.status(), IncidentStatus::Completed);

    let second = incident(2, &fire_kind, 0, 5);
    assert_eq!(
        scheduler.dispatch(second.clone()).await,
        DispatchOutcome::Assigned(vec![1])
    );
    assert!(wait_for_status(&second, IncidentStatus::Completed, PATIENCE).await);

    fleet.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_incident_at_base_needs_no_travel() {
    let truck = truck();
    let fleet = Fleet::spawn(&[&truck], status_manager());
    let scheduler = fleet.scheduler(queue(4));

    let fire = incident(1, &fire_kind(&truck), 0, 0);
    let start = Instant::now();
    scheduler.dispatch(fire.clone()).await;

    assert!(wait_for_status(&fire, IncidentStatus::Completed, PATIENCE).await);
    assert_eq!(start.elapsed(), Duration::from_secs(4));

    fleet.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_active_unit() {
    let truck = truck();
    let fleet = Fleet::spawn(&[&truck], status_manager());
    let scheduler = fleet.scheduler(queue(4));
    let unit = fleet.units[0].clone();

    let fire = incident(1, &fire_kind(&truck), 10, 0);
    scheduler.dispatch(fire.clone()).await;
    assert!(wait_for_status(&fire, IncidentStatus::InProgress, PATIENCE).await);

    fleet.stop().await;

    assert_eq!(fire.status(), IncidentStatus::Canceled);
    assert_eq!(unit.status().await, UnitStatus::Idle);
    assert_eq!(unit.incident_id().await, None);
}
