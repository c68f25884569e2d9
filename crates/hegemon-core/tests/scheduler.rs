//! Integration tests for the deadline scheduler driving real advances.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;

use common::{open_turn, scenario, start};
use hegemon_core::model::TurnStatus;
use hegemon_core::{Clock, TurnScheduler};

#[tokio::test]
async fn scheduled_turn_is_promoted_with_its_own_window() {
    let s = scenario();
    let turn = open_turn(&s.engine, 1);
    let queued = s
        .engine
        .schedule_turn(
            start() + Duration::hours(24),
            start() + Duration::hours(30),
            start() + Duration::hours(36),
        )
        .unwrap();
    assert_eq!(queued.status, TurnStatus::Pending);

    s.clock.set(turn.command_deadline + Duration::minutes(1));
    let engine = Arc::new(s.engine);
    let scheduler = TurnScheduler::new(Arc::clone(&engine), 15).unwrap();
    let reports = scheduler.check_now().await.unwrap();

    let outcome = reports[0].result.as_ref().unwrap();
    assert_eq!(outcome.new_turn.id, queued.id);
    assert_eq!(outcome.new_turn.status, TurnStatus::Active);
    assert_eq!(outcome.new_turn.command_deadline, queued.command_deadline);
    assert_eq!(outcome.new_turn.end_time, queued.end_time);
    assert!(outcome.new_turn.start_time > outcome.closed_turn.end_time);

    let status = scheduler.status();
    assert_eq!((status.last_overdue, status.last_failures), (1, 0));
    assert!(!status.running);
}

#[tokio::test]
async fn running_scheduler_catches_up_and_stops_cleanly() {
    let s = scenario();
    open_turn(&s.engine, 3);
    s.clock.set(start() + Duration::hours(21));
    let clock = Arc::clone(&s.clock);
    let engine = Arc::new(s.engine);
    let scheduler = TurnScheduler::new(Arc::clone(&engine), 1).unwrap();

    assert!(scheduler.start());
    let mut waited = 0;
    while scheduler.status().last_check.is_none() && waited < 200 {
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        waited += 1;
    }
    assert!(scheduler.stop().await);

    let current = engine.current_turn().unwrap().unwrap();
    assert_eq!(current.turn_number, 4);
    assert!(current.start_time > clock.now() - Duration::seconds(5));

    // Nothing left to do until the new deadline passes.
    assert!(scheduler.check_now().await.unwrap().is_empty());
    assert_eq!(scheduler.status().last_overdue, 0);
}
