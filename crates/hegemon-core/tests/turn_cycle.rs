//! Integration tests for the full turn cycle: submit, advance, resolve.

mod common;

use std::sync::Arc;
use std::thread;

use chrono::Duration;
use serde_json::json;

use common::{open_turn, scenario, start};
use hegemon_core::model::{CommandStatus, Coord, TurnStatus};
use hegemon_core::{EngineError, EventLog, SqliteStore, Store, TurnEngine, TurnScheduler};

fn step(from: (i64, i64), to: (i64, i64)) -> serde_json::Value {
    json!({ "path": [{ "x": from.0, "y": from.1 }, { "x": to.0, "y": to.1 }] })
}

/// Turn 5 with two valid moves and one off the map, closed by the scheduler.
#[tokio::test]
async fn overdue_turn_resolves_and_opens_successor() {
    let s = scenario();
    let turn = open_turn(&s.engine, 5);
    let (red, red_army) = s.armies[0];
    let (blue, blue_army) = s.armies[1];
    let (green, green_army) = s.armies[2];

    s.engine
        .submit_raw(red, red_army, Some(turn.id), "move", &step((0, 0), (0, 1)))
        .unwrap();
    s.clock.advance(Duration::minutes(1));
    s.engine
        .submit_raw(blue, blue_army, None, "move", &step((3, 3), (4, 4)))
        .unwrap();
    s.clock.advance(Duration::minutes(1));
    let off_map = s
        .engine
        .submit_raw(green, green_army, None, "move", &step((-15, 2), (-16, 2)))
        .unwrap();

    s.clock.set(turn.command_deadline + Duration::minutes(5));
    let engine = Arc::new(s.engine);
    let scheduler = TurnScheduler::new(Arc::clone(&engine), 15).unwrap();
    let reports = scheduler.check_now().await.unwrap();

    assert_eq!(reports.len(), 1);
    let outcome = reports[0].result.as_ref().unwrap();
    assert_eq!(outcome.closed_turn.turn_number, 5);
    assert_eq!(outcome.closed_turn.status, TurnStatus::Completed);
    assert_eq!(outcome.new_turn.turn_number, 6);
    assert_eq!(outcome.new_turn.status, TurnStatus::Active);
    assert!(outcome.new_turn.start_time > outcome.closed_turn.end_time);
    assert_eq!(
        (outcome.batch.processed, outcome.batch.succeeded, outcome.batch.failed),
        (3, 2, 1)
    );

    let failed = engine.command(off_map.id).unwrap();
    assert_eq!(failed.status, CommandStatus::Failed);
    assert_eq!(
        failed.result.unwrap()["error"],
        json!("target location (-16, 2) is invalid or inaccessible")
    );

    let positions = engine
        .store()
        .read(|tx| {
            Ok((
                tx.army(red_army)?.unwrap().position,
                tx.army(blue_army)?.unwrap().position,
                tx.army(green_army)?.unwrap().position,
            ))
        })
        .unwrap();
    assert_eq!(positions, (Coord::new(0, 1), Coord::new(4, 4), Coord::new(-15, 2)));

    let stats = engine.turn_statistics(turn.id).unwrap();
    assert_eq!(stats.commands.completed, 2);
    assert_eq!(stats.commands.failed, 1);
    assert_eq!(stats.commands.pending + stats.commands.processing, 0);
}

#[test]
fn concurrent_advances_have_one_winner() {
    let s = scenario();
    let turn = open_turn(&s.engine, 1);
    s.clock.set(turn.command_deadline + Duration::seconds(1));
    let engine = Arc::new(s.engine);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.advance_turn(Some(turn.id)))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(EngineError::NoActiveTurn))));

    let turns = engine.recent_turns(10).unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns.iter().filter(|t| t.is_active()).count(), 1);
}

#[test]
fn submissions_after_advance_target_the_new_turn() {
    let s = scenario();
    let first = open_turn(&s.engine, 1);
    let (red, red_army) = s.armies[0];

    s.engine
        .submit_raw(red, red_army, None, "move", &step((0, 0), (1, 0)))
        .unwrap();
    let err = s
        .engine
        .submit_raw(red, red_army, None, "move", &step((0, 0), (0, 1)))
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateCommand { .. }));

    s.clock.set(first.command_deadline + Duration::seconds(1));
    let outcome = s.engine.advance_turn(None).unwrap();
    assert_eq!(outcome.batch.succeeded, 1);

    s.clock.set(outcome.new_turn.start_time);
    let next = s
        .engine
        .submit_raw(red, red_army, None, "move", &step((1, 0), (1, 1)))
        .unwrap();
    assert_eq!(next.turn, outcome.new_turn.id);

    let stale = s
        .engine
        .submit_raw(red, red_army, Some(first.id), "attack", &serde_json::Value::Null)
        .unwrap_err();
    assert_eq!(stale.kind(), hegemon_core::ErrorKind::Validation);
}

#[test]
fn hills_stop_movement_and_combat_persists_hitpoints() {
    let s = scenario();
    let turn = open_turn(&s.engine, 1);
    let (red, red_army) = s.armies[0];
    let (blue, blue_army) = s.armies[1];

    // Red walks onto the hills at (1, 1) and stops there.
    s.engine
        .submit_raw(red, red_army, None, "move", &json!({"path": [
            {"x": 0, "y": 0}, {"x": 1, "y": 1}, {"x": 1, "y": 2}
        ]}))
        .unwrap();
    s.clock.set(turn.command_deadline + Duration::seconds(1));
    s.engine.advance_turn(None).unwrap();
    let red_pos = s
        .engine
        .store()
        .read(|tx| Ok(tx.army(red_army)?.unwrap().position))
        .unwrap();
    assert_eq!(red_pos, Coord::new(1, 1));

    // Blue closes in over three turns, then attacks.
    for path in [step((3, 3), (2, 2)), step((2, 2), (1, 2))] {
        let now = s.engine.current_turn().unwrap().unwrap();
        s.clock.set(now.start_time);
        s.engine.submit_raw(blue, blue_army, None, "move", &path).unwrap();
        s.clock.set(now.command_deadline + Duration::seconds(1));
        s.engine.advance_turn(None).unwrap();
    }
    let now = s.engine.current_turn().unwrap().unwrap();
    s.clock.set(now.start_time);
    s.engine
        .submit_raw(blue, blue_army, None, "move", &step((1, 2), (1, 1)))
        .unwrap();
    s.clock.set(now.command_deadline + Duration::seconds(1));
    s.engine.advance_turn(None).unwrap();

    let now = s.engine.current_turn().unwrap().unwrap();
    s.clock.set(now.start_time);
    let attack = s
        .engine
        .submit_raw(blue, blue_army, None, "attack", &json!({ "target_army": red_army }))
        .unwrap();
    s.clock.set(now.command_deadline + Duration::seconds(1));
    s.engine.advance_turn(None).unwrap();

    let attack = s.engine.command(attack.id).unwrap();
    assert_eq!(attack.status, CommandStatus::Completed);
    let report = attack.result.unwrap();
    assert_eq!(report["defender_army"], json!(red_army));
    assert!(!report["rounds"].as_array().unwrap().is_empty());

    let hp = s
        .engine
        .store()
        .read(|tx| {
            Ok(tx
                .units_in_army(red_army)?
                .into_iter()
                .chain(tx.units_in_army(blue_army)?)
                .map(|u| u.current_hitpoints)
                .collect::<Vec<_>>())
        })
        .unwrap();
    assert_eq!(hp.len(), 2);
    assert!(hp.iter().any(|&h| h < 30));
}

#[test]
fn file_backed_engine_writes_audit_events() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("game.db")).unwrap();
    common::seed(&store);
    let clock = Arc::new(hegemon_core::ManualClock::new(start()));
    let log = EventLog::new(dir.path());
    let engine =
        TurnEngine::new(store, Arc::clone(&clock), Default::default()).with_event_log(log.clone());

    let turn = open_turn(&engine, 1);
    let err = engine
        .submit_raw(
            hegemon_core::model::PlayerId(1),
            hegemon_core::model::ArmyId(2),
            None,
            "move",
            &step((3, 3), (3, 4)),
        )
        .unwrap_err();
    assert_eq!(err.kind(), hegemon_core::ErrorKind::Validation);

    clock.set(turn.command_deadline + Duration::hours(1));
    engine.check_overdue_turns().unwrap();

    let events = log.read_recent(10);
    let kinds: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, ["command_rejected", "turn_advanced", "scheduler_check"]);
    assert_eq!(events[1].turn_number, Some(1));

    // Reopening the file sees the committed advance.
    drop(engine);
    let reopened = SqliteStore::open(dir.path().join("game.db")).unwrap();
    let active = reopened.read(|tx| tx.active_turn()).unwrap().unwrap();
    assert_eq!(active.turn_number, 2);
}

#[test]
fn extreme_coordinates_fail_the_command_not_the_engine() {
    let s = scenario();
    let turn = open_turn(&s.engine, 1);
    let (red, red_army) = s.armies[0];

    let wild = s
        .engine
        .submit_raw(
            red,
            red_army,
            None,
            "move",
            &json!({"path": [{"x": 0, "y": 0}, {"x": i64::MIN, "y": 0}, {"x": 1, "y": 0}]}),
        )
        .unwrap();
    s.clock.set(turn.command_deadline + Duration::seconds(1));
    let outcome = s.engine.advance_turn(None).unwrap();
    assert_eq!((outcome.batch.processed, outcome.batch.failed), (1, 1));

    let wild = s.engine.command(wild.id).unwrap();
    assert_eq!(wild.status, CommandStatus::Failed);
    assert_eq!(s.engine.current_turn().unwrap().unwrap().turn_number, 2);
}
