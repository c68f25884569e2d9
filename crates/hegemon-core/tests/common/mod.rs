//! Shared world fixture for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use hegemon_core::model::{ArmyId, Coord, PlayerId, Terrain, Turn, TurnStatus, TurnWindow};
use hegemon_core::store::{NewUnitClass, Transaction};
use hegemon_core::{EngineConfig, ManualClock, SqliteStore, Store, TurnEngine};

pub type Engine = TurnEngine<SqliteStore, Arc<ManualClock>>;

pub struct Scenario {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    /// (player, army) pairs; armies start at (0,0), (3,3) and (-15,2) on the west edge.
    pub armies: Vec<(PlayerId, ArmyId)>,
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
}

pub fn seed(store: &SqliteStore) -> Vec<(PlayerId, ArmyId)> {
    store
        .seed(|w| {
            w.add_terrain(&Terrain::Open, 1, 0)?;
            w.add_terrain(&Terrain::Hills, 2, 2)?;
            w.fill_tiles(Default::default(), &Terrain::Open)?;
            w.set_tile(Coord::new(1, 1), &Terrain::Hills)?;
            let infantry = w.add_unit_class(NewUnitClass {
                name: "infantry",
                melee: 10,
                ranged: 0,
                defence: 6,
                attack_range: 1,
                hitpoints: 30,
                strategic_speed: 2,
            })?;

            let mut armies = Vec::new();
            for (i, (nick, at)) in [
                ("red", Coord::new(0, 0)),
                ("blue", Coord::new(3, 3)),
                ("green", Coord::new(-15, 2)),
            ]
            .into_iter()
            .enumerate()
            {
                let player = w.add_player(nick)?;
                let realm = w.add_realm(&format!("Realm of {nick}"), player)?;
                let army = w.add_army(&format!("Army {i}"), realm, at)?;
                w.add_unit(&format!("{nick} guard"), army, infantry)?;
                armies.push((player, army));
            }
            Ok(armies)
        })
        .unwrap()
}

pub fn scenario() -> Scenario {
    let store = SqliteStore::open_in_memory().unwrap();
    let armies = seed(&store);
    let clock = Arc::new(ManualClock::new(start()));
    let mut config = EngineConfig::default();
    config.combat.seed = Some(7);
    let engine = TurnEngine::new(store, Arc::clone(&clock), config);
    Scenario {
        engine,
        clock,
        armies,
    }
}

/// Insert an active turn with the given number starting at `start()`.
pub fn open_turn<C: hegemon_core::Clock>(engine: &TurnEngine<SqliteStore, C>, number: i64) -> Turn {
    let window = TurnWindow::from_offsets(start(), Duration::hours(20), Duration::hours(24)).unwrap();
    engine
        .store()
        .transaction(|tx: &mut dyn Transaction| tx.insert_turn(number, window, TurnStatus::Active))
        .unwrap()
}
