//! Turn & command resolution engine.
//!
//! [`TurnEngine`] owns the store, the clock and the combat RNG. Every
//! public operation runs inside exactly one store transaction, so callers
//! never observe a half-advanced turn.

mod admin;
mod admission;
mod combat;
mod lifecycle;
mod movement;
mod processor;
mod scheduler;

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::observability::{EventLog, TurnEvent};
use crate::store::Store;

pub use admin::OpenedTurn;
pub use combat::{
    attack_damage, simulate, Casualties, CombatAction, CombatOutcome, CombatReport, CombatRound,
    Side, CRIT_CHANCE, HIT_CHANCE, MAX_ROUNDS,
};
pub use lifecycle::{AdvanceOutcome, CommandCounts, OverdueReport, TurnStatistics};
pub use movement::MoveReport;
pub use processor::{BatchResult, CommandError};
pub use scheduler::{SchedulerStatus, TurnScheduler};

/// Gap between one turn's end and its successor's start.
pub fn epsilon() -> Duration {
    Duration::seconds(1)
}

pub struct TurnEngine<S, C = SystemClock> {
    store: S,
    clock: C,
    config: EngineConfig,
    rng: Mutex<StdRng>,
    events: Option<EventLog>,
}

impl<S: Store, C: Clock> TurnEngine<S, C> {
    pub fn new(store: S, clock: C, config: EngineConfig) -> Self {
        let rng = match config.combat.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            clock,
            config,
            rng: Mutex::new(rng),
            events: None,
        }
    }

    /// Append audit events to `log`.
    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.events = Some(log);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: TurnEvent) {
        if let Some(log) = &self.events {
            let event = event.at(self.clock.now());
            if let Err(e) = log.emit(&event) {
                tracing::warn!(error = %e, event_type = %event.event_type, "Failed to write event");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{ArmyId, Coord, PlayerId, RealmId, Terrain, Turn, TurnStatus, TurnWindow};
    use crate::store::{NewUnitClass, SqliteStore, Transaction};

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    pub struct World {
        pub engine: TurnEngine<SqliteStore, Arc<ManualClock>>,
        pub clock: Arc<ManualClock>,
        pub ada: PlayerId,
        pub bob: PlayerId,
        pub north: RealmId,
        pub south: RealmId,
        /// Ada's army at (0, 0): one spearman.
        pub ada_army: ArmyId,
        /// Bob's army at (0, 0): one archer.
        pub bob_army: ArmyId,
        /// Bob's second army at (5, 5), no units.
        pub bob_empty: ArmyId,
    }

    /// Open map with a forest at (2, 0), two realms and three armies.
    pub fn world() -> World {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = store
            .seed(|w| {
                let ada = w.add_player("ada")?;
                let bob = w.add_player("bob")?;
                let north = w.add_realm("North", ada)?;
                let south = w.add_realm("South", bob)?;
                w.add_terrain(&Terrain::Open, 1, 0)?;
                w.add_terrain(&Terrain::Forest, 2, 1)?;
                w.fill_tiles(Default::default(), &Terrain::Open)?;
                w.set_tile(Coord::new(2, 0), &Terrain::Forest)?;
                let spear = w.add_unit_class(NewUnitClass {
                    name: "spearman",
                    melee: 10,
                    ranged: 0,
                    defence: 4,
                    attack_range: 1,
                    hitpoints: 20,
                    strategic_speed: 3,
                })?;
                let archer = w.add_unit_class(NewUnitClass {
                    name: "archer",
                    melee: 2,
                    ranged: 8,
                    defence: 2,
                    attack_range: 3,
                    hitpoints: 10,
                    strategic_speed: 2,
                })?;
                let ada_army = w.add_army("Vanguard", north, Coord::new(0, 0))?;
                let bob_army = w.add_army("Wardens", south, Coord::new(0, 0))?;
                let bob_empty = w.add_army("Ghosts", south, Coord::new(5, 5))?;
                w.add_unit("Spears", ada_army, spear)?;
                w.add_unit("Bows", bob_army, archer)?;
                Ok((ada, bob, north, south, ada_army, bob_army, bob_empty))
            })
            .unwrap();

        let clock = Arc::new(ManualClock::new(t0()));
        let mut config = EngineConfig::default();
        config.combat.seed = Some(42);
        let engine = TurnEngine::new(store, clock.clone(), config);

        World {
            engine,
            clock,
            ada: ids.0,
            bob: ids.1,
            north: ids.2,
            south: ids.3,
            ada_army: ids.4,
            bob_army: ids.5,
            bob_empty: ids.6,
        }
    }

    impl World {
        /// Insert an active turn starting at `t0()` with default offsets.
        pub fn active_turn(&self, number: i64) -> Turn {
            let window =
                TurnWindow::from_offsets(t0(), Duration::hours(20), Duration::hours(24)).unwrap();
            self.engine
                .store()
                .transaction(|tx| tx.insert_turn(number, window, TurnStatus::Active))
                .unwrap()
        }

        pub fn read<T>(&self, f: impl FnOnce(&mut dyn Transaction) -> crate::error::EngineResult<T>) -> T {
            self.engine.store().read(f).unwrap()
        }
    }
}
