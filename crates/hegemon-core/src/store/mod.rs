//! Persistence boundary.
//!
//! The engine only sees [`Store`] and [`Transaction`]; every read and write
//! it performs goes through one transaction handle so that an advance either
//! commits as a whole or leaves no trace.

mod sqlite;

use chrono::{DateTime, Utc};

use crate::error::EngineResult;
use crate::model::{
    Army, ArmyId, Command, CommandId, CommandStatus, Coord, NewCommand, Realm, RealmId, Turn,
    TurnId, TurnStatus, TurnWindow, Unit, UnitClass, UnitClassId, UnitId,
};

pub use sqlite::{NewUnitClass, SqliteStore, WorldSeed};

/// Transactional relational store.
pub trait Store: Send + Sync {
    /// Run `f` in a write transaction: commit when it returns `Ok`, roll
    /// back when it returns `Err`.
    fn transaction<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut dyn Transaction) -> EngineResult<T>;

    /// Run `f` against a consistent read snapshot. Nothing is committed.
    fn read<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut dyn Transaction) -> EngineResult<T>,
    {
        self.transaction(f)
    }
}

/// Operations available inside a transaction.
///
/// Mutations return the row as written so callers never re-read.
pub trait Transaction {
    // Turns
    fn active_turn(&mut self) -> EngineResult<Option<Turn>>;
    fn turn(&mut self, id: TurnId) -> EngineResult<Option<Turn>>;
    fn turn_by_number(&mut self, turn_number: i64) -> EngineResult<Option<Turn>>;
    fn overdue_turns(&mut self, now: DateTime<Utc>) -> EngineResult<Vec<Turn>>;
    fn next_pending_turn(&mut self) -> EngineResult<Option<Turn>>;
    fn last_completed_turn(&mut self) -> EngineResult<Option<Turn>>;
    fn recent_turns(&mut self, limit: usize) -> EngineResult<Vec<Turn>>;
    fn max_turn_number(&mut self) -> EngineResult<Option<i64>>;
    fn insert_turn(
        &mut self,
        turn_number: i64,
        window: TurnWindow,
        status: TurnStatus,
    ) -> EngineResult<Turn>;
    /// Complete the turn only if it is still active. `None` means another
    /// writer got there first.
    fn close_turn(
        &mut self,
        id: TurnId,
        command_deadline: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> EngineResult<Option<Turn>>;
    /// Promote a pending turn to active with the given window.
    fn activate_turn(&mut self, id: TurnId, window: TurnWindow) -> EngineResult<Option<Turn>>;
    fn update_turn_window(&mut self, id: TurnId, window: TurnWindow)
        -> EngineResult<Option<Turn>>;
    fn delete_turn(&mut self, id: TurnId) -> EngineResult<bool>;

    // Commands
    fn insert_command(&mut self, command: NewCommand) -> EngineResult<Command>;
    fn command(&mut self, id: CommandId) -> EngineResult<Option<Command>>;
    fn open_command_for(&mut self, army: ArmyId, turn: TurnId) -> EngineResult<Option<Command>>;
    /// Pending commands of a turn in submission order.
    fn pending_commands(&mut self, turn: TurnId) -> EngineResult<Vec<Command>>;
    fn commands_for_turn(&mut self, turn: TurnId) -> EngineResult<Vec<Command>>;
    fn commands_for_army(&mut self, army: ArmyId, limit: usize) -> EngineResult<Vec<Command>>;
    fn set_command_status(
        &mut self,
        id: CommandId,
        status: CommandStatus,
        result: Option<&serde_json::Value>,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<Command>>;
    fn command_counts(&mut self, turn: TurnId) -> EngineResult<Vec<(CommandStatus, i64)>>;

    // World state
    fn realm(&mut self, id: RealmId) -> EngineResult<Option<Realm>>;
    fn army(&mut self, id: ArmyId) -> EngineResult<Option<Army>>;
    fn armies_at(&mut self, position: Coord) -> EngineResult<Vec<Army>>;
    fn set_army_position(
        &mut self,
        id: ArmyId,
        position: Coord,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<Army>>;
    fn units_in_army(&mut self, army: ArmyId) -> EngineResult<Vec<Unit>>;
    /// Persist a unit's hitpoints, returning the stored value.
    fn set_unit_hitpoints(&mut self, id: UnitId, hitpoints: i64) -> EngineResult<Option<i64>>;
    fn unit_class(&mut self, id: UnitClassId) -> EngineResult<Option<UnitClass>>;
    fn unit_name_taken(&mut self, realm: RealmId, name: &str) -> EngineResult<bool>;
    fn insert_unit(
        &mut self,
        name: &str,
        realm: RealmId,
        army: ArmyId,
        class: &UnitClass,
    ) -> EngineResult<Unit>;
    fn tile(&mut self, position: Coord) -> EngineResult<Option<crate::model::Tile>>;

    // Nested scopes for per-command isolation
    fn savepoint(&mut self, name: &str) -> EngineResult<()>;
    fn release_savepoint(&mut self, name: &str) -> EngineResult<()>;
    fn rollback_to_savepoint(&mut self, name: &str) -> EngineResult<()>;
}
