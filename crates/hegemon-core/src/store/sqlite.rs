//! SQLite binding of the store traits.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::{Store, Transaction};
use crate::error::{EngineResult, StoreError};
use crate::model::{
    Army, ArmyId, Command, CommandId, CommandStatus, Coord, MapBounds, NewCommand, PlayerId,
    Realm, RealmId, Terrain, Tile, Turn, TurnId, TurnStatus, TurnWindow, Unit, UnitClass,
    UnitClassId, UnitId,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS players (
        id INTEGER PRIMARY KEY,
        nick TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS realms (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        player_id INTEGER NOT NULL REFERENCES players(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS terrain_types (
        type TEXT PRIMARY KEY,
        movement_cost INTEGER NOT NULL DEFAULT 1,
        defence_bonus INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS map_tiles (
        x_coord INTEGER NOT NULL,
        y_coord INTEGER NOT NULL,
        terrain_type TEXT NOT NULL,
        PRIMARY KEY (x_coord, y_coord)
    );

    CREATE TABLE IF NOT EXISTS unit_classes (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        melee_combat INTEGER NOT NULL,
        ranged_combat INTEGER NOT NULL,
        defence INTEGER NOT NULL,
        attack_range INTEGER NOT NULL,
        hitpoints INTEGER NOT NULL CHECK (hitpoints > 0),
        strategic_speed INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS armies (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        realm_id INTEGER NOT NULL REFERENCES realms(id) ON DELETE CASCADE,
        x_coord INTEGER NOT NULL,
        y_coord INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS units (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        realm_id INTEGER NOT NULL REFERENCES realms(id) ON DELETE CASCADE,
        army_id INTEGER NOT NULL REFERENCES armies(id) ON DELETE CASCADE,
        unit_class_id INTEGER NOT NULL REFERENCES unit_classes(id),
        current_hitpoints INTEGER NOT NULL CHECK (current_hitpoints >= 0),
        UNIQUE (realm_id, name)
    );

    CREATE TABLE IF NOT EXISTS game_turns (
        id INTEGER PRIMARY KEY,
        turn_number INTEGER NOT NULL UNIQUE,
        start_time INTEGER NOT NULL,
        command_deadline INTEGER NOT NULL,
        end_time INTEGER NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('pending', 'active', 'completed')),
        CHECK (start_time < command_deadline AND command_deadline < end_time)
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_game_turns_single_active
        ON game_turns(status) WHERE status = 'active';

    CREATE TABLE IF NOT EXISTS commands (
        id INTEGER PRIMARY KEY,
        player_id INTEGER NOT NULL REFERENCES players(id) ON DELETE CASCADE,
        army_id INTEGER NOT NULL REFERENCES armies(id) ON DELETE CASCADE,
        game_turn_id INTEGER NOT NULL REFERENCES game_turns(id) ON DELETE CASCADE,
        command_type TEXT NOT NULL,
        command_data TEXT NOT NULL,
        status TEXT NOT NULL
            CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
        result TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_commands_single_open
        ON commands(army_id, game_turn_id) WHERE status IN ('pending', 'processing');
    CREATE INDEX IF NOT EXISTS idx_commands_turn_status ON commands(game_turn_id, status);
    CREATE INDEX IF NOT EXISTS idx_armies_position ON armies(x_coord, y_coord);
";

const TURN_COLUMNS: &str = "id, turn_number, start_time, command_deadline, end_time, status";
const COMMAND_COLUMNS: &str = "id, player_id, army_id, game_turn_id, command_type, \
     command_data, status, result, created_at, updated_at";
const ARMY_COLUMNS: &str = "id, name, realm_id, x_coord, y_coord, created_at, updated_at";
const UNIT_SELECT: &str = "SELECT u.id, u.name, u.realm_id, u.army_id, u.current_hitpoints, \
     c.id, c.name, c.melee_combat, c.ranged_combat, c.defence, c.attack_range, c.hitpoints, \
     c.strategic_speed \
     FROM units u JOIN unit_classes c ON u.unit_class_id = c.id";
const CLASS_COLUMNS: &str =
    "id, name, melee_combat, ranged_combat, defence, attack_range, hitpoints, strategic_speed";

/// SQLite-backed [`Store`]. One connection, serialised behind a mutex;
/// writes take the database write lock up front (`BEGIN IMMEDIATE`).
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> EngineResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// A panic inside a transaction drops (and so rolls back) the open
    /// `rusqlite::Transaction`, leaving the connection usable.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| {
            tracing::warn!("Recovering store connection after a panicked transaction");
            e.into_inner()
        })
    }

    fn migrate(&self) -> EngineResult<()> {
        let conn = self.lock();
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name) VALUES (1, 'initial')",
            [],
        )?;
        Ok(())
    }

    /// Populate world data (players, realms, map, armies) in one transaction.
    pub fn seed<T>(
        &self,
        f: impl FnOnce(&mut WorldSeed<'_>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let value = {
            let mut seed = WorldSeed {
                conn: &tx,
                now: Utc::now(),
            };
            f(&mut seed)?
        };
        tx.commit()?;
        Ok(value)
    }
}

impl Store for SqliteStore {
    fn transaction<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut dyn Transaction) -> EngineResult<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut handle = SqliteTx { tx };
        match f(&mut handle) {
            Ok(value) => {
                handle.tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = handle.tx.rollback() {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    fn read<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut dyn Transaction) -> EngineResult<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let mut handle = SqliteTx { tx };
        f(&mut handle)
    }
}

struct SqliteTx<'c> {
    tx: rusqlite::Transaction<'c>,
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn conversion(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, message.into())
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion(idx, Type::Integer, format!("timestamp out of range: {ms}")))
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<Turn> {
    let status: String = row.get(5)?;
    Ok(Turn {
        id: TurnId(row.get(0)?),
        turn_number: row.get(1)?,
        start_time: timestamp(row, 2)?,
        command_deadline: timestamp(row, 3)?,
        end_time: timestamp(row, 4)?,
        status: status
            .parse()
            .map_err(|s| conversion(5, Type::Text, format!("unknown turn status: {s}")))?,
    })
}

fn command_from_row(row: &Row<'_>) -> rusqlite::Result<Command> {
    let status: String = row.get(6)?;
    let result: Option<String> = row.get(7)?;
    let result = match result {
        Some(raw) => Some(
            serde_json::from_str(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
        ),
        None => None,
    };
    Ok(Command {
        id: CommandId(row.get(0)?),
        player: PlayerId(row.get(1)?),
        army: ArmyId(row.get(2)?),
        turn: TurnId(row.get(3)?),
        command_type: row.get(4)?,
        payload: json_column(row, 5)?,
        status: status
            .parse()
            .map_err(|s| conversion(6, Type::Text, format!("unknown command status: {s}")))?,
        result,
        created_at: timestamp(row, 8)?,
        updated_at: timestamp(row, 9)?,
    })
}

fn army_from_row(row: &Row<'_>) -> rusqlite::Result<Army> {
    Ok(Army {
        id: ArmyId(row.get(0)?),
        name: row.get(1)?,
        realm: RealmId(row.get(2)?),
        position: Coord::new(row.get(3)?, row.get(4)?),
        created_at: timestamp(row, 5)?,
        updated_at: timestamp(row, 6)?,
    })
}

fn class_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<UnitClass> {
    Ok(UnitClass {
        id: UnitClassId(row.get(offset)?),
        name: row.get(offset + 1)?,
        melee: row.get(offset + 2)?,
        ranged: row.get(offset + 3)?,
        defence: row.get(offset + 4)?,
        attack_range: row.get(offset + 5)?,
        hitpoints: row.get(offset + 6)?,
        strategic_speed: row.get(offset + 7)?,
    })
}

fn unit_from_row(row: &Row<'_>) -> rusqlite::Result<Unit> {
    Ok(Unit {
        id: UnitId(row.get(0)?),
        name: row.get(1)?,
        realm: RealmId(row.get(2)?),
        army: ArmyId(row.get(3)?),
        current_hitpoints: row.get(4)?,
        class: class_from_row(row, 5)?,
    })
}

impl SqliteTx<'_> {
    fn turns(&self, sql: &str, params: impl rusqlite::Params) -> EngineResult<Vec<Turn>> {
        let mut stmt = self.tx.prepare(sql)?;
        let rows = stmt.query_map(params, turn_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn one_turn(&self, sql: &str, params: impl rusqlite::Params) -> EngineResult<Option<Turn>> {
        Ok(self.tx.query_row(sql, params, turn_from_row).optional()?)
    }

    fn commands(&self, sql: &str, params: impl rusqlite::Params) -> EngineResult<Vec<Command>> {
        let mut stmt = self.tx.prepare(sql)?;
        let rows = stmt.query_map(params, command_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl Transaction for SqliteTx<'_> {
    fn active_turn(&mut self) -> EngineResult<Option<Turn>> {
        self.one_turn(
            &format!(
                "SELECT {TURN_COLUMNS} FROM game_turns WHERE status = 'active' \
                 ORDER BY turn_number DESC LIMIT 1"
            ),
            [],
        )
    }

    fn turn(&mut self, id: TurnId) -> EngineResult<Option<Turn>> {
        self.one_turn(
            &format!("SELECT {TURN_COLUMNS} FROM game_turns WHERE id = ?1"),
            [id.0],
        )
    }

    fn turn_by_number(&mut self, turn_number: i64) -> EngineResult<Option<Turn>> {
        self.one_turn(
            &format!("SELECT {TURN_COLUMNS} FROM game_turns WHERE turn_number = ?1"),
            [turn_number],
        )
    }

    fn overdue_turns(&mut self, now: DateTime<Utc>) -> EngineResult<Vec<Turn>> {
        self.turns(
            &format!(
                "SELECT {TURN_COLUMNS} FROM game_turns \
                 WHERE status = 'active' AND command_deadline < ?1 ORDER BY turn_number"
            ),
            [millis(now)],
        )
    }

    fn next_pending_turn(&mut self) -> EngineResult<Option<Turn>> {
        self.one_turn(
            &format!(
                "SELECT {TURN_COLUMNS} FROM game_turns WHERE status = 'pending' \
                 ORDER BY turn_number ASC LIMIT 1"
            ),
            [],
        )
    }

    fn last_completed_turn(&mut self) -> EngineResult<Option<Turn>> {
        self.one_turn(
            &format!(
                "SELECT {TURN_COLUMNS} FROM game_turns WHERE status = 'completed' \
                 ORDER BY turn_number DESC LIMIT 1"
            ),
            [],
        )
    }

    fn recent_turns(&mut self, limit: usize) -> EngineResult<Vec<Turn>> {
        self.turns(
            &format!("SELECT {TURN_COLUMNS} FROM game_turns ORDER BY turn_number DESC LIMIT ?1"),
            [i64::try_from(limit).unwrap_or(i64::MAX)],
        )
    }

    fn max_turn_number(&mut self) -> EngineResult<Option<i64>> {
        Ok(self
            .tx
            .query_row("SELECT MAX(turn_number) FROM game_turns", [], |row| row.get(0))?)
    }

    fn insert_turn(
        &mut self,
        turn_number: i64,
        window: TurnWindow,
        status: TurnStatus,
    ) -> EngineResult<Turn> {
        Ok(self.tx.query_row(
            &format!(
                "INSERT INTO game_turns (turn_number, start_time, command_deadline, end_time, status) \
                 VALUES (?1, ?2, ?3, ?4, ?5) RETURNING {TURN_COLUMNS}"
            ),
            params![
                turn_number,
                millis(window.start()),
                millis(window.deadline()),
                millis(window.end()),
                status.as_str(),
            ],
            turn_from_row,
        )?)
    }

    fn close_turn(
        &mut self,
        id: TurnId,
        command_deadline: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> EngineResult<Option<Turn>> {
        self.one_turn(
            &format!(
                "UPDATE game_turns SET status = 'completed', command_deadline = ?2, end_time = ?3 \
                 WHERE id = ?1 AND status = 'active' RETURNING {TURN_COLUMNS}"
            ),
            params![id.0, millis(command_deadline), millis(end_time)],
        )
    }

    fn activate_turn(&mut self, id: TurnId, window: TurnWindow) -> EngineResult<Option<Turn>> {
        self.one_turn(
            &format!(
                "UPDATE game_turns SET status = 'active', start_time = ?2, command_deadline = ?3, \
                 end_time = ?4 WHERE id = ?1 AND status = 'pending' RETURNING {TURN_COLUMNS}"
            ),
            params![
                id.0,
                millis(window.start()),
                millis(window.deadline()),
                millis(window.end())
            ],
        )
    }

    fn update_turn_window(
        &mut self,
        id: TurnId,
        window: TurnWindow,
    ) -> EngineResult<Option<Turn>> {
        self.one_turn(
            &format!(
                "UPDATE game_turns SET start_time = ?2, command_deadline = ?3, end_time = ?4 \
                 WHERE id = ?1 RETURNING {TURN_COLUMNS}"
            ),
            params![
                id.0,
                millis(window.start()),
                millis(window.deadline()),
                millis(window.end())
            ],
        )
    }

    fn delete_turn(&mut self, id: TurnId) -> EngineResult<bool> {
        let n = self
            .tx
            .execute("DELETE FROM game_turns WHERE id = ?1", [id.0])?;
        Ok(n > 0)
    }

    fn insert_command(&mut self, command: NewCommand) -> EngineResult<Command> {
        let payload = serde_json::to_string(&command.payload).map_err(StoreError::from)?;
        Ok(self.tx.query_row(
            &format!(
                "INSERT INTO commands (player_id, army_id, game_turn_id, command_type, \
                 command_data, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6) RETURNING {COMMAND_COLUMNS}"
            ),
            params![
                command.player.0,
                command.army.0,
                command.turn.0,
                command.command_type,
                payload,
                millis(command.created_at),
            ],
            command_from_row,
        )?)
    }

    fn command(&mut self, id: CommandId) -> EngineResult<Option<Command>> {
        Ok(self
            .tx
            .query_row(
                &format!("SELECT {COMMAND_COLUMNS} FROM commands WHERE id = ?1"),
                [id.0],
                command_from_row,
            )
            .optional()?)
    }

    fn open_command_for(&mut self, army: ArmyId, turn: TurnId) -> EngineResult<Option<Command>> {
        Ok(self
            .tx
            .query_row(
                &format!(
                    "SELECT {COMMAND_COLUMNS} FROM commands WHERE army_id = ?1 \
                     AND game_turn_id = ?2 AND status IN ('pending', 'processing') LIMIT 1"
                ),
                [army.0, turn.0],
                command_from_row,
            )
            .optional()?)
    }

    fn pending_commands(&mut self, turn: TurnId) -> EngineResult<Vec<Command>> {
        self.commands(
            &format!(
                "SELECT {COMMAND_COLUMNS} FROM commands WHERE game_turn_id = ?1 \
                 AND status = 'pending' ORDER BY created_at ASC, id ASC"
            ),
            [turn.0],
        )
    }

    fn commands_for_turn(&mut self, turn: TurnId) -> EngineResult<Vec<Command>> {
        self.commands(
            &format!(
                "SELECT {COMMAND_COLUMNS} FROM commands WHERE game_turn_id = ?1 \
                 ORDER BY created_at ASC, id ASC"
            ),
            [turn.0],
        )
    }

    fn commands_for_army(&mut self, army: ArmyId, limit: usize) -> EngineResult<Vec<Command>> {
        self.commands(
            &format!(
                "SELECT {COMMAND_COLUMNS} FROM commands WHERE army_id = ?1 \
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ),
            [army.0, i64::try_from(limit).unwrap_or(i64::MAX)],
        )
    }

    fn set_command_status(
        &mut self,
        id: CommandId,
        status: CommandStatus,
        result: Option<&serde_json::Value>,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<Command>> {
        let result = result
            .map(serde_json::to_string)
            .transpose()
            .map_err(StoreError::from)?;
        Ok(self
            .tx
            .query_row(
                &format!(
                    "UPDATE commands SET status = ?2, result = COALESCE(?3, result), updated_at = ?4 \
                     WHERE id = ?1 RETURNING {COMMAND_COLUMNS}"
                ),
                params![id.0, status.as_str(), result, millis(at)],
                command_from_row,
            )
            .optional()?)
    }

    fn command_counts(&mut self, turn: TurnId) -> EngineResult<Vec<(CommandStatus, i64)>> {
        let mut stmt = self.tx.prepare(
            "SELECT status, COUNT(*) FROM commands WHERE game_turn_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map([turn.0], |row| {
            let status: String = row.get(0)?;
            let status = status
                .parse::<CommandStatus>()
                .map_err(|s| conversion(0, Type::Text, format!("unknown command status: {s}")))?;
            Ok((status, row.get::<_, i64>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn realm(&mut self, id: RealmId) -> EngineResult<Option<Realm>> {
        Ok(self
            .tx
            .query_row(
                "SELECT id, name, player_id FROM realms WHERE id = ?1",
                [id.0],
                |row| {
                    Ok(Realm {
                        id: RealmId(row.get(0)?),
                        name: row.get(1)?,
                        player: PlayerId(row.get(2)?),
                    })
                },
            )
            .optional()?)
    }

    fn army(&mut self, id: ArmyId) -> EngineResult<Option<Army>> {
        Ok(self
            .tx
            .query_row(
                &format!("SELECT {ARMY_COLUMNS} FROM armies WHERE id = ?1"),
                [id.0],
                army_from_row,
            )
            .optional()?)
    }

    fn armies_at(&mut self, position: Coord) -> EngineResult<Vec<Army>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {ARMY_COLUMNS} FROM armies WHERE x_coord = ?1 AND y_coord = ?2 ORDER BY id"
        ))?;
        let rows = stmt.query_map([position.x, position.y], army_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn set_army_position(
        &mut self,
        id: ArmyId,
        position: Coord,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<Army>> {
        Ok(self
            .tx
            .query_row(
                &format!(
                    "UPDATE armies SET x_coord = ?2, y_coord = ?3, updated_at = ?4 \
                     WHERE id = ?1 RETURNING {ARMY_COLUMNS}"
                ),
                params![id.0, position.x, position.y, millis(at)],
                army_from_row,
            )
            .optional()?)
    }

    fn units_in_army(&mut self, army: ArmyId) -> EngineResult<Vec<Unit>> {
        let mut stmt = self
            .tx
            .prepare(&format!("{UNIT_SELECT} WHERE u.army_id = ?1 ORDER BY u.id"))?;
        let rows = stmt.query_map([army.0], unit_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn set_unit_hitpoints(&mut self, id: UnitId, hitpoints: i64) -> EngineResult<Option<i64>> {
        Ok(self
            .tx
            .query_row(
                "UPDATE units SET current_hitpoints = ?2 WHERE id = ?1 \
                 RETURNING current_hitpoints",
                params![id.0, hitpoints],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn unit_class(&mut self, id: UnitClassId) -> EngineResult<Option<UnitClass>> {
        Ok(self
            .tx
            .query_row(
                &format!("SELECT {CLASS_COLUMNS} FROM unit_classes WHERE id = ?1"),
                [id.0],
                |row| class_from_row(row, 0),
            )
            .optional()?)
    }

    fn unit_name_taken(&mut self, realm: RealmId, name: &str) -> EngineResult<bool> {
        let found: Option<i64> = self
            .tx
            .query_row(
                "SELECT id FROM units WHERE realm_id = ?1 AND name = ?2",
                params![realm.0, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_unit(
        &mut self,
        name: &str,
        realm: RealmId,
        army: ArmyId,
        class: &UnitClass,
    ) -> EngineResult<Unit> {
        let id: i64 = self.tx.query_row(
            "INSERT INTO units (name, realm_id, army_id, unit_class_id, current_hitpoints) \
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
            params![name, realm.0, army.0, class.id.0, class.hitpoints],
            |row| row.get(0),
        )?;
        Ok(Unit {
            id: UnitId(id),
            name: name.to_string(),
            realm,
            army,
            class: class.clone(),
            current_hitpoints: class.hitpoints,
        })
    }

    fn tile(&mut self, position: Coord) -> EngineResult<Option<Tile>> {
        Ok(self
            .tx
            .query_row(
                "SELECT m.terrain_type, COALESCE(t.movement_cost, 1), COALESCE(t.defence_bonus, 0) \
                 FROM map_tiles m LEFT JOIN terrain_types t ON m.terrain_type = t.type \
                 WHERE m.x_coord = ?1 AND m.y_coord = ?2",
                [position.x, position.y],
                |row| {
                    let terrain: String = row.get(0)?;
                    Ok(Tile {
                        position,
                        terrain: Terrain::parse(&terrain),
                        movement_cost: row.get(1)?,
                        defence_bonus: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    fn savepoint(&mut self, name: &str) -> EngineResult<()> {
        self.tx.execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> EngineResult<()> {
        self.tx.execute_batch(&format!("RELEASE SAVEPOINT {name}"))?;
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> EngineResult<()> {
        self.tx
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"))?;
        Ok(())
    }
}

/// Stats for a new unit class row.
#[derive(Debug, Clone)]
pub struct NewUnitClass<'a> {
    pub name: &'a str,
    pub melee: i64,
    pub ranged: i64,
    pub defence: i64,
    pub attack_range: i64,
    pub hitpoints: i64,
    pub strategic_speed: i64,
}

/// World setup handle used by fixtures and the operator CLI.
pub struct WorldSeed<'a> {
    conn: &'a Connection,
    now: DateTime<Utc>,
}

impl WorldSeed<'_> {
    pub fn add_player(&mut self, nick: &str) -> EngineResult<PlayerId> {
        let id = self.conn.query_row(
            "INSERT INTO players (nick) VALUES (?1) RETURNING id",
            [nick],
            |row| row.get(0),
        )?;
        Ok(PlayerId(id))
    }

    pub fn add_realm(&mut self, name: &str, player: PlayerId) -> EngineResult<RealmId> {
        let id = self.conn.query_row(
            "INSERT INTO realms (name, player_id) VALUES (?1, ?2) RETURNING id",
            params![name, player.0],
            |row| row.get(0),
        )?;
        Ok(RealmId(id))
    }

    pub fn add_terrain(
        &mut self,
        terrain: &Terrain,
        movement_cost: i64,
        defence_bonus: i64,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO terrain_types (type, movement_cost, defence_bonus) \
             VALUES (?1, ?2, ?3)",
            params![terrain.as_str(), movement_cost, defence_bonus],
        )?;
        Ok(())
    }

    pub fn set_tile(&mut self, position: Coord, terrain: &Terrain) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO map_tiles (x_coord, y_coord, terrain_type) VALUES (?1, ?2, ?3)",
            params![position.x, position.y, terrain.as_str()],
        )?;
        Ok(())
    }

    /// Cover every coordinate of `bounds` with `terrain`.
    pub fn fill_tiles(&mut self, bounds: MapBounds, terrain: &Terrain) -> EngineResult<()> {
        let mut stmt = self.conn.prepare(
            "INSERT OR REPLACE INTO map_tiles (x_coord, y_coord, terrain_type) VALUES (?1, ?2, ?3)",
        )?;
        for x in bounds.min_x..=bounds.max_x {
            for y in bounds.min_y..=bounds.max_y {
                stmt.execute(params![x, y, terrain.as_str()])?;
            }
        }
        Ok(())
    }

    pub fn add_unit_class(&mut self, class: NewUnitClass<'_>) -> EngineResult<UnitClassId> {
        let id = self.conn.query_row(
            "INSERT INTO unit_classes (name, melee_combat, ranged_combat, defence, attack_range, \
             hitpoints, strategic_speed) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) RETURNING id",
            params![
                class.name,
                class.melee,
                class.ranged,
                class.defence,
                class.attack_range,
                class.hitpoints,
                class.strategic_speed
            ],
            |row| row.get(0),
        )?;
        Ok(UnitClassId(id))
    }

    pub fn add_army(&mut self, name: &str, realm: RealmId, position: Coord) -> EngineResult<ArmyId> {
        let at = millis(self.now);
        let id = self.conn.query_row(
            "INSERT INTO armies (name, realm_id, x_coord, y_coord, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5) RETURNING id",
            params![name, realm.0, position.x, position.y, at],
            |row| row.get(0),
        )?;
        Ok(ArmyId(id))
    }

    /// Add a unit at full strength. The realm is taken from the army.
    pub fn add_unit(&mut self, name: &str, army: ArmyId, class: UnitClassId) -> EngineResult<UnitId> {
        let id = self.conn.query_row(
            "INSERT INTO units (name, realm_id, army_id, unit_class_id, current_hitpoints) \
             SELECT ?1, a.realm_id, a.id, c.id, c.hitpoints \
             FROM armies a, unit_classes c WHERE a.id = ?2 AND c.id = ?3 RETURNING id",
            params![name, army.0, class.0],
            |row| row.get(0),
        )?;
        Ok(UnitId(id))
    }

    pub fn set_unit_hitpoints(&mut self, unit: UnitId, hitpoints: i64) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE units SET current_hitpoints = ?2 WHERE id = ?1",
            params![unit.0, hitpoints],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::error::EngineError;

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn window(start: i64) -> TurnWindow {
        TurnWindow::new(t(start), t(start + 20), t(start + 24)).unwrap()
    }

    #[test]
    fn second_active_turn_is_rejected_by_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .transaction(|tx| tx.insert_turn(1, window(0), TurnStatus::Active))
            .unwrap();
        let err = store
            .transaction(|tx| tx.insert_turn(2, window(24), TurnStatus::Active))
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Sqlite(_))));
    }

    #[test]
    fn panicked_transaction_leaves_store_usable() {
        let store = SqliteStore::open_in_memory().unwrap();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.transaction(|tx| -> EngineResult<()> {
                tx.insert_turn(1, window(0), TurnStatus::Active)?;
                panic!("handler bug");
            })
        }));
        assert!(outcome.is_err());

        assert!(store.read(|tx| tx.active_turn()).unwrap().is_none());
        let turn = store
            .transaction(|tx| tx.insert_turn(1, window(0), TurnStatus::Active))
            .unwrap();
        assert_eq!(turn.turn_number, 1);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .transaction(|tx| {
                tx.insert_turn(1, window(0), TurnStatus::Active)?;
                Err::<(), _>(EngineError::NoActiveTurn)
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::NoActiveTurn));
        let active = store.read(|tx| tx.active_turn()).unwrap();
        assert!(active.is_none());
    }

    #[test]
    fn close_turn_is_conditional_on_active() {
        let store = SqliteStore::open_in_memory().unwrap();
        let turn = store
            .transaction(|tx| tx.insert_turn(1, window(0), TurnStatus::Active))
            .unwrap();

        let closed = store
            .transaction(|tx| tx.close_turn(turn.id, t(20), t(24)))
            .unwrap()
            .unwrap();
        assert_eq!(closed.status, TurnStatus::Completed);

        let again = store
            .transaction(|tx| tx.close_turn(turn.id, t(20), t(24)))
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn savepoint_rollback_discards_only_inner_writes() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .transaction(|tx| {
                tx.insert_turn(1, window(0), TurnStatus::Completed)?;
                tx.savepoint("inner")?;
                tx.insert_turn(2, window(24), TurnStatus::Active)?;
                tx.rollback_to_savepoint("inner")?;
                Ok(())
            })
            .unwrap();

        let turns = store.read(|tx| tx.recent_turns(10)).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].turn_number, 1);
    }

    #[test]
    fn seeded_world_reads_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (army, class) = store
            .seed(|w| {
                let player = w.add_player("ada")?;
                let realm = w.add_realm("North", player)?;
                w.add_terrain(&Terrain::Forest, 2, 1)?;
                w.set_tile(Coord::new(1, 0), &Terrain::Forest)?;
                let class = w.add_unit_class(NewUnitClass {
                    name: "archer",
                    melee: 3,
                    ranged: 8,
                    defence: 2,
                    attack_range: 3,
                    hitpoints: 12,
                    strategic_speed: 2,
                })?;
                let army = w.add_army("First", realm, Coord::new(0, 0))?;
                w.add_unit("Bowmen", army, class)?;
                Ok((army, class))
            })
            .unwrap();

        let (units, tile, class_row) = store
            .read(|tx| {
                Ok((
                    tx.units_in_army(army)?,
                    tx.tile(Coord::new(1, 0))?,
                    tx.unit_class(class)?,
                ))
            })
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].current_hitpoints, 12);
        assert_eq!(units[0].class.attack_power(), 8);
        let tile = tile.unwrap();
        assert_eq!(tile.terrain, Terrain::Forest);
        assert_eq!(tile.movement_cost, 2);
        assert_eq!(class_row.unwrap().name, "archer");
    }
}
