//! Command processor - resolves a turn's queued commands one at a time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use super::{combat, movement, TurnEngine};
use crate::clock::Clock;
use crate::error::{EngineResult, ResolutionFailure, StoreError};
use crate::model::{Command, CommandId, CommandKind, CommandStatus, Turn, UnitOrder};
use crate::store::{Store, Transaction};

const SAVEPOINT: &str = "command";

/// Tally of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<CommandError>,
}

/// A command whose handler hit a store fault rather than a rule failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandError {
    pub command_id: CommandId,
    pub error: String,
}

fn failure_result(reason: &str) -> Value {
    json!({ "error": reason })
}

fn to_result<T: Serialize>(
    outcome: EngineResult<Result<T, ResolutionFailure>>,
) -> EngineResult<Result<Value, ResolutionFailure>> {
    match outcome? {
        Ok(report) => Ok(Ok(serde_json::to_value(report).map_err(StoreError::from)?)),
        Err(failure) => Ok(Err(failure)),
    }
}

impl<S: Store, C: Clock> TurnEngine<S, C> {
    /// Resolve every pending command of `turn` in FIFO order.
    ///
    /// Each command runs under its own savepoint; a failing command leaves
    /// no world mutation behind and the batch carries on.
    pub(crate) fn process_pending(
        &self,
        tx: &mut dyn Transaction,
        turn: &Turn,
        now: DateTime<Utc>,
    ) -> EngineResult<BatchResult> {
        let commands = tx.pending_commands(turn.id)?;
        let mut batch = BatchResult::default();

        tracing::info!(
            turn_number = turn.turn_number,
            pending = commands.len(),
            "Processing commands"
        );

        for command in commands {
            tx.set_command_status(command.id, CommandStatus::Processing, None, now)?;
            tx.savepoint(SAVEPOINT)?;

            match self.dispatch(tx, &command, now) {
                Ok(Ok(result)) => {
                    tx.release_savepoint(SAVEPOINT)?;
                    tx.set_command_status(command.id, CommandStatus::Completed, Some(&result), now)?;
                    batch.succeeded += 1;
                    tracing::debug!(
                        command_id = %command.id,
                        command_type = %command.command_type,
                        "Command completed"
                    );
                }
                Ok(Err(failure)) => {
                    tx.rollback_to_savepoint(SAVEPOINT)?;
                    let reason = failure.to_string();
                    tx.set_command_status(
                        command.id,
                        CommandStatus::Failed,
                        Some(&failure_result(&reason)),
                        now,
                    )?;
                    batch.failed += 1;
                    tracing::info!(
                        command_id = %command.id,
                        army_id = %command.army,
                        reason = %reason,
                        "Command failed"
                    );
                }
                Err(error) => {
                    tx.rollback_to_savepoint(SAVEPOINT)?;
                    let reason = error.to_string();
                    tx.set_command_status(
                        command.id,
                        CommandStatus::Failed,
                        Some(&failure_result(&reason)),
                        now,
                    )?;
                    batch.failed += 1;
                    batch.errors.push(CommandError {
                        command_id: command.id,
                        error: reason.clone(),
                    });
                    tracing::error!(command_id = %command.id, error = %reason, "Error processing command");
                }
            }
            batch.processed += 1;
        }

        Ok(batch)
    }

    fn dispatch(
        &self,
        tx: &mut dyn Transaction,
        command: &Command,
        now: DateTime<Utc>,
    ) -> EngineResult<Result<Value, ResolutionFailure>> {
        let kind = match command.kind() {
            Ok(kind) => kind,
            Err(failure) => {
                tracing::warn!(
                    command_id = %command.id,
                    command_type = %command.command_type,
                    "Unrecognized command"
                );
                return Ok(Err(failure));
            }
        };

        match kind {
            CommandKind::Move(order) => to_result(movement::resolve_move(
                tx,
                &self.config.map,
                command.army,
                &order,
                now,
            )),
            CommandKind::Attack(order) => {
                let mut rng = self.rng();
                to_result(combat::resolve_attack(tx, &mut *rng, command.army, &order))
            }
            CommandKind::CreateUnit(order) => create_unit(tx, command, &order),
        }
    }
}

fn create_unit(
    tx: &mut dyn Transaction,
    command: &Command,
    order: &UnitOrder,
) -> EngineResult<Result<Value, ResolutionFailure>> {
    let Some(army) = tx.army(command.army)? else {
        return Ok(Err(ResolutionFailure::ArmyNotFound(command.army)));
    };
    let owned = tx
        .realm(army.realm)?
        .is_some_and(|realm| realm.player == command.player);
    if !owned {
        return Ok(Err(ResolutionFailure::NotArmyOwner {
            player: command.player.0,
            army: army.id,
        }));
    }
    let Some(class) = tx.unit_class(order.unit_class)? else {
        return Ok(Err(ResolutionFailure::UnitClassNotFound(order.unit_class.0)));
    };
    let name = order.name.trim();
    if tx.unit_name_taken(army.realm, name)? {
        return Ok(Err(ResolutionFailure::DuplicateUnitName(name.to_string())));
    }

    let unit = tx.insert_unit(name, army.realm, army.id, &class)?;
    tracing::debug!(unit_id = %unit.id, army_id = %army.id, class = %class.name, "Unit created");
    Ok(Ok(json!({
        "unit_id": unit.id,
        "name": unit.name,
        "unit_class": class.name,
        "army_id": army.id,
        "hitpoints": unit.current_hitpoints,
        "message": "Unit created",
    })))
}
