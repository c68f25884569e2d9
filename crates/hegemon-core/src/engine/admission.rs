//! Command admission and the command-store operations around it.

use serde_json::{json, Value};

use super::TurnEngine;
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult, StoreError, ValidationError};
use crate::model::{
    ArmyId, Command, CommandId, CommandKind, CommandStatus, NewCommand, PlayerId, TurnId,
};
use crate::observability::TurnEvent;
use crate::store::Store;

impl<S: Store, C: Clock> TurnEngine<S, C> {
    /// Queue `kind` for `army` in the active turn.
    ///
    /// Checks run in a fixed order and the first violation wins; a rejected
    /// submission writes nothing.
    pub fn submit_command(
        &self,
        player: PlayerId,
        army: ArmyId,
        turn: Option<TurnId>,
        kind: CommandKind,
    ) -> EngineResult<Command> {
        let now = self.clock.now();
        let submitted = self.store.transaction(|tx| {
            let active = tx.active_turn()?.ok_or(EngineError::NoActiveTurn)?;
            if let Some(requested) = turn {
                if requested != active.id {
                    return Err(ValidationError::TurnNotActive {
                        requested,
                        active: active.id,
                    }
                    .into());
                }
            }

            let army_row = tx
                .army(army)?
                .ok_or_else(|| EngineError::not_found("army", army))?;
            let owned = tx
                .realm(army_row.realm)?
                .is_some_and(|realm| realm.player == player);
            if !owned {
                return Err(ValidationError::NotArmyOwner {
                    player: player.0,
                    army,
                }
                .into());
            }

            if !active.accepts_commands(now) {
                return Err(EngineError::WindowClosed {
                    turn_number: active.turn_number,
                    deadline: active.command_deadline,
                });
            }
            if tx.open_command_for(army, active.id)?.is_some() {
                return Err(EngineError::DuplicateCommand {
                    army,
                    turn: active.id,
                });
            }

            kind.validate()?;
            let payload = kind.payload().map_err(StoreError::from)?;
            tx.insert_command(NewCommand {
                player,
                army,
                turn: active.id,
                command_type: kind.command_type().to_string(),
                payload,
                created_at: now,
            })
        });

        match submitted {
            Ok(command) => {
                tracing::info!(
                    command_id = %command.id,
                    army_id = %army,
                    command_type = %command.command_type,
                    "Command queued"
                );
                Ok(command)
            }
            Err(err) => {
                tracing::info!(army_id = %army, player_id = %player, reason = %err, "Command rejected");
                self.record(
                    TurnEvent::new("command_rejected", err.to_string()).metadata(json!({
                        "player_id": player,
                        "army_id": army,
                        "command_type": kind.command_type(),
                    })),
                );
                Err(err)
            }
        }
    }

    /// Submit from an untyped `(command_type, payload)` pair.
    pub fn submit_raw(
        &self,
        player: PlayerId,
        army: ArmyId,
        turn: Option<TurnId>,
        command_type: &str,
        payload: &Value,
    ) -> EngineResult<Command> {
        let kind = CommandKind::decode(command_type, payload)
            .map_err(|failure| ValidationError::MalformedCommand(failure.to_string()))?;
        self.submit_command(player, army, turn, kind)
    }

    /// Withdraw a still-pending command. Only its submitter may do so.
    pub fn cancel_command(&self, player: PlayerId, id: CommandId) -> EngineResult<Command> {
        let now = self.clock.now();
        let cancelled = self.store.transaction(|tx| {
            let command = tx
                .command(id)?
                .ok_or_else(|| EngineError::not_found("command", id))?;
            if command.player != player {
                return Err(ValidationError::NotArmyOwner {
                    player: player.0,
                    army: command.army,
                }
                .into());
            }
            if command.status != CommandStatus::Pending {
                return Err(ValidationError::CommandNotPending(id.0).into());
            }
            tx.set_command_status(
                id,
                CommandStatus::Failed,
                Some(&json!({ "error": "cancelled by player" })),
                now,
            )?
            .ok_or_else(|| EngineError::not_found("command", id))
        })?;
        tracing::info!(command_id = %id, "Command cancelled");
        self.record(
            TurnEvent::new("command_cancelled", "Command cancelled by player")
                .command(id.0)
                .metadata(json!({ "player_id": player, "army_id": cancelled.army })),
        );
        Ok(cancelled)
    }

    /// Administrative status override. Reopening a command is refused when
    /// the army already holds another open command for that turn.
    pub fn override_command_status(
        &self,
        id: CommandId,
        status: CommandStatus,
        note: Option<&str>,
    ) -> EngineResult<Command> {
        let now = self.clock.now();
        let updated = self.store.transaction(|tx| {
            let command = tx
                .command(id)?
                .ok_or_else(|| EngineError::not_found("command", id))?;
            if status.is_open() && !command.status.is_open() {
                if let Some(open) = tx.open_command_for(command.army, command.turn)? {
                    return Err(EngineError::Conflict(format!(
                        "army {} already has open command {}",
                        command.army, open.id
                    )));
                }
            }
            let result = note.map(|n| json!({ "message": n }));
            tx.set_command_status(id, status, result.as_ref(), now)?
                .ok_or_else(|| EngineError::not_found("command", id))
        })?;
        tracing::warn!(command_id = %id, status = %status, "Command status overridden");
        self.record(
            TurnEvent::new("command_overridden", format!("Command set to {status}"))
                .command(id.0)
                .metadata(json!({ "status": status, "note": note })),
        );
        Ok(updated)
    }

    pub fn command(&self, id: CommandId) -> EngineResult<Command> {
        self.store.read(|tx| {
            tx.command(id)?
                .ok_or_else(|| EngineError::not_found("command", id))
        })
    }

    pub fn commands_for_turn(&self, turn: TurnId) -> EngineResult<Vec<Command>> {
        self.store.read(|tx| tx.commands_for_turn(turn))
    }

    /// Most recent first.
    pub fn commands_for_army(&self, army: ArmyId, limit: usize) -> EngineResult<Vec<Command>> {
        self.store.read(|tx| tx.commands_for_army(army, limit))
    }
}
