//! Queued player intents.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ArmyId, CommandId, Coord, PlayerId, TurnId, UnitClassId};
use crate::error::{ResolutionFailure, ValidationError};

/// Command lifecycle: pending → processing → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Pending and processing commands occupy the army's slot for the turn.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOrder {
    pub path: Vec<Coord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttackOrder {
    /// Explicit defender; when absent the first co-located enemy army is engaged.
    #[serde(default)]
    pub target_army: Option<ArmyId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOrder {
    pub unit_class: UnitClassId,
    pub name: String,
}

/// What a command asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Move(MoveOrder),
    Attack(AttackOrder),
    CreateUnit(UnitOrder),
}

impl CommandKind {
    pub fn command_type(&self) -> &'static str {
        match self {
            Self::Move(_) => "move",
            Self::Attack(_) => "attack",
            Self::CreateUnit(_) => "create_unit",
        }
    }

    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Move(order) => serde_json::to_value(order),
            Self::Attack(order) => serde_json::to_value(order),
            Self::CreateUnit(order) => serde_json::to_value(order),
        }
    }

    /// Rebuild a command from its stored type tag and payload.
    pub fn decode(command_type: &str, payload: &serde_json::Value) -> Result<Self, ResolutionFailure> {
        let unrecognized = |reason: String| ResolutionFailure::Unrecognized {
            command_type: command_type.to_string(),
            reason,
        };

        match command_type {
            "move" => serde_json::from_value(payload.clone())
                .map(Self::Move)
                .map_err(|e| unrecognized(e.to_string())),
            "attack" => {
                let payload = if payload.is_null() {
                    serde_json::Value::Object(Default::default())
                } else {
                    payload.clone()
                };
                serde_json::from_value(payload)
                    .map(Self::Attack)
                    .map_err(|e| unrecognized(e.to_string()))
            }
            "create_unit" => serde_json::from_value(payload.clone())
                .map(Self::CreateUnit)
                .map_err(|e| unrecognized(e.to_string())),
            _ => Err(unrecognized("no handler for this command type".to_string())),
        }
    }

    /// Structural checks applied at submission time.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Move(order) if order.path.len() < 2 => Err(ValidationError::MalformedCommand(
                "move path needs at least two waypoints".to_string(),
            )),
            Self::CreateUnit(order) if order.name.trim().is_empty() => Err(
                ValidationError::MalformedCommand("unit name must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Insert payload for a new command row.
#[derive(Debug, Clone)]
pub struct NewCommand {
    pub player: PlayerId,
    pub army: ArmyId,
    pub turn: TurnId,
    pub command_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A stored command row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub player: PlayerId,
    pub army: ArmyId,
    pub turn: TurnId,
    pub command_type: String,
    pub payload: serde_json::Value,
    pub status: CommandStatus,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Command {
    pub fn kind(&self) -> Result<CommandKind, ResolutionFailure> {
        CommandKind::decode(&self.command_type, &self.payload)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decode_move_payload() {
        let kind = CommandKind::decode("move", &json!({"path": [{"x": 0, "y": 0}, {"x": 1, "y": 1}]}))
            .unwrap();
        assert_eq!(
            kind,
            CommandKind::Move(MoveOrder {
                path: vec![Coord::new(0, 0), Coord::new(1, 1)]
            })
        );
    }

    #[test]
    fn decode_attack_without_target() {
        let kind = CommandKind::decode("attack", &serde_json::Value::Null).unwrap();
        assert_eq!(kind, CommandKind::Attack(AttackOrder::default()));
    }

    #[test]
    fn decode_unknown_type_is_unrecognized() {
        let err = CommandKind::decode("recruit_spy", &json!({})).unwrap_err();
        assert!(matches!(err, ResolutionFailure::Unrecognized { ref command_type, .. } if command_type == "recruit_spy"));
    }

    #[test]
    fn decode_bad_payload_is_unrecognized() {
        let err = CommandKind::decode("move", &json!({"route": []})).unwrap_err();
        assert!(matches!(err, ResolutionFailure::Unrecognized { .. }));
    }

    #[test]
    fn short_move_path_is_malformed() {
        let kind = CommandKind::Move(MoveOrder {
            path: vec![Coord::new(0, 0)],
        });
        assert!(matches!(
            kind.validate(),
            Err(ValidationError::MalformedCommand(_))
        ));
    }

    #[test]
    fn open_statuses() {
        assert!(CommandStatus::Pending.is_open());
        assert!(CommandStatus::Processing.is_open());
        assert!(!CommandStatus::Completed.is_open());
        assert!(!CommandStatus::Failed.is_open());
    }
}
