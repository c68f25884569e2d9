//! Error taxonomy for the turn engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{ArmyId, TurnId};

/// Result alias used throughout the engine.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any mutation (bad input, closed window).
    Validation,
    /// Competing state: duplicate command, lost turn-advance race.
    Conflict,
    /// Unknown turn/army/unit/class.
    NotFound,
    /// The store or a worker running against it failed; the whole
    /// operation was rolled back.
    Store,
}

/// Errors surfaced to engine callers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no active turn")]
    NoActiveTurn,

    #[error("army {army} already has a queued command for turn {turn}")]
    DuplicateCommand { army: ArmyId, turn: TurnId },

    #[error("command window for turn {turn_number} closed at {deadline}")]
    WindowClosed {
        turn_number: i64,
        deadline: DateTime<Utc>,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A blocking worker running engine work panicked or was cancelled.
    #[error("engine worker failed: {0}")]
    Worker(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<i64>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::WindowClosed { .. } => ErrorKind::Validation,
            Self::NoActiveTurn | Self::DuplicateCommand { .. } | Self::Conflict(_) => {
                ErrorKind::Conflict
            }
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Store(_) | Self::Worker(_) => ErrorKind::Store,
        }
    }
}

/// Input rejected before touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("turn times must satisfy start < deadline < end")]
    TurnTimeOrder,

    #[error("{field} must be in the future")]
    NotInFuture { field: &'static str },

    #[error("turn {requested} is not the active turn ({active})")]
    TurnNotActive { requested: TurnId, active: TurnId },

    #[error("player {player} does not command army {army}")]
    NotArmyOwner { player: i64, army: ArmyId },

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("target turn {target} must be greater than current turn {current}")]
    TargetTurnNotAhead { target: i64, current: i64 },

    #[error("command {0} is not pending")]
    CommandNotPending(i64),

    #[error("scheduler interval must be between {min} and {max} minutes, got {got}")]
    SchedulerInterval { min: u64, max: u64, got: u64 },
}

/// Failures raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(value))
    }
}

/// A single command's domain rule failed during resolution.
///
/// Recorded on the command row as its failure reason; never propagated out
/// of a turn advance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionFailure {
    #[error("army {0} not found")]
    ArmyNotFound(ArmyId),

    #[error("invalid move path: {0}")]
    InvalidPath(String),

    #[error("move path does not start at army current position")]
    PathStartMismatch,

    #[error("path of {steps} steps exceeds strategic speed {speed}")]
    TooFar { steps: usize, speed: i64 },

    #[error("step {index} from ({from_x}, {from_y}) to ({to_x}, {to_y}) is not adjacent")]
    NotAdjacent {
        index: usize,
        from_x: i64,
        from_y: i64,
        to_x: i64,
        to_y: i64,
    },

    #[error("target location ({x}, {y}) is invalid or inaccessible")]
    InvalidLocation { x: i64, y: i64 },

    #[error("no opposing army at ({x}, {y})")]
    NoOpponent { x: i64, y: i64 },

    #[error("armies {attacker} and {defender} are not on the same tile")]
    NotColocated { attacker: ArmyId, defender: ArmyId },

    #[error("armies {0} and {1} belong to the same realm")]
    SameRealm(ArmyId, ArmyId),

    #[error("army {0} has no units")]
    NoUnits(ArmyId),

    #[error("unit class {0} not found")]
    UnitClassNotFound(i64),

    #[error("unit name '{0}' already exists in this realm")]
    DuplicateUnitName(String),

    #[error("player {player} does not command army {army}")]
    NotArmyOwner { player: i64, army: ArmyId },

    #[error("unrecognized command type '{command_type}': {reason}")]
    Unrecognized { command_type: String, reason: String },
}
