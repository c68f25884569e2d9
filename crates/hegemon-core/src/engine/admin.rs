//! Administrative turn operations.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{AdvanceOutcome, BatchResult, TurnEngine};
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::model::{Turn, TurnId, TurnStatus, TurnWindow};
use crate::observability::TurnEvent;
use crate::store::{Store, Transaction};

/// Result of [`TurnEngine::open_turn`].
#[derive(Debug, Clone, Serialize)]
pub struct OpenedTurn {
    /// The previously active turn, if one had to be closed.
    pub closed_turn: Option<Turn>,
    pub batch: Option<BatchResult>,
    pub turn: Turn,
}

fn require_future(
    field: &'static str,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if at > now {
        Ok(())
    } else {
        Err(ValidationError::NotInFuture { field })
    }
}

fn next_number(tx: &mut dyn Transaction) -> EngineResult<i64> {
    Ok(tx.max_turn_number()?.unwrap_or(0) + 1)
}

/// Make `window` the active turn. The lowest scheduled turn is opened
/// early when one exists so numbering never skips past it.
fn activate_next(tx: &mut dyn Transaction, window: TurnWindow) -> EngineResult<Turn> {
    if let Some(pending) = tx.next_pending_turn()? {
        return tx.activate_turn(pending.id, window)?.ok_or_else(|| {
            EngineError::Conflict(format!("turn {} is no longer pending", pending.turn_number))
        });
    }
    let number = next_number(tx)?;
    tx.insert_turn(number, window, TurnStatus::Active)
}

impl<S: Store, C: Clock> TurnEngine<S, C> {
    /// Start the game clock: open the lowest scheduled turn, else turn
    /// `max + 1` (1 on an empty store).
    pub fn bootstrap_turn(
        &self,
        deadline: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Turn> {
        let now = self.clock.now();
        require_future("command_deadline", deadline, now)?;
        require_future("end_time", end, now)?;
        let window = TurnWindow::new(now, deadline, end)?;

        let turn = self.store.transaction(|tx| {
            if let Some(active) = tx.active_turn()? {
                return Err(EngineError::Conflict(format!(
                    "turn {} is already active",
                    active.turn_number
                )));
            }
            activate_next(tx, window)
        })?;

        tracing::info!(turn_number = turn.turn_number, deadline = %turn.command_deadline, "Turn bootstrapped");
        self.record(TurnEvent::new("turn_opened", "Game clock started").turn(turn.turn_number));
        Ok(turn)
    }

    /// Open a new active turn with explicit times, first resolving and
    /// closing the current one if there is one. A scheduled turn is opened
    /// early with these times rather than skipped.
    pub fn open_turn(&self, deadline: DateTime<Utc>, end: DateTime<Utc>) -> EngineResult<OpenedTurn> {
        let now = self.clock.now();
        require_future("command_deadline", deadline, now)?;
        require_future("end_time", end, now)?;

        let opened = self.store.transaction(|tx| {
            let (closed_turn, batch, start) = match tx.active_turn()? {
                Some(active) => {
                    let closing = self.close_active(tx, active, now)?;
                    let start = closing.turn.end_time + super::epsilon();
                    (Some(closing.turn), Some(closing.batch), start)
                }
                None => (None, None, now),
            };
            let window = TurnWindow::new(start, deadline, end)?;
            let turn = activate_next(tx, window)?;
            Ok(OpenedTurn {
                closed_turn,
                batch,
                turn,
            })
        })?;

        tracing::info!(
            turn_number = opened.turn.turn_number,
            closed = ?opened.closed_turn.as_ref().map(|t| t.turn_number),
            "Turn opened"
        );
        self.record(
            TurnEvent::new("turn_opened", format!("Turn {} opened", opened.turn.turn_number))
                .turn(opened.turn.turn_number),
        );
        Ok(opened)
    }

    /// Queue a future turn. It becomes active when the turn before it is
    /// advanced.
    pub fn schedule_turn(
        &self,
        start: DateTime<Utc>,
        deadline: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Turn> {
        let now = self.clock.now();
        require_future("command_deadline", deadline, now)?;
        let window = TurnWindow::new(start, deadline, end)?;
        let turn = self.store.transaction(|tx| {
            let number = next_number(tx)?;
            tx.insert_turn(number, window, TurnStatus::Pending)
        })?;
        tracing::info!(turn_number = turn.turn_number, start = %turn.start_time, "Turn scheduled");
        Ok(turn)
    }

    /// Move a pending or active turn's deadline and end.
    pub fn reschedule_turn(
        &self,
        id: TurnId,
        deadline: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Turn> {
        let now = self.clock.now();
        require_future("end_time", end, now)?;
        let turn = self.store.transaction(|tx| {
            let turn = tx
                .turn(id)?
                .ok_or_else(|| EngineError::not_found("turn", id))?;
            if turn.is_completed() {
                return Err(EngineError::Conflict(format!(
                    "turn {} is already completed",
                    turn.turn_number
                )));
            }
            let window = TurnWindow::new(turn.start_time, deadline, end)?;
            tx.update_turn_window(id, window)?
                .ok_or_else(|| EngineError::not_found("turn", id))
        })?;
        tracing::info!(turn_number = turn.turn_number, deadline = %turn.command_deadline, "Turn rescheduled");
        Ok(turn)
    }

    /// Remove a turn and its commands.
    pub fn delete_turn(&self, id: TurnId) -> EngineResult<Turn> {
        let turn = self.store.transaction(|tx| {
            let turn = tx
                .turn(id)?
                .ok_or_else(|| EngineError::not_found("turn", id))?;
            tx.delete_turn(id)?;
            Ok(turn)
        })?;
        tracing::warn!(turn_number = turn.turn_number, status = %turn.status, "Turn deleted");
        self.record(
            TurnEvent::new("turn_deleted", format!("Turn {} deleted", turn.turn_number))
                .turn(turn.turn_number),
        );
        Ok(turn)
    }

    /// Advance repeatedly until `target` is the active turn number.
    pub fn advance_to_turn(&self, target: i64) -> EngineResult<Vec<AdvanceOutcome>> {
        let current = self.current_turn()?.ok_or(EngineError::NoActiveTurn)?;
        if target <= current.turn_number {
            return Err(ValidationError::TargetTurnNotAhead {
                target,
                current: current.turn_number,
            }
            .into());
        }

        let mut outcomes = Vec::new();
        let mut number = current.turn_number;
        while number < target {
            let outcome = self.advance_turn(None)?;
            number = outcome.new_turn.turn_number;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    pub fn turn(&self, id: TurnId) -> EngineResult<Turn> {
        self.store
            .read(|tx| tx.turn(id)?.ok_or_else(|| EngineError::not_found("turn", id)))
    }

    pub fn turn_by_number(&self, turn_number: i64) -> EngineResult<Turn> {
        self.store.read(|tx| {
            tx.turn_by_number(turn_number)?
                .ok_or_else(|| EngineError::not_found("turn number", turn_number))
        })
    }

    /// Newest first.
    pub fn recent_turns(&self, limit: usize) -> EngineResult<Vec<Turn>> {
        self.store.read(|tx| tx.recent_turns(limit))
    }

    pub fn last_completed_turn(&self) -> EngineResult<Option<Turn>> {
        self.store.read(|tx| tx.last_completed_turn())
    }
}
