//! Turn lifecycle - advance, overdue detection and statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{epsilon, BatchResult, TurnEngine};
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::model::{CommandStatus, Turn, TurnId, TurnStatus, TurnWindow};
use crate::observability::TurnEvent;
use crate::store::{Store, Transaction};

/// Result of one advance: the turn that closed, the one that opened and
/// what happened to the closed turn's commands.
#[derive(Debug, Clone, Serialize)]
pub struct AdvanceOutcome {
    pub closed_turn: Turn,
    pub new_turn: Turn,
    pub batch: BatchResult,
}

/// Per-turn result of an overdue sweep.
#[derive(Debug)]
pub struct OverdueReport {
    pub turn: Turn,
    pub result: Result<AdvanceOutcome, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommandCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl CommandCounts {
    pub fn get(&self, status: CommandStatus) -> i64 {
        match status {
            CommandStatus::Pending => self.pending,
            CommandStatus::Processing => self.processing,
            CommandStatus::Completed => self.completed,
            CommandStatus::Failed => self.failed,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }

    fn add(&mut self, status: CommandStatus, n: i64) {
        match status {
            CommandStatus::Pending => self.pending += n,
            CommandStatus::Processing => self.processing += n,
            CommandStatus::Completed => self.completed += n,
            CommandStatus::Failed => self.failed += n,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnStatistics {
    pub turn: Turn,
    pub commands: CommandCounts,
}

pub(crate) struct Closing {
    pub turn: Turn,
    pub batch: BatchResult,
}

impl<S: Store, C: Clock> TurnEngine<S, C> {
    pub fn current_turn(&self) -> EngineResult<Option<Turn>> {
        self.store.read(|tx| tx.active_turn())
    }

    /// Close the active turn, resolving its commands, and open the next.
    ///
    /// When `turn` is given it must name the active turn. Concurrent callers
    /// race on the close write; the loser gets [`EngineError::NoActiveTurn`].
    pub fn advance_turn(&self, turn: Option<TurnId>) -> EngineResult<AdvanceOutcome> {
        let now = self.clock.now();
        let outcome = self.store.transaction(|tx| {
            let active = tx.active_turn()?.ok_or(EngineError::NoActiveTurn)?;
            if turn.is_some_and(|id| id != active.id) {
                return Err(EngineError::NoActiveTurn);
            }

            let closing = self.close_active(tx, active, now)?;
            let new_turn = self.open_successor(tx, &closing.turn)?;
            Ok(AdvanceOutcome {
                closed_turn: closing.turn,
                new_turn,
                batch: closing.batch,
            })
        })?;

        tracing::info!(
            closed = outcome.closed_turn.turn_number,
            opened = outcome.new_turn.turn_number,
            processed = outcome.batch.processed,
            succeeded = outcome.batch.succeeded,
            failed = outcome.batch.failed,
            "Turn advanced"
        );
        self.record(
            TurnEvent::new(
                "turn_advanced",
                format!(
                    "Turn {} closed, turn {} opened",
                    outcome.closed_turn.turn_number, outcome.new_turn.turn_number
                ),
            )
            .turn(outcome.closed_turn.turn_number)
            .metadata(serde_json::json!({
                "new_turn": outcome.new_turn.turn_number,
                "processed": outcome.batch.processed,
                "succeeded": outcome.batch.succeeded,
                "failed": outcome.batch.failed,
            })),
        );
        Ok(outcome)
    }

    /// Resolve the pending commands of `active` and mark it completed.
    ///
    /// The close instant is never earlier than two epsilons after the start,
    /// and a deadline still in the future is pulled in to one epsilon before
    /// the close so the stored window stays ordered.
    pub(crate) fn close_active(
        &self,
        tx: &mut dyn Transaction,
        active: Turn,
        now: DateTime<Utc>,
    ) -> EngineResult<Closing> {
        let batch = self.process_pending(tx, &active, now)?;

        let end_time = now.max(active.start_time + epsilon() * 2);
        let command_deadline = active.command_deadline.min(end_time - epsilon());
        let turn = tx
            .close_turn(active.id, command_deadline, end_time)?
            .ok_or(EngineError::NoActiveTurn)?;
        Ok(Closing { turn, batch })
    }

    /// Promote the lowest pending turn, or create `max + 1`, starting one
    /// epsilon after `closed` ended.
    pub(crate) fn open_successor(
        &self,
        tx: &mut dyn Transaction,
        closed: &Turn,
    ) -> EngineResult<Turn> {
        let start = closed.end_time + epsilon();
        let timing = &self.config.turns;
        let fresh = TurnWindow::from_offsets(start, timing.deadline_after(), timing.length())?;

        if let Some(pending) = tx.next_pending_turn()? {
            if pending.turn_number <= closed.turn_number {
                return Err(EngineError::Conflict(format!(
                    "scheduled turn {} is not after closed turn {}",
                    pending.turn_number, closed.turn_number
                )));
            }
            let window =
                TurnWindow::new(start, pending.command_deadline, pending.end_time).unwrap_or(fresh);
            return tx.activate_turn(pending.id, window)?.ok_or_else(|| {
                EngineError::Conflict(format!("turn {} is no longer pending", pending.turn_number))
            });
        }

        let number = tx
            .max_turn_number()?
            .unwrap_or(closed.turn_number)
            .max(closed.turn_number)
            + 1;
        tx.insert_turn(number, fresh, TurnStatus::Active)
    }

    /// Advance every active turn whose deadline has passed.
    ///
    /// A failure on one turn is logged and reported; the others still run.
    pub fn check_overdue_turns(&self) -> EngineResult<Vec<OverdueReport>> {
        let now = self.clock.now();
        let overdue = self.store.read(|tx| tx.overdue_turns(now))?;
        if overdue.is_empty() {
            tracing::debug!("No overdue turns");
            return Ok(Vec::new());
        }

        let mut reports = Vec::with_capacity(overdue.len());
        for turn in overdue {
            tracing::info!(
                turn_number = turn.turn_number,
                deadline = %turn.command_deadline,
                "Processing overdue turn"
            );
            let result = self.advance_turn(Some(turn.id)).map_err(|e| {
                tracing::error!(turn_number = turn.turn_number, error = %e, "Overdue turn failed");
                e.to_string()
            });
            reports.push(OverdueReport { turn, result });
        }

        let failed = reports.iter().filter(|r| r.result.is_err()).count();
        self.record(
            TurnEvent::new(
                "scheduler_check",
                format!("{} overdue turn(s), {} failed", reports.len(), failed),
            )
            .metadata(serde_json::json!({
                "overdue": reports.iter().map(|r| r.turn.turn_number).collect::<Vec<_>>(),
                "failed": failed,
            })),
        );
        Ok(reports)
    }

    pub fn turn_statistics(&self, turn: TurnId) -> EngineResult<TurnStatistics> {
        self.store.read(|tx| {
            let row = tx
                .turn(turn)?
                .ok_or_else(|| EngineError::not_found("turn", turn))?;
            let mut commands = CommandCounts::default();
            for (status, n) in tx.command_counts(turn)? {
                commands.add(status, n);
            }
            Ok(TurnStatistics {
                turn: row,
                commands,
            })
        })
    }
}
