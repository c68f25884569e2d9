//! Turn records and their time window invariant.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::TurnId;
use crate::error::ValidationError;

/// Lifecycle of a turn. Transitions are linear: pending → active → completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Pending,
    Active,
    Completed,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(other.to_string()),
        }
    }
}

/// Validated `start < deadline < end` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnWindow {
    start: DateTime<Utc>,
    deadline: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TurnWindow {
    pub fn new(
        start: DateTime<Utc>,
        deadline: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if start < deadline && deadline < end {
            Ok(Self {
                start,
                deadline,
                end,
            })
        } else {
            Err(ValidationError::TurnTimeOrder)
        }
    }

    /// Window starting at `start` with offsets taken from configuration.
    pub fn from_offsets(
        start: DateTime<Utc>,
        deadline_after: Duration,
        length: Duration,
    ) -> Result<Self, ValidationError> {
        Self::new(start, start + deadline_after, start + length)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// A turn (epoch) row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub turn_number: i64,
    pub start_time: DateTime<Utc>,
    pub command_deadline: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: TurnStatus,
}

impl Turn {
    pub fn is_active(&self) -> bool {
        self.status == TurnStatus::Active
    }

    pub fn is_pending(&self) -> bool {
        self.status == TurnStatus::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.status == TurnStatus::Completed
    }

    /// Commands are accepted up to and including the deadline instant.
    pub fn accepts_commands(&self, now: DateTime<Utc>) -> bool {
        now <= self.command_deadline
    }

    /// Whether the deadline has strictly passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.command_deadline < now
    }

    pub fn time_until_deadline(&self, now: DateTime<Utc>) -> Duration {
        (self.command_deadline - now).max(Duration::zero())
    }

    pub fn time_until_end(&self, now: DateTime<Utc>) -> Duration {
        (self.end_time - now).max(Duration::zero())
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    pub fn window(&self) -> Result<TurnWindow, ValidationError> {
        TurnWindow::new(self.start_time, self.command_deadline, self.end_time)
    }
}
