//! Observability - audit events for turn processing.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An audit event written by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub turn_number: Option<i64>,
    pub command_id: Option<i64>,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TurnEvent {
    pub fn new(event_type: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            turn_number: None,
            command_id: None,
            message: message.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Override the creation stamp, e.g. with the engine clock.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn turn(mut self, turn_number: i64) -> Self {
        self.turn_number = Some(turn_number);
        self
    }

    pub fn command(mut self, command_id: i64) -> Self {
        self.command_id = Some(command_id);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only JSONL event log.
#[derive(Debug, Clone)]
pub struct EventLog {
    events_path: PathBuf,
}

impl EventLog {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            events_path: data_dir.join("events.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.events_path
    }

    /// Append an event.
    pub fn emit(&self, event: &TurnEvent) -> Result<()> {
        if let Some(parent) = self.events_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)?;

        let line = serde_json::to_string(event)?;
        writeln!(file, "{}", line)?;

        Ok(())
    }

    /// Read the last `limit` events. Unparseable lines are skipped.
    pub fn read_recent(&self, limit: usize) -> Vec<TurnEvent> {
        let file = match std::fs::File::open(&self.events_path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let reader = BufReader::new(file);
        let mut events: Vec<TurnEvent> = reader
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();

        if events.len() > limit {
            events.drain(0..events.len() - limit);
        }

        events
    }
}
