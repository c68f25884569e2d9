//! Engine configuration loading and management.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::MapBounds;

/// Smallest and largest scheduler interval, in minutes.
pub const MIN_INTERVAL_MINUTES: u64 = 1;
pub const MAX_INTERVAL_MINUTES: u64 = 1440;

/// Main engine configuration, loaded from .hegemon/config.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Config version
    pub version: Option<String>,

    /// SQLite database file (relative to project root)
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Directory for the audit event log
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Turn timing
    #[serde(default)]
    pub turns: TurnTiming,

    /// Playable map rectangle
    #[serde(default)]
    pub map: MapBounds,

    /// Deadline scheduler
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Combat randomness
    #[serde(default)]
    pub combat: CombatConfig,
}

/// Offsets applied from a turn's start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnTiming {
    #[serde(default = "default_deadline_hours")]
    pub deadline_after_hours: i64,

    #[serde(default = "default_length_hours")]
    pub length_hours: i64,
}

impl Default for TurnTiming {
    fn default() -> Self {
        Self {
            deadline_after_hours: default_deadline_hours(),
            length_hours: default_length_hours(),
        }
    }
}

impl TurnTiming {
    pub fn deadline_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.deadline_after_hours)
    }

    pub fn length(&self) -> chrono::Duration {
        chrono::Duration::hours(self.length_hours)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CombatConfig {
    /// Fixed RNG seed for reproducible battles; entropy when unset
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_database() -> PathBuf {
    PathBuf::from(".hegemon/hegemon.db")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".hegemon")
}
fn default_deadline_hours() -> i64 {
    20
}
fn default_length_hours() -> i64 {
    24
}
fn default_interval_minutes() -> u64 {
    15
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: None,
            database: default_database(),
            data_dir: default_data_dir(),
            turns: TurnTiming::default(),
            map: MapBounds::default(),
            scheduler: SchedulerConfig::default(),
            combat: CombatConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Load from project root (looks for .hegemon/config.yaml)
    pub fn load_from_project(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".hegemon/config.yaml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve paths relative to project root
    pub fn resolve_paths(&mut self, project_root: &Path) {
        self.database = project_root.join(&self.database);
        self.data_dir = project_root.join(&self.data_dir);
    }

    pub fn validate(&self) -> Result<()> {
        if self.turns.deadline_after_hours <= 0 {
            bail!("turns.deadline_after_hours must be positive");
        }
        if self.turns.deadline_after_hours >= self.turns.length_hours {
            bail!(
                "turns.deadline_after_hours ({}) must be less than turns.length_hours ({})",
                self.turns.deadline_after_hours,
                self.turns.length_hours
            );
        }
        let interval = self.scheduler.interval_minutes;
        if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&interval) {
            bail!(
                "scheduler.interval_minutes must be between {MIN_INTERVAL_MINUTES} and \
                 {MAX_INTERVAL_MINUTES}, got {interval}"
            );
        }
        if self.map.min_x > self.map.max_x || self.map.min_y > self.map.max_y {
            bail!("map bounds are empty");
        }
        Ok(())
    }
}
