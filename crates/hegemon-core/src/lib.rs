//! Hegemon Core - turn & command resolution engine
//!
//! This crate advances a persistent strategy game in discrete turns:
//! players queue one command per army per turn, and at the deadline the
//! turn closes, every queued command is resolved against world state
//! (movement, combat, recruitment) and the next turn opens.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod observability;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{AdvanceOutcome, BatchResult, TurnEngine, TurnScheduler};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use observability::{EventLog, TurnEvent};
pub use store::{SqliteStore, Store};
