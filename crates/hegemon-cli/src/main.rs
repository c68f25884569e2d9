//! Hegemon CLI - operator tool for the turn engine.
//!
//! Single binary that provides:
//! - `hegemon init` / `hegemon seed-demo` - create a database and demo world
//! - `hegemon submit` / `hegemon cancel` - queue and withdraw commands
//! - `hegemon advance` / `hegemon check` - close turns by hand
//! - `hegemon serve` - run the deadline scheduler until interrupted
//! - `hegemon status` / `hegemon stats` / `hegemon events` - inspect state

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use hegemon_core::engine::OverdueReport;
use hegemon_core::model::{
    ArmyId, CommandId, CommandStatus, Coord, MapBounds, PlayerId, Terrain, Turn, TurnId,
};
use hegemon_core::store::NewUnitClass;
use hegemon_core::{EngineConfig, EventLog, SqliteStore, SystemClock, TurnEngine, TurnScheduler};

type Engine = TurnEngine<SqliteStore>;

#[derive(Parser)]
#[command(name = "hegemon")]
#[command(about = "Turn & command resolution engine", version)]
struct Cli {
    /// Project root directory
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new project (config + database)
    Init,

    /// Populate a small demo world and open turn 1
    SeedDemo,

    /// Show the active turn and recent events
    Status,

    /// Queue a command for an army in the active turn
    Submit {
        #[arg(long)]
        player: i64,

        #[arg(long)]
        army: i64,

        /// Command type: move, attack or create_unit
        #[arg(long = "type")]
        command_type: String,

        /// JSON payload, e.g. '{"path":[{"x":0,"y":0},{"x":1,"y":0}]}'
        #[arg(long, default_value = "null")]
        payload: String,

        /// Reject unless this is the active turn's id
        #[arg(long)]
        turn: Option<i64>,
    },

    /// Withdraw a pending command
    Cancel {
        #[arg(long)]
        player: i64,

        #[arg(long)]
        command: i64,
    },

    /// List commands of a turn (default: active) or of an army
    Commands {
        #[arg(long)]
        turn: Option<i64>,

        #[arg(long)]
        army: Option<i64>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Override a command's status
    SetStatus {
        #[arg(long)]
        command: i64,

        /// pending, processing, completed or failed
        #[arg(long)]
        status: String,

        #[arg(long)]
        note: Option<String>,
    },

    /// Close the active turn now and open the next one
    Advance {
        #[arg(long)]
        turn: Option<i64>,
    },

    /// Advance every overdue turn once
    Check,

    /// Command counts for a turn number (default: active turn)
    Stats {
        #[arg(long)]
        number: Option<i64>,
    },

    /// Turn administration
    Turn {
        #[command(subcommand)]
        command: TurnCommands,
    },

    /// Run the deadline scheduler until Ctrl-C
    Serve {
        /// Check interval in minutes (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Print recent audit events
    Events {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum TurnCommands {
    /// List recent turns
    Ls {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Open the first turn when none is active
    Bootstrap {
        /// Hours from now until the command deadline
        #[arg(long, default_value = "20")]
        deadline_in: i64,

        /// Hours from now until the turn ends
        #[arg(long, default_value = "24")]
        end_in: i64,
    },

    /// Close the active turn (resolving it) and open a new one with these times
    Open {
        #[arg(long)]
        deadline_in: i64,

        #[arg(long)]
        end_in: i64,
    },

    /// Queue a pending turn
    Schedule {
        #[arg(long)]
        start_in: i64,

        #[arg(long)]
        deadline_in: i64,

        #[arg(long)]
        end_in: i64,
    },

    /// Change a turn's deadline and end (RFC 3339)
    Reschedule {
        #[arg(long)]
        id: i64,

        #[arg(long)]
        deadline: DateTime<Utc>,

        #[arg(long)]
        end: DateTime<Utc>,
    },

    /// Delete a turn and its commands
    Delete {
        #[arg(long)]
        id: i64,
    },

    /// Advance until the given turn number is active
    AdvanceTo { target: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let project_root = match cli.project {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::Init => init_project(&project_root),
        Commands::SeedDemo => seed_demo(&project_root),
        Commands::Status => show_status(&project_root),
        Commands::Submit {
            player,
            army,
            command_type,
            payload,
            turn,
        } => {
            let (_, engine) = open_engine(&project_root)?;
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;
            let command = engine.submit_raw(
                PlayerId(player),
                ArmyId(army),
                turn.map(TurnId),
                &command_type,
                &payload,
            )?;
            println!("Queued command {} ({}) for army {}", command.id, command.command_type, army);
            Ok(())
        }
        Commands::Cancel { player, command } => {
            let (_, engine) = open_engine(&project_root)?;
            let cancelled = engine.cancel_command(PlayerId(player), CommandId(command))?;
            println!("Cancelled command {}", cancelled.id);
            Ok(())
        }
        Commands::Commands { turn, army, limit } => list_commands(&project_root, turn, army, limit),
        Commands::SetStatus {
            command,
            status,
            note,
        } => {
            let (_, engine) = open_engine(&project_root)?;
            let status: CommandStatus = status
                .parse()
                .map_err(|s| anyhow::anyhow!("Unknown command status: {s}"))?;
            let updated = engine.override_command_status(CommandId(command), status, note.as_deref())?;
            println!("Command {} is now {}", updated.id, updated.status);
            Ok(())
        }
        Commands::Advance { turn } => {
            let (_, engine) = open_engine(&project_root)?;
            let outcome = engine.advance_turn(turn.map(TurnId))?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Commands::Check => {
            let (_, engine) = open_engine(&project_root)?;
            let reports = engine.check_overdue_turns()?;
            print_reports(&reports);
            Ok(())
        }
        Commands::Stats { number } => show_stats(&project_root, number),
        Commands::Turn { command } => handle_turn(&project_root, command),
        Commands::Serve { interval } => serve(&project_root, interval).await,
        Commands::Events { limit } => {
            let config = load_config(&project_root)?;
            let events = EventLog::new(&config.data_dir);
            for event in events.read_recent(limit) {
                let turn = event
                    .turn_number
                    .map(|n| format!(" turn={n}"))
                    .unwrap_or_default();
                println!("{} [{}]{} {}", event.timestamp, event.event_type, turn, event.message);
            }
            Ok(())
        }
    }
}

fn load_config(project_root: &Path) -> Result<EngineConfig> {
    let mut config = EngineConfig::load_from_project(project_root)?;
    config.resolve_paths(project_root);
    Ok(config)
}

fn open_engine(project_root: &Path) -> Result<(EngineConfig, Engine)> {
    let config = load_config(project_root)?;
    if let Some(parent) = config.database.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    let engine = TurnEngine::new(store, SystemClock, config.clone())
        .with_event_log(EventLog::new(&config.data_dir));
    Ok((config, engine))
}

fn print_turn(turn: &Turn, now: DateTime<Utc>) {
    println!(
        "Turn {} [{}] id={}",
        turn.turn_number, turn.status, turn.id
    );
    println!("  start:    {}", turn.start_time);
    println!(
        "  deadline: {} ({} min left)",
        turn.command_deadline,
        turn.time_until_deadline(now).num_minutes()
    );
    println!("  end:      {}", turn.end_time);
    if turn.is_overdue(now) {
        println!("  overdue:  waiting for the scheduler (or run `hegemon check`)");
    }
}

fn print_reports(reports: &[OverdueReport]) {
    if reports.is_empty() {
        println!("No overdue turns");
        return;
    }
    for report in reports {
        match &report.result {
            Ok(outcome) => println!(
                "Turn {} -> {}: {} processed, {} succeeded, {} failed",
                report.turn.turn_number,
                outcome.new_turn.turn_number,
                outcome.batch.processed,
                outcome.batch.succeeded,
                outcome.batch.failed
            ),
            Err(e) => println!("Turn {} failed: {}", report.turn.turn_number, e),
        }
    }
}

fn show_status(project_root: &Path) -> Result<()> {
    let (config, engine) = open_engine(project_root)?;
    let now = engine.now();

    println!("Hegemon Status");
    println!("==============");
    println!();
    println!("Project:  {}", project_root.display());
    println!("Database: {}", config.database.display());
    println!();
    match engine.current_turn()? {
        Some(turn) => {
            print_turn(&turn, now);
            let stats = engine.turn_statistics(turn.id)?;
            println!("  commands: {} queued", stats.commands.pending);
        }
        None => println!("No active turn (run `hegemon turn bootstrap`)"),
    }
    if let Some(last) = engine.last_completed_turn()? {
        println!();
        println!("Last completed: turn {} at {}", last.turn_number, last.end_time);
    }
    println!();
    println!(
        "Scheduler interval: {} min",
        config.scheduler.interval_minutes
    );
    println!();
    println!("Recent events:");
    for event in EventLog::new(&config.data_dir).read_recent(5) {
        println!("  [{}] {}", event.event_type, event.message);
    }
    Ok(())
}

fn show_stats(project_root: &Path, number: Option<i64>) -> Result<()> {
    let (_, engine) = open_engine(project_root)?;
    let turn = match number {
        Some(n) => engine.turn_by_number(n)?,
        None => engine
            .current_turn()?
            .context("No active turn; pass --number")?,
    };
    let stats = engine.turn_statistics(turn.id)?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn list_commands(
    project_root: &Path,
    turn: Option<i64>,
    army: Option<i64>,
    limit: usize,
) -> Result<()> {
    let (_, engine) = open_engine(project_root)?;
    let commands = match (army, turn) {
        (Some(army), _) => engine.commands_for_army(ArmyId(army), limit)?,
        (None, Some(turn)) => engine.commands_for_turn(TurnId(turn))?,
        (None, None) => {
            let turn = engine.current_turn()?.context("No active turn")?;
            engine.commands_for_turn(turn.id)?
        }
    };
    for command in commands.iter().take(limit) {
        println!(
            "{:>5} army={} {:<12} {:<10} {}",
            command.id,
            command.army,
            command.command_type,
            command.status,
            command
                .result
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn handle_turn(project_root: &Path, command: TurnCommands) -> Result<()> {
    let (_, engine) = open_engine(project_root)?;
    let now = engine.now();
    let hours = |h: i64| now + Duration::hours(h);

    match command {
        TurnCommands::Ls { limit } => {
            for turn in engine.recent_turns(limit)? {
                print_turn(&turn, now);
            }
        }
        TurnCommands::Bootstrap {
            deadline_in,
            end_in,
        } => {
            let turn = engine.bootstrap_turn(hours(deadline_in), hours(end_in))?;
            print_turn(&turn, now);
        }
        TurnCommands::Open {
            deadline_in,
            end_in,
        } => {
            let opened = engine.open_turn(hours(deadline_in), hours(end_in))?;
            if let (Some(closed), Some(batch)) = (&opened.closed_turn, &opened.batch) {
                println!(
                    "Closed turn {}: {} processed, {} succeeded, {} failed",
                    closed.turn_number, batch.processed, batch.succeeded, batch.failed
                );
            }
            print_turn(&opened.turn, now);
        }
        TurnCommands::Schedule {
            start_in,
            deadline_in,
            end_in,
        } => {
            let turn = engine.schedule_turn(hours(start_in), hours(deadline_in), hours(end_in))?;
            print_turn(&turn, now);
        }
        TurnCommands::Reschedule { id, deadline, end } => {
            let turn = engine.reschedule_turn(TurnId(id), deadline, end)?;
            print_turn(&turn, now);
        }
        TurnCommands::Delete { id } => {
            let turn = engine.delete_turn(TurnId(id))?;
            println!("Deleted turn {}", turn.turn_number);
        }
        TurnCommands::AdvanceTo { target } => {
            for outcome in engine.advance_to_turn(target)? {
                println!(
                    "Turn {} -> {}: {} processed",
                    outcome.closed_turn.turn_number,
                    outcome.new_turn.turn_number,
                    outcome.batch.processed
                );
            }
        }
    }
    Ok(())
}

async fn serve(project_root: &Path, interval: Option<u64>) -> Result<()> {
    let (config, engine) = open_engine(project_root)?;
    let minutes = interval.unwrap_or(config.scheduler.interval_minutes);
    let engine = Arc::new(engine);
    let scheduler = TurnScheduler::new(Arc::clone(&engine), minutes)?;

    tracing::info!(project = %project_root.display(), interval_minutes = minutes, "Starting scheduler");
    scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    scheduler.stop().await;
    let status = scheduler.status();
    tracing::info!(last_check = ?status.last_check, "Scheduler shut down");
    Ok(())
}

fn init_project(project_root: &Path) -> Result<()> {
    let hegemon_dir = project_root.join(".hegemon");
    std::fs::create_dir_all(&hegemon_dir)?;

    // Create default config
    let config_path = hegemon_dir.join("config.yaml");
    if !config_path.exists() {
        let default_config = r#"# Hegemon Turn Engine Configuration

database: .hegemon/hegemon.db
data_dir: .hegemon

turns:
  deadline_after_hours: 20
  length_hours: 24

map:
  min_x: -15
  max_x: 14
  min_y: -10
  max_y: 9

scheduler:
  interval_minutes: 15

combat:
  seed: null
"#;
        std::fs::write(&config_path, default_config)?;
    }

    let (config, _) = open_engine(project_root)?;

    println!("Initialized Hegemon project at {}", project_root.display());
    println!();
    println!("Created:");
    println!("  .hegemon/config.yaml - engine configuration");
    println!("  {} - game database", config.database.display());
    println!();
    println!("Next steps:");
    println!("  1. Run: hegemon seed-demo");
    println!("  2. Run: hegemon serve");

    Ok(())
}

fn seed_demo(project_root: &Path) -> Result<()> {
    let (config, engine) = open_engine(project_root)?;
    let bounds: MapBounds = config.map;

    let (players, armies) = engine.store().seed(|w| {
        for (terrain, cost, bonus) in [
            (Terrain::Open, 1, 0),
            (Terrain::Forest, 2, 1),
            (Terrain::Hills, 2, 2),
            (Terrain::Mountains, 3, 3),
            (Terrain::Water, 99, 0),
        ] {
            w.add_terrain(&terrain, cost, bonus)?;
        }
        w.fill_tiles(bounds, &Terrain::Open)?;
        for x in -3..=3 {
            w.set_tile(Coord::new(x, 4), &Terrain::Forest)?;
        }
        for y in -2..=2 {
            w.set_tile(Coord::new(6, y), &Terrain::Mountains)?;
        }
        w.set_tile(Coord::new(-5, -5), &Terrain::Water)?;
        w.set_tile(Coord::new(2, -2), &Terrain::Hills)?;

        let infantry = w.add_unit_class(NewUnitClass {
            name: "infantry",
            melee: 10,
            ranged: 0,
            defence: 6,
            attack_range: 1,
            hitpoints: 30,
            strategic_speed: 2,
        })?;
        let archers = w.add_unit_class(NewUnitClass {
            name: "archers",
            melee: 3,
            ranged: 9,
            defence: 3,
            attack_range: 3,
            hitpoints: 20,
            strategic_speed: 2,
        })?;
        let cavalry = w.add_unit_class(NewUnitClass {
            name: "cavalry",
            melee: 12,
            ranged: 0,
            defence: 4,
            attack_range: 1,
            hitpoints: 25,
            strategic_speed: 4,
        })?;

        let red = w.add_player("red")?;
        let blue = w.add_player("blue")?;
        let crimson = w.add_realm("Crimson Dominion", red)?;
        let azure = w.add_realm("Azure League", blue)?;

        let red_army = w.add_army("First Legion", crimson, Coord::new(-2, 0))?;
        w.add_unit("Iron Guard", red_army, infantry)?;
        w.add_unit("Longbows", red_army, archers)?;
        let blue_army = w.add_army("Wind Riders", azure, Coord::new(2, 0))?;
        w.add_unit("Lancers", blue_army, cavalry)?;
        w.add_unit("Shieldwall", blue_army, infantry)?;

        Ok(((red, blue), (red_army, blue_army)))
    })?;

    let now = engine.now();
    let timing = &config.turns;
    let turn = match engine.current_turn()? {
        Some(turn) => turn,
        None => engine.bootstrap_turn(now + timing.deadline_after(), now + timing.length())?,
    };

    println!("Seeded demo world:");
    println!("  player {} commands army {} at (-2, 0)", players.0, armies.0);
    println!("  player {} commands army {} at (2, 0)", players.1, armies.1);
    println!();
    print_turn(&turn, now);
    Ok(())
}
