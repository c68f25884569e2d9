//! Deadline scheduler - a tokio task that periodically advances overdue turns.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{OverdueReport, TurnEngine};
use crate::clock::Clock;
use crate::config::{MAX_INTERVAL_MINUTES, MIN_INTERVAL_MINUTES};
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_minutes: u64,
    pub last_check: Option<DateTime<Utc>>,
    /// Overdue turns found by the last check.
    pub last_overdue: usize,
    /// Of those, how many failed to advance.
    pub last_failures: usize,
}

#[derive(Debug)]
struct State {
    interval_minutes: u64,
    last_check: Option<DateTime<Utc>>,
    last_overdue: usize,
    last_failures: usize,
}

struct Running {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

fn validate_interval(minutes: u64) -> Result<(), ValidationError> {
    if (MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
        Ok(())
    } else {
        Err(ValidationError::SchedulerInterval {
            min: MIN_INTERVAL_MINUTES,
            max: MAX_INTERVAL_MINUTES,
            got: minutes,
        })
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Runs [`TurnEngine::check_overdue_turns`] on a fixed period.
pub struct TurnScheduler<S, C> {
    engine: Arc<TurnEngine<S, C>>,
    state: Arc<Mutex<State>>,
    running: Mutex<Option<Running>>,
}

impl<S, C> TurnScheduler<S, C>
where
    S: Store + 'static,
    C: Clock + 'static,
{
    pub fn new(engine: Arc<TurnEngine<S, C>>, interval_minutes: u64) -> EngineResult<Self> {
        validate_interval(interval_minutes)?;
        Ok(Self {
            engine,
            state: Arc::new(Mutex::new(State {
                interval_minutes,
                last_check: None,
                last_overdue: 0,
                last_failures: 0,
            })),
            running: Mutex::new(None),
        })
    }

    /// Spawn the timer task. The first check runs immediately. Returns
    /// `false` if the scheduler was already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = lock(&self.running);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let minutes = lock(&self.state).interval_minutes;
        let period = Duration::from_secs(minutes * 60);
        let (shutdown, mut stop) = watch::channel(false);
        let engine = Arc::clone(&self.engine);
        let state = Arc::clone(&self.state);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = run_check(&engine, &state).await {
                            tracing::error!(error = %e, "Scheduled check failed");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            tracing::debug!("Scheduler loop exited");
        });

        *running = Some(Running { handle, shutdown });
        tracing::info!(interval_minutes = minutes, "Turn scheduler started");
        true
    }

    /// Signal the timer task and wait for an in-flight check to finish.
    pub async fn stop(&self) -> bool {
        let Some(running) = lock(&self.running).take() else {
            return false;
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::warn!(error = %e, "Scheduler task did not shut down cleanly");
        }
        tracing::info!("Turn scheduler stopped");
        true
    }

    /// Change the period. A running scheduler is restarted with it.
    pub async fn set_interval(&self, minutes: u64) -> EngineResult<()> {
        validate_interval(minutes)?;
        lock(&self.state).interval_minutes = minutes;
        if self.is_running() {
            self.stop().await;
            self.start();
        }
        tracing::info!(interval_minutes = minutes, "Scheduler interval updated");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.is_running();
        let state = lock(&self.state);
        SchedulerStatus {
            running,
            interval_minutes: state.interval_minutes,
            last_check: state.last_check,
            last_overdue: state.last_overdue,
            last_failures: state.last_failures,
        }
    }

    /// Run one check now, outside the timer.
    pub async fn check_now(&self) -> EngineResult<Vec<OverdueReport>> {
        run_check(&self.engine, &self.state).await
    }
}

async fn run_check<S, C>(
    engine: &Arc<TurnEngine<S, C>>,
    state: &Arc<Mutex<State>>,
) -> EngineResult<Vec<OverdueReport>>
where
    S: Store + 'static,
    C: Clock + 'static,
{
    let worker = Arc::clone(engine);
    let reports = tokio::task::spawn_blocking(move || worker.check_overdue_turns())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Scheduler check worker failed");
            EngineError::Worker(format!("scheduler check: {e}"))
        })??;

    let failures = reports.iter().filter(|r| r.result.is_err()).count();
    {
        let mut state = lock(state);
        state.last_check = Some(engine.now());
        state.last_overdue = reports.len();
        state.last_failures = failures;
    }
    if !reports.is_empty() {
        tracing::info!(overdue = reports.len(), failures, "Scheduler check complete");
    }
    Ok(reports)
}
