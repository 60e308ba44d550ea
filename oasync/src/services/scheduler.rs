//! Scheduler
//!
//! Two timers drive the engine:
//!
//! - **tick**: fixed short interval, armed while a run is in progress; each
//!   tick runs one bounded engine step and the timer disarms itself once the
//!   engine reports completion or the run is no longer Running
//! - **refresh**: the configured feed frequency; each firing calls
//!   [`Scheduler::start`]
//!
//! Stop is cooperative: it only flips the persisted status, which the next
//! tick observes. A step already in flight is never interrupted.

use crate::db::settings;
use crate::error::SyncResult;
use crate::models::{Frequency, RunStatus, StepOutcome};
use crate::services::reconciler::ReconciliationEngine;
use crate::services::reference::prime_reference_data;
use crate::services::remote_client::RemoteDataClient;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Period of the tick timer
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Result of a Start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// A spawned timer loop and its cancellation token
struct TimerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TimerHandle {
    fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }
}

pub struct Scheduler {
    db: SqlitePool,
    client: RemoteDataClient,
    engine: ReconciliationEngine,
    tick_interval: Duration,
    tick: Mutex<Option<TimerHandle>>,
    refresh: Mutex<Option<TimerHandle>>,
}

impl Scheduler {
    pub fn new(db: SqlitePool, client: RemoteDataClient, engine: ReconciliationEngine) -> Self {
        Self {
            db,
            client,
            engine,
            tick_interval: TICK_INTERVAL,
            tick: Mutex::new(None),
            refresh: Mutex::new(None),
        }
    }

    pub fn with_tick_interval(mut self, period: Duration) -> Self {
        self.tick_interval = period;
        self
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    /// Begin a run unless one is already in progress
    ///
    /// The status row is claimed atomically, so of several concurrent
    /// callers exactly one primes reference data and arms the tick. Existing
    /// checkpoints are kept; an interrupted or errored pass resumes.
    pub async fn start(self: &Arc<Self>) -> SyncResult<StartOutcome> {
        if !settings::try_claim_run(&self.db).await? {
            info!("Sync already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        settings::reset_error_count(&self.db).await?;

        if let Err(e) = prime_reference_data(&self.client, &self.db).await {
            if !e.is_terminal() {
                settings::set_run_status(&self.db, RunStatus::Idle).await?;
            }
            error!(error = %e, "Reference data priming failed, run not started");
            return Err(e);
        }

        self.arm_tick().await;
        info!("Sync run started");
        Ok(StartOutcome::Started)
    }

    /// Request the run to stop at the next tick boundary
    pub async fn stop(&self) -> SyncResult<()> {
        settings::set_run_status(&self.db, RunStatus::Idle).await?;
        info!("Sync stop requested");
        Ok(())
    }

    /// Replace the refresh timer; `Frequency::None` only clears it
    pub async fn reschedule(self: &Arc<Self>, frequency: Frequency) {
        let mut refresh = self.refresh.lock().await;
        if let Some(handle) = refresh.take() {
            handle.cancel.cancel();
        }

        let Some(period) = frequency.interval() else {
            info!("Refresh timer cleared");
            return;
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let weak = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {}
                }

                let Some(scheduler) = weak.upgrade() else { break };
                match scheduler.start().await {
                    Ok(StartOutcome::Started) => info!("Scheduled refresh started a run"),
                    Ok(StartOutcome::AlreadyRunning) => debug!("Scheduled refresh skipped, run in progress"),
                    Err(e) => warn!(error = %e, "Scheduled refresh failed to start a run"),
                }
            }
        });

        info!(frequency = %frequency, "Refresh timer armed");
        *refresh = Some(TimerHandle { cancel, task });
    }

    /// Re-arm timers after a restart
    ///
    /// A persisted Running status resumes ticking from the saved cursors.
    pub async fn restore(self: &Arc<Self>) -> SyncResult<()> {
        if settings::get_run_status(&self.db).await? == RunStatus::Running {
            info!("Resuming interrupted sync run");
            self.arm_tick().await;
        }

        let options = settings::load_options(&self.db).await?;
        self.reschedule(options.frequency).await;
        Ok(())
    }

    pub async fn is_tick_armed(&self) -> bool {
        self.tick.lock().await.as_ref().is_some_and(TimerHandle::is_active)
    }

    pub async fn is_refresh_armed(&self) -> bool {
        self.refresh.lock().await.as_ref().is_some_and(TimerHandle::is_active)
    }

    /// Cancel both timers and wait for their loops to exit
    pub async fn shutdown(&self) {
        let handles = [self.tick.lock().await.take(), self.refresh.lock().await.take()];
        for handle in handles.into_iter().flatten() {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                warn!(error = %e, "Timer task ended abnormally");
            }
        }
        debug!("Scheduler shut down");
    }

    async fn arm_tick(self: &Arc<Self>) {
        let mut tick = self.tick.lock().await;
        if tick.as_ref().is_some_and(TimerHandle::is_active) {
            debug!("Tick timer already armed");
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let weak = Arc::downgrade(self);
        let period = self.tick_interval;

        let task = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {}
                }

                let Some(scheduler) = weak.upgrade() else { break };
                if scheduler.run_tick().await {
                    continue;
                }
                if scheduler.release_tick(&token).await {
                    break;
                }
            }
            debug!("Tick timer disarmed");
        });

        *tick = Some(TimerHandle { cancel, task });
    }

    /// One tick; false once the timer should disarm
    async fn run_tick(&self) -> bool {
        match self.engine.step().await {
            Ok(StepOutcome::Yielded) | Ok(StepOutcome::Aborted) => true,
            Ok(StepOutcome::Completed) => {
                info!("Sync run completed");
                false
            }
            Ok(StepOutcome::NotRunning) => {
                info!("Sync not running, disarming tick");
                false
            }
            Err(e) if e.is_terminal() => {
                error!(error = %e, "Sync run terminated");
                false
            }
            Err(e) => {
                error!(error = %e, "Sync step failed, retrying next tick");
                true
            }
        }
    }

    /// Retire the tick loop unless a run was claimed since its last step
    ///
    /// Holds the `tick` lock across the status read so [`Self::arm_tick`]
    /// either sees the loop still active and the run picked up by it, or
    /// sees it cancelled and spawns a fresh one. Returns true when the loop
    /// should exit.
    async fn release_tick(&self, token: &CancellationToken) -> bool {
        let _tick = self.tick.lock().await;
        match settings::get_run_status(&self.db).await {
            Ok(RunStatus::Running) => {
                debug!("Run claimed while tick was winding down, keeping tick armed");
                false
            }
            Ok(_) => {
                token.cancel();
                true
            }
            Err(e) => {
                warn!(error = %e, "Could not read run status, keeping tick armed");
                false
            }
        }
    }
}
