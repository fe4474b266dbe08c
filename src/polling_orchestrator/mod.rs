//! PollingOrchestrator - Interval-Driven Detection Cycles
//!
//! ## Responsibilities
//!
//! - Fire a detection cycle on a fixed interval
//! - Never run two cycles at once: a tick that lands while a cycle is
//!   outstanding is skipped and logged
//! - Hand every completed event to the `on_event` sink in production order
//! - `stop()` cancels the timer; a late in-flight result is discarded

use crate::ai_client::Detector;
use crate::detection_cycle::DetectionCycle;
use crate::models::DetectionEvent;
use crate::snapshot_service::ImageSource;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Cycle counters
#[derive(Debug, Default)]
struct Counters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub state: SchedulerState,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub ticks_skipped: u64,
}

/// Running loop handle
struct ActiveLoop {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// PollingOrchestrator instance
pub struct PollingOrchestrator<S, D> {
    cycle: Arc<DetectionCycle<S, D>>,
    active: Mutex<Option<ActiveLoop>>,
    counters: Arc<Counters>,
}

impl<S, D> PollingOrchestrator<S, D>
where
    S: ImageSource + 'static,
    D: Detector + 'static,
{
    /// Create new PollingOrchestrator
    pub fn new(cycle: DetectionCycle<S, D>) -> Self {
        Self {
            cycle: Arc::new(cycle),
            active: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Start the polling loop. No-op when already running.
    pub async fn start<F, Fut>(&self, period: Duration, on_event: F)
    where
        F: Fn(DetectionEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut active = self.active.lock().await;
        if active.is_some() {
            tracing::warn!("Polling already running");
            return;
        }

        tracing::info!(interval_ms = period.as_millis() as u64, "Starting polling orchestrator");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            self.cycle.clone(),
            self.counters.clone(),
            period,
            on_event,
            shutdown_rx,
        ));

        *active = Some(ActiveLoop { shutdown, task });
    }

    /// Stop the polling loop and wait for it to exit.
    ///
    /// An outstanding cycle keeps running in the background but its event
    /// is never delivered.
    pub async fn stop(&self) {
        let Some(active) = self.active.lock().await.take() else {
            return;
        };

        tracing::info!("Stopping polling orchestrator");
        let _ = active.shutdown.send(true);
        if let Err(e) = active.task.await {
            tracing::error!(error = %e, "Polling loop task failed");
        }
    }

    pub async fn state(&self) -> SchedulerState {
        if self.active.lock().await.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub async fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            state: self.state().await,
            cycles_started: self.counters.started.load(Ordering::Relaxed),
            cycles_completed: self.counters.completed.load(Ordering::Relaxed),
            cycles_failed: self.counters.failed.load(Ordering::Relaxed),
            ticks_skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }
}

async fn run_loop<S, D, F, Fut>(
    cycle: Arc<DetectionCycle<S, D>>,
    counters: Arc<Counters>,
    period: Duration,
    on_event: F,
    mut shutdown: watch::Receiver<bool>,
) where
    S: ImageSource + 'static,
    D: Detector + 'static,
    F: Fn(DetectionEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<JoinHandle<DetectionEvent>> = None;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            joined = join_in_flight(&mut in_flight), if in_flight.is_some() => {
                in_flight = None;
                let event = match joined {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "Detection cycle task failed");
                        continue;
                    }
                };

                if *shutdown.borrow() {
                    tracing::debug!("Discarding event produced after stop");
                    break;
                }

                counters.completed.fetch_add(1, Ordering::Relaxed);
                if event.is_failed() {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }
                on_event(event).await;
            }

            _ = ticker.tick() => {
                if in_flight.is_some() {
                    counters.skipped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Previous detection cycle still running, skipping tick");
                    continue;
                }

                counters.started.fetch_add(1, Ordering::Relaxed);
                let cycle = cycle.clone();
                in_flight = Some(tokio::spawn(async move { cycle.run().await }));
            }
        }
    }

    if in_flight.is_some() {
        tracing::info!("Polling stopped with a cycle in flight; its result will be dropped");
    }
    tracing::info!("Polling orchestrator stopped");
}

/// Resolves when the outstanding cycle finishes; pending when there is none
async fn join_in_flight(
    in_flight: &mut Option<JoinHandle<DetectionEvent>>,
) -> Result<DetectionEvent, JoinError> {
    match in_flight {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
