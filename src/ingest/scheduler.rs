//! Ingestion scheduler: one run at start, then one per interval tick.
//!
//! ```text
//! loop task ──tick──► spawn run (own token) ──► Ingestor::run_once
//!    │                     ▲
//!    │ lifetime / cancel   │ tick while a run is active: skipped
//!    ▼
//! Cancelled
//! ```
//!
//! The loop's deadline and token govern the loop only. A started run lives on
//! its own task under its own `CancellationToken`, so stopping the loop never
//! interrupts a run mid-write. Only [`SchedulerHandle::shutdown`] cancels an
//! active run, and only once its grace period has passed.

use super::{FeedSource, Ingestor};
use crate::config::ScheduleConfig;
use crate::store::FlightStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Idle,
    Running,
    Cancelled,
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped_ticks: AtomicU64,
    records_written: AtomicU64,
}

/// Snapshot of scheduler activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub ticks_skipped: u64,
    pub records_written: u64,
}

impl Counters {
    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            runs_started: self.started.load(Ordering::Relaxed),
            runs_completed: self.completed.load(Ordering::Relaxed),
            runs_failed: self.failed.load(Ordering::Relaxed),
            ticks_skipped: self.skipped_ticks.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
        }
    }
}

struct ActiveRun {
    id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    state: Mutex<SchedulerState>,
    active: Mutex<Option<ActiveRun>>,
    counters: Counters,
}

impl Shared {
    fn set_state(&self, state: SchedulerState) {
        *self.state.lock() = state;
    }

    /// Back to Idle after a run, unless the loop has been cancelled meanwhile.
    fn run_finished(&self) {
        let mut state = self.state.lock();
        if *state == SchedulerState::Running {
            *state = SchedulerState::Idle;
        }
    }
}

pub struct IngestionScheduler<F, S> {
    ingestor: Arc<Ingestor<F, S>>,
    config: ScheduleConfig,
}

impl<F: FeedSource, S: FlightStore> IngestionScheduler<F, S> {
    pub fn new(ingestor: Ingestor<F, S>, config: ScheduleConfig) -> Self {
        IngestionScheduler {
            ingestor: Arc::new(ingestor),
            config,
        }
    }

    /// Spawn the loop. The first run starts immediately.
    pub fn start(self) -> SchedulerHandle {
        let loop_token = CancellationToken::new();
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState::Idle),
            active: Mutex::new(None),
            counters: Counters::default(),
        });

        info!(
            feed = %self.ingestor.feed().describe(),
            interval = ?self.config.interval,
            lifetime = ?self.config.lifetime,
            "starting ingestion scheduler"
        );

        let task = tokio::spawn(run_loop(
            self.ingestor,
            self.config,
            loop_token.clone(),
            shared.clone(),
        ));

        SchedulerHandle {
            loop_token,
            shared,
            task,
        }
    }
}

async fn run_loop<F: FeedSource, S: FlightStore>(
    ingestor: Arc<Ingestor<F, S>>,
    config: ScheduleConfig,
    loop_token: CancellationToken,
    shared: Arc<Shared>,
) {
    let deadline = config.lifetime.map(|lifetime| Instant::now() + lifetime);
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut next_id = 0u64;

    loop {
        let lifetime_elapsed = async {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = loop_token.cancelled() => {
                info!("ingestion scheduler cancelled");
                break;
            }
            _ = lifetime_elapsed => {
                info!("ingestion scheduler lifetime elapsed");
                break;
            }
            _ = ticker.tick() => {
                next_id += 1;
                trigger(&ingestor, &shared, next_id);
            }
        }
    }

    shared.set_state(SchedulerState::Cancelled);
}

fn trigger<F: FeedSource, S: FlightStore>(
    ingestor: &Arc<Ingestor<F, S>>,
    shared: &Arc<Shared>,
    id: u64,
) {
    let mut active = shared.active.lock();
    if let Some(run) = active.as_ref() {
        if !run.handle.is_finished() {
            shared.counters.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            warn!(run_id = run.id, "previous ingestion run still active, skipping tick");
            return;
        }
    }

    // Not derived from the loop token
    let token = CancellationToken::new();
    shared.set_state(SchedulerState::Running);
    shared.counters.started.fetch_add(1, Ordering::Relaxed);

    let handle = tokio::spawn(execute_run(
        ingestor.clone(),
        id,
        token.clone(),
        shared.clone(),
    ));
    *active = Some(ActiveRun { id, token, handle });
}

async fn execute_run<F: FeedSource, S: FlightStore>(
    ingestor: Arc<Ingestor<F, S>>,
    id: u64,
    token: CancellationToken,
    shared: Arc<Shared>,
) {
    // The run's scope ends with the run
    let _scope = token.clone().drop_guard();
    let started = Instant::now();
    info!(run_id = id, "ingestion run started");

    match ingestor.run_once(&token).await {
        Ok(report) => {
            shared.counters.completed.fetch_add(1, Ordering::Relaxed);
            shared
                .counters
                .records_written
                .fetch_add(report.written, Ordering::Relaxed);
            info!(
                run_id = id,
                written = report.written,
                skipped = report.skipped,
                rejected = report.rejected,
                write_failures = report.write_failures,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "ingestion run finished"
            );
        }
        Err(e) => {
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(run_id = id, error = %e, "ingestion run failed");
        }
    }

    shared.run_finished();
}

/// Control surface for a started scheduler
pub struct SchedulerHandle {
    loop_token: CancellationToken,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.shared.state.lock()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.counters.snapshot()
    }

    /// Stop scheduling new runs. An active run keeps going.
    pub fn cancel(&self) {
        self.loop_token.cancel();
    }

    /// Wait for the loop to stop on its own (lifetime or `cancel`), then for
    /// the last run to finish.
    pub async fn join(self) -> SchedulerStats {
        if let Err(e) = self.task.await {
            error!(error = %e, "ingestion scheduler loop panicked");
        }
        let active = self.shared.active.lock().take();
        if let Some(run) = active {
            if let Err(e) = run.handle.await {
                error!(run_id = run.id, error = %e, "ingestion run panicked");
            }
        }
        self.shared.counters.snapshot()
    }

    /// Stop the loop, give an active run `grace` to finish, then cancel it.
    pub async fn shutdown(self, grace: Duration) -> SchedulerStats {
        self.loop_token.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "ingestion scheduler loop panicked");
        }

        let active = self.shared.active.lock().take();
        if let Some(mut run) = active {
            match tokio::time::timeout(grace, &mut run.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(run_id = run.id, error = %e, "ingestion run panicked"),
                Err(_) => {
                    warn!(
                        run_id = run.id,
                        ?grace,
                        "grace period elapsed, cancelling ingestion run"
                    );
                    run.token.cancel();
                    if let Err(e) = run.handle.await {
                        error!(run_id = run.id, error = %e, "ingestion run panicked");
                    }
                }
            }
        }
        self.shared.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::StaticFeed;
    use crate::store::InMemoryFlightStore;

    const BODY: &str = r#"{"flights": [{"flightNumber": "AA1", "departureTime": "2024-05-01T10:00:00Z"}]}"#;

    fn scheduler(
        config: ScheduleConfig,
    ) -> (IngestionScheduler<StaticFeed, InMemoryFlightStore>, InMemoryFlightStore) {
        let store = InMemoryFlightStore::new();
        let ingestor = Ingestor::new(StaticFeed::new(BODY), store.clone(), 4096);
        (IngestionScheduler::new(ingestor, config), store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_every_interval() {
        let (scheduler, store) = scheduler(ScheduleConfig {
            interval: Duration::from_secs(60),
            lifetime: Some(Duration::from_secs(150)),
            ..ScheduleConfig::test()
        });

        let handle = scheduler.start();
        handle.join().await;

        // t = 0, 60, 120
        assert_eq!(store.list_len("flights:2024-05-01"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_loop() {
        let (scheduler, store) = scheduler(ScheduleConfig::test());

        let handle = scheduler.start();
        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state(), SchedulerState::Cancelled);

        let runs = handle.stats().runs_started;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.stats().runs_started, runs);
        assert_eq!(store.list_len("flights:2024-05-01") as u64, runs);

        handle.shutdown(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_keeps_loop_alive() {
        let store = InMemoryFlightStore::new();
        let ingestor = Ingestor::new(StaticFeed::new("not json"), store, 4096);
        let scheduler = IngestionScheduler::new(
            ingestor,
            ScheduleConfig {
                lifetime: Some(Duration::from_millis(350)),
                ..ScheduleConfig::test()
            },
        );

        let handle = scheduler.start();
        tokio::time::sleep(Duration::from_millis(400)).await;
        let stats = handle.stats();
        assert_eq!(stats.runs_failed, 4);
        assert_eq!(stats.runs_completed, 0);
        handle.join().await;
    }
}
