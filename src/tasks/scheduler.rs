//! Cleanup Scheduler
//!
//! Generic host for periodic background tasks such as the eviction sweep
//! and the orphan sweep.
//!
//! Every task ticks at a fixed rate after an initial delay. Missed ticks are
//! skipped rather than bursted, and a tick that arrives while the previous
//! run is still executing is skipped too, so runs of one task never
//! overlap. Cancelling a task stops future ticks at once but lets a run
//! already in progress finish.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Handle to a scheduled task, used with [`CleanupScheduler::cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    id: u64,
    name: Arc<str>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct ScheduledTask {
    name: Arc<str>,
    token: CancellationToken,
    _ticker: JoinHandle<()>,
}

/// Clears the in-flight flag when a run ends, including by panic.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// == Cleanup Scheduler ==
/// Owns every periodic task handle; [`stop`](CleanupScheduler::stop)
/// cancels them all.
#[derive(Default)]
pub struct CleanupScheduler {
    next_id: AtomicU64,
    tasks: Mutex<BTreeMap<u64, ScheduledTask>>,
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}

impl CleanupScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` every `interval`, the first time after `initial_delay`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn schedule<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        initial_delay: Duration,
        task: F,
    ) -> TaskHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = Arc::from(name.into());
        let token = CancellationToken::new();

        let ticker = tokio::spawn(run_ticker(
            Arc::clone(&name),
            interval,
            initial_delay,
            token.clone(),
            task,
        ));

        info!(
            task = %name,
            interval_secs = interval.as_secs(),
            initial_delay_secs = initial_delay.as_secs(),
            "Scheduled periodic task"
        );
        lock(&self.tasks).insert(
            id,
            ScheduledTask {
                name: Arc::clone(&name),
                token,
                _ticker: ticker,
            },
        );
        TaskHandle { id, name }
    }

    /// Stops future ticks of `handle`. Returns false if it was already
    /// cancelled.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        match lock(&self.tasks).remove(&handle.id) {
            Some(task) => {
                task.token.cancel();
                info!(task = %task.name, "Cancelled periodic task");
                true
            }
            None => false,
        }
    }

    /// Cancels every task. Idempotent.
    pub fn stop(&self) {
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        if tasks.is_empty() {
            return;
        }
        for task in tasks.values() {
            task.token.cancel();
        }
        info!(count = tasks.len(), "Cleanup scheduler stopped");
    }

    /// Names of the tasks still scheduled, in scheduling order.
    pub fn active_tasks(&self) -> Vec<String> {
        lock(&self.tasks)
            .values()
            .map(|task| task.name.to_string())
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_ticker<F, Fut>(
    name: Arc<str>,
    interval: Duration,
    initial_delay: Duration,
    token: CancellationToken,
    task: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(initial_delay) => {}
    }

    let mut ticker = tokio::time::interval_at(Instant::now(), interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let in_flight = Arc::new(AtomicBool::new(false));

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if in_flight.swap(true, Ordering::AcqRel) {
            warn!(task = %name, "Previous run still in progress, skipping tick");
            continue;
        }
        let guard = InFlightGuard(Arc::clone(&in_flight));
        let run = task();
        let name = Arc::clone(&name);

        // Runs are detached from the ticker so cancellation never aborts one.
        tokio::spawn(async move {
            let _guard = guard;
            let started = Instant::now();
            debug!(task = %name, "Scheduled run starting");
            match tokio::spawn(run).await {
                Ok(()) => debug!(
                    task = %name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Scheduled run finished"
                ),
                Err(e) if e.is_panic() => error!(task = %name, "Scheduled run panicked"),
                Err(e) => warn!(task = %name, error = %e, "Scheduled run aborted"),
            }
        });
    }
    debug!(task = %name, "Ticker exited");
}
