//! Memory Monitor Module
//!
//! Samples process memory on a fixed cadence and dispatches urgency-tagged
//! callbacks when usage crosses the configured watermarks.
//!
//! # Pressure Levels
//! - `ratio > critical` (0.9): every callback runs with [`Urgency::Critical`]
//! - `ratio > warning` (0.8): every callback runs with [`Urgency::Warning`]
//! - otherwise nothing runs
//!
//! The monitor knows nothing about caches. Mapping an urgency to an action
//! is the registering layer's job.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::memory::{MemorySample, MemorySampler, ProcessMemorySampler};

// == Pressure ==

/// Severity attached to a callback invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Warning,
    Critical,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Urgency::Warning => write!(f, "warning"),
            Urgency::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
}

impl PressureLevel {
    pub fn urgency(self) -> Option<Urgency> {
        match self {
            PressureLevel::Normal => None,
            PressureLevel::Warning => Some(Urgency::Warning),
            PressureLevel::Critical => Some(Urgency::Critical),
        }
    }
}

/// Watermarks as `used / limit` ratios. Both bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureThresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            warning: 0.8,
            critical: 0.9,
        }
    }
}

impl PressureThresholds {
    pub fn level_for_ratio(self, ratio: f64) -> PressureLevel {
        if ratio > self.critical {
            PressureLevel::Critical
        } else if ratio > self.warning {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    pub fn level_for(self, sample: &MemorySample) -> PressureLevel {
        sample
            .ratio()
            .map_or(PressureLevel::Normal, |ratio| self.level_for_ratio(ratio))
    }
}

// == Callbacks ==

/// Identity of a registered callback, returned by [`MemoryMonitor::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

pub type PressureCallback = Arc<dyn Fn(Urgency) -> anyhow::Result<()> + Send + Sync>;

/// Side-effect-free view of the current pressure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryStatus {
    pub warning: bool,
    pub critical: bool,
    pub sample: MemorySample,
}

struct Inner {
    sampler: Arc<dyn MemorySampler>,
    thresholds: PressureThresholds,
    sample_interval: Duration,
    enabled: bool,
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(CallbackId, PressureCallback)>>,
    resume: Notify,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

// == Memory Monitor ==
/// Periodic memory sampler with an urgency-tagged callback registry.
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct MemoryMonitor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("thresholds", &self.inner.thresholds)
            .field("sample_interval", &self.inner.sample_interval)
            .field("enabled", &self.inner.enabled)
            .field("running", &self.is_running())
            .finish()
    }
}

impl MemoryMonitor {
    pub fn new(
        sampler: Arc<dyn MemorySampler>,
        thresholds: PressureThresholds,
        sample_interval: Duration,
        enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sampler,
                thresholds,
                sample_interval,
                enabled,
                next_id: AtomicU64::new(1),
                callbacks: Mutex::new(Vec::new()),
                resume: Notify::new(),
                task: Mutex::new(None),
            }),
        }
    }

    /// Process-memory monitor configured from `memory.*` and
    /// `performance.enableMonitoring`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let limit = config.memory.limit_bytes()?;
        let thresholds = PressureThresholds {
            warning: config.memory.warning_threshold,
            critical: config.memory.critical_threshold,
        };
        Ok(Self::new(
            Arc::new(ProcessMemorySampler::new(limit)),
            thresholds,
            config.memory.sample_interval(),
            config.performance.enable_monitoring,
        ))
    }

    pub fn thresholds(&self) -> PressureThresholds {
        self.inner.thresholds
    }

    // == Registry ==
    /// Appends `callback`. Callbacks run in registration order.
    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(Urgency) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = CallbackId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.callbacks).push((id, Arc::new(callback)));
        debug!(id = id.0, "Registered memory pressure callback");
        id
    }

    /// Removes the callback registered as `id`. Returns whether it existed.
    pub fn unregister(&self, id: CallbackId) -> bool {
        let mut callbacks = lock(&self.inner.callbacks);
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    pub fn callback_count(&self) -> usize {
        lock(&self.inner.callbacks).len()
    }

    // == Checks ==
    /// Current sample and pressure flags. Fires nothing.
    pub fn status(&self) -> MemoryStatus {
        let sample = self.inner.sampler.sample();
        let level = self.inner.thresholds.level_for(&sample);
        MemoryStatus {
            warning: level >= PressureLevel::Warning,
            critical: level == PressureLevel::Critical,
            sample,
        }
    }

    /// Takes one sample and dispatches callbacks for its level.
    pub fn check(&self) -> PressureLevel {
        run_check(&self.inner)
    }

    /// Runs every callback with `urgency` regardless of the current sample.
    /// Returns how many callbacks were invoked.
    pub fn cleanup_now(&self, urgency: Urgency) -> usize {
        info!(%urgency, "Manual memory cleanup requested");
        dispatch(&self.inner, urgency)
    }

    /// Requests an immediate check from the sampling task, e.g. after the
    /// host resumes from suspension. Returns false when the task is not
    /// running, in which case nothing is sampled.
    pub fn notify_resume(&self) -> bool {
        if !self.is_running() {
            debug!("Resume notification ignored, monitor not running");
            return false;
        }
        self.inner.resume.notify_one();
        true
    }

    // == Lifecycle ==
    /// Spawns the sampling task. No-op when monitoring is disabled or the
    /// task is already running. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        if !self.inner.enabled {
            info!("Memory monitoring disabled by configuration");
            return;
        }
        let mut task = lock(&self.inner.task);
        if task.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return;
        }

        let token = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.sample_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;

                    _ = cancelled.cancelled() => break,
                    _ = inner.resume.notified() => {
                        debug!("Resume notification, checking memory");
                    }
                    _ = ticker.tick() => {}
                }
                run_check(&inner);
            }
            debug!("Memory monitor task exited");
        });

        info!(
            interval_secs = self.inner.sample_interval.as_secs(),
            warning = self.inner.thresholds.warning,
            critical = self.inner.thresholds.critical,
            "Memory monitor started"
        );
        *task = Some((token, handle));
    }

    /// Cancels the sampling task. Idempotent; a check already running
    /// finishes.
    pub fn stop(&self) {
        if let Some((token, _)) = lock(&self.inner.task).take() {
            token.cancel();
            info!("Memory monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.task)
            .as_ref()
            .is_some_and(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_check(inner: &Inner) -> PressureLevel {
    let sample = inner.sampler.sample();
    let Some(ratio) = sample.ratio() else {
        debug!("Memory introspection unavailable, skipping check");
        return PressureLevel::Normal;
    };

    let level = inner.thresholds.level_for_ratio(ratio);
    if let Some(urgency) = level.urgency() {
        warn!(
            used_mb = sample.used / 1024 / 1024,
            limit_mb = sample.limit / 1024 / 1024,
            ratio,
            %urgency,
            "Memory pressure detected"
        );
        dispatch(inner, urgency);
    } else {
        debug!(ratio, "Memory usage normal");
    }
    level
}

fn dispatch(inner: &Inner, urgency: Urgency) -> usize {
    // Snapshot so callbacks may (un)register without deadlocking.
    let callbacks: Vec<(CallbackId, PressureCallback)> = lock(&inner.callbacks).clone();
    let count = callbacks.len();
    for (id, callback) in callbacks {
        match catch_unwind(AssertUnwindSafe(|| callback(urgency))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(id = id.0, %urgency, error = %e, "Memory callback failed"),
            Err(_) => error!(id = id.0, %urgency, "Memory callback panicked"),
        }
    }
    count
}
