//! Operator control state shared between the tick loop and its callers.
//!
//! Pause/resume, stop, the real-time multiplier and manual detector inputs
//! can all be changed while the loop runs. Control flags are atomics so the
//! loop reads them without locking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

use crate::config::{RunConfig, TimerConfig};
use crate::tick::TickInputs;

/// Why a controller run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunEndReason {
    /// Simulated time reached the configured `max_seconds`.
    MaxSecondsReached,
    /// An operator asked the run to stop.
    OperatorStop,
}

/// Shared run control.
#[derive(Debug)]
pub struct RunControl {
    paused: AtomicBool,
    resume_notify: Notify,
    stop_requested: AtomicBool,
    /// `f64` bits of the real-time multiplier.
    real_time_multiplier: AtomicU64,
    started_at: DateTime<Utc>,
    max_seconds: f64,
    queued_inputs: Mutex<Vec<TickInputs>>,
    end_reason: Mutex<Option<RunEndReason>>,
}

impl RunControl {
    /// Control state for one run.
    pub fn new(timer: &TimerConfig, run: &RunConfig) -> Self {
        Self {
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
            stop_requested: AtomicBool::new(false),
            real_time_multiplier: AtomicU64::new(sanitize_multiplier(timer.real_time_multiplier).to_bits()),
            started_at: Utc::now(),
            max_seconds: run.max_seconds,
            queued_inputs: Mutex::new(Vec::new()),
            end_reason: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Pause / Resume
    // -----------------------------------------------------------------------

    /// Whether the run is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause the run; the loop sleeps until resumed.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume the run and wake the loop.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resume_notify.notify_one();
    }

    /// Wait until the run is no longer paused.
    pub async fn wait_if_paused(&self) {
        while self.paused.load(Ordering::Acquire) {
            self.resume_notify.notified().await;
        }
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Ask the loop to stop before its next tick.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.resume_notify.notify_one();
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Record why the run ended.
    pub async fn set_end_reason(&self, reason: RunEndReason) {
        *self.end_reason.lock().await = Some(reason);
    }

    /// Why the run ended, if it has.
    pub async fn end_reason(&self) -> Option<RunEndReason> {
        *self.end_reason.lock().await
    }

    // -----------------------------------------------------------------------
    // Pacing and boundaries
    // -----------------------------------------------------------------------

    /// Simulated seconds per wall-clock second; 0 runs unpaced.
    pub fn real_time_multiplier(&self) -> f64 {
        f64::from_bits(self.real_time_multiplier.load(Ordering::Acquire))
    }

    /// Change the multiplier. Negative or non-finite values are rejected
    /// and `None` is returned; otherwise the previous value.
    pub fn set_real_time_multiplier(&self, multiplier: f64) -> Option<f64> {
        if !multiplier.is_finite() || multiplier < 0.0 {
            return None;
        }
        let previous = self
            .real_time_multiplier
            .swap(multiplier.to_bits(), Ordering::AcqRel);
        Some(f64::from_bits(previous))
    }

    /// Configured bound on simulated seconds (0 = unbounded).
    pub const fn max_seconds(&self) -> f64 {
        self.max_seconds
    }

    /// Whether simulated time has reached the bound.
    pub fn time_limit_reached(&self, seconds: f64) -> bool {
        self.max_seconds > 0.0 && !crate::clock::before(seconds, self.max_seconds)
    }

    /// Wall-clock start of the run.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    // -----------------------------------------------------------------------
    // Manual inputs
    // -----------------------------------------------------------------------

    /// Queue detector inputs for the next tick, e.g. a manual green call.
    pub async fn queue_inputs(&self, inputs: TickInputs) {
        self.queued_inputs.lock().await.push(inputs);
    }

    /// Take every queued input set.
    pub async fn drain_queued_inputs(&self) -> Vec<TickInputs> {
        std::mem::take(&mut *self.queued_inputs.lock().await)
    }
}

fn sanitize_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() && multiplier >= 0.0 {
        multiplier
    } else {
        0.0
    }
}
