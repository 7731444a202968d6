//! Simulation clock and timing comparisons for the controller.
//!
//! The controller never reads wall-clock time. Every component receives
//! the current simulated second from a [`Clock`] supplied by the caller,
//! and the caller decides when the clock moves forward.
//!
//! # Design Principles
//!
//! - The step counter is the source of truth; seconds are derived from it
//!   and rounded to five decimals so repeated `0.1` steps do not drift.
//! - Step arithmetic is checked (no silent overflow).
//! - Timing guards compare with [`TIME_EPSILON`] so a minimum of `5.0`
//!   seconds is reached on exactly the tick where 5.0 seconds have passed.

/// Tolerance applied to every elapsed-time guard, in seconds.
pub const TIME_EPSILON: f64 = 1e-6;

/// Default simulation time step in seconds.
pub const DEFAULT_TIME_STEP: f64 = 0.1;

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Step counter would overflow.
    #[error("step counter overflow: cannot advance beyond u64::MAX")]
    StepOverflow,

    /// The configured time step is not a positive finite number.
    #[error("invalid time step: {time_step}")]
    InvalidTimeStep {
        /// The rejected time step in seconds.
        time_step: f64,
    },
}

/// Read-only view of simulated time.
pub trait Clock {
    /// Elapsed simulated seconds.
    fn seconds(&self) -> f64;

    /// Number of discrete steps taken so far.
    fn steps(&self) -> u64;
}

/// Fixed-step simulation clock.
#[derive(Debug, Clone, PartialEq)]
pub struct SimClock {
    /// Steps taken since start (or since the last reset).
    steps: u64,

    /// Seconds per step.
    time_step: f64,
}

impl SimClock {
    /// Create a clock at step 0 with the given step length in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidTimeStep`] if `time_step` is not a
    /// positive finite number.
    pub fn new(time_step: f64) -> Result<Self, ClockError> {
        if !time_step.is_finite() || time_step <= 0.0 {
            return Err(ClockError::InvalidTimeStep { time_step });
        }
        Ok(Self {
            steps: 0,
            time_step,
        })
    }

    /// Advance the clock by one step. Returns the new step count.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::StepOverflow`] if the counter would exceed
    /// `u64::MAX`.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        self.steps = self.steps.checked_add(1).ok_or(ClockError::StepOverflow)?;
        Ok(self.steps)
    }

    /// Return to step 0.
    pub const fn reset(&mut self) {
        self.steps = 0;
    }

    /// Seconds per step.
    pub const fn time_step(&self) -> f64 {
        self.time_step
    }
}

impl Clock for SimClock {
    #[allow(clippy::cast_precision_loss, clippy::arithmetic_side_effects)]
    fn seconds(&self) -> f64 {
        // Steps stay far below 2^52 for any realistic run.
        round_seconds(self.steps as f64 * self.time_step)
    }

    fn steps(&self) -> u64 {
        self.steps
    }
}

/// Round a second value to five decimals.
#[allow(clippy::arithmetic_side_effects)]
fn round_seconds(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

/// Whether at least `span` seconds have passed between `since` and `now`.
#[allow(clippy::arithmetic_side_effects)]
pub fn elapsed_at_least(since: f64, now: f64, span: f64) -> bool {
    now - since + TIME_EPSILON >= span
}

/// Whether `now` is strictly before `deadline`.
#[allow(clippy::arithmetic_side_effects)]
pub fn before(now: f64, deadline: f64) -> bool {
    now + TIME_EPSILON < deadline
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn clock_starts_at_zero() {
        let clock = SimClock::new(0.1).unwrap();
        assert_eq!(clock.steps(), 0);
        assert!(clock.seconds().abs() < TIME_EPSILON);
    }

    #[test]
    fn seconds_do_not_drift() {
        let mut clock = SimClock::new(0.1).unwrap();
        for _ in 0..30 {
            clock.advance().unwrap();
        }
        assert_eq!(clock.steps(), 30);
        assert!((clock.seconds() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn reset_returns_to_zero() {
        let mut clock = SimClock::new(0.5).unwrap();
        clock.advance().unwrap();
        clock.advance().unwrap();
        clock.reset();
        assert_eq!(clock.steps(), 0);
    }

    #[test]
    fn invalid_time_step_rejected() {
        assert!(SimClock::new(0.0).is_err());
        assert!(SimClock::new(-0.1).is_err());
        assert!(SimClock::new(f64::NAN).is_err());
    }

    #[test]
    fn elapsed_guard_holds_on_exact_tick() {
        let mut clock = SimClock::new(0.1).unwrap();
        for _ in 0..50 {
            clock.advance().unwrap();
        }
        assert!(elapsed_at_least(0.0, clock.seconds(), 5.0));
        assert!(!elapsed_at_least(0.1, clock.seconds(), 5.0));
    }

    #[test]
    fn before_is_strict() {
        assert!(before(2.9, 3.0));
        assert!(!before(3.0, 3.0));
        assert!(!before(3.1, 3.0));
    }
}
