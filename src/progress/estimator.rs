// src/progress/estimator.rs

//! Wall-clock progress estimation for phases where a tool prints nothing.
//!
//! Given the length of the work unit (e.g. seconds of audio) and a
//! throughput multiplier for the current execution mode, the expected wall
//! time is `total_units * multiplier`. The elapsed fraction of that is mapped
//! into `[floor, ceiling]` so estimates slot in between the real parser's
//! milestones instead of competing with them.
//!
//! The window does not have to open at spawn: a tool that reports native
//! progress for a while and then goes quiet gets its estimate anchored at
//! the start of the quiet phase, either after a fixed delay or when the
//! tracker enters a named phase.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::exec::events::EventSink;

use super::tracker::{EstimateOutcome, ProgressTracker};

/// When the estimation window opens.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EstimatorStart {
    #[default]
    Spawn,
    /// A fixed delay after spawn.
    After(Duration),
    /// The first time the tracker reports this phase label.
    Phase(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorSpec {
    pub total_units: f64,
    pub multiplier: f64,
    pub floor: f64,
    pub ceiling: f64,
    /// How often to offer a new estimate.
    pub interval: Duration,
    pub start: EstimatorStart,
}

impl EstimatorSpec {
    pub fn new(total_units: f64, multiplier: f64, floor: f64, ceiling: f64) -> Self {
        Self {
            total_units,
            multiplier,
            floor,
            ceiling,
            interval: Duration::from_secs(1),
            start: EstimatorStart::Spawn,
        }
    }

    pub fn start_after(mut self, delay: Duration) -> Self {
        self.start = EstimatorStart::After(delay);
        self
    }

    pub fn start_on_phase(mut self, label: impl Into<String>) -> Self {
        self.start = EstimatorStart::Phase(label.into());
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TimeEstimator {
    spec: EstimatorSpec,
}

impl TimeEstimator {
    pub fn new(spec: EstimatorSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &EstimatorSpec {
        &self.spec
    }

    /// Fraction of the expected wall time used up after `elapsed`, in `[0, 1]`.
    pub fn fraction_at(&self, elapsed: Duration) -> f64 {
        let expected = self.spec.total_units * self.spec.multiplier;
        if !(expected.is_finite() && expected > 0.0) {
            return 0.0;
        }
        (elapsed.as_secs_f64() / expected).clamp(0.0, 1.0)
    }

    /// Estimated overall percent after `elapsed`.
    pub fn percent_at(&self, elapsed: Duration) -> f64 {
        let EstimatorSpec { floor, ceiling, .. } = self.spec;
        floor + (ceiling - floor) * self.fraction_at(elapsed)
    }

    /// Estimated percent `since_spawn` into the run, or `None` while the
    /// window has not opened yet. Phase-anchored windows depend on output
    /// and always return `None` here.
    pub fn percent_since_spawn(&self, since_spawn: Duration) -> Option<f64> {
        match &self.spec.start {
            EstimatorStart::Spawn => Some(self.percent_at(since_spawn)),
            EstimatorStart::After(delay) => {
                since_spawn.checked_sub(*delay).map(|e| self.percent_at(e))
            }
            EstimatorStart::Phase(_) => None,
        }
    }

    /// Start ticking against `tracker`, publishing accepted estimates on
    /// `sink`. The task ends by itself once the tracker is finished or has
    /// reached this estimator's ceiling; callers abort it on process exit.
    pub fn spawn(self, tracker: Arc<Mutex<ProgressTracker>>, sink: EventSink) -> JoinHandle<()> {
        tokio::spawn(async move {
            let spawned = Instant::now();
            let mut window = match &self.spec.start {
                EstimatorStart::Spawn => Some(spawned),
                EstimatorStart::After(delay) => Some(spawned + *delay),
                EstimatorStart::Phase(_) => None,
            };
            let mut ticker = tokio::time::interval(self.spec.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                // Publish while holding the lock so ordering matches the
                // parser's own events.
                let Ok(mut guard) = tracker.lock() else {
                    break;
                };
                if guard.is_finished() {
                    break;
                }
                if window.is_none() {
                    if let EstimatorStart::Phase(label) = &self.spec.start {
                        if guard.phase() == Some(label.as_str()) {
                            debug!(invocation = %guard.id(), phase = %label, "estimation window opened");
                            window = Some(Instant::now());
                        }
                    }
                }
                let now = Instant::now();
                let Some(opened) = window.filter(|opened| *opened <= now) else {
                    continue;
                };
                let percent = self.percent_at(now - opened);

                match guard.offer_estimate(percent, self.spec.ceiling) {
                    EstimateOutcome::Emitted(event) => sink.publish(event),
                    EstimateOutcome::Skipped => {}
                    EstimateOutcome::Exhausted => {
                        debug!(invocation = %guard.id(), "time estimator finished");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_elapsed_time_into_sub_range() {
        let est = TimeEstimator::new(EstimatorSpec::new(60.0, 1.0, 35.0, 95.0));
        assert_eq!(est.percent_at(Duration::ZERO), 35.0);
        assert!((est.percent_at(Duration::from_secs(30)) - 65.0).abs() < 1e-9);
        assert_eq!(est.percent_at(Duration::from_secs(600)), 95.0);
    }

    #[test]
    fn window_opened_after_native_progress_stops() {
        // Native progress until second 5, then 60 s of silence.
        let est = TimeEstimator::new(
            EstimatorSpec::new(60.0, 1.0, 35.0, 95.0).start_after(Duration::from_secs(5)),
        );
        assert_eq!(est.percent_since_spawn(Duration::from_secs(4)), None);
        assert_eq!(est.percent_since_spawn(Duration::from_secs(5)), Some(35.0));
        let at_35 = est.percent_since_spawn(Duration::from_secs(35)).unwrap();
        assert!((at_35 - 65.0).abs() < 1e-9, "{at_35}");
        let at_50 = est.percent_since_spawn(Duration::from_secs(50)).unwrap();
        assert!(at_50 > at_35);
        assert_eq!(est.percent_since_spawn(Duration::from_secs(600)), Some(95.0));
    }

    #[test]
    fn phase_anchored_window_needs_output() {
        let est = TimeEstimator::new(
            EstimatorSpec::new(60.0, 1.0, 35.0, 95.0).start_on_phase("Transcribing"),
        );
        assert_eq!(est.percent_since_spawn(Duration::from_secs(35)), None);
        assert!((est.percent_at(Duration::from_secs(30)) - 65.0).abs() < 1e-9);
    }

    #[test]
    fn multiplier_stretches_expected_time() {
        let est = TimeEstimator::new(EstimatorSpec::new(60.0, 2.0, 0.0, 100.0));
        assert!((est.fraction_at(Duration::from_secs(60)) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn degenerate_totals_never_advance() {
        let est = TimeEstimator::new(EstimatorSpec::new(0.0, 1.0, 10.0, 90.0));
        assert_eq!(est.percent_at(Duration::from_secs(100)), 10.0);
    }
}
