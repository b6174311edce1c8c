//! Hot-lane load governor.

use crate::config::WorkerConfig;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Smoothing factor for the latency average.
const ALPHA: f64 = 0.2;

/// With no hot-lane traffic for this long the lane resumes regardless of the
/// last latency average.
const IDLE_RESUME: Duration = Duration::from_secs(2);

/// Whether background workers may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneState {
    /// Workers run normally.
    Running,
    /// Workers hold off until the hot lane calms down.
    Paused,
}

#[derive(Debug, Default)]
struct Load {
    ewma_ms: f64,
    samples: u64,
    backlog: usize,
    last_observed: Option<Instant>,
}

/// Pauses the background lane while the hot lane is slow or backlogged.
///
/// Pauses when the latency average exceeds `pause_latency_ms` or the hot-lane
/// backlog exceeds `pause_queue_depth`; resumes once the average is back
/// under 80% of the threshold and the backlog under half of its threshold.
#[derive(Debug)]
pub struct LoadGovernor {
    load: Mutex<Load>,
    pause_latency_ms: f64,
    pause_backlog: usize,
    state: watch::Sender<LaneState>,
}

impl LoadGovernor {
    /// Creates a governor in the running state.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(config: &WorkerConfig) -> Self {
        let (state, _) = watch::channel(LaneState::Running);
        Self {
            load: Mutex::new(Load::default()),
            pause_latency_ms: config.pause_latency_ms as f64,
            pause_backlog: config.pause_queue_depth,
            state,
        }
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LaneState> {
        self.state.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LaneState {
        *self.state.borrow()
    }

    /// Whether workers should hold off.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state() == LaneState::Paused
    }

    /// Smoothed hot-lane latency in milliseconds.
    #[must_use]
    pub fn latency_ms(&self) -> f64 {
        self.load.lock().unwrap_or_else(PoisonError::into_inner).ewma_ms
    }

    /// Records one hot-lane call and the backlog behind it.
    pub fn observe(&self, latency: Duration, backlog: usize) {
        let sample = latency.as_secs_f64() * 1_000.0;
        let mut load = self.load.lock().unwrap_or_else(PoisonError::into_inner);
        load.ewma_ms = if load.samples == 0 {
            sample
        } else {
            ALPHA.mul_add(sample - load.ewma_ms, load.ewma_ms)
        };
        load.samples += 1;
        load.backlog = backlog;
        load.last_observed = Some(Instant::now());
        let next = self.next_state(&load);
        drop(load);
        self.publish(next);
    }

    /// Resumes the lane if the hot lane has gone quiet.
    pub fn relax_if_idle(&self) {
        let mut load = self.load.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = load
            .last_observed
            .is_none_or(|at| at.elapsed() >= IDLE_RESUME);
        if idle {
            load.ewma_ms = 0.0;
            load.backlog = 0;
        }
        let next = self.next_state(&load);
        drop(load);
        self.publish(next);
    }

    #[allow(clippy::cast_precision_loss)]
    fn next_state(&self, load: &Load) -> LaneState {
        let overloaded =
            load.ewma_ms > self.pause_latency_ms || load.backlog > self.pause_backlog;
        let calm = load.ewma_ms <= self.pause_latency_ms * 0.8
            && load.backlog <= self.pause_backlog / 2;
        match self.state() {
            LaneState::Running if overloaded => LaneState::Paused,
            LaneState::Paused if calm => LaneState::Running,
            current => current,
        }
    }

    fn publish(&self, next: LaneState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            tracing::debug!(state = ?next, "Background lane state changed");
            metrics::gauge!("advisory_lane_paused").set(if next == LaneState::Paused { 1.0 } else { 0.0 });
        }
    }
}
