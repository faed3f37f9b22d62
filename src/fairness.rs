//! Counters deciding when the dispatch loop should yield.
//!
//! One [`Fairness`] tracker lives for a single receive invocation. It counts
//! dispatched frames and, when configured, the age of the current burst.

use tokio::time::Instant;

use crate::config::FairnessConfig;

#[derive(Debug)]
pub(crate) struct Fairness {
    config: FairnessConfig,
    since_yield: usize,
    total: usize,
    burst_start: Option<Instant>,
}

impl Fairness {
    pub(crate) fn new(config: FairnessConfig) -> Self {
        Self {
            config,
            since_yield: 0,
            total: 0,
            burst_start: None,
        }
    }

    pub(crate) fn after_frame(&mut self) {
        self.since_yield += 1;
        self.total += 1;
        if self.since_yield == 1 {
            self.burst_start = Some(Instant::now());
        }
    }

    pub(crate) fn should_yield(&self) -> bool {
        let threshold_hit = self.config.frames_per_yield > 0
            && self.since_yield >= self.config.frames_per_yield;
        let time_hit = self
            .config
            .time_slice
            .zip(self.burst_start)
            .is_some_and(|(slice, start)| start.elapsed() >= slice);
        threshold_hit || time_hit
    }

    pub(crate) fn yielded(&mut self) {
        self.since_yield = 0;
        self.burst_start = None;
    }

    /// Invocations that dispatched fewer frames than the threshold still yield once.
    pub(crate) fn needs_final_yield(&self) -> bool {
        self.config.frames_per_yield == 0 || self.total < self.config.frames_per_yield
    }

    pub(crate) fn total(&self) -> usize { self.total }
}
