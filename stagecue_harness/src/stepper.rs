// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deterministic time stepping.
//!
//! A [`Stepper`] plays the host: it ticks the experiment, then moves the
//! shared [`ManualTimeSource`] forward by a fixed poll interval. A display
//! in blocking mode may move the time further on its own.

use thiserror::Error;

use stagecue_core::backend::Presenter;
use stagecue_core::error::RunError;
use stagecue_core::experiment::Experiment;
use stagecue_core::time::{Duration, HostTime, ManualTimeSource, TimeSource};
use stagecue_core::trace::{TickSummary, Tracer};

/// Why a stepped run stopped early.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum StepError {
    /// The experiment returned an error.
    #[error(transparent)]
    Run(#[from] RunError),
    /// The run was still going at the time limit.
    #[error("run still active at {at:?}")]
    TimedOut {
        /// Time when the limit was hit.
        at: HostTime,
    },
}

/// Totals for a stepped run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Ticks run.
    pub ticks: u64,
    /// Ticks that submitted a flip.
    pub flips: u64,
    /// Clock events dispatched.
    pub events: u64,
}

impl RunStats {
    fn add(&mut self, summary: &TickSummary) {
        self.ticks += 1;
        self.flips += u64::from(summary.flipped);
        self.events += summary.events_dispatched as u64;
    }
}

/// Ticks an experiment against a manual time source.
#[derive(Debug)]
pub struct Stepper {
    time: ManualTimeSource,
    step: Duration,
    limit: HostTime,
    stats: RunStats,
}

impl Stepper {
    /// Polls every `step`, giving up at one hour of simulated time.
    #[must_use]
    pub fn new(time: ManualTimeSource, step: Duration) -> Self {
        let hour = Duration::from_secs(3600.0, time.timebase());
        Self {
            time,
            step,
            limit: HostTime(hour.ticks()),
            stats: RunStats::default(),
        }
    }

    /// Gives up once the time passes `limit`.
    #[must_use]
    pub fn with_limit(mut self, limit: HostTime) -> Self {
        self.limit = limit;
        self
    }

    /// The shared time source.
    #[must_use]
    pub fn time(&self) -> &ManualTimeSource {
        &self.time
    }

    /// Totals so far.
    #[must_use]
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Runs one tick, then advances time by one step.
    pub fn tick(
        &mut self,
        exp: &mut Experiment,
        presenter: &mut dyn Presenter,
        tracer: &mut Tracer<'_>,
    ) -> Result<TickSummary, StepError> {
        self.step_capped(exp, presenter, tracer, None)
    }

    fn step_capped(
        &mut self,
        exp: &mut Experiment,
        presenter: &mut dyn Presenter,
        tracer: &mut Tracer<'_>,
        cap: Option<HostTime>,
    ) -> Result<TickSummary, StepError> {
        let summary = exp.tick_traced(presenter, tracer)?;
        self.stats.add(&summary);
        let next = self.time.now().saturating_add(self.step);
        self.time.advance_to(cap.map_or(next, |cap| next.min(cap)));
        Ok(summary)
    }

    /// Ticks until the time reaches `at` (without ticking at `at` itself) or
    /// the run ends.
    pub fn run_until(
        &mut self,
        exp: &mut Experiment,
        presenter: &mut dyn Presenter,
        at: HostTime,
    ) -> Result<(), StepError> {
        let mut tracer = Tracer::none();
        while self.time.now() < at && !exp.is_finished() {
            self.step_capped(exp, presenter, &mut tracer, Some(at))?;
        }
        self.time.advance_to(at);
        Ok(())
    }

    /// Ticks until the run finishes.
    pub fn run_until_done(
        &mut self,
        exp: &mut Experiment,
        presenter: &mut dyn Presenter,
    ) -> Result<RunStats, StepError> {
        self.run_until_done_traced(exp, presenter, &mut Tracer::none())
    }

    /// Ticks until the run finishes, reporting to `tracer`.
    pub fn run_until_done_traced(
        &mut self,
        exp: &mut Experiment,
        presenter: &mut dyn Presenter,
        tracer: &mut Tracer<'_>,
    ) -> Result<RunStats, StepError> {
        while !exp.is_finished() {
            let now = self.time.now();
            if now > self.limit {
                return Err(StepError::TimedOut { at: now });
            }
            self.tick(exp, presenter, tracer)?;
        }
        log::debug!("stepped run finished: {:?}", self.stats);
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use super::*;
    use stagecue_core::config::ExperimentConfig;
    use stagecue_core::record::NullSink;
    use stagecue_core::state::DurationSpec;

    use crate::display::{DisplayConfig, SimulatedDisplay};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n, stagecue_core::time::Timebase::NANOS)
    }

    #[test]
    fn self_paced_run_times_out() {
        let time = ManualTimeSource::new();
        let mut exp = Experiment::new(
            ExperimentConfig::headless(),
            Box::new(time.clone()),
            Box::new(NullSink),
        );
        exp.build(|b| b.wait("forever", DurationSpec::SelfPaced)).unwrap();
        let mut display = SimulatedDisplay::new(DisplayConfig::immediate(), time.clone());
        let mut stepper = Stepper::new(time, ms(10)).with_limit(HostTime(ms(100).ticks()));
        let err = stepper.run_until_done(&mut exp, &mut display).unwrap_err();
        assert!(matches!(err, StepError::TimedOut { .. }), "got {err:?}");
        assert_eq!(stepper.stats().ticks, 11, "ticks at 0 through 100ms");
    }

    #[test]
    fn run_until_stops_short_of_the_target() {
        let time = ManualTimeSource::new();
        let mut exp = Experiment::new(
            ExperimentConfig::headless(),
            Box::new(time.clone()),
            Box::new(NullSink),
        );
        exp.build(|b| b.wait("w", DurationSpec::Fixed(ms(500)))).unwrap();
        let mut display = SimulatedDisplay::new(DisplayConfig::immediate(), time.clone());
        let mut stepper = Stepper::new(time.clone(), ms(30));
        stepper
            .run_until(&mut exp, &mut display, HostTime(ms(100).ticks()))
            .unwrap();
        assert_eq!(time.now(), HostTime(ms(100).ticks()));
        assert_eq!(stepper.stats().ticks, 4, "0, 30, 60 and 90ms");
        assert!(!exp.is_finished(), "still waiting");
        let stats = stepper.run_until_done(&mut exp, &mut display).unwrap();
        assert!(exp.is_finished(), "finished");
        assert_eq!(stats.flips, 0, "nothing visual, nothing flipped");
    }
}
