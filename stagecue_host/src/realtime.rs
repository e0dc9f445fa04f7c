// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The realtime idle loop.
//!
//! ```text
//! loop:
//!   tick (dispatch due events, settle, flip)
//!   wake = min(next deadline, now + max_sleep)
//!   spin-sleep until wake
//! ```
//!
//! The experiment's next deadline already has the pacer's preparation
//! margin taken off for pending flips, so the loop wakes early enough to
//! prepare them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use spin_sleep::SpinSleeper;

use stagecue_core::backend::Presenter;
use stagecue_core::error::RunError;
use stagecue_core::experiment::Experiment;
use stagecue_core::time::{Duration, HostTime, TimeSource};
use stagecue_core::trace::Tracer;

use crate::time::SystemTimeSource;

/// Totals for a realtime run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Ticks run.
    pub ticks: u64,
    /// Ticks that submitted a flip.
    pub flips: u64,
    /// Time spent asleep.
    pub slept: std::time::Duration,
    /// Whether the run ended through a [`StopHandle`].
    pub stopped: bool,
}

/// Asks a running [`RealtimeLoop`] to shut the experiment down.
///
/// Clones can be sent to other threads.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Requests a stop. The loop notices before its next tick.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Drives an [`Experiment`] against the wall clock.
#[derive(Debug)]
pub struct RealtimeLoop {
    time: SystemTimeSource,
    sleeper: SpinSleeper,
    max_sleep: Duration,
    stop: StopHandle,
}

impl RealtimeLoop {
    /// Default upper bound on one sleep, so self-paced runs still poll.
    pub const DEFAULT_MAX_SLEEP: Duration = Duration(1_000_000);

    /// Creates a loop reading `time`, which must be the experiment's time
    /// source.
    #[must_use]
    pub fn new(time: SystemTimeSource) -> Self {
        Self {
            time,
            sleeper: SpinSleeper::default(),
            max_sleep: Self::DEFAULT_MAX_SLEEP,
            stop: StopHandle::default(),
        }
    }

    /// Sets the longest single sleep.
    #[must_use]
    pub fn with_max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    /// A handle that stops this loop.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs until the experiment finishes or a stop is requested.
    pub fn run(
        &mut self,
        exp: &mut Experiment,
        presenter: &mut dyn Presenter,
    ) -> Result<LoopStats, RunError> {
        self.run_traced(exp, presenter, &mut Tracer::none())
    }

    /// Like [`run`](Self::run), reporting to `tracer`.
    pub fn run_traced(
        &mut self,
        exp: &mut Experiment,
        presenter: &mut dyn Presenter,
        tracer: &mut Tracer<'_>,
    ) -> Result<LoopStats, RunError> {
        self.run_with(exp, presenter, tracer, |_, _| Ok(()))
    }

    /// Like [`run_traced`](Self::run_traced), calling `between` with the
    /// experiment and the current time after every tick. Host input such as
    /// responses is delivered there.
    pub fn run_with(
        &mut self,
        exp: &mut Experiment,
        presenter: &mut dyn Presenter,
        tracer: &mut Tracer<'_>,
        mut between: impl FnMut(&mut Experiment, HostTime) -> Result<(), RunError>,
    ) -> Result<LoopStats, RunError> {
        let mut stats = LoopStats::default();
        while !exp.is_finished() {
            if self.stop.is_stopped() {
                log::info!("stop requested after {} ticks", stats.ticks);
                exp.shutdown()?;
                stats.stopped = true;
                break;
            }
            let summary = exp.tick_traced(presenter, tracer)?;
            stats.ticks += 1;
            stats.flips += u64::from(summary.flipped);
            if exp.is_finished() {
                break;
            }
            between(exp, self.time.now())?;
            if exp.is_finished() {
                break;
            }

            let now = self.time.now();
            let wake = wake_time(now, exp.next_deadline(), self.max_sleep);
            if wake > now {
                let nap =
                    std::time::Duration::from_nanos(wake.saturating_duration_since(now).ticks());
                self.sleeper.sleep(nap);
                stats.slept += nap;
            } else {
                std::thread::yield_now();
            }
        }
        log::debug!("realtime run ended: {stats:?}");
        Ok(stats)
    }
}

/// When to tick next: at the deadline, but no later than `max_sleep` from
/// `now`. A deadline already passed means tick again at once.
#[must_use]
pub fn wake_time(now: HostTime, deadline: Option<HostTime>, max_sleep: Duration) -> HostTime {
    let latest = now.saturating_add(max_sleep);
    match deadline {
        Some(deadline) => deadline.clamp(now, latest),
        None => latest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecue_core::config::ExperimentConfig;
    use stagecue_core::record::{MemorySink, RecordKind};
    use stagecue_core::state::DurationSpec;
    use stagecue_core::time::Timebase;

    use crate::presentation::HeadlessPresenter;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n, Timebase::NANOS)
    }

    #[test]
    fn wake_time_is_bounded() {
        let now = HostTime(10_000_000);
        assert_eq!(wake_time(now, None, ms(1)), HostTime(11_000_000));
        assert_eq!(wake_time(now, Some(HostTime(10_200_000)), ms(1)), HostTime(10_200_000));
        assert_eq!(wake_time(now, Some(HostTime(50_000_000)), ms(1)), HostTime(11_000_000));
        assert_eq!(wake_time(now, Some(HostTime(3)), ms(1)), now, "overdue ticks at once");
    }

    fn experiment(time: SystemTimeSource, sink: &MemorySink) -> Experiment {
        Experiment::new(
            ExperimentConfig::headless(),
            Box::new(time),
            Box::new(sink.clone()),
        )
    }

    #[test]
    fn fixed_waits_run_on_the_wall_clock() {
        let time = SystemTimeSource::new();
        let sink = MemorySink::new();
        let mut exp = experiment(time, &sink);
        exp.build(|b| {
            b.wait("a", DurationSpec::Fixed(ms(10)))?;
            b.wait("b", DurationSpec::Fixed(ms(10)))
        })
        .unwrap();
        let mut presenter = HeadlessPresenter::new(time);
        let stats = RealtimeLoop::new(time).run(&mut exp, &mut presenter).unwrap();

        assert!(exp.is_finished(), "ran to completion");
        assert!(time.now() >= HostTime(ms(20).ticks()), "took at least the scheduled time");
        assert!(stats.ticks >= 2, "ticked at least at each boundary");
        let b = &sink.records_for("b", RecordKind::State)[0];
        let start = b.get_f64("start_time").unwrap();
        assert!(start >= 0.01 && start < 0.02, "second wait starts at 10ms: {start}");
    }

    #[test]
    fn host_input_arrives_between_ticks() {
        let time = SystemTimeSource::new();
        let sink = MemorySink::new();
        let mut exp = experiment(time, &sink);
        let response = exp.build(|b| b.wait("response", DurationSpec::SelfPaced)).unwrap();
        let mut presenter = HeadlessPresenter::new(time);
        let pressed = HostTime(ms(5).ticks());
        RealtimeLoop::new(time)
            .run_with(&mut exp, &mut presenter, &mut Tracer::none(), |exp, now| {
                if now >= pressed {
                    exp.cancel(response, pressed)?;
                }
                Ok(())
            })
            .unwrap();
        let record = &sink.records_for("response", RecordKind::State)[0];
        let end = record.get_f64("end_time").unwrap();
        assert!((end - 0.005).abs() < 1e-9, "ends at the press: {end}");
    }

    #[test]
    fn stop_handle_shuts_the_run_down() {
        let time = SystemTimeSource::new();
        let sink = MemorySink::new();
        let mut exp = experiment(time, &sink);
        exp.build(|b| b.wait("forever", DurationSpec::SelfPaced)).unwrap();
        let mut rt = RealtimeLoop::new(time);
        let stop = rt.stop_handle();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(15));
            stop.stop();
        });
        let mut presenter = HeadlessPresenter::new(time);
        let stats = rt.run(&mut exp, &mut presenter).unwrap();
        stopper.join().unwrap();

        assert!(stats.stopped, "ended by the handle");
        assert!(exp.is_finished(), "shut down");
        assert_eq!(sink.records_for("forever", RecordKind::State).len(), 1, "record written");
    }
}
