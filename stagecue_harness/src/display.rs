// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A display simulated on a shared [`ManualTimeSource`].
//!
//! Flips land on vertical-sync boundaries at multiples of the refresh
//! interval, counted from tick zero. Stalls, timestamp jitter and dropped
//! submissions can be switched on to exercise the pacer and the re-queue
//! path.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use stagecue_core::backend::Presenter;
use stagecue_core::error::PresentError;
use stagecue_core::time::{Duration, HostTime, ManualTimeSource, TimeSource};
use stagecue_core::timing::{FlipOutcome, FlipRequest, PresentEvent, SubmissionId};

/// How the simulated display reports flips.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentMode {
    /// `present` waits for the vertical sync (advancing the shared time) and
    /// returns the confirmed flip time.
    Blocking,
    /// `present` returns at once; the flip is reported by `poll_presented`
    /// once the shared time reaches it.
    Async,
}

/// Behaviour of a [`SimulatedDisplay`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayConfig {
    /// Refresh interval. Zero flips immediately.
    pub refresh: Duration,
    /// Reporting mode.
    pub mode: PresentMode,
    /// Every `stall_every`-th submission is delayed by `stall`. Zero disables.
    pub stall_every: u64,
    /// Delay added to stalled submissions.
    pub stall: Duration,
    /// Upper bound of uniform noise added to reported flip times.
    pub jitter: Duration,
    /// Every `discard_every`-th submission is dropped. Zero disables.
    pub discard_every: u64,
    /// Seed for jitter.
    pub seed: u64,
}

impl DisplayConfig {
    /// A 60 Hz display in nanosecond ticks.
    #[must_use]
    pub const fn hz60(mode: PresentMode) -> Self {
        Self::with_refresh(Duration(16_666_667), mode)
    }

    /// A 120 Hz display in nanosecond ticks.
    #[must_use]
    pub const fn hz120(mode: PresentMode) -> Self {
        Self::with_refresh(Duration(8_333_333), mode)
    }

    /// A display that flips the moment it is asked to.
    #[must_use]
    pub const fn immediate() -> Self {
        Self::with_refresh(Duration::ZERO, PresentMode::Blocking)
    }

    /// A well-behaved display with the given refresh interval.
    #[must_use]
    pub const fn with_refresh(refresh: Duration, mode: PresentMode) -> Self {
        Self {
            refresh,
            mode,
            stall_every: 0,
            stall: Duration::ZERO,
            jitter: Duration::ZERO,
            discard_every: 0,
            seed: 0,
        }
    }
}

/// One submission as the display saw it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentedFlip {
    /// The submission.
    pub submission: SubmissionId,
    /// Earliest time the submitted updates wanted to be shown.
    pub target: HostTime,
    /// When the runtime expected the flip.
    pub predicted: HostTime,
    /// When it actually happened, or `None` if it was dropped.
    pub presented: Option<HostTime>,
}

/// A [`Presenter`] backed by a simulated vertical-sync clock.
#[derive(Debug)]
pub struct SimulatedDisplay {
    config: DisplayConfig,
    time: ManualTimeSource,
    rng: SmallRng,
    submissions: u64,
    pending: VecDeque<(HostTime, PresentEvent)>,
    history: Vec<PresentedFlip>,
}

impl SimulatedDisplay {
    /// Creates a display sharing `time` with the experiment under test.
    #[must_use]
    pub fn new(config: DisplayConfig, time: ManualTimeSource) -> Self {
        Self {
            config,
            time,
            rng: SmallRng::seed_from_u64(config.seed),
            submissions: 0,
            pending: VecDeque::new(),
            history: Vec::new(),
        }
    }

    /// The display's configuration.
    #[must_use]
    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// Every submission so far, in order.
    #[must_use]
    pub fn history(&self) -> &[PresentedFlip] {
        &self.history
    }

    /// Flips reported but not yet delivered through `poll_presented`.
    #[must_use]
    pub fn undelivered(&self) -> usize {
        self.pending.len()
    }

    /// The first vertical sync at or after `t`.
    #[must_use]
    pub fn next_vsync(&self, t: HostTime) -> HostTime {
        let refresh = self.config.refresh.ticks();
        if refresh == 0 {
            return t;
        }
        HostTime(t.ticks().div_ceil(refresh).saturating_mul(refresh))
    }

    fn is_nth(n: u64, every: u64) -> bool {
        every != 0 && n % every == 0
    }
}

impl Presenter for SimulatedDisplay {
    fn present(&mut self, request: &FlipRequest) -> Result<FlipOutcome, PresentError> {
        self.submissions += 1;
        let n = self.submissions;
        let mut ready = self.time.now();
        if Self::is_nth(n, self.config.stall_every) {
            log::debug!("simulated stall of {:?} on submission {n}", self.config.stall);
            ready = ready.saturating_add(self.config.stall);
        }
        let vsync = self.next_vsync(ready);

        let mut flip = PresentedFlip {
            submission: request.submission,
            target: request.target,
            predicted: request.predicted_flip,
            presented: None,
        };
        if Self::is_nth(n, self.config.discard_every) {
            self.history.push(flip);
            self.pending.push_back((
                vsync,
                PresentEvent::Discarded {
                    submission: request.submission,
                },
            ));
            return Ok(FlipOutcome::Submitted);
        }

        let noise = match self.config.jitter.ticks() {
            0 => 0,
            j => self.rng.gen_range(0..=j),
        };
        let at = HostTime(vsync.ticks().saturating_add(noise));
        flip.presented = Some(at);
        self.history.push(flip);
        match self.config.mode {
            PresentMode::Blocking => {
                self.time.advance_to(at);
                Ok(FlipOutcome::Confirmed(at))
            }
            PresentMode::Async => {
                self.pending.push_back((
                    at,
                    PresentEvent::Presented {
                        submission: request.submission,
                        at,
                    },
                ));
                Ok(FlipOutcome::Submitted)
            }
        }
    }

    fn poll_presented(&mut self) -> Option<PresentEvent> {
        let &(due, _) = self.pending.front()?;
        if due > self.time.now() {
            return None;
        }
        self.pending.pop_front().map(|(_, event)| event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(n: u64, target: u64) -> FlipRequest {
        FlipRequest {
            submission: SubmissionId(n),
            target: HostTime(target),
            predicted_flip: HostTime(target),
            blocking: true,
            updates: 1,
        }
    }

    #[test]
    fn blocking_flips_land_on_vsync() {
        let time = ManualTimeSource::new();
        let mut display =
            SimulatedDisplay::new(DisplayConfig::hz60(PresentMode::Blocking), time.clone());
        time.advance(Duration(20_000_000));
        let outcome = display.present(&request(0, 20_000_000)).unwrap();
        assert_eq!(outcome, FlipOutcome::Confirmed(HostTime(33_333_334)));
        assert_eq!(time.now(), HostTime(33_333_334), "blocking present waits for vsync");
    }

    #[test]
    fn async_flips_arrive_once_time_reaches_them() {
        let time = ManualTimeSource::new();
        let mut display =
            SimulatedDisplay::new(DisplayConfig::hz60(PresentMode::Async), time.clone());
        time.advance(Duration(1));
        assert_eq!(display.present(&request(0, 1)).unwrap(), FlipOutcome::Submitted);
        assert_eq!(display.poll_presented(), None, "not yet at the vsync");
        time.advance_to(HostTime(16_666_667));
        assert_eq!(
            display.poll_presented(),
            Some(PresentEvent::Presented {
                submission: SubmissionId(0),
                at: HostTime(16_666_667),
            })
        );
        assert_eq!(display.poll_presented(), None, "delivered once");
    }

    #[test]
    fn stalls_push_flips_past_the_next_vsync() {
        let time = ManualTimeSource::new();
        let config = DisplayConfig {
            stall_every: 2,
            stall: Duration(20_000_000),
            ..DisplayConfig::hz60(PresentMode::Blocking)
        };
        let mut display = SimulatedDisplay::new(config, time.clone());
        let first = display.present(&request(0, 0)).unwrap();
        assert_eq!(first, FlipOutcome::Confirmed(HostTime(0)));
        let second = display.present(&request(1, 0)).unwrap();
        assert_eq!(
            second,
            FlipOutcome::Confirmed(HostTime(33_333_334)),
            "20ms stall misses the 16.7ms vsync"
        );
    }

    #[test]
    fn discarded_submissions_are_reported() {
        let time = ManualTimeSource::new();
        let config = DisplayConfig {
            discard_every: 1,
            ..DisplayConfig::immediate()
        };
        let mut display = SimulatedDisplay::new(config, time);
        assert_eq!(display.present(&request(4, 0)).unwrap(), FlipOutcome::Submitted);
        assert_eq!(
            display.poll_presented(),
            Some(PresentEvent::Discarded {
                submission: SubmissionId(4)
            })
        );
        assert_eq!(display.history()[0].presented, None);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let time = ManualTimeSource::new();
        let config = DisplayConfig {
            jitter: Duration(500_000),
            seed: 7,
            ..DisplayConfig::hz60(PresentMode::Blocking)
        };
        let mut display = SimulatedDisplay::new(config, time.clone());
        for n in 0..20 {
            let before = display.next_vsync(time.now());
            let FlipOutcome::Confirmed(at) = display.present(&request(n, 0)).unwrap() else {
                panic!("blocking display confirms");
            };
            assert!(at >= before, "never early");
            assert!(at.ticks() - before.ticks() <= 500_000, "noise bounded by jitter");
            time.advance(Duration(1));
        }
    }
}
