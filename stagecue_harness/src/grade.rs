// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flip-timing metrics and grading.
//!
//! [`FlipTimingTracker`] is a [`TraceSink`]: pass it to
//! [`Experiment::tick_traced`](stagecue_core::experiment::Experiment::tick_traced)
//! and it pairs each submission with its confirmation, measuring how late
//! every flip landed relative to the time its updates asked for.

use alloc::collections::BTreeMap;
use alloc::string::String;

use stagecue_core::time::{HostTime, Timebase};
use stagecue_core::timing::SubmissionId;
use stagecue_core::trace::{FlipConfirmedEvent, FlipDiscardedEvent, FlipSubmitEvent, TraceSink};

/// Letter grade for flip timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlipGrade {
    /// Every flip within half a refresh of its target, almost no misses.
    A,
    /// Within one refresh, few misses.
    B,
    /// Within two refreshes.
    C,
    /// Worse.
    D,
}

impl FlipGrade {
    /// Returns a short label for reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

/// Aggregated report returned by [`FlipTimingTracker::report`].
#[derive(Clone, Copy, Debug)]
pub struct FlipReport {
    /// Current grade.
    pub grade: FlipGrade,
    /// Missed and discarded flips per 1000 submissions.
    pub miss_rate_per_1000: f64,
    /// Mean lateness of presented flips, in ms.
    pub mean_lateness_ms: f64,
    /// Worst lateness of a presented flip, in ms.
    pub max_lateness_ms: f64,
    /// Total flips presented.
    pub presented: u64,
    /// Presented flips that missed their predicted time.
    pub missed: u64,
    /// Submissions the display dropped.
    pub discarded: u64,
}

/// Rolling flip tracker with a fixed-size history of flip intervals.
#[derive(Debug)]
pub struct FlipTimingTracker<const N: usize> {
    timebase: Timebase,
    refresh_ms: f64,
    targets: BTreeMap<SubmissionId, HostTime>,
    intervals_ms: [f64; N],
    cursor: usize,
    last_flip: Option<HostTime>,
    lateness_sum_ms: f64,
    max_lateness_ms: f64,
    presented: u64,
    missed: u64,
    discarded: u64,
}

impl<const N: usize> FlipTimingTracker<N> {
    /// Creates a tracker for a display refreshing every `refresh_ms`.
    #[must_use]
    pub const fn new(timebase: Timebase, refresh_ms: f64) -> Self {
        Self {
            timebase,
            refresh_ms,
            targets: BTreeMap::new(),
            intervals_ms: [refresh_ms; N],
            cursor: 0,
            last_flip: None,
            lateness_sum_ms: 0.0,
            max_lateness_ms: 0.0,
            presented: 0,
            missed: 0,
            discarded: 0,
        }
    }

    fn ms(&self, from: HostTime, to: HostTime) -> f64 {
        let later = to.saturating_duration_since(from).to_secs(self.timebase);
        let earlier = from.saturating_duration_since(to).to_secs(self.timebase);
        (later - earlier) * 1000.0
    }

    /// Returns the current report.
    #[must_use]
    pub fn report(&self) -> FlipReport {
        let submitted = self.presented + self.discarded;
        let miss_rate = if submitted == 0 {
            0.0
        } else {
            (self.missed + self.discarded) as f64 * 1000.0 / submitted as f64
        };
        let mean = if self.presented == 0 {
            0.0
        } else {
            self.lateness_sum_ms / self.presented as f64
        };
        FlipReport {
            grade: grade_for(self.refresh_ms, self.max_lateness_ms, miss_rate),
            miss_rate_per_1000: miss_rate,
            mean_lateness_ms: mean,
            max_lateness_ms: self.max_lateness_ms,
            presented: self.presented,
            missed: self.missed,
            discarded: self.discarded,
        }
    }

    /// Returns ring-buffer flip intervals oldest→newest.
    #[must_use]
    pub fn flip_intervals(&self) -> [f64; N] {
        let mut out = [0.0; N];
        let mut i = 0;
        while i < N {
            let idx = (self.cursor + i) % N;
            out[i] = self.intervals_ms[idx];
            i += 1;
        }
        out
    }

    /// Returns an ASCII sparkline over `flip_intervals()`.
    #[must_use]
    pub fn sparkline_ascii(&self, min_ms: f64, max_ms: f64) -> String {
        const LEVELS: &[u8] = b" .:-=+*#%@";
        let mut out = String::with_capacity(N);
        let mut i = 0;
        while i < N {
            let idx = (self.cursor + i) % N;
            let v = self.intervals_ms[idx].clamp(min_ms, max_ms);
            let t = (v - min_ms) / (max_ms - min_ms);
            #[expect(
                clippy::cast_possible_truncation,
                reason = "index is clamped to ASCII level count"
            )]
            let level = (t * (LEVELS.len() as f64 - 1.0) + 0.5) as usize;
            out.push(LEVELS[level] as char);
            i += 1;
        }
        out
    }
}

impl<const N: usize> TraceSink for FlipTimingTracker<N> {
    fn on_flip_submit(&mut self, e: &FlipSubmitEvent) {
        self.targets.insert(e.submission, e.target);
    }

    fn on_flip_confirmed(&mut self, e: &FlipConfirmedEvent) {
        let Some(target) = self.targets.remove(&e.submission) else {
            return;
        };
        let lateness = self.ms(target, e.at);
        self.presented += 1;
        self.lateness_sum_ms += lateness;
        self.max_lateness_ms = self.max_lateness_ms.max(lateness);
        if e.missed_deadline == Some(true) {
            self.missed += 1;
        }
        if let Some(prev) = self.last_flip.replace(e.at) {
            self.intervals_ms[self.cursor % N] = self.ms(prev, e.at);
            self.cursor = (self.cursor + 1) % N;
        }
    }

    fn on_flip_discarded(&mut self, e: &FlipDiscardedEvent) {
        self.targets.remove(&e.submission);
        self.discarded += 1;
    }
}

fn grade_for(refresh_ms: f64, max_lateness_ms: f64, miss_rate_per_1000: f64) -> FlipGrade {
    // Immediate displays still get a millisecond of slack.
    let frame = refresh_ms.max(1.0);
    if max_lateness_ms < frame * 0.5 + 0.001 && miss_rate_per_1000 < 1.0 {
        FlipGrade::A
    } else if max_lateness_ms < frame + 0.001 && miss_rate_per_1000 < 50.0 {
        FlipGrade::B
    } else if max_lateness_ms < frame * 2.0 + 0.001 && miss_rate_per_1000 < 150.0 {
        FlipGrade::C
    } else {
        FlipGrade::D
    }
}
