// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flip submission and feedback types.
//!
//! These types flow between the idle tick, the [`Presenter`] and the
//! [`FlipPacer`]:
//!
//! 1. The idle tick collects due video updates, applies them and builds a
//!    [`FlipRequest`] for the flip the pacer predicts.
//! 2. [`Presenter::present`] either confirms the flip immediately (blocking
//!    presenters) with [`FlipOutcome::Confirmed`], or returns
//!    [`FlipOutcome::Submitted`] and later reports a [`PresentEvent`] from
//!    [`Presenter::poll_presented`].
//! 3. The confirmed timestamp resolves the stored [`PendingFlip`] into
//!    [`FlipFeedback`], which is fed to
//!    [`FlipPacer::observe`](crate::scheduler::FlipPacer::observe).
//!
//! [`Presenter`]: crate::backend::Presenter
//! [`Presenter::present`]: crate::backend::Presenter::present
//! [`Presenter::poll_presented`]: crate::backend::Presenter::poll_presented
//! [`FlipPacer`]: crate::scheduler::FlipPacer

use core::fmt;

use crate::time::{Duration, HostTime};

/// Identifies one flip submission.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmissionId(pub u64);

impl fmt::Debug for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubmissionId({})", self.0)
    }
}

/// A request to present the updates applied since the previous flip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlipRequest {
    /// Submission identity, echoed back in [`PresentEvent`]s.
    pub submission: SubmissionId,
    /// Earliest target time among the batched updates.
    pub target: HostTime,
    /// The flip the pacer expects this submission to land on.
    pub predicted_flip: HostTime,
    /// Whether the caller needs the confirmed timestamp before returning.
    pub blocking: bool,
    /// Number of video updates batched into this flip.
    pub updates: usize,
}

/// Immediate result of [`Presenter::present`](crate::backend::Presenter::present).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlipOutcome {
    /// The flip happened at the given time.
    Confirmed(HostTime),
    /// The flip was queued; a [`PresentEvent`] follows.
    Submitted,
}

/// Asynchronous presentation result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentEvent {
    /// The submission reached the display.
    Presented {
        /// Which submission.
        submission: SubmissionId,
        /// When it was shown.
        at: HostTime,
    },
    /// The submission was dropped and never shown; its updates are queued
    /// again.
    Discarded {
        /// Which submission.
        submission: SubmissionId,
    },
}

/// Timing observations for one flip, fed back to the pacer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlipFeedback {
    /// When the idle tick began applying updates for this flip.
    pub prepare_started: HostTime,
    /// When the flip was handed to the presenter.
    pub submitted_at: HostTime,
    /// The flip the pacer predicted.
    pub predicted_flip: HostTime,
    /// Confirmed presentation time, if known.
    pub confirmed_at: Option<HostTime>,
    /// Whether the predicted flip was missed, if determinable.
    pub missed_deadline: Option<bool>,
}

impl FlipFeedback {
    /// Builds feedback from observations.
    ///
    /// A flip is missed when it was confirmed later than `predicted_flip +
    /// tolerance`. Without a confirmed time the outcome is unknown.
    #[must_use]
    pub fn new(
        prepare_started: HostTime,
        submitted_at: HostTime,
        predicted_flip: HostTime,
        confirmed_at: Option<HostTime>,
        tolerance: Duration,
    ) -> Self {
        let missed_deadline =
            confirmed_at.map(|at| at > predicted_flip.saturating_add(tolerance));
        Self {
            prepare_started,
            submitted_at,
            predicted_flip,
            confirmed_at,
            missed_deadline,
        }
    }

    /// Time spent between starting to apply updates and submitting.
    #[must_use]
    pub fn prepare_cost(&self) -> Duration {
        self.submitted_at
            .saturating_duration_since(self.prepare_started)
    }
}

/// What is known about a submitted flip before it is confirmed.
///
/// Non-blocking presenters confirm a flip on a later tick; the idle tick
/// keeps one of these per in-flight submission and resolves it when the
/// [`PresentEvent`] arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PendingFlip {
    /// The submitted request.
    pub request: FlipRequest,
    /// When applying updates began.
    pub prepare_started: HostTime,
    /// When the request was submitted.
    pub submitted_at: HostTime,
}

impl PendingFlip {
    /// Resolves into [`FlipFeedback`] with the confirmed time, if any.
    #[must_use]
    pub fn resolve(self, confirmed_at: Option<HostTime>, tolerance: Duration) -> FlipFeedback {
        FlipFeedback::new(
            self.prepare_started,
            self.submitted_at,
            self.request.predicted_flip,
            confirmed_at,
            tolerance,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingFlip {
        PendingFlip {
            request: FlipRequest {
                submission: SubmissionId(3),
                target: HostTime(1_000),
                predicted_flip: HostTime(2_000),
                blocking: false,
                updates: 2,
            },
            prepare_started: HostTime(1_500),
            submitted_at: HostTime(1_700),
        }
    }

    #[test]
    fn late_confirmation_is_a_miss() {
        let fb = pending().resolve(Some(HostTime(2_600)), Duration(500));
        assert_eq!(fb.missed_deadline, Some(true));
        assert_eq!(fb.prepare_cost(), Duration(200));
    }

    #[test]
    fn confirmation_within_tolerance_is_a_hit() {
        let fb = pending().resolve(Some(HostTime(2_400)), Duration(500));
        assert_eq!(fb.missed_deadline, Some(false));
    }

    #[test]
    fn unconfirmed_flip_has_unknown_outcome() {
        let fb = pending().resolve(None, Duration(500));
        assert_eq!(fb.missed_deadline, None);
        assert_eq!(fb.confirmed_at, None);
    }
}
