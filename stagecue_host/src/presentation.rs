// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Presenter for runs without a display, and its feedback queue.

use std::collections::VecDeque;

use stagecue_core::backend::Presenter;
use stagecue_core::error::PresentError;
use stagecue_core::time::TimeSource;
use stagecue_core::timing::{FlipOutcome, FlipRequest, PresentEvent};

use crate::time::SystemTimeSource;

/// Bounded FIFO of [`PresentEvent`]s.
///
/// Overflow policy is `drop_oldest`: when full, pushing a new event removes
/// the oldest queued one first, keeping the newest feedback available.
#[derive(Debug, Clone)]
pub struct PresentEventQueue {
    items: VecDeque<PresentEvent>,
    capacity: usize,
    dropped: u64,
}

impl PresentEventQueue {
    /// Default queue capacity used by [`Default`].
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Creates a queue with an explicit capacity.
    ///
    /// `capacity == 0` is promoted to `1`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Enqueues one event.
    pub fn push(&mut self, event: PresentEvent) {
        if self.items.len() == self.capacity {
            if let Some(lost) = self.items.pop_front() {
                log::warn!("present feedback queue full, dropping {lost:?}");
            }
            self.dropped += 1;
        }
        self.items.push_back(event);
    }

    /// Pops the oldest queued event, if any.
    pub fn pop(&mut self) -> Option<PresentEvent> {
        self.items.pop_front()
    }

    /// Current queue length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` when no events are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of events dropped due to overflow.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

impl Default for PresentEventQueue {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

/// A [`Presenter`] with no display behind it.
///
/// Every flip happens the moment it is presented. Blocking requests are
/// confirmed directly; the others are reported through
/// [`poll_presented`](Presenter::poll_presented) on the same tick.
#[derive(Debug)]
pub struct HeadlessPresenter {
    time: SystemTimeSource,
    feedback: PresentEventQueue,
    presented: u64,
}

impl HeadlessPresenter {
    /// Creates a presenter stamping flips from `time`.
    #[must_use]
    pub fn new(time: SystemTimeSource) -> Self {
        Self {
            time,
            feedback: PresentEventQueue::default(),
            presented: 0,
        }
    }

    /// Flips presented so far.
    #[must_use]
    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Presenter for HeadlessPresenter {
    fn present(&mut self, request: &FlipRequest) -> Result<FlipOutcome, PresentError> {
        let at = self.time.now();
        self.presented += 1;
        log::trace!("headless flip {:?} with {} updates", request.submission, request.updates);
        if request.blocking {
            return Ok(FlipOutcome::Confirmed(at));
        }
        self.feedback.push(PresentEvent::Presented {
            submission: request.submission,
            at,
        });
        Ok(FlipOutcome::Submitted)
    }

    fn poll_presented(&mut self) -> Option<PresentEvent> {
        self.feedback.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecue_core::time::HostTime;
    use stagecue_core::timing::SubmissionId;

    fn discarded(n: u64) -> PresentEvent {
        PresentEvent::Discarded {
            submission: SubmissionId(n),
        }
    }

    #[test]
    fn queue_overflow_drops_oldest_event() {
        let mut queue = PresentEventQueue::with_capacity(2);
        queue.push(discarded(1));
        queue.push(discarded(2));
        queue.push(discarded(3));

        assert_eq!(queue.pop(), Some(discarded(2)));
        assert_eq!(queue.pop(), Some(discarded(3)));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.dropped_count(), 1);
    }

    #[test]
    fn zero_capacity_is_promoted_to_one() {
        let mut queue = PresentEventQueue::with_capacity(0);
        queue.push(discarded(1));
        queue.push(discarded(2));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some(discarded(2)));
        assert!(queue.is_empty(), "drained");
    }

    fn request(n: u64, blocking: bool) -> FlipRequest {
        FlipRequest {
            submission: SubmissionId(n),
            target: HostTime(0),
            predicted_flip: HostTime(0),
            blocking,
            updates: 1,
        }
    }

    #[test]
    fn blocking_flips_are_confirmed_directly() {
        let mut presenter = HeadlessPresenter::new(SystemTimeSource::new());
        let outcome = presenter.present(&request(0, true)).unwrap();
        assert!(matches!(outcome, FlipOutcome::Confirmed(_)), "got {outcome:?}");
        assert_eq!(presenter.poll_presented(), None, "nothing left to report");
    }

    #[test]
    fn other_flips_are_reported_by_polling() {
        let mut presenter = HeadlessPresenter::new(SystemTimeSource::new());
        assert_eq!(presenter.present(&request(3, false)).unwrap(), FlipOutcome::Submitted);
        let Some(PresentEvent::Presented { submission, .. }) = presenter.poll_presented() else {
            panic!("expected a presented event");
        };
        assert_eq!(submission, SubmissionId(3));
        assert_eq!(presenter.presented(), 1);
    }
}
