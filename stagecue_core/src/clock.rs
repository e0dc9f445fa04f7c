// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deadline-ordered event queue.
//!
//! [`Clock`] keeps scheduled events sorted by target time. Events with no
//! target ([`When::EveryTick`]) sort before every concrete time and are
//! delivered on each tick. Ties are broken by insertion order.
//!
//! The clock does not sample time itself: the idle tick passes `now` in, so
//! the same queue works against a real monotonic clock and a manually
//! stepped one.
//!
//! ```text
//!   schedule(payload, At(t), repeat) ──► [ EveryTick.. | t0 <= t1 <= .. ]
//!                                              │
//!   take_due(now) / run_due(now, f) ◄──────────┘  (front entries with t <= now)
//! ```

use alloc::vec::Vec;

use thiserror::Error;

use crate::time::{Duration, HostTime};

/// When a scheduled event is due.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum When {
    /// Due on every tick.
    EveryTick,
    /// Due once host time reaches the given value.
    At(HostTime),
}

impl When {
    const fn target(self) -> Option<HostTime> {
        match self {
            Self::EveryTick => None,
            Self::At(t) => Some(t),
        }
    }
}

/// Identifies a scheduled event for [`Clock::unschedule`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventHandle(u64);

#[derive(Debug)]
struct Entry<T> {
    handle: EventHandle,
    target: Option<HostTime>,
    repeat: Option<Duration>,
    seq: u64,
    payload: T,
}

impl<T> Entry<T> {
    fn key(&self) -> (Option<HostTime>, u64) {
        (self.target, self.seq)
    }

    fn is_due(&self, now: HostTime) -> bool {
        self.target.is_none_or(|t| t <= now)
    }
}

/// Failures collected while dispatching one batch of due events.
///
/// Every due event is dispatched even when earlier ones fail; the failures
/// are reported together afterwards.
#[derive(Debug, Error)]
#[error("{} of {dispatched} due events failed", .failures.len())]
pub struct BatchError<E> {
    /// Number of events dispatched in the batch.
    pub dispatched: usize,
    /// The failing events, in dispatch order.
    pub failures: Vec<(EventHandle, E)>,
}

/// A priority queue of events keyed by target time.
#[derive(Debug)]
pub struct Clock<T> {
    events: Vec<Entry<T>>,
    next_handle: u64,
    next_seq: u64,
}

impl<T> Default for Clock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clock<T> {
    /// Creates an empty clock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            events: Vec::new(),
            next_handle: 0,
            next_seq: 0,
        }
    }

    /// Schedules `payload` at `when`, optionally repeating every `repeat`.
    pub fn schedule(&mut self, payload: T, when: When, repeat: Option<Duration>) -> EventHandle {
        let handle = EventHandle(self.next_handle);
        self.next_handle += 1;
        self.insert(Entry {
            handle,
            target: when.target(),
            repeat,
            seq: 0,
            payload,
        });
        handle
    }

    /// Schedules `payload` at `now + delay`.
    pub fn schedule_after(
        &mut self,
        payload: T,
        now: HostTime,
        delay: Duration,
        repeat: Option<Duration>,
    ) -> EventHandle {
        self.schedule(payload, When::At(now.saturating_add(delay)), repeat)
    }

    /// Removes a scheduled event, returning its payload if it was pending.
    pub fn unschedule(&mut self, handle: EventHandle) -> Option<T> {
        let pos = self.events.iter().position(|e| e.handle == handle)?;
        Some(self.events.remove(pos).payload)
    }

    /// Removes every event whose payload matches `pred`. Returns how many
    /// were removed.
    pub fn unschedule_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let before = self.events.len();
        self.events.retain(|e| !pred(&e.payload));
        before - self.events.len()
    }

    /// Returns the earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<When> {
        self.events
            .first()
            .map(|e| e.target.map_or(When::EveryTick, When::At))
    }

    /// Number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Dispatches every due event in place, in target order.
    ///
    /// A failing callback does not stop the batch; failures are returned
    /// together once every due event has run. The queue is consistent
    /// whatever the callbacks return.
    pub fn run_due<E>(
        &mut self,
        now: HostTime,
        mut f: impl FnMut(EventHandle, &mut T) -> Result<(), E>,
    ) -> Result<usize, BatchError<E>> {
        let mut due = self.drain_due(now);
        let mut failures = Vec::new();
        for entry in &mut due {
            if let Err(e) = f(entry.handle, &mut entry.payload) {
                failures.push((entry.handle, e));
            }
        }
        let dispatched = due.len();
        for entry in due {
            self.requeue(entry, now);
        }
        if failures.is_empty() {
            Ok(dispatched)
        } else {
            Err(BatchError {
                dispatched,
                failures,
            })
        }
    }

    fn drain_due(&mut self, now: HostTime) -> Vec<Entry<T>> {
        let split = self.events.partition_point(|e| e.is_due(now));
        self.events.drain(..split).collect()
    }

    /// Puts a dispatched entry back if it is still owed future deliveries.
    fn requeue(&mut self, mut entry: Entry<T>, now: HostTime) {
        match (entry.target, entry.repeat) {
            (Some(_), None) => {}
            (None, None) => self.insert_keep_seq(entry),
            (target, Some(interval)) => {
                let base = target.unwrap_or(now);
                entry.target = Some(base.saturating_add(interval));
                self.insert(entry);
            }
        }
    }

    fn insert(&mut self, mut entry: Entry<T>) {
        entry.seq = self.next_seq;
        self.next_seq += 1;
        self.insert_keep_seq(entry);
    }

    fn insert_keep_seq(&mut self, entry: Entry<T>) {
        let key = entry.key();
        let pos = self.events.partition_point(|e| e.key() <= key);
        self.events.insert(pos, entry);
    }
}

impl<T: Clone> Clock<T> {
    /// Removes and returns every due event, in target order.
    ///
    /// Repeating and every-tick events stay scheduled; their payloads are
    /// cloned into the result.
    pub fn take_due(&mut self, now: HostTime) -> Vec<(EventHandle, T)> {
        let due = self.drain_due(now);
        let mut out = Vec::with_capacity(due.len());
        for entry in due {
            out.push((entry.handle, entry.payload.clone()));
            self.requeue(entry, now);
        }
        out
    }
}
