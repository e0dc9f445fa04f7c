// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wall-clock time source.

use std::time::Instant;

use stagecue_core::time::{HostTime, TimeSource, Timebase};

/// Monotonic [`TimeSource`] counting nanoseconds from its creation.
///
/// Clones share the origin, so a presenter and the experiment read the same
/// timeline.
#[derive(Clone, Copy, Debug)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    /// Starts a timeline at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// The instant tick zero corresponds to.
    #[must_use]
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Converts a host time on this timeline back to an [`Instant`].
    #[must_use]
    pub fn instant_at(&self, t: HostTime) -> Instant {
        self.origin + std::time::Duration::from_nanos(t.ticks())
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> HostTime {
        elapsed_to_host_time(self.origin.elapsed())
    }

    fn timebase(&self) -> Timebase {
        Timebase::NANOS
    }
}

fn elapsed_to_host_time(elapsed: std::time::Duration) -> HostTime {
    HostTime(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
}
