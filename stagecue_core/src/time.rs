// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic host time, timebase conversion and time sources.
//!
//! [`HostTime`] is a point on the monotonic clock expressed in host ticks and
//! [`Duration`] a span in the same units. [`Timebase`] converts ticks to
//! nanoseconds (`nanoseconds = ticks * numer / denom`); all integer
//! conversions go through `u128` intermediates to avoid overflow.
//!
//! State timestamps are exchanged with the reference graph as floating-point
//! seconds; [`HostTime::to_secs`] and [`Duration::from_secs`] are the only
//! places where that conversion happens.
//!
//! [`TimeSource`] is what the scheduler samples once per idle tick.
//! [`ManualTimeSource`] is a shared, steppable source for offline runs and
//! tests.

use alloc::rc::Rc;
use core::cell::Cell;
use core::fmt;
use core::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// A point in time expressed as monotonic host ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTime(pub u64);

impl HostTime {
    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Converts this host time to nanoseconds using the given timebase.
    #[inline]
    #[must_use]
    pub const fn to_nanos(self, timebase: Timebase) -> u64 {
        timebase.ticks_to_nanos(self.0)
    }

    /// Creates a [`HostTime`] from a nanosecond value and timebase.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64, timebase: Timebase) -> Self {
        Self(timebase.nanos_to_ticks(nanos))
    }

    /// Converts this host time to seconds since the tick origin.
    #[inline]
    #[must_use]
    pub fn to_secs(self, timebase: Timebase) -> f64 {
        self.to_nanos(timebase) as f64 / NANOS_PER_SEC
    }

    /// Returns the duration between `self` and an earlier time, or zero if
    /// `earlier` is after `self`.
    #[inline]
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    /// Saturating addition of a duration.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.0))
    }

    /// Checked addition of a duration.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, duration: Duration) -> Option<Self> {
        match self.0.checked_add(duration.0) {
            Some(t) => Some(Self(t)),
            None => None,
        }
    }

    /// Checked subtraction of a duration.
    #[inline]
    #[must_use]
    pub const fn checked_sub(self, duration: Duration) -> Option<Self> {
        match self.0.checked_sub(duration.0) {
            Some(t) => Some(Self(t)),
            None => None,
        }
    }
}

impl Add<Duration> for HostTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub<Duration> for HostTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Duration) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Sub for HostTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Self) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl fmt::Debug for HostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTime({})", self.0)
    }
}

/// Rational conversion factor from ticks to nanoseconds.
///
/// `nanoseconds = ticks * numer / denom`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timebase {
    /// Numerator of the ticks-to-nanoseconds ratio.
    pub numer: u32,
    /// Denominator of the ticks-to-nanoseconds ratio.
    pub denom: u32,
}

impl Timebase {
    /// A timebase where ticks are already nanoseconds (1:1).
    pub const NANOS: Self = Self { numer: 1, denom: 1 };

    /// Creates a new timebase with the given numerator and denominator.
    ///
    /// # Panics
    ///
    /// Panics if `denom` is zero.
    #[inline]
    #[must_use]
    pub const fn new(numer: u32, denom: u32) -> Self {
        assert!(denom != 0, "timebase denominator must not be zero");
        Self { numer, denom }
    }

    /// Converts a tick count to nanoseconds.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u128 intermediate avoids overflow; truncation back to u64 is intentional"
    )]
    pub const fn ticks_to_nanos(self, ticks: u64) -> u64 {
        let wide = ticks as u128 * self.numer as u128 / self.denom as u128;
        wide as u64
    }

    /// Converts nanoseconds to a tick count.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u128 intermediate avoids overflow; truncation back to u64 is intentional"
    )]
    pub const fn nanos_to_ticks(self, nanos: u64) -> u64 {
        let wide = nanos as u128 * self.denom as u128 / self.numer as u128;
        wide as u64
    }
}

impl Default for Timebase {
    fn default() -> Self {
        Self::NANOS
    }
}

impl fmt::Debug for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timebase({}/{})", self.numer, self.denom)
    }
}

/// A duration in host ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Duration(pub u64);

impl Duration {
    /// A zero-length duration.
    pub const ZERO: Self = Self(0);

    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Converts this duration to nanoseconds using the given timebase.
    #[inline]
    #[must_use]
    pub const fn to_nanos(self, timebase: Timebase) -> u64 {
        timebase.ticks_to_nanos(self.0)
    }

    /// Creates a duration from a nanosecond value and timebase.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64, timebase: Timebase) -> Self {
        Self(timebase.nanos_to_ticks(nanos))
    }

    /// Creates a duration from milliseconds.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64, timebase: Timebase) -> Self {
        Self::from_nanos(millis.saturating_mul(1_000_000), timebase)
    }

    /// Creates a duration from floating-point seconds, rounded to the
    /// nearest nanosecond.
    ///
    /// Negative and non-finite inputs clamp to zero; callers that must
    /// reject them check first.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "value is clamped to a non-negative finite range before the cast"
    )]
    pub fn from_secs(secs: f64, timebase: Timebase) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Self::ZERO;
        }
        let nanos = libm::round(secs * NANOS_PER_SEC);
        Self::from_nanos(nanos as u64, timebase)
    }

    /// Converts this duration to floating-point seconds.
    #[inline]
    #[must_use]
    pub fn to_secs(self, timebase: Timebase) -> f64 {
        self.to_nanos(timebase) as f64 / NANOS_PER_SEC
    }

    /// Saturating addition.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Saturating multiplication by an integer factor.
    #[inline]
    #[must_use]
    pub const fn saturating_mul(self, rhs: u64) -> Self {
        Self(self.0.saturating_mul(rhs))
    }
}

impl Add for Duration {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Duration {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({})", self.0)
    }
}

/// A timestamp recorded during an idle tick together with its uncertainty.
///
/// The exact instant an event happened within a tick is unknown, so `error`
/// is half the gap between this tick and the previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct EventTime {
    /// Sampled time.
    pub time: HostTime,
    /// Symmetric error bound around `time`.
    pub error: Duration,
}

impl EventTime {
    /// An exact timestamp (zero error), e.g. a confirmed flip.
    #[inline]
    #[must_use]
    pub const fn exact(time: HostTime) -> Self {
        Self {
            time,
            error: Duration::ZERO,
        }
    }

    /// Builds the event time for a tick sampled at `now` after a previous
    /// tick at `previous`.
    #[inline]
    #[must_use]
    pub const fn for_tick(now: HostTime, previous: Option<HostTime>) -> Self {
        let error = match previous {
            Some(prev) => Duration(now.saturating_duration_since(prev).0 / 2),
            None => Duration::ZERO,
        };
        Self { time: now, error }
    }
}

/// A monotonic time source sampled by the scheduler.
pub trait TimeSource {
    /// Returns the current host time.
    fn now(&self) -> HostTime;

    /// Returns the timebase of the values produced by [`now`](Self::now).
    fn timebase(&self) -> Timebase {
        Timebase::NANOS
    }
}

/// A manually stepped time source.
///
/// Clones share the same underlying time, so a simulated display and the
/// scheduler can observe the same clock.
#[derive(Clone, Debug, Default)]
pub struct ManualTimeSource {
    now: Rc<Cell<u64>>,
    timebase: Timebase,
}

impl ManualTimeSource {
    /// Creates a source at tick zero with a nanosecond timebase.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source at tick zero with the given timebase.
    #[must_use]
    pub fn with_timebase(timebase: Timebase) -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            timebase,
        }
    }

    /// Moves time forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by.0));
    }

    /// Moves time to `to`. Times earlier than the current one are ignored.
    pub fn advance_to(&self, to: HostTime) {
        if to.0 > self.now.get() {
            self.now.set(to.0);
        }
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> HostTime {
        HostTime(self.now.get())
    }

    fn timebase(&self) -> Timebase {
        self.timebase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nanos_round_trip_identity_timebase() {
        let tb = Timebase::NANOS;
        let t = HostTime(1_000_000_000);
        assert_eq!(t.to_nanos(tb), 1_000_000_000, "identity timebase");
        assert_eq!(HostTime::from_nanos(1_000_000_000, tb), t);
    }

    #[test]
    fn coarse_timebase_converts_seconds() {
        // 24 MHz host counter.
        let tb = Timebase::new(125, 3);
        let d = Duration::from_secs(1.0, tb);
        assert_eq!(d.ticks(), 24_000_000, "one second at 24 MHz");
        assert!(libm::fabs(d.to_secs(tb) - 1.0) < 1e-9, "back to seconds");
    }

    #[test]
    fn negative_seconds_clamp_to_zero() {
        assert_eq!(Duration::from_secs(-0.5, Timebase::NANOS), Duration::ZERO);
        assert_eq!(Duration::from_secs(f64::NAN, Timebase::NANOS), Duration::ZERO);
    }

    #[test]
    fn host_time_duration_ops() {
        let t = HostTime(1000);
        let d = Duration(200);
        assert_eq!((t + d).ticks(), 1200);
        assert_eq!((t - d).ticks(), 800);
        assert_eq!(t.saturating_duration_since(HostTime(1500)), Duration::ZERO);
        assert_eq!(t.saturating_duration_since(HostTime(400)), Duration(600));
    }

    #[test]
    fn event_time_error_is_half_the_tick_gap() {
        let first = EventTime::for_tick(HostTime(100), None);
        assert_eq!(first.error, Duration::ZERO, "no previous tick");
        let next = EventTime::for_tick(HostTime(116), Some(HostTime(100)));
        assert_eq!(next.error, Duration(8));
    }

    #[test]
    fn manual_source_clones_share_time() {
        let a = ManualTimeSource::new();
        let b = a.clone();
        a.advance(Duration(50));
        assert_eq!(b.now(), HostTime(50), "clones observe the same clock");
        b.advance_to(HostTime(20));
        assert_eq!(a.now(), HostTime(50), "advance_to never moves backwards");
    }
}
