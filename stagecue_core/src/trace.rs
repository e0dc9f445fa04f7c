// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for the idle tick.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that the
//! idle tick calls at each stage. All method bodies default to no-ops, so
//! implementing only the events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing. When **on**, each
//! method performs a single `Option` branch before dispatching.
//!
//! [`TickSummaryBuilder`] collects phase timestamps during a tick and
//! produces a [`TickSummary`] at the end.
//!
//! Human-readable diagnostics (enter/leave, isolated failures) go through the
//! `log` facade instead; these events are for timing analysis.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies (one branch per call).

use crate::state::StateId;
use crate::time::{Duration, HostTime};
use crate::timing::SubmissionId;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which phase of the idle tick is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Clock dispatch and tree advancement until quiescent.
    Settle,
    /// Applying due video updates.
    Video,
    /// Handing the flip to the presenter.
    Present,
}

/// A node lifecycle transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transition {
    /// The node was entered with a state time.
    Enter,
    /// The node's start event fired.
    Start,
    /// The node left.
    Leave,
    /// The node was cancelled.
    Cancel,
    /// The node's record became final.
    Finalize,
}

impl Transition {
    /// Short lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Start => "start",
            Self::Leave => "leave",
            Self::Cancel => "cancel",
            Self::Finalize => "finalize",
        }
    }
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted at the beginning of every idle tick.
#[derive(Clone, Copy, Debug)]
pub struct TickEvent {
    /// Monotonic tick counter.
    pub tick_index: u64,
    /// Host time captured for this tick.
    pub now: HostTime,
    /// Symmetric error bound for events timestamped this tick.
    pub error: Duration,
}

/// Emitted when a node changes lifecycle phase.
#[derive(Clone, Copy, Debug)]
pub struct StateTransitionEvent<'a> {
    /// Tick counter.
    pub tick_index: u64,
    /// Which node.
    pub node: StateId,
    /// The node's name.
    pub name: &'a str,
    /// The node's type label.
    pub node_type: &'static str,
    /// What happened.
    pub transition: Transition,
    /// Logical time of the transition.
    pub at: HostTime,
}

/// Emitted when a flip is handed to the presenter.
#[derive(Clone, Copy, Debug)]
pub struct FlipSubmitEvent {
    /// Tick counter.
    pub tick_index: u64,
    /// Submission identity.
    pub submission: SubmissionId,
    /// Earliest update target in the batch.
    pub target: HostTime,
    /// Flip the pacer predicted.
    pub predicted_flip: HostTime,
    /// Host time of submission.
    pub submitted_at: HostTime,
    /// Number of batched updates.
    pub updates: usize,
    /// Whether the presenter was asked to block.
    pub blocking: bool,
}

/// Emitted when a flip is confirmed.
#[derive(Clone, Copy, Debug)]
pub struct FlipConfirmedEvent {
    /// Tick counter.
    pub tick_index: u64,
    /// Submission identity.
    pub submission: SubmissionId,
    /// Confirmed presentation time.
    pub at: HostTime,
    /// Whether the predicted flip was missed.
    pub missed_deadline: Option<bool>,
}

/// Emitted when the presenter drops a submission.
#[derive(Clone, Copy, Debug)]
pub struct FlipDiscardedEvent {
    /// Tick counter.
    pub tick_index: u64,
    /// Submission identity.
    pub submission: SubmissionId,
    /// Number of updates put back on the queue.
    pub requeued: usize,
}

/// Marks the beginning of an idle-tick phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseBeginEvent {
    /// Tick counter.
    pub tick_index: u64,
    /// Which phase is starting.
    pub phase: PhaseKind,
    /// Host time at the start of the phase.
    pub timestamp: HostTime,
}

/// Marks the end of an idle-tick phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseEndEvent {
    /// Tick counter.
    pub tick_index: u64,
    /// Which phase is ending.
    pub phase: PhaseKind,
    /// Host time at the end of the phase.
    pub timestamp: HostTime,
}

/// Per-tick summary produced by [`TickSummaryBuilder`].
#[derive(Clone, Copy, Debug)]
pub struct TickSummary {
    /// Tick counter.
    pub tick_index: u64,
    /// Host time captured for this tick.
    pub now: HostTime,
    /// Clock events dispatched.
    pub events_dispatched: usize,
    /// Settle passes run.
    pub settle_passes: u32,
    /// Video updates applied.
    pub video_updates: usize,
    /// Whether a flip was submitted.
    pub flipped: bool,
    /// Settle phase duration in ticks (0 if not measured).
    pub settle_ticks: u64,
    /// Video phase duration in ticks (0 if not measured).
    pub video_ticks: u64,
    /// Present phase duration in ticks (0 if not measured).
    pub present_ticks: u64,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the idle tick.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called at the start of every idle tick.
    fn on_tick(&mut self, e: &TickEvent) {
        _ = e;
    }

    /// Called when a node changes lifecycle phase.
    fn on_state_transition(&mut self, e: &StateTransitionEvent<'_>) {
        _ = e;
    }

    /// Called at the beginning of an idle-tick phase.
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        _ = e;
    }

    /// Called at the end of an idle-tick phase.
    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        _ = e;
    }

    /// Called when a flip is submitted.
    fn on_flip_submit(&mut self, e: &FlipSubmitEvent) {
        _ = e;
    }

    /// Called when a flip is confirmed.
    fn on_flip_confirmed(&mut self, e: &FlipConfirmedEvent) {
        _ = e;
    }

    /// Called when a submission is discarded.
    fn on_flip_discarded(&mut self, e: &FlipDiscardedEvent) {
        _ = e;
    }

    /// Called with a per-tick summary.
    fn on_tick_summary(&mut self, s: &TickSummary) {
        _ = s;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Emits a [`TickEvent`].
    #[inline]
    pub fn tick(&mut self, e: &TickEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_tick(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`StateTransitionEvent`].
    #[inline]
    pub fn state_transition(&mut self, e: &StateTransitionEvent<'_>) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_state_transition(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PhaseBeginEvent`].
    #[inline]
    pub fn phase_begin(&mut self, e: &PhaseBeginEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_phase_begin(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PhaseEndEvent`].
    #[inline]
    pub fn phase_end(&mut self, e: &PhaseEndEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_phase_end(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FlipSubmitEvent`].
    #[inline]
    pub fn flip_submit(&mut self, e: &FlipSubmitEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_flip_submit(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FlipConfirmedEvent`].
    #[inline]
    pub fn flip_confirmed(&mut self, e: &FlipConfirmedEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_flip_confirmed(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FlipDiscardedEvent`].
    #[inline]
    pub fn flip_discarded(&mut self, e: &FlipDiscardedEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_flip_discarded(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`TickSummary`].
    #[inline]
    pub fn tick_summary(&mut self, s: &TickSummary) {
        #[cfg(feature = "trace")]
        if let Some(sink) = &mut self.sink {
            sink.on_tick_summary(s);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = s;
        }
    }
}

// ---------------------------------------------------------------------------
// TickSummaryBuilder
// ---------------------------------------------------------------------------

/// Collects phase timestamps during a tick and produces a [`TickSummary`].
#[derive(Debug)]
pub struct TickSummaryBuilder {
    tick: TickEvent,
    phase_starts: [Option<HostTime>; 3],
    phase_ends: [Option<HostTime>; 3],
    events_dispatched: usize,
    settle_passes: u32,
    video_updates: usize,
    flipped: bool,
}

impl TickSummaryBuilder {
    /// Starts building a summary for the given tick.
    #[must_use]
    pub fn new(tick: &TickEvent) -> Self {
        Self {
            tick: *tick,
            phase_starts: [None; 3],
            phase_ends: [None; 3],
            events_dispatched: 0,
            settle_passes: 0,
            video_updates: 0,
            flipped: false,
        }
    }

    /// Records the start of a phase.
    pub fn phase_begin(&mut self, phase: PhaseKind, t: HostTime) {
        self.phase_starts[phase_index(phase)] = Some(t);
    }

    /// Records the end of a phase.
    pub fn phase_end(&mut self, phase: PhaseKind, t: HostTime) {
        self.phase_ends[phase_index(phase)] = Some(t);
    }

    /// Adds dispatched clock events and one settle pass.
    pub fn settle_pass(&mut self, events: usize) {
        self.events_dispatched += events;
        self.settle_passes += 1;
    }

    /// Records a submitted flip with `updates` batched updates.
    pub fn flipped(&mut self, updates: usize) {
        self.video_updates += updates;
        self.flipped = true;
    }

    /// Consumes the builder and produces the final [`TickSummary`].
    #[must_use]
    pub fn finish(self) -> TickSummary {
        TickSummary {
            tick_index: self.tick.tick_index,
            now: self.tick.now,
            events_dispatched: self.events_dispatched,
            settle_passes: self.settle_passes,
            video_updates: self.video_updates,
            flipped: self.flipped,
            settle_ticks: self.phase_duration(PhaseKind::Settle),
            video_ticks: self.phase_duration(PhaseKind::Video),
            present_ticks: self.phase_duration(PhaseKind::Present),
        }
    }

    fn phase_duration(&self, phase: PhaseKind) -> u64 {
        let idx = phase_index(phase);
        match (self.phase_starts[idx], self.phase_ends[idx]) {
            (Some(start), Some(end)) => end.saturating_duration_since(start).ticks(),
            _ => 0,
        }
    }
}

const fn phase_index(phase: PhaseKind) -> usize {
    match phase {
        PhaseKind::Settle => 0,
        PhaseKind::Video => 1,
        PhaseKind::Present => 2,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
