// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Timestamps
//! are converted to milliseconds using a [`Timebase`].

use std::io::Write;

use stagecue_core::time::{HostTime, Timebase};
use stagecue_core::trace::{
    FlipConfirmedEvent, FlipDiscardedEvent, FlipSubmitEvent, PhaseBeginEvent, PhaseEndEvent,
    PhaseKind, StateTransitionEvent, TickEvent, TickSummary, TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
    timebase: Timebase,
    transitions: bool,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink")
            .field("timebase", &self.timebase)
            .field("transitions", &self.transitions)
            .finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr(timebase: Timebase) -> Self {
        Self::with_writer(Box::new(std::io::stderr()), timebase)
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>, timebase: Timebase) -> Self {
        Self::with_writer(writer, timebase)
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W, timebase: Timebase) -> Self {
        Self {
            writer,
            timebase,
            transitions: true,
        }
    }

    /// Skips node transitions, leaving only tick and flip lines.
    #[must_use]
    pub fn without_transitions(mut self) -> Self {
        self.transitions = false;
        self
    }

    /// Consumes the sink and returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn ticks_to_ms(&self, ticks: u64) -> f64 {
        self.timebase.ticks_to_nanos(ticks) as f64 / 1_000_000.0
    }

    fn host_ms(&self, t: HostTime) -> f64 {
        self.ticks_to_ms(t.ticks())
    }
}

fn phase_name(phase: PhaseKind) -> &'static str {
    match phase {
        PhaseKind::Settle => "settle",
        PhaseKind::Video => "video",
        PhaseKind::Present => "present",
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_tick(&mut self, e: &TickEvent) {
        let _ = writeln!(
            self.writer,
            "[tick] #{} now={:.3}ms ±{:.3}ms",
            e.tick_index,
            self.host_ms(e.now),
            self.ticks_to_ms(e.error.ticks()),
        );
    }

    fn on_state_transition(&mut self, e: &StateTransitionEvent<'_>) {
        if !self.transitions {
            return;
        }
        let _ = writeln!(
            self.writer,
            "[{}] {} ({}) at {:.3}ms",
            e.transition.label(),
            e.name,
            e.node_type,
            self.host_ms(e.at),
        );
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:begin] #{} {} at {:.3}ms",
            e.tick_index,
            phase_name(e.phase),
            self.host_ms(e.timestamp),
        );
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:end] #{} {} at {:.3}ms",
            e.tick_index,
            phase_name(e.phase),
            self.host_ms(e.timestamp),
        );
    }

    fn on_flip_submit(&mut self, e: &FlipSubmitEvent) {
        let _ = writeln!(
            self.writer,
            "[flip] #{} {:?} updates={} predicted={:.3}ms{}",
            e.tick_index,
            e.submission,
            e.updates,
            self.host_ms(e.predicted_flip),
            if e.blocking { " blocking" } else { "" },
        );
    }

    fn on_flip_confirmed(&mut self, e: &FlipConfirmedEvent) {
        let missed = match e.missed_deadline {
            Some(true) => "MISSED",
            Some(false) => "ok",
            None => "?",
        };
        let _ = writeln!(
            self.writer,
            "[presented] {:?} at {:.3}ms deadline={missed}",
            e.submission,
            self.host_ms(e.at),
        );
    }

    fn on_flip_discarded(&mut self, e: &FlipDiscardedEvent) {
        let _ = writeln!(
            self.writer,
            "[discarded] {:?} requeued={}",
            e.submission, e.requeued,
        );
    }

    fn on_tick_summary(&mut self, s: &TickSummary) {
        let _ = writeln!(
            self.writer,
            "[summary] #{} events={} passes={} settle={:.3}ms video={:.3}ms present={:.3}ms{}",
            s.tick_index,
            s.events_dispatched,
            s.settle_passes,
            self.ticks_to_ms(s.settle_ticks),
            self.ticks_to_ms(s.video_ticks),
            self.ticks_to_ms(s.present_ticks),
            if s.flipped { " flipped" } else { "" },
        );
    }
}
