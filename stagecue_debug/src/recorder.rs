// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as little-endian records. [`decode`] reads them back as an
//! iterator of [`RecordedEvent`].
//!
//! Node transitions carry the node's name and type as length-prefixed UTF-8,
//! so they decode into the owned [`RecordedTransition`].

use stagecue_core::state::StateId;
use stagecue_core::time::{Duration, HostTime};
use stagecue_core::timing::SubmissionId;
use stagecue_core::trace::{
    FlipConfirmedEvent, FlipDiscardedEvent, FlipSubmitEvent, PhaseBeginEvent, PhaseEndEvent,
    PhaseKind, StateTransitionEvent, TickEvent, TickSummary, TraceSink, Transition,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_TICK: u8 = 1;
const TAG_TRANSITION: u8 = 2;
const TAG_PHASE_BEGIN: u8 = 3;
const TAG_PHASE_END: u8 = 4;
const TAG_FLIP_SUBMIT: u8 = 5;
const TAG_FLIP_CONFIRMED: u8 = 6;
const TAG_FLIP_DISCARDED: u8 = 7;
const TAG_TICK_SUMMARY: u8 = 8;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_count(&mut self, v: usize) {
        self.write_u64(v as u64);
    }

    fn write_str(&mut self, s: &str) {
        let len = u32::try_from(s.len()).unwrap_or(u32::MAX);
        self.write_u32(len);
        self.buf.extend_from_slice(&s.as_bytes()[..len as usize]);
    }

    fn write_option_bool(&mut self, v: Option<bool>) {
        match v {
            Some(true) => self.write_u8(2),
            Some(false) => self.write_u8(1),
            None => self.write_u8(0),
        }
    }

    fn write_phase(&mut self, p: PhaseKind) {
        self.write_u8(match p {
            PhaseKind::Settle => 0,
            PhaseKind::Video => 1,
            PhaseKind::Present => 2,
        });
    }

    fn write_transition(&mut self, t: Transition) {
        self.write_u8(match t {
            Transition::Enter => 0,
            Transition::Start => 1,
            Transition::Leave => 2,
            Transition::Cancel => 3,
            Transition::Finalize => 4,
        });
    }
}

impl TraceSink for RecorderSink {
    fn on_tick(&mut self, e: &TickEvent) {
        self.write_u8(TAG_TICK);
        self.write_u64(e.tick_index);
        self.write_u64(e.now.ticks());
        self.write_u64(e.error.ticks());
    }

    fn on_state_transition(&mut self, e: &StateTransitionEvent<'_>) {
        self.write_u8(TAG_TRANSITION);
        self.write_u64(e.tick_index);
        self.write_u32(e.node.0);
        self.write_transition(e.transition);
        self.write_u64(e.at.ticks());
        self.write_str(e.name);
        self.write_str(e.node_type);
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.write_u8(TAG_PHASE_BEGIN);
        self.write_u64(e.tick_index);
        self.write_phase(e.phase);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.write_u8(TAG_PHASE_END);
        self.write_u64(e.tick_index);
        self.write_phase(e.phase);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_flip_submit(&mut self, e: &FlipSubmitEvent) {
        self.write_u8(TAG_FLIP_SUBMIT);
        self.write_u64(e.tick_index);
        self.write_u64(e.submission.0);
        self.write_u64(e.target.ticks());
        self.write_u64(e.predicted_flip.ticks());
        self.write_u64(e.submitted_at.ticks());
        self.write_count(e.updates);
        self.write_u8(u8::from(e.blocking));
    }

    fn on_flip_confirmed(&mut self, e: &FlipConfirmedEvent) {
        self.write_u8(TAG_FLIP_CONFIRMED);
        self.write_u64(e.tick_index);
        self.write_u64(e.submission.0);
        self.write_u64(e.at.ticks());
        self.write_option_bool(e.missed_deadline);
    }

    fn on_flip_discarded(&mut self, e: &FlipDiscardedEvent) {
        self.write_u8(TAG_FLIP_DISCARDED);
        self.write_u64(e.tick_index);
        self.write_u64(e.submission.0);
        self.write_count(e.requeued);
    }

    fn on_tick_summary(&mut self, s: &TickSummary) {
        self.write_u8(TAG_TICK_SUMMARY);
        self.write_u64(s.tick_index);
        self.write_u64(s.now.ticks());
        self.write_count(s.events_dispatched);
        self.write_u32(s.settle_passes);
        self.write_count(s.video_updates);
        self.write_u8(u8::from(s.flipped));
        self.write_u64(s.settle_ticks);
        self.write_u64(s.video_ticks);
        self.write_u64(s.present_ticks);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A node transition with owned strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedTransition {
    /// Tick counter.
    pub tick_index: u64,
    /// The node.
    pub node: StateId,
    /// Node name.
    pub name: String,
    /// Node type label.
    pub node_type: String,
    /// What happened.
    pub transition: Transition,
    /// Logical time of the transition.
    pub at: HostTime,
}

/// A decoded event from a binary recording.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A [`TickEvent`].
    Tick(TickEvent),
    /// A [`StateTransitionEvent`].
    Transition(RecordedTransition),
    /// A [`PhaseBeginEvent`].
    PhaseBegin(PhaseBeginEvent),
    /// A [`PhaseEndEvent`].
    PhaseEnd(PhaseEndEvent),
    /// A [`FlipSubmitEvent`].
    FlipSubmit(FlipSubmitEvent),
    /// A [`FlipConfirmedEvent`].
    FlipConfirmed(FlipConfirmedEvent),
    /// A [`FlipDiscardedEvent`].
    FlipDiscarded(FlipDiscardedEvent),
    /// A [`TickSummary`].
    TickSummary(TickSummary),
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take(&mut self, n: usize) -> Option<&[u8]> {
        let end = self.pos.checked_add(n)?;
        let bytes = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        Some(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn read_u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn read_count(&mut self) -> Option<usize> {
        usize::try_from(self.read_u64()?).ok()
    }

    fn read_string(&mut self) -> Option<String> {
        let len = self.read_u32()? as usize;
        Some(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    fn read_option_bool(&mut self) -> Option<Option<bool>> {
        Some(match self.read_u8()? {
            0 => None,
            1 => Some(false),
            _ => Some(true),
        })
    }

    fn read_phase(&mut self) -> Option<PhaseKind> {
        Some(match self.read_u8()? {
            0 => PhaseKind::Settle,
            1 => PhaseKind::Video,
            _ => PhaseKind::Present,
        })
    }

    fn read_transition(&mut self) -> Option<Transition> {
        Some(match self.read_u8()? {
            0 => Transition::Enter,
            1 => Transition::Start,
            2 => Transition::Leave,
            3 => Transition::Cancel,
            _ => Transition::Finalize,
        })
    }

    fn decode_tick(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Tick(TickEvent {
            tick_index: self.read_u64()?,
            now: HostTime(self.read_u64()?),
            error: Duration(self.read_u64()?),
        }))
    }

    fn decode_transition(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Transition(RecordedTransition {
            tick_index: self.read_u64()?,
            node: StateId(self.read_u32()?),
            transition: self.read_transition()?,
            at: HostTime(self.read_u64()?),
            name: self.read_string()?,
            node_type: self.read_string()?,
        }))
    }

    fn decode_phase_begin(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseBegin(PhaseBeginEvent {
            tick_index: self.read_u64()?,
            phase: self.read_phase()?,
            timestamp: HostTime(self.read_u64()?),
        }))
    }

    fn decode_phase_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseEnd(PhaseEndEvent {
            tick_index: self.read_u64()?,
            phase: self.read_phase()?,
            timestamp: HostTime(self.read_u64()?),
        }))
    }

    fn decode_flip_submit(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::FlipSubmit(FlipSubmitEvent {
            tick_index: self.read_u64()?,
            submission: SubmissionId(self.read_u64()?),
            target: HostTime(self.read_u64()?),
            predicted_flip: HostTime(self.read_u64()?),
            submitted_at: HostTime(self.read_u64()?),
            updates: self.read_count()?,
            blocking: self.read_u8()? != 0,
        }))
    }

    fn decode_flip_confirmed(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::FlipConfirmed(FlipConfirmedEvent {
            tick_index: self.read_u64()?,
            submission: SubmissionId(self.read_u64()?),
            at: HostTime(self.read_u64()?),
            missed_deadline: self.read_option_bool()?,
        }))
    }

    fn decode_flip_discarded(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::FlipDiscarded(FlipDiscardedEvent {
            tick_index: self.read_u64()?,
            submission: SubmissionId(self.read_u64()?),
            requeued: self.read_count()?,
        }))
    }

    fn decode_tick_summary(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::TickSummary(TickSummary {
            tick_index: self.read_u64()?,
            now: HostTime(self.read_u64()?),
            events_dispatched: self.read_count()?,
            settle_passes: self.read_u32()?,
            video_updates: self.read_count()?,
            flipped: self.read_u8()? != 0,
            settle_ticks: self.read_u64()?,
            video_ticks: self.read_u64()?,
            present_ticks: self.read_u64()?,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        match tag {
            TAG_TICK => self.decode_tick(),
            TAG_TRANSITION => self.decode_transition(),
            TAG_PHASE_BEGIN => self.decode_phase_begin(),
            TAG_PHASE_END => self.decode_phase_end(),
            TAG_FLIP_SUBMIT => self.decode_flip_submit(),
            TAG_FLIP_CONFIRMED => self.decode_flip_confirmed(),
            TAG_FLIP_DISCARDED => self.decode_flip_discarded(),
            TAG_TICK_SUMMARY => self.decode_tick_summary(),
            _ => None, // unknown tag → stop iteration
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
