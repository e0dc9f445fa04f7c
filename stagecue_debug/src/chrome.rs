// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][format] JSON to the given writer.
//!
//! Idle-tick phases become duration slices on thread 0. Node lifetimes become
//! slices on thread 1, one `B`/`E` pair per start and leave, so nesting in the
//! viewer follows the state tree.
//!
//! [format]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use stagecue_core::time::Timebase;
use stagecue_core::trace::Transition;

use crate::recorder::{RecordedEvent, decode};

const TID_TICK: u32 = 0;
const TID_STATES: u32 = 1;

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Timestamps are converted to microseconds using the provided [`Timebase`].
pub fn export(bytes: &[u8], timebase: Timebase, writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::Tick(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Tick",
                    "cat": "Tick",
                    "ts": ticks_to_us(e.now.ticks(), timebase),
                    "pid": 0,
                    "tid": TID_TICK,
                    "s": "g",
                    "args": {
                        "tick_index": e.tick_index,
                        "error_us": ticks_to_us(e.error.ticks(), timebase),
                    }
                }));
            }
            RecordedEvent::Transition(t) => {
                let ph = match t.transition {
                    Transition::Start => "B",
                    Transition::Leave => "E",
                    Transition::Enter | Transition::Cancel | Transition::Finalize => "i",
                };
                let mut event = json!({
                    "ph": ph,
                    "name": t.name,
                    "cat": t.node_type,
                    "ts": ticks_to_us(t.at.ticks(), timebase),
                    "pid": 0,
                    "tid": TID_STATES,
                    "args": {
                        "node": t.node.0,
                        "transition": t.transition.label(),
                        "tick_index": t.tick_index,
                    }
                });
                if ph == "i" {
                    event["s"] = json!("t");
                }
                events.push(event);
            }
            RecordedEvent::PhaseBegin(e) => {
                events.push(json!({
                    "ph": "B",
                    "name": format!("{:?}", e.phase),
                    "cat": "Tick",
                    "ts": ticks_to_us(e.timestamp.ticks(), timebase),
                    "pid": 0,
                    "tid": TID_TICK,
                    "args": {
                        "tick_index": e.tick_index,
                    }
                }));
            }
            RecordedEvent::PhaseEnd(e) => {
                events.push(json!({
                    "ph": "E",
                    "name": format!("{:?}", e.phase),
                    "cat": "Tick",
                    "ts": ticks_to_us(e.timestamp.ticks(), timebase),
                    "pid": 0,
                    "tid": TID_TICK,
                    "args": {
                        "tick_index": e.tick_index,
                    }
                }));
            }
            RecordedEvent::FlipSubmit(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "FlipSubmit",
                    "cat": "Flip",
                    "ts": ticks_to_us(e.submitted_at.ticks(), timebase),
                    "pid": 0,
                    "tid": TID_TICK,
                    "s": "t",
                    "args": {
                        "submission": e.submission.0,
                        "updates": e.updates,
                        "blocking": e.blocking,
                        "predicted_us": ticks_to_us(e.predicted_flip.ticks(), timebase),
                    }
                }));
            }
            RecordedEvent::FlipConfirmed(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "FlipConfirmed",
                    "cat": "Flip",
                    "ts": ticks_to_us(e.at.ticks(), timebase),
                    "pid": 0,
                    "tid": TID_TICK,
                    "s": "g",
                    "args": {
                        "submission": e.submission.0,
                        "missed": e.missed_deadline,
                    }
                }));
            }
            RecordedEvent::FlipDiscarded(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "FlipDiscarded",
                    "cat": "Flip",
                    "ts": 0,
                    "pid": 0,
                    "tid": TID_TICK,
                    "s": "p",
                    "args": {
                        "submission": e.submission.0,
                        "requeued": e.requeued,
                    }
                }));
            }
            RecordedEvent::TickSummary(s) => {
                events.push(json!({
                    "ph": "i",
                    "name": "TickSummary",
                    "cat": "Summary",
                    "ts": ticks_to_us(s.now.ticks(), timebase),
                    "pid": 0,
                    "tid": TID_TICK,
                    "s": "g",
                    "args": {
                        "tick_index": s.tick_index,
                        "events": s.events_dispatched,
                        "passes": s.settle_passes,
                        "flipped": s.flipped,
                        "settle_us": ticks_to_us(s.settle_ticks, timebase),
                        "video_us": ticks_to_us(s.video_ticks, timebase),
                        "present_us": ticks_to_us(s.present_ticks, timebase),
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn ticks_to_us(ticks: u64, timebase: Timebase) -> f64 {
    timebase.ticks_to_nanos(ticks) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use stagecue_core::state::StateId;
    use stagecue_core::time::{Duration, HostTime};
    use stagecue_core::trace::{
        PhaseBeginEvent, PhaseEndEvent, PhaseKind, StateTransitionEvent, TickEvent, TraceSink,
    };

    fn transition(transition: Transition, at: u64) -> StateTransitionEvent<'static> {
        StateTransitionEvent {
            tick_index: 0,
            node: StateId(1),
            name: "fixation",
            node_type: "wait",
            transition,
            at: HostTime(at),
        }
    }

    #[test]
    fn export_produces_valid_json() {
        let mut rec = RecorderSink::new();
        rec.on_tick(&TickEvent {
            tick_index: 0,
            now: HostTime(1_000_000),
            error: Duration::ZERO,
        });
        rec.on_phase_begin(&PhaseBeginEvent {
            tick_index: 0,
            phase: PhaseKind::Settle,
            timestamp: HostTime(1_000_000),
        });
        rec.on_phase_end(&PhaseEndEvent {
            tick_index: 0,
            phase: PhaseKind::Settle,
            timestamp: HostTime(1_000_100),
        });

        let mut out = Vec::new();
        export(rec.as_bytes(), Timebase::NANOS, &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();

        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.len(), 3, "tick plus one phase pair");
        assert_eq!(parsed[0]["ph"], "i");
        assert_eq!(parsed[0]["name"], "Tick");
        assert_eq!(parsed[1]["ph"], "B");
        assert_eq!(parsed[1]["name"], "Settle");
        assert_eq!(parsed[2]["ph"], "E");
        assert_eq!(parsed[2]["ts"], 1000.1);
    }

    #[test]
    fn node_lifetimes_become_slices() {
        let mut rec = RecorderSink::new();
        rec.on_state_transition(&transition(Transition::Enter, 0));
        rec.on_state_transition(&transition(Transition::Start, 1_000));
        rec.on_state_transition(&transition(Transition::Leave, 5_000));

        let mut out = Vec::new();
        export(rec.as_bytes(), Timebase::NANOS, &mut out).unwrap();
        let parsed: Vec<Value> = serde_json::from_slice(&out).unwrap();
        let phases: Vec<&str> = parsed.iter().map(|e| e["ph"].as_str().unwrap()).collect();
        assert_eq!(phases, ["i", "B", "E"]);
        assert!(parsed.iter().all(|e| e["tid"] == TID_STATES), "all on the state track");
        assert_eq!(parsed[1]["name"], "fixation");
        assert_eq!(parsed[1]["cat"], "wait");
    }

    #[test]
    fn export_empty_recording() {
        let mut out = Vec::new();
        export(&[], Timebase::NANOS, &mut out).unwrap();
        let parsed: Vec<Value> = serde_json::from_slice(&out).unwrap();
        assert!(parsed.is_empty(), "no events in, none out");
    }
}
