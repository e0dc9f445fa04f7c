// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end runs on a simulated display.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use stagecue_core::config::ExperimentConfig;
use stagecue_core::experiment::{Experiment, RunStatus};
use stagecue_core::record::{LogRecord, MemorySink, RecordKind};
use stagecue_core::reference::RefFunction;
use stagecue_core::scheduler::PacerConfig;
use stagecue_core::state::{Drawable, DurationSpec, Phase};
use stagecue_core::time::{Duration, HostTime, ManualTimeSource, Timebase};
use stagecue_core::trace::{StateTransitionEvent, TraceSink, Tracer, Transition};
use stagecue_core::value::Value;

use crate::display::{DisplayConfig, PresentMode, SimulatedDisplay};
use crate::grade::{FlipGrade, FlipTimingTracker};
use crate::stepper::{RunStats, Stepper};

const TB: Timebase = Timebase::NANOS;
const REFRESH_MS: f64 = 16.666_667;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n, TB)
}

fn at_ms(n: u64) -> HostTime {
    HostTime::from_nanos(n * 1_000_000, TB)
}

fn fixed(n: u64) -> DurationSpec {
    DurationSpec::Fixed(ms(n))
}

fn close(a: f64, b: f64) -> bool {
    a - b < 1e-9 && b - a < 1e-9
}

fn secs(record: &LogRecord, field: &str) -> f64 {
    record.get_f64(field).unwrap()
}

struct Rig {
    exp: Experiment,
    sink: MemorySink,
    display: SimulatedDisplay,
    stepper: Stepper,
}

impl Rig {
    fn new(pacer: PacerConfig, display: DisplayConfig, step: Duration) -> Self {
        let time = ManualTimeSource::new();
        let sink = MemorySink::new();
        let config = ExperimentConfig {
            pacer,
            ..ExperimentConfig::headless()
        };
        let exp = Experiment::new(config, Box::new(time.clone()), Box::new(sink.clone()));
        Self {
            exp,
            sink,
            display: SimulatedDisplay::new(display, time.clone()),
            stepper: Stepper::new(time, step),
        }
    }

    fn headless() -> Self {
        Self::new(PacerConfig::headless(), DisplayConfig::immediate(), ms(10))
    }

    fn hz60(display: DisplayConfig) -> Self {
        Self::new(PacerConfig::display_60hz(), display, ms(1))
    }

    fn run(&mut self) -> RunStats {
        self.stepper
            .run_until_done(&mut self.exp, &mut self.display)
            .unwrap()
    }

    fn run_traced(&mut self, sink: &mut dyn TraceSink) -> RunStats {
        self.stepper
            .run_until_done_traced(&mut self.exp, &mut self.display, &mut Tracer::new(sink))
            .unwrap()
    }

    fn state(&self, name: &str) -> LogRecord {
        let records = self.sink.records_for(name, RecordKind::State);
        assert_eq!(records.len(), 1, "one record for {name}");
        records[0].clone()
    }
}

/// Every node transition, in the order the runtime reported them.
#[derive(Debug, Default)]
struct Transitions(Vec<(String, Transition, HostTime)>);

impl TraceSink for Transitions {
    fn on_state_transition(&mut self, e: &StateTransitionEvent<'_>) {
        self.0.push((e.name.into(), e.transition, e.at));
    }
}

impl Transitions {
    fn position(&self, name: &str, transition: Transition) -> usize {
        self.0
            .iter()
            .position(|(n, t, _)| n == name && *t == transition)
            .unwrap()
    }

    fn at(&self, name: &str, transition: Transition) -> HostTime {
        self.0[self.position(name, transition)].2
    }

    fn count(&self, name: &str, transition: Transition) -> usize {
        self.0
            .iter()
            .filter(|(n, t, _)| n == name && *t == transition)
            .count()
    }
}

/// Counts show and hide calls.
#[derive(Debug)]
struct Dot(Rc<Cell<(u32, u32)>>);

impl Drawable for Dot {
    fn show(&mut self) {
        let (shown, hidden) = self.0.get();
        self.0.set((shown + 1, hidden));
    }

    fn hide(&mut self) {
        let (shown, hidden) = self.0.get();
        self.0.set((shown, hidden + 1));
    }
}

#[test]
fn self_paced_leaf_ends_on_external_cancel() {
    let mut rig = Rig::headless();
    rig.exp
        .build(|b| {
            b.serial("block", |b| {
                b.wait("fixation", fixed(1000))?;
                b.wait("response", DurationSpec::SelfPaced)?;
                Ok(())
            })
        })
        .unwrap();
    let response = rig.exp.tree().find("response").unwrap();
    rig.stepper
        .run_until(&mut rig.exp, &mut rig.display, at_ms(3300))
        .unwrap();
    assert_eq!(rig.exp.tree().phase(response), Some(Phase::Active));
    rig.exp.cancel(response, at_ms(3300)).unwrap();
    rig.run();

    let block = rig.state("block");
    assert!(close(secs(&block, "end_time") - secs(&block, "start_time"), 3.3));
    let response = rig.state("response");
    assert!(close(secs(&response, "start_time"), 1.0));
    assert!(close(secs(&response, "end_time") - secs(&response, "start_time"), 2.3));
    assert_eq!(rig.exp.status(), RunStatus::Finished);
}

#[test]
fn parallel_takes_the_longest_child_on_a_60hz_display() {
    let mut rig = Rig::hz60(DisplayConfig::hz60(PresentMode::Blocking));
    rig.exp
        .build(|b| {
            b.parallel("p", |b| {
                b.wait("one", fixed(1000))?;
                b.wait("two", fixed(2000))?;
                b.wait("three", fixed(3000))?;
                Ok(())
            })
        })
        .unwrap();
    let stats = rig.run();
    let p = rig.state("p");
    assert!(close(secs(&p, "end_time") - secs(&p, "start_time"), 3.0), "max, not sum");
    assert!(close(secs(&rig.state("experiment"), "end_time"), 3.0));
    assert_eq!(stats.flips, 0, "nothing drawn");
}

#[test]
fn break_stops_the_loop_after_four_iterations() {
    let mut rig = Rig::headless();
    rig.exp
        .build(|b| {
            let seq = b.refs().constant(Value::list((0..5).map(Value::Int)));
            b.loop_over("trials", seq, |b| {
                let trials = b.tree().find("trials").unwrap();
                let current = b.attr(trials, "current")?;
                let three = b.refs().constant(3);
                let hit = b.refs().eq(current, three);
                b.if_("last", hit, |b| {
                    b.break_loop("stop");
                    Ok(())
                })?;
                b.wait("iti", fixed(100))?;
                Ok(())
            })
        })
        .unwrap();
    rig.run();
    let iterations = rig.sink.records_for("trials", RecordKind::Iteration);
    let indices: Vec<Option<i64>> = iterations
        .iter()
        .map(|r| r.get("i").and_then(Value::as_i64))
        .collect();
    assert_eq!(indices, [Some(0), Some(1), Some(2), Some(3)], "no fifth entry");
    assert_eq!(rig.sink.records_for("iti", RecordKind::State).len(), 3);
    assert!(close(secs(&rig.state("trials"), "end_time"), 0.3));
}

fn shared_data(data: &Rc<RefCell<Vec<i64>>>) -> RefFunction {
    let data = Rc::clone(data);
    RefFunction::new("data", move |_| {
        Ok(Value::list(data.borrow().iter().map(|&x| Value::Int(x))))
    })
    .volatile()
}

#[test]
fn watched_sum_follows_the_container_after_dep_changed() {
    let mut rig = Rig::headless();
    let data = Rc::new(RefCell::new(vec![1_i64, 2]));
    let refs = rig.exp.refs();
    let container = refs.call(shared_data(&data), []);
    let a = refs.index(container, 0_i64);
    let b = refs.index(container, 1_i64);
    let r = refs.add(a, b);
    let fired = Rc::new(Cell::new(0_u32));
    let counter = Rc::clone(&fired);
    refs.add_change_callback(r, Box::new(move |_| counter.set(counter.get() + 1)))
        .unwrap();

    assert_eq!(rig.exp.eval(r), Ok(Value::Int(3)));
    data.borrow_mut()[0] = 10;
    assert_eq!(rig.exp.eval(r), Ok(Value::Int(3)), "cached until notified");

    rig.exp.refs().dep_changed(a);
    assert_eq!(fired.get(), 1, "watcher told once");
    assert_eq!(rig.exp.eval(r), Ok(Value::Int(12)));
}

#[test]
fn unwatched_sum_is_never_cached() {
    let mut rig = Rig::headless();
    let data = Rc::new(RefCell::new(vec![1_i64, 2]));
    let refs = rig.exp.refs();
    let container = refs.call(shared_data(&data), []);
    let a = refs.index(container, 0_i64);
    let b = refs.index(container, 1_i64);
    let r = refs.add(a, b);

    assert_eq!(rig.exp.eval(r), Ok(Value::Int(3)));
    assert!(!rig.exp.refs().is_cached(r), "no subscriber, no cache");
    data.borrow_mut()[0] = 10;
    assert_eq!(rig.exp.eval(r), Ok(Value::Int(12)), "recomputed on every read");
    rig.exp.refs().dep_changed(a);
    assert_eq!(rig.exp.refs().interest(r), 0);
}

#[test]
fn if_suspends_until_its_condition_is_available() {
    let mut rig = Rig::headless();
    rig.exp
        .build(|b| {
            let ready = b.var("ready");
            b.if_("gate", ready, |b| b.wait("yes", fixed(20)).map(drop))?;
            b.else_(|b| b.wait("no", fixed(20)).map(drop))?;
            Ok(())
        })
        .unwrap();
    let mut seen = Transitions::default();
    for _ in 0..5 {
        rig.stepper
            .tick(&mut rig.exp, &mut rig.display, &mut Tracer::new(&mut seen))
            .unwrap();
    }
    assert_eq!(seen.count("gate", Transition::Enter), 1);
    assert_eq!(seen.count("gate", Transition::Start), 0, "no branch picked");
    assert_eq!(seen.count("gate.true", Transition::Enter), 0);
    assert_eq!(seen.count("gate.false", Transition::Enter), 0);

    rig.exp.set_variable("ready", true).unwrap();
    rig.run_traced(&mut seen);
    assert_eq!(seen.at("gate", Transition::Start), at_ms(50));
    assert_eq!(rig.sink.records_for("yes", RecordKind::State).len(), 1);
    assert!(rig.sink.records_for("no", RecordKind::State).is_empty());
}

#[test]
fn serial_children_hand_over_in_order() {
    let mut rig = Rig::headless();
    rig.exp
        .build(|b| {
            b.wait("a", fixed(100))?;
            b.wait("b", fixed(35))?;
            b.wait("c", fixed(5))?;
            Ok(())
        })
        .unwrap();
    let mut seen = Transitions::default();
    rig.run_traced(&mut seen);

    for name in ["a", "b", "c"] {
        let order = [
            Transition::Enter,
            Transition::Start,
            Transition::Leave,
            Transition::Finalize,
        ]
        .map(|t| seen.position(name, t));
        assert!(order.is_sorted(), "{name} lifecycle out of order: {order:?}");
    }
    for (prev, next) in [("a", "b"), ("b", "c")] {
        assert!(seen.position(prev, Transition::Leave) < seen.position(next, Transition::Enter));
        assert_eq!(
            seen.at(prev, Transition::Leave),
            seen.at(next, Transition::Enter),
            "{next} enters exactly when {prev} leaves"
        );
    }
    assert_eq!(seen.at("c", Transition::Leave), at_ms(140));
}

#[test]
fn non_blocking_child_is_cancelled_at_the_join() {
    let mut rig = Rig::headless();
    rig.exp
        .build(|b| {
            b.parallel("p", |b| {
                b.wait("main", fixed(500))?;
                let side = b.wait("side", DurationSpec::SelfPaced)?;
                b.set_blocking(side, false)
            })
        })
        .unwrap();
    let mut seen = Transitions::default();
    rig.run_traced(&mut seen);
    assert_eq!(seen.count("side", Transition::Cancel), 1);
    assert_eq!(seen.at("side", Transition::Leave), at_ms(500));
    assert_eq!(seen.count("main", Transition::Cancel), 0, "blocking child ran out");
    assert!(close(secs(&rig.state("p"), "end_time"), 0.5));
}

fn counting(calls: &Rc<Cell<u32>>) -> RefFunction {
    let calls = Rc::clone(calls);
    RefFunction::new("double", move |args| {
        calls.set(calls.get() + 1);
        let x = args[0].as_i64().ok_or("expected int")?;
        Ok(Value::Int(x * 2))
    })
}

#[test]
fn watched_function_runs_once_per_change() {
    let mut rig = Rig::headless();
    let calls = Rc::new(Cell::new(0));
    let refs = rig.exp.refs();
    let x = refs.source(4_i64);
    let doubled = refs.call(counting(&calls), [x]);
    refs.add_change_callback(doubled, Box::new(|_| {})).unwrap();
    let before = refs.stats();

    for _ in 0..3 {
        assert_eq!(rig.exp.eval(doubled), Ok(Value::Int(8)));
    }
    let after = rig.exp.refs().stats();
    assert_eq!(after.function_calls - before.function_calls, 1);
    assert_eq!(after.cache_hits - before.cache_hits, 2);
    assert_eq!(calls.get(), 1);
}

#[test]
fn missing_inputs_never_reach_functions() {
    let mut rig = Rig::headless();
    let calls = Rc::new(Cell::new(0));
    let missing = rig.exp.build(|b| Ok(b.var("missing"))).unwrap();
    let refs = rig.exp.refs();
    let doubled = refs.call(counting(&calls), [missing]);
    let one = refs.constant(1_i64);
    let pair = refs.list([one, missing]);
    let before = refs.stats();

    assert_eq!(rig.exp.eval(doubled), Ok(Value::NotAvailable));
    assert_eq!(rig.exp.eval(pair), Ok(Value::NotAvailable));
    assert_eq!(rig.exp.refs().stats().function_calls, before.function_calls);
    assert_eq!(calls.get(), 0);
}

#[test]
fn jittered_trials_keep_timestamps_in_order() {
    let display = DisplayConfig {
        jitter: Duration(300_000),
        seed: 11,
        ..DisplayConfig::hz60(PresentMode::Async)
    };
    let mut rig = Rig::hz60(display);
    let calls = Rc::new(Cell::new((0, 0)));
    let dot = Rc::clone(&calls);
    rig.exp
        .build(move |b| {
            b.loop_times("trials", 5, move |b| {
                let stim = b.visual("stim", Box::new(Dot(dot)), fixed(50))?;
                b.set_jitter(stim, ms(20))?;
                let gap = b.wait("gap", fixed(30))?;
                b.set_jitter(gap, ms(20))
            })
        })
        .unwrap();
    rig.run();

    assert_eq!(calls.get(), (5, 5), "every trial shown and hidden");
    let stims = rig.sink.records_for("stim", RecordKind::State);
    assert_eq!(stims.len(), 5);
    for stim in &stims {
        assert!(secs(stim, "start_time") <= secs(stim, "end_time"));
        assert!(secs(stim, "appear_time") < secs(stim, "disappear_time"));
        let shown = secs(stim, "disappear_time") - secs(stim, "appear_time");
        assert!(shown > 0.03 && shown < 0.1, "shown for {shown}s");
    }
    for pair in stims.windows(2) {
        assert!(secs(&pair[1], "start_time") >= secs(&pair[0], "end_time"));
        assert!(secs(&pair[1], "appear_time") >= secs(&pair[0], "disappear_time"));
    }
    let trials = rig.sink.records_for("trials", RecordKind::Iteration);
    assert_eq!(trials.len(), 5);
    for pair in trials.windows(2) {
        assert!(secs(&pair[1], "start_time") >= secs(&pair[0], "end_time"));
    }
    assert_eq!(rig.display.undelivered(), 0);
}

#[test]
fn repeated_cancel_changes_nothing() {
    let mut rig = Rig::headless();
    let w = rig
        .exp
        .build(|b| b.wait("hold", DurationSpec::SelfPaced))
        .unwrap();
    let mut seen = Transitions::default();
    rig.stepper
        .run_until(&mut rig.exp, &mut rig.display, at_ms(200))
        .unwrap();
    rig.exp.cancel(w, at_ms(150)).unwrap();
    rig.exp.cancel(w, at_ms(180)).unwrap();
    rig.run_traced(&mut seen);
    assert_eq!(seen.count("hold", Transition::Cancel), 1, "second cancel ignored");
    let hold = rig.state("hold");
    assert!(close(secs(&hold, "end_time"), 0.15), "first cancel wins");
    assert_eq!(rig.sink.records_for("hold", RecordKind::State).len(), 1, "one record");
}

#[test]
fn dropped_disappear_flip_is_presented_again() {
    let display = DisplayConfig {
        discard_every: 2,
        ..DisplayConfig::hz60(PresentMode::Blocking)
    };
    let mut rig = Rig::hz60(display);
    let calls = Rc::new(Cell::new((0, 0)));
    let dot = Rc::clone(&calls);
    rig.exp
        .build(move |b| {
            b.wait("fixation", fixed(50))?;
            b.visual("stim", Box::new(Dot(dot)), fixed(100))
        })
        .unwrap();
    let mut tracker = FlipTimingTracker::<8>::new(TB, REFRESH_MS);
    rig.run_traced(&mut tracker);

    let history = rig.display.history();
    assert_eq!(history.len(), 3, "appear, dropped disappear, retry");
    assert_eq!(history[1].presented, None);
    assert!(history[2].presented.is_some());
    let report = tracker.report();
    assert_eq!(report.discarded, 1);
    assert_eq!(report.presented, 2);

    let stim = rig.state("stim");
    let disappear = secs(&stim, "disappear_time");
    assert!(disappear >= 0.15, "retry lands after the planned end: {disappear}");
    assert_eq!(calls.get(), (1, 2), "hide applied again for the retry");
}

#[test]
fn steady_run_grades_well() {
    let mut rig = Rig::hz60(DisplayConfig::hz60(PresentMode::Blocking));
    rig.exp
        .build(|b| {
            b.loop_times("trials", 10, |b| {
                b.visual("stim", Box::new(Dot(Rc::new(Cell::new((0, 0))))), fixed(50))?;
                b.wait("gap", fixed(50))?;
                Ok(())
            })
        })
        .unwrap();
    let mut tracker = FlipTimingTracker::<16>::new(TB, REFRESH_MS);
    let stats = rig.run_traced(&mut tracker);
    let report = tracker.report();
    assert_eq!(stats.flips, 20, "one appear and one disappear per trial");
    assert_eq!(report.presented, 20);
    assert_eq!(report.missed, 0);
    assert!(report.max_lateness_ms < REFRESH_MS, "within a frame: {report:?}");
    assert!(report.grade <= FlipGrade::B, "got {:?}", report.grade);
}

#[test]
fn while_loop_runs_until_a_set_var_falsifies_it() {
    let mut rig = Rig::headless();
    rig.exp.set_variable("n", 0).unwrap();
    rig.exp
        .build(|b| {
            let n = b.var("n");
            let three = b.refs().constant(3);
            let more = b.refs().lt(n, three);
            b.loop_while("count", more, |b| {
                let n = b.var("n");
                let one = b.refs().constant(1);
                let next = b.refs().add(n, one);
                b.set_var("bump", "n", next)?;
                b.wait("w", fixed(100))?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();
    rig.run();

    assert_eq!(rig.exp.variable("n"), Ok(Value::Int(3)));
    assert_eq!(rig.sink.records_for("count", RecordKind::Iteration).len(), 3);
    assert_eq!(rig.sink.records_for("bump", RecordKind::State).len(), 3);
    assert_eq!(rig.sink.records_for("w", RecordKind::State).len(), 3);
    assert!(close(secs(&rig.state("count"), "end_time"), 0.3));
}

#[test]
fn wait_until_ends_on_change_and_drops_its_watch() {
    let mut rig = Rig::headless();
    rig.exp.set_variable("score", 0).unwrap();
    let (gate, cond) = rig
        .exp
        .build(|b| {
            let score = b.var("score");
            let five = b.refs().constant(5);
            let cond = b.refs().gt(score, five);
            let gate = b.wait_until("gate", cond)?;
            b.wait("after", fixed(20))?;
            Ok((gate, cond))
        })
        .unwrap();
    let mut seen = Transitions::default();
    for _ in 0..5 {
        rig.stepper
            .tick(&mut rig.exp, &mut rig.display, &mut Tracer::new(&mut seen))
            .unwrap();
    }
    assert_eq!(rig.exp.tree().phase(gate), Some(Phase::Active));
    assert_eq!(rig.exp.refs().interest(cond), 1, "watched while waiting");

    rig.exp.set_variable("score", 2).unwrap();
    rig.stepper
        .tick(&mut rig.exp, &mut rig.display, &mut Tracer::new(&mut seen))
        .unwrap();
    assert_eq!(rig.exp.tree().phase(gate), Some(Phase::Active), "still false");

    rig.exp.set_variable("score", 9).unwrap();
    rig.run_traced(&mut seen);
    assert_eq!(seen.count("gate", Transition::Leave), 1);
    assert_eq!(seen.count("gate", Transition::Cancel), 0, "ended by its condition");
    assert_eq!(rig.exp.refs().interest(cond), 0, "watch removed on leave");
    let gate = rig.state("gate");
    let after = rig.state("after");
    assert!(secs(&gate, "end_time") >= 0.05);
    assert!(close(secs(&after, "start_time"), secs(&gate, "end_time")));
}

#[test]
fn elif_chain_picks_the_first_true_branch() {
    for (level, picked) in [(9, "high"), (5, "mid"), (1, "low")] {
        let mut rig = Rig::headless();
        rig.exp.set_variable("level", level).unwrap();
        rig.exp
            .build(|b| {
                let level = b.var("level");
                let seven = b.refs().constant(7);
                let three = b.refs().constant(3);
                let high = b.refs().gt(level, seven);
                let mid = b.refs().gt(level, three);
                b.if_("pick", high, |b| b.wait("high", fixed(10)).map(drop))?;
                b.elif(mid, |b| b.wait("mid", fixed(10)).map(drop))?;
                b.else_(|b| b.wait("low", fixed(10)).map(drop))?;
                Ok(())
            })
            .unwrap();
        rig.run();
        for name in ["high", "mid", "low"] {
            let runs = rig.sink.records_for(name, RecordKind::State).len();
            assert_eq!(runs, usize::from(name == picked), "level {level}: {name}");
        }
    }
}

#[test]
fn until_done_cancels_the_previous_sibling_at_the_join() {
    let mut rig = Rig::headless();
    rig.exp
        .build(|b| {
            b.wait("stimulus", DurationSpec::SelfPaced)?;
            b.until_done(|b| b.wait("window", fixed(400)).map(drop))?;
            b.wait("after", fixed(10))?;
            Ok(())
        })
        .unwrap();
    let mut seen = Transitions::default();
    rig.run_traced(&mut seen);

    assert_eq!(seen.count("stimulus", Transition::Cancel), 1);
    assert_eq!(seen.count("window", Transition::Cancel), 0);
    assert!(
        seen.position("window", Transition::Leave) < seen.position("stimulus", Transition::Leave)
    );
    assert!(close(secs(&rig.state("stimulus"), "end_time"), 0.4), "cut at the join");
    assert!(close(secs(&rig.state("window"), "end_time"), 0.4));
    assert!(close(secs(&rig.state("after"), "start_time"), 0.4));
    assert_eq!(rig.exp.status(), RunStatus::Finished);
}

#[test]
fn record_leaf_writes_evaluated_fields() {
    let mut rig = Rig::headless();
    rig.exp.set_variable("score", 7).unwrap();
    rig.exp
        .build(|b| {
            let score = b.var("score");
            let label = b.refs().constant("final");
            b.wait("w", fixed(100))?;
            b.record("summary", [("score", score), ("label", label)])?;
            Ok(())
        })
        .unwrap();
    rig.run();

    let custom = rig.sink.records_for("summary", RecordKind::Custom);
    assert_eq!(custom.len(), 1);
    assert_eq!(custom[0].get("score"), Some(&Value::Int(7)));
    assert_eq!(custom[0].get("label"), Some(&Value::from("final")));
    assert!(close(secs(&rig.state("summary"), "start_time"), 0.1));
}
