// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The experiment and its idle tick.
//!
//! An [`Experiment`] owns one state tree together with everything the tree
//! runs against: the reference graph, the variable store, the runtime clock,
//! the flip queue and the flip pacer. The host calls
//! [`tick`](Experiment::tick) repeatedly; each call
//!
//! 1. samples the time source and derives this tick's error bound,
//! 2. settles the tree: dispatches due lifecycle events and advances
//!    composites until nothing changes,
//! 3. if the pacer says a flip is close, applies every video update due by
//!    the predicted flip and presents them as one flip,
//! 4. feeds confirmed flip times back to the nodes that wait for them.
//!
//! ```text
//!   TimeSource ──► settle (Clock ─► Driver) ──► VideoQueue ──► Presenter
//!                                                   ▲              │
//!                        flip_confirmed ◄───────────┴── FlipPacer ◄┘
//! ```
//!
//! A node failure is logged with the node's context, the tree is cancelled,
//! the sink flushed, and the error returned; later ticks return
//! [`RunError::NotRunning`].

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::backend::Presenter;
use crate::clock::{Clock, When};
use crate::config::ExperimentConfig;
use crate::error::{BuildError, EvalError, RunError, StateError};
use crate::record::LogSink;
use crate::reference::{RefGraph, RefId};
use crate::scheduler::FlipPacer;
use crate::state::run::{ClockEvent, Driver, Parked};
use crate::state::{BreakRequest, StateId, StateTree, TreeBuilder};
use crate::time::{EventTime, HostTime, TimeSource, Timebase};
use crate::timing::{FlipOutcome, FlipRequest, PendingFlip, PresentEvent, SubmissionId};
use crate::trace::{
    FlipConfirmedEvent, FlipDiscardedEvent, FlipSubmitEvent, PhaseBeginEvent, PhaseEndEvent,
    PhaseKind, TickEvent, TickSummary, TickSummaryBuilder, Tracer,
};
use crate::value::Value;
use crate::vars::Variables;
use crate::video::{VideoQueue, VideoRequest};

/// Where an experiment is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// The tree can still be built. The first tick starts the run.
    Building,
    /// Ticking.
    Running,
    /// The root finished and every record was written, or the run was shut
    /// down.
    Finished,
    /// A node failed and the run was shut down.
    Failed,
}

#[derive(Debug)]
struct InFlight {
    pending: PendingFlip,
    updates: Vec<VideoRequest>,
}

/// A state tree and the runtime that drives it.
pub struct Experiment {
    config: ExperimentConfig,
    tree: StateTree,
    refs: RefGraph,
    vars: Variables,
    clock: Clock<ClockEvent>,
    video: VideoQueue,
    pacer: FlipPacer,
    rng: SmallRng,
    sink: Box<dyn LogSink>,
    time: Box<dyn TimeSource>,
    timebase: Timebase,
    breaks: Vec<BreakRequest>,
    parked: Vec<Parked>,
    in_flight: Vec<InFlight>,
    next_submission: u64,
    changes: u64,
    tick_index: u64,
    last_tick: Option<HostTime>,
    status: RunStatus,
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("config", &self.config)
            .field("status", &self.status)
            .field("tick_index", &self.tick_index)
            .field("nodes", &self.tree.len())
            .field("scheduled", &self.clock.len())
            .field("video_pending", &self.video.len())
            .field("parked", &self.parked.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl Experiment {
    /// Creates an experiment with an empty root serial named `experiment`.
    #[must_use]
    pub fn new(
        config: ExperimentConfig,
        time: Box<dyn TimeSource>,
        sink: Box<dyn LogSink>,
    ) -> Self {
        let mut refs = RefGraph::new();
        let tree = StateTree::new(&mut refs, "experiment");
        let timebase = time.timebase();
        Self {
            config,
            tree,
            refs,
            vars: Variables::new(),
            clock: Clock::new(),
            video: VideoQueue::new(),
            pacer: FlipPacer::new(config.pacer),
            rng: SmallRng::seed_from_u64(config.seed),
            sink,
            time,
            timebase,
            breaks: Vec::new(),
            parked: Vec::new(),
            in_flight: Vec::new(),
            next_submission: 0,
            changes: 0,
            tick_index: 0,
            last_tick: None,
            status: RunStatus::Building,
        }
    }

    /// Adds states under the root. Only possible before the first tick.
    pub fn build<R>(
        &mut self,
        f: impl FnOnce(&mut TreeBuilder<'_>) -> Result<R, BuildError>,
    ) -> Result<R, BuildError> {
        if self.status != RunStatus::Building {
            return Err(BuildError::AlreadyRunning(StateId::ROOT));
        }
        let mut builder = TreeBuilder::new(&mut self.tree, &mut self.refs, &mut self.vars);
        f(&mut builder)
    }

    /// The configuration the experiment was created with.
    #[must_use]
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// The state tree.
    #[must_use]
    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    /// The reference graph.
    pub fn refs(&mut self) -> &mut RefGraph {
        &mut self.refs
    }

    /// Evaluates a reference.
    pub fn eval(&mut self, id: RefId) -> Result<Value, EvalError> {
        self.refs.eval(id)
    }

    /// Evaluates a node attribute; `None` if the node has no such attribute.
    pub fn attr_value(&mut self, id: StateId, name: &str) -> Option<Result<Value, EvalError>> {
        let attr = self.tree.attr(id, name)?;
        Some(self.refs.eval(attr))
    }

    /// Current value of a variable.
    pub fn variable(&mut self, name: &str) -> Result<Value, EvalError> {
        self.vars.value(&mut self.refs, name)
    }

    /// Sets a variable from outside the tree (for example from an input
    /// handler).
    pub fn set_variable(&mut self, name: &str, value: impl Into<Value>) -> Result<(), EvalError> {
        self.vars.set(&mut self.refs, name, value)
    }

    /// The flip pacer.
    #[must_use]
    pub fn pacer(&self) -> &FlipPacer {
        &self.pacer
    }

    /// Timebase of the time source.
    #[must_use]
    pub fn timebase(&self) -> Timebase {
        self.timebase
    }

    /// Number of ticks run so far.
    #[must_use]
    pub fn tick_index(&self) -> u64 {
        self.tick_index
    }

    /// Where the run is.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns `true` once the run finished, failed or was shut down.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Finished | RunStatus::Failed)
    }

    /// Video updates waiting for a flip.
    #[must_use]
    pub fn video_pending(&self) -> usize {
        self.video.len()
    }

    /// Submitted flips not yet confirmed or discarded.
    #[must_use]
    pub fn flips_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// The earliest time the next tick has work to do, if any is scheduled.
    ///
    /// Self-paced leaves and conditions that wait on values have no
    /// deadline; hosts poll at their own rate on top of this.
    #[must_use]
    pub fn next_deadline(&self) -> Option<HostTime> {
        let now = self.last_tick.unwrap_or_default();
        let clock = self.clock.next_deadline().map(|when| match when {
            When::EveryTick => now,
            When::At(t) => t,
        });
        let video = self.video.next_target().map(|t| {
            // Preparation starts a margin ahead of the flip that shows it.
            let flip = self.pacer.predicted_next_flip(t);
            flip.checked_sub(self.pacer.margin()).unwrap_or(t).max(now)
        });
        match (clock, video) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn driver<'s, 't>(&'s mut self, tracer: &'s mut Tracer<'t>, now: EventTime) -> Driver<'s, 't> {
        Driver {
            tree: &mut self.tree,
            refs: &mut self.refs,
            vars: &mut self.vars,
            clock: &mut self.clock,
            video: &mut self.video,
            sink: &mut *self.sink,
            rng: &mut self.rng,
            breaks: &mut self.breaks,
            parked: &mut self.parked,
            changes: &mut self.changes,
            tracer,
            now,
            timebase: self.timebase,
            tick_index: self.tick_index,
        }
    }

    /// Runs one idle tick.
    pub fn tick(&mut self, presenter: &mut dyn Presenter) -> Result<TickSummary, RunError> {
        self.tick_traced(presenter, &mut Tracer::none())
    }

    /// Runs one idle tick, reporting to `tracer`.
    pub fn tick_traced(
        &mut self,
        presenter: &mut dyn Presenter,
        tracer: &mut Tracer<'_>,
    ) -> Result<TickSummary, RunError> {
        if self.is_finished() {
            return Err(RunError::NotRunning);
        }
        let now = self.time.now();
        let at = EventTime::for_tick(now, self.last_tick);
        self.last_tick = Some(now);
        let tick = TickEvent {
            tick_index: self.tick_index,
            now,
            error: at.error,
        };
        tracer.tick(&tick);
        let mut summary = TickSummaryBuilder::new(&tick);

        let result = self.run_tick(presenter, tracer, at, &mut summary);
        self.tick_index += 1;
        if let Err(e) = result {
            self.fail_run(at);
            return Err(e);
        }
        if self.status == RunStatus::Running && self.is_complete() {
            self.status = RunStatus::Finished;
            log::info!("run finished after {} ticks", self.tick_index);
            self.sink.flush()?;
        }
        let summary = summary.finish();
        tracer.tick_summary(&summary);
        Ok(summary)
    }

    fn is_complete(&self) -> bool {
        self.tree.phase(StateId::ROOT).is_some_and(|p| p.is_done())
            && self.parked.is_empty()
            && self.in_flight.is_empty()
            && self.video.is_empty()
    }

    fn run_tick(
        &mut self,
        presenter: &mut dyn Presenter,
        tracer: &mut Tracer<'_>,
        now: EventTime,
        summary: &mut TickSummaryBuilder,
    ) -> Result<(), RunError> {
        if self.status == RunStatus::Building {
            self.status = RunStatus::Running;
            log::info!("run started at {:?} with {} states", now.time, self.tree.len());
            self.driver(tracer, now).enter(StateId::ROOT, now.time)?;
        }
        // Confirmations of earlier submissions first, so dependents see
        // them in this settle.
        self.drain_presented(presenter, tracer, now)?;

        self.phase_begin(tracer, summary, PhaseKind::Settle);
        self.settle(tracer, now, summary)?;
        self.phase_end(tracer, summary, PhaseKind::Settle);

        if !self.video.is_empty() && self.pacer.ready(now.time) {
            self.flip(presenter, tracer, now, summary)?;
        }
        self.drain_presented(presenter, tracer, now)
    }

    fn phase_begin(
        &self,
        tracer: &mut Tracer<'_>,
        summary: &mut TickSummaryBuilder,
        phase: PhaseKind,
    ) {
        let timestamp = self.time.now();
        summary.phase_begin(phase, timestamp);
        tracer.phase_begin(&PhaseBeginEvent {
            tick_index: self.tick_index,
            phase,
            timestamp,
        });
    }

    fn phase_end(
        &self,
        tracer: &mut Tracer<'_>,
        summary: &mut TickSummaryBuilder,
        phase: PhaseKind,
    ) {
        let timestamp = self.time.now();
        summary.phase_end(phase, timestamp);
        tracer.phase_end(&PhaseEndEvent {
            tick_index: self.tick_index,
            phase,
            timestamp,
        });
    }

    /// Dispatches due events and advances the tree until it stops changing.
    fn settle(
        &mut self,
        tracer: &mut Tracer<'_>,
        now: EventTime,
        summary: &mut TickSummaryBuilder,
    ) -> Result<(), StateError> {
        let max_passes = self.config.max_settle_passes.max(1);
        let mut driver = self.driver(tracer, now);
        for _ in 0..max_passes {
            let before = *driver.changes;
            let due = driver.clock.take_due(now.time);
            let dispatched = due.len();
            let mut failure = None;
            for (_, event) in due {
                if let Err(e) = driver.dispatch(event) {
                    if failure.is_none() {
                        failure = Some(e);
                    } else {
                        log::warn!("another event failed in the same batch: {e}");
                    }
                }
            }
            if let Some(e) = failure {
                return Err(e);
            }
            driver.process_breaks()?;
            driver.advance(StateId::ROOT)?;
            driver.process_breaks()?;
            summary.settle_pass(dispatched);
            if dispatched == 0 && *driver.changes == before {
                return Ok(());
            }
        }
        log::debug!("settle stopped after {max_passes} passes; continuing next tick");
        Ok(())
    }

    /// Applies the updates due by the predicted flip and presents them.
    fn flip(
        &mut self,
        presenter: &mut dyn Presenter,
        tracer: &mut Tracer<'_>,
        now: EventTime,
        summary: &mut TickSummaryBuilder,
    ) -> Result<(), RunError> {
        let prepare_started = self.time.now();
        let predicted_flip = self.pacer.predicted_next_flip(now.time);
        let updates = self.video.take_due(predicted_flip);
        let Some(first) = updates.first() else {
            return Ok(());
        };
        let target = first.target;

        self.phase_begin(tracer, summary, PhaseKind::Video);
        {
            let mut driver = self.driver(tracer, now);
            for update in &updates {
                driver.apply_video(update.tag);
            }
        }
        self.phase_end(tracer, summary, PhaseKind::Video);

        let request = FlipRequest {
            submission: SubmissionId(self.next_submission),
            target,
            predicted_flip,
            blocking: updates.iter().any(|u| u.wants_timestamp),
            updates: updates.len(),
        };
        self.next_submission += 1;

        self.phase_begin(tracer, summary, PhaseKind::Present);
        let submitted_at = self.time.now();
        let outcome = presenter.present(&request)?;
        self.phase_end(tracer, summary, PhaseKind::Present);
        tracer.flip_submit(&FlipSubmitEvent {
            tick_index: self.tick_index,
            submission: request.submission,
            target,
            predicted_flip,
            submitted_at,
            updates: updates.len(),
            blocking: request.blocking,
        });
        summary.flipped(updates.len());
        log::trace!(
            "flip {:?}: {} updates, predicted {:?}",
            request.submission,
            updates.len(),
            predicted_flip
        );

        let pending = PendingFlip {
            request,
            prepare_started,
            submitted_at,
        };
        match outcome {
            FlipOutcome::Confirmed(at) => self.confirm(pending, updates, at, tracer, now)?,
            FlipOutcome::Submitted => self.in_flight.push(InFlight { pending, updates }),
        }
        Ok(())
    }

    /// Feeds one confirmed flip back to the pacer and to the updates' owners.
    fn confirm(
        &mut self,
        pending: PendingFlip,
        updates: Vec<VideoRequest>,
        at: HostTime,
        tracer: &mut Tracer<'_>,
        now: EventTime,
    ) -> Result<(), StateError> {
        let submission = pending.request.submission;
        let feedback = pending.resolve(Some(at), self.pacer.config().miss_tolerance);
        self.pacer.observe(&feedback);
        tracer.flip_confirmed(&FlipConfirmedEvent {
            tick_index: self.tick_index,
            submission,
            at,
            missed_deadline: feedback.missed_deadline,
        });
        if feedback.missed_deadline == Some(true) {
            log::warn!(
                "flip {submission:?} missed: predicted {:?}, presented {at:?}",
                feedback.predicted_flip
            );
        }
        let mut driver = self.driver(tracer, now);
        let mut failure = None;
        for update in updates {
            if let Err(e) = driver.flip_confirmed(update.tag, EventTime::exact(at)) {
                if failure.is_none() {
                    failure = Some(e);
                } else {
                    log::warn!("another confirmation failed for flip {submission:?}: {e}");
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    fn drain_presented(
        &mut self,
        presenter: &mut dyn Presenter,
        tracer: &mut Tracer<'_>,
        now: EventTime,
    ) -> Result<(), RunError> {
        while let Some(event) = presenter.poll_presented() {
            let (PresentEvent::Presented { submission, .. }
            | PresentEvent::Discarded { submission }) = event;
            let Some(pos) = self
                .in_flight
                .iter()
                .position(|f| f.pending.request.submission == submission)
            else {
                log::warn!("presenter reported unknown submission {submission:?}");
                continue;
            };
            let flight = self.in_flight.remove(pos);
            match event {
                PresentEvent::Presented { at, .. } => {
                    self.confirm(flight.pending, flight.updates, at, tracer, now)?;
                }
                PresentEvent::Discarded { .. } => {
                    let feedback = flight
                        .pending
                        .resolve(None, self.pacer.config().miss_tolerance);
                    self.pacer.observe(&feedback);
                    let requeued = flight.updates.len();
                    tracer.flip_discarded(&FlipDiscardedEvent {
                        tick_index: self.tick_index,
                        submission,
                        requeued,
                    });
                    log::warn!("flip {submission:?} discarded; {requeued} updates queued again");
                    self.video.requeue(flight.updates);
                }
            }
        }
        Ok(())
    }

    /// Cancels a node from outside the tree, ending it at `at` (or at its
    /// planned end if that comes first).
    pub fn cancel(&mut self, id: StateId, at: HostTime) -> Result<(), RunError> {
        if self.status != RunStatus::Running {
            return Err(RunError::NotRunning);
        }
        if !self.tree.contains(id) {
            return Err(BuildError::UnknownState(id).into());
        }
        let now = EventTime::exact(self.last_tick.unwrap_or(at));
        let mut tracer = Tracer::none();
        if let Err(e) = self.driver(&mut tracer, now).cancel(id, at) {
            self.fail_run(now);
            return Err(e.into());
        }
        Ok(())
    }

    /// Stops the run: cancels whatever is still active, writes records that
    /// were waiting for flips with what is known, and flushes the sink.
    pub fn shutdown(&mut self) -> Result<(), RunError> {
        if self.is_finished() {
            return Ok(());
        }
        let now = EventTime::exact(self.time.now());
        let result = self.wind_down(now);
        self.status = RunStatus::Finished;
        log::info!("run shut down at {:?}", now.time);
        result
    }

    fn wind_down(&mut self, now: EventTime) -> Result<(), RunError> {
        let mut tracer = Tracer::none();
        let mut driver = self.driver(&mut tracer, now);
        let mut result = driver.cancel(StateId::ROOT, now.time).map_err(RunError::from);
        for parked in core::mem::take(driver.parked) {
            if let Err(e) = driver.settle_parked(parked, None)
                && result.is_ok()
            {
                result = Err(e.into());
            }
        }
        self.in_flight.clear();
        let flushed = self.sink.flush();
        result?;
        Ok(flushed?)
    }

    fn fail_run(&mut self, now: EventTime) {
        if let Err(e) = self.wind_down(now) {
            log::warn!("error during shutdown after failure: {e}");
        }
        self.status = RunStatus::Failed;
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use core::cell::RefCell;

    use super::*;
    use crate::error::{PresentError, StateErrorKind};
    use crate::record::{LogRecord, MemorySink, RecordKind};
    use crate::state::{Drawable, DurationSpec, Finalize, Leaf, LeafContext, LeafControl, Phase};
    use crate::time::{Duration, ManualTimeSource};

    const TB: Timebase = Timebase::NANOS;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n, TB)
    }

    fn at_ms(n: u64) -> HostTime {
        HostTime::from_nanos(n * 1_000_000, TB)
    }

    fn fixed(n: u64) -> DurationSpec {
        DurationSpec::Fixed(ms(n))
    }

    /// Confirms every flip at its predicted time.
    #[derive(Debug, Default)]
    struct Immediate {
        flips: Vec<FlipRequest>,
    }

    impl Presenter for Immediate {
        fn present(&mut self, request: &FlipRequest) -> Result<FlipOutcome, PresentError> {
            self.flips.push(*request);
            Ok(FlipOutcome::Confirmed(request.predicted_flip))
        }
    }

    struct Rig {
        exp: Experiment,
        time: ManualTimeSource,
        sink: MemorySink,
        presenter: Immediate,
    }

    impl Rig {
        fn new() -> Self {
            let time = ManualTimeSource::new();
            let sink = MemorySink::new();
            let exp = Experiment::new(
                ExperimentConfig::headless(),
                Box::new(time.clone()),
                Box::new(sink.clone()),
            );
            Self {
                exp,
                time,
                sink,
                presenter: Immediate::default(),
            }
        }

        fn tick(&mut self) -> Result<TickSummary, RunError> {
            self.exp.tick(&mut self.presenter)
        }

        /// Ticks every `step` ms until finished or `limit` ms pass.
        fn run(&mut self, step: u64, limit: u64) {
            while !self.exp.is_finished() && self.time.now() <= at_ms(limit) {
                self.tick().unwrap();
                self.time.advance(ms(step));
            }
        }

        fn state(&self, name: &str) -> LogRecord {
            let records = self.sink.records_for(name, RecordKind::State);
            assert_eq!(records.len(), 1, "one record for {name}");
            records[0].clone()
        }
    }

    fn secs(record: &LogRecord, field: &str) -> f64 {
        record.get_f64(field).unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        libm::fabs(a - b) < 1e-9
    }

    #[test]
    fn serial_children_run_back_to_back() {
        let mut rig = Rig::new();
        rig.exp
            .build(|b| {
                b.wait("a", fixed(100))?;
                b.wait("b", fixed(250))?;
                Ok(())
            })
            .unwrap();
        // Coarse ticks: the second wait still starts exactly at 0.1s.
        rig.run(70, 2000);
        assert_eq!(rig.exp.status(), RunStatus::Finished);
        let a = rig.state("a");
        let b = rig.state("b");
        assert!(close(secs(&a, "end_time"), 0.1));
        assert!(close(secs(&b, "start_time"), 0.1));
        assert!(close(secs(&b, "end_time"), 0.35));
        let root = rig.state("experiment");
        assert!(close(secs(&root, "end_time"), 0.35));
        assert_eq!(rig.sink.flush_count(), 1, "sink flushed on finish");
    }

    #[test]
    fn parallel_ends_with_its_longest_child() {
        let mut rig = Rig::new();
        rig.exp
            .build(|b| {
                b.parallel("p", |b| {
                    b.wait("one", fixed(1000))?;
                    b.wait("two", fixed(2000))?;
                    b.wait("three", fixed(3000))?;
                    Ok(())
                })?;
                b.wait("after", fixed(10))?;
                Ok(())
            })
            .unwrap();
        rig.run(100, 10_000);
        let p = rig.state("p");
        assert!(close(secs(&p, "end_time") - secs(&p, "start_time"), 3.0));
        assert!(close(secs(&rig.state("after"), "start_time"), 3.0));
    }

    #[test]
    fn non_blocking_children_are_cancelled_at_the_join() {
        let mut rig = Rig::new();
        rig.exp
            .build(|b| {
                b.wait("main", fixed(500))?;
                b.meanwhile(|b| b.wait("side", DurationSpec::SelfPaced).map(drop))?;
                Ok(())
            })
            .unwrap();
        rig.run(50, 2000);
        let side = rig.state("side");
        assert!(close(secs(&side, "end_time"), 0.5), "cut at the join");
        assert!(rig.exp.is_finished());
    }

    #[test]
    fn loop_logs_every_iteration() {
        let mut rig = Rig::new();
        let l = rig
            .exp
            .build(|b| {
                let seq = b.refs().constant(Value::list([
                    Value::from("x"),
                    Value::from("y"),
                    Value::from("z"),
                ]));
                b.loop_over("trials", seq, |b| b.wait("w", fixed(100)).map(drop))
            })
            .unwrap();
        rig.run(30, 2000);
        let iterations = rig.sink.records_for("trials", RecordKind::Iteration);
        let current: Vec<Value> = iterations
            .iter()
            .map(|r| r.get("current").cloned().unwrap())
            .collect();
        assert_eq!(current, [Value::from("x"), Value::from("y"), Value::from("z")]);
        for (k, r) in iterations.iter().enumerate() {
            assert_eq!(r.get("i"), Some(&Value::Int(k as i64)));
        }
        for pair in iterations.windows(2) {
            assert!(secs(&pair[1], "start_time") >= secs(&pair[0], "end_time"));
        }
        assert_eq!(rig.sink.records_for("w", RecordKind::State).len(), 3);
        assert_eq!(rig.exp.tree().phase(l), Some(Phase::Finalized));
    }

    #[test]
    fn break_ends_the_loop_after_a_partial_iteration() {
        let mut rig = Rig::new();
        rig.exp
            .build(|b| {
                let seq = b
                    .refs()
                    .constant(Value::list((0..5).map(Value::Int)));
                b.loop_over("l", seq, |b| {
                    let l = b.tree().find("l").unwrap();
                    let current = b.attr(l, "current")?;
                    let three = b.refs().constant(3);
                    let hit = b.refs().eq(current, three);
                    b.if_("check", hit, |b| {
                        b.break_loop("stop");
                        Ok(())
                    })?;
                    b.wait("w", fixed(10))?;
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        rig.run(5, 1000);
        let iterations = rig.sink.records_for("l", RecordKind::Iteration);
        assert_eq!(iterations.len(), 4, "indices 0 through 3");
        assert_eq!(iterations[3].get("i"), Some(&Value::Int(3)));
        assert_eq!(rig.sink.records_for("w", RecordKind::State).len(), 3);
    }

    #[test]
    fn if_waits_for_its_condition() {
        let mut rig = Rig::new();
        rig.exp
            .build(|b| {
                let ready = b.var("ready");
                b.if_("gate", ready, |b| b.wait("yes", fixed(10)).map(drop))?;
                b.else_(|b| b.wait("no", fixed(10)).map(drop))?;
                Ok(())
            })
            .unwrap();
        for _ in 0..5 {
            rig.tick().unwrap();
            rig.time.advance(ms(10));
        }
        let gate = rig.exp.tree().find("gate").unwrap();
        assert_eq!(rig.exp.tree().phase(gate), Some(Phase::Pending), "no branch chosen");
        rig.exp.set_variable("ready", false).unwrap();
        rig.run(10, 1000);
        assert_eq!(rig.sink.records_for("no", RecordKind::State).len(), 1);
        assert!(rig.sink.records_for("yes", RecordKind::State).is_empty());
        let gate = rig.state("gate");
        assert!(close(secs(&gate, "start_time"), 0.05), "starts when the value appears");
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut rig = Rig::new();
        let w = rig
            .exp
            .build(|b| b.wait("w", DurationSpec::SelfPaced))
            .unwrap();
        rig.tick().unwrap();
        rig.time.advance(ms(500));
        rig.tick().unwrap();
        rig.exp.cancel(w, at_ms(300)).unwrap();
        let end = rig.exp.tree().end_time(w);
        rig.exp.cancel(w, at_ms(400)).unwrap();
        assert_eq!(rig.exp.tree().end_time(w), end, "second cancel is a no-op");
        assert_eq!(end, Some(at_ms(300)));
        rig.run(10, 1000);
        assert!(rig.exp.is_finished());
    }

    /// Records which leaf callbacks ran.
    #[derive(Debug)]
    struct Calls(Rc<RefCell<Vec<&'static str>>>);

    impl Leaf for Calls {
        fn kind(&self) -> &'static str {
            "calls"
        }

        fn enter(&mut self, _: &mut LeafContext<'_>) -> Result<(), StateErrorKind> {
            self.0.borrow_mut().push("enter");
            Ok(())
        }

        fn start(&mut self, _: &mut LeafContext<'_>) -> Result<LeafControl, StateErrorKind> {
            self.0.borrow_mut().push("start");
            Ok(LeafControl::Continue)
        }

        fn cancel(&mut self, _: HostTime, _: &mut LeafContext<'_>) -> Result<(), StateErrorKind> {
            self.0.borrow_mut().push("cancel");
            Ok(())
        }

        fn leave(&mut self, _: &mut LeafContext<'_>) -> Result<Finalize, StateErrorKind> {
            self.0.borrow_mut().push("leave");
            Ok(Finalize::Now)
        }
    }

    #[test]
    fn leaves_hear_about_cancellation_before_leaving() {
        let cut = Rc::new(RefCell::new(Vec::new()));
        let timed = Rc::new(RefCell::new(Vec::new()));
        let mut rig = Rig::new();
        let c = rig
            .exp
            .build(|b| {
                let mut c = StateId::ROOT;
                b.parallel("both", |b| {
                    c = b.leaf("cut", Box::new(Calls(Rc::clone(&cut))));
                    b.leaf_for("timed", Box::new(Calls(Rc::clone(&timed))), fixed(50))?;
                    Ok(())
                })?;
                Ok(c)
            })
            .unwrap();
        rig.run(10, 100);
        assert_eq!(*timed.borrow(), ["enter", "start", "leave"], "ended on its own");
        assert_eq!(*cut.borrow(), ["enter", "start"]);

        rig.exp.cancel(c, rig.time.now()).unwrap();
        assert_eq!(*cut.borrow(), ["enter", "start", "cancel", "leave"]);
        rig.run(10, 300);
        assert!(rig.exp.is_finished());
        assert_eq!(cut.borrow().len(), 4, "cancel runs once");
    }

    #[test]
    fn negative_duration_fails_the_run() {
        let mut rig = Rig::new();
        rig.exp
            .build(|b| {
                let d = b.refs().constant(-1.0);
                b.wait("bad", DurationSpec::Ref(d))
            })
            .unwrap();
        let err = rig.tick().unwrap_err();
        let RunError::State(e) = err else {
            panic!("expected a state error, got {err:?}");
        };
        assert_eq!(e.name, "bad");
        assert_eq!(e.kind, StateErrorKind::NegativeDuration { seconds: -1.0 });
        assert_eq!(rig.exp.status(), RunStatus::Failed);
        assert_eq!(rig.sink.flush_count(), 1, "shutdown flushed the sink");
        assert_eq!(rig.tick().unwrap_err(), RunError::NotRunning);
    }

    #[test]
    fn non_finite_duration_fails_the_run() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut rig = Rig::new();
            rig.exp
                .build(|b| {
                    let d = b.refs().constant(value);
                    b.wait("bad", DurationSpec::Ref(d))
                })
                .unwrap();
            let err = rig.tick().unwrap_err();
            let RunError::State(e) = err else {
                panic!("expected a state error for {value}, got {err:?}");
            };
            assert_eq!(e.name, "bad");
            assert!(
                matches!(e.kind, StateErrorKind::NonFiniteDuration { .. }),
                "{value} rejected at enter, got {:?}",
                e.kind
            );
            assert_eq!(rig.exp.status(), RunStatus::Failed);
            assert_eq!(rig.sink.flush_count(), 1, "shutdown flushed the sink");
        }
    }

    #[test]
    fn build_is_rejected_once_running() {
        let mut rig = Rig::new();
        rig.tick().unwrap();
        assert_eq!(
            rig.exp.build(|b| b.wait("late", fixed(1))).unwrap_err(),
            BuildError::AlreadyRunning(StateId::ROOT)
        );
    }

    #[derive(Debug)]
    struct Stimulus(Rc<RefCell<Vec<&'static str>>>);

    impl Drawable for Stimulus {
        fn show(&mut self) {
            self.0.borrow_mut().push("show");
        }
        fn hide(&mut self) {
            self.0.borrow_mut().push("hide");
        }
    }

    #[test]
    fn visual_record_waits_for_the_disappear_flip() {
        let mut rig = Rig::new();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let stimulus = Stimulus(Rc::clone(&calls));
        rig.exp
            .build(|b| b.visual("stim", Box::new(stimulus), fixed(100)))
            .unwrap();
        rig.run(20, 1000);
        assert_eq!(*calls.borrow(), ["show", "hide"]);
        let stim = rig.state("stim");
        assert!(close(secs(&stim, "appear_time"), 0.0));
        assert!(close(secs(&stim, "disappear_time"), 0.1));
        assert_eq!(rig.presenter.flips.len(), 2);
        assert!(rig.presenter.flips.iter().all(|f| f.blocking));
        assert!(close(secs(&rig.state("experiment"), "end_time"), 0.1));
        assert_eq!(rig.sink.records().len(), 2, "stim and the root");
    }

    #[test]
    fn shutdown_writes_pending_records() {
        let mut rig = Rig::new();
        rig.exp
            .build(|b| b.wait("forever", DurationSpec::SelfPaced))
            .unwrap();
        rig.tick().unwrap();
        rig.time.advance(ms(40));
        rig.exp.shutdown().unwrap();
        assert!(close(secs(&rig.state("forever"), "end_time"), 0.04));
        assert_eq!(rig.exp.status(), RunStatus::Finished);
        assert_eq!(rig.tick().unwrap_err(), RunError::NotRunning);
    }

    #[test]
    fn next_deadline_tracks_scheduled_ends() {
        let mut rig = Rig::new();
        rig.exp.build(|b| b.wait("w", fixed(250))).unwrap();
        rig.tick().unwrap();
        assert_eq!(rig.exp.next_deadline(), Some(at_ms(250)));
    }
}
