// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Lifecycle transitions and composite scheduling.
//!
//! A [`Driver`] borrows everything one settle pass touches and walks the
//! tree. Node times are logical: a child scheduled after a sibling starts at
//! the sibling's logical end, not at the tick that noticed it, so sequences
//! do not accumulate tick latency.
//!
//! ```text
//!   enter ──► resolve ──► (Start event) ──► poll.. ──► leave ──► finalize
//!              │                                         │
//!              └─ waiting: retried on every advance      └─ or parked until
//!                                                           a flip confirms
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use rand::Rng;
use rand::rngs::SmallRng;

use crate::clock::{Clock, When};
use crate::error::{StateError, StateErrorKind};
use crate::record::{LogRecord, LogSink, RecordKind};
use crate::reference::{RefGraph, RefId};
use crate::state::id::{Phase, StateId};
use crate::state::leaf::{BreakRequest, Finalize, Leaf, LeafContext, LeafControl, Times};
use crate::state::tree::{DurationSpec, LoopMode, LoopState, NodeKind, StateTree};
use crate::time::{Duration, EventTime, HostTime, Timebase};
use crate::trace::{StateTransitionEvent, Tracer, Transition};
use crate::value::Value;
use crate::vars::Variables;
use crate::video::{VideoQueue, VideoTag};

/// A lifecycle event scheduled on the runtime clock.
///
/// Events carry the node's epoch so an event scheduled before a loop reset
/// is ignored afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ClockEvent {
    Start { node: StateId, epoch: u32 },
    End { node: StateId, epoch: u32 },
}

impl ClockEvent {
    pub(crate) const fn node(self) -> StateId {
        match self {
            Self::Start { node, .. } | Self::End { node, .. } => node,
        }
    }
}

/// A left node whose record waits for a flip confirmation.
#[derive(Debug)]
pub(crate) struct Parked {
    pub(crate) owner: StateId,
    pub(crate) epoch: u32,
    pub(crate) token: u32,
    pub(crate) field: &'static str,
    /// Snapshot taken at leave time, used if the node was reset before the
    /// confirmation arrived. `None` when the node does not save its log.
    pub(crate) record: Option<LogRecord>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Serial,
    Parallel,
    If,
    Loop,
    Leaf,
}

pub(crate) struct Driver<'a, 't> {
    pub(crate) tree: &'a mut StateTree,
    pub(crate) refs: &'a mut RefGraph,
    pub(crate) vars: &'a mut Variables,
    pub(crate) clock: &'a mut Clock<ClockEvent>,
    pub(crate) video: &'a mut VideoQueue,
    pub(crate) sink: &'a mut dyn LogSink,
    pub(crate) rng: &'a mut SmallRng,
    pub(crate) breaks: &'a mut Vec<BreakRequest>,
    pub(crate) parked: &'a mut Vec<Parked>,
    pub(crate) changes: &'a mut u64,
    pub(crate) tracer: &'a mut Tracer<'t>,
    pub(crate) now: EventTime,
    pub(crate) timebase: Timebase,
    pub(crate) tick_index: u64,
}

impl Driver<'_, '_> {
    // -- helpers ------------------------------------------------------------

    fn kind(&self, id: StateId) -> Kind {
        match self.tree.node(id).kind {
            NodeKind::Serial => Kind::Serial,
            NodeKind::Parallel => Kind::Parallel,
            NodeKind::If(_) => Kind::If,
            NodeKind::Loop(_) => Kind::Loop,
            NodeKind::Leaf(_) => Kind::Leaf,
        }
    }

    fn phase(&self, id: StateId) -> Phase {
        self.tree.node(id).phase
    }

    fn children(&self, id: StateId) -> Vec<StateId> {
        self.tree.node(id).children.clone()
    }

    /// Wraps `kind` with the node's identity and logs it with context.
    pub(crate) fn fail(&self, id: StateId, kind: impl Into<StateErrorKind>) -> StateError {
        let node = self.tree.node(id);
        let kind = kind.into();
        log::error!(
            "{} `{}` ({id:?}, epoch {}, {:?}) failed: {kind}",
            node.node_type,
            node.name,
            node.epoch,
            node.phase,
        );
        StateError {
            node: id,
            name: node.name.clone(),
            kind,
        }
    }

    fn eval(&mut self, id: StateId, expr: RefId) -> Result<Value, StateError> {
        self.refs.eval(expr).map_err(|e| self.fail(id, e))
    }

    fn secs(&self, t: HostTime) -> Value {
        Value::Float(t.to_secs(self.timebase))
    }

    fn transition(&mut self, id: StateId, transition: Transition, at: HostTime) {
        *self.changes += 1;
        let node = self.tree.node(id);
        log::debug!(
            "{} {} `{}` at {at:?}",
            transition.label(),
            node.node_type,
            node.name
        );
        self.tracer.state_transition(&StateTransitionEvent {
            tick_index: self.tick_index,
            node: id,
            name: &node.name,
            node_type: node.node_type,
            transition,
            at,
        });
    }

    /// Sets a time attribute's source.
    fn publish(&mut self, id: StateId, attr: &str, t: Option<HostTime>) -> Result<(), StateError> {
        let Some(source) = self.tree.node(id).attr(attr) else {
            return Ok(());
        };
        let value = t.map_or(Value::NotAvailable, |t| self.secs(t));
        self.refs.set(source, value).map_err(|e| self.fail(id, e))
    }

    /// Runs `f` against the node's leaf with a context built from this pass.
    /// Returns `None` for composites.
    fn with_leaf<R>(
        &mut self,
        id: StateId,
        f: impl FnOnce(&mut dyn Leaf, &mut LeafContext<'_>) -> R,
    ) -> Option<R> {
        let NodeKind::Leaf(slot) = &mut self.tree.node_mut(id).kind else {
            return None;
        };
        let mut leaf = slot.take()?;
        let node = self.tree.node(id);
        let mut ctx = LeafContext {
            node: id,
            epoch: node.epoch,
            name: &node.name,
            now: self.now,
            times: Times {
                state_time: node.state_time,
                start_time: node.start_time,
                end_time: node.end_time,
                planned_end: node.planned_end,
            },
            timebase: self.timebase,
            refs: &mut *self.refs,
            vars: &mut *self.vars,
            video: &mut *self.video,
            sink: &mut *self.sink,
            attrs: &node.attrs,
            breaks: &mut *self.breaks,
        };
        let out = f(leaf.as_mut(), &mut ctx);
        if let NodeKind::Leaf(slot) = &mut self.tree.node_mut(id).kind {
            *slot = Some(leaf);
        }
        Some(out)
    }

    fn call_leaf<R>(
        &mut self,
        id: StateId,
        default: R,
        f: impl FnOnce(&mut dyn Leaf, &mut LeafContext<'_>) -> Result<R, StateErrorKind>,
    ) -> Result<R, StateError> {
        match self.with_leaf(id, f) {
            None => Ok(default),
            Some(Ok(r)) => Ok(r),
            Some(Err(kind)) => Err(self.fail(id, kind)),
        }
    }

    /// The time a node is known to end, before it actually has.
    ///
    /// `None` while it depends on something not yet known (a self-paced
    /// leaf, a loop, a pending condition).
    pub(crate) fn logical_end(&self, id: StateId) -> Option<HostTime> {
        let node = self.tree.node(id);
        if node.phase.is_done() {
            return node.end_time;
        }
        if node.phase == Phase::Idle || node.waiting {
            return None;
        }
        match &node.kind {
            NodeKind::Leaf(_) => node.planned_end,
            NodeKind::Serial => match node.children.last() {
                Some(&last) => self.logical_end(last),
                None => node.start_time,
            },
            NodeKind::Parallel => {
                let blocking: Vec<StateId> = node
                    .children
                    .iter()
                    .copied()
                    .filter(|c| self.tree.node(*c).blocking)
                    .collect();
                let join = if blocking.is_empty() {
                    &node.children
                } else {
                    &blocking
                };
                let mut end = node.start_time;
                for &child in join {
                    end = end.max(Some(self.logical_end(child)?));
                }
                end
            }
            NodeKind::If(state) => {
                let branch = node.children.get(usize::from(!state.outcome?))?;
                self.logical_end(*branch)
            }
            NodeKind::Loop(_) => None,
        }
    }

    // -- enter / start ------------------------------------------------------

    /// Enters an idle node with state time `at`.
    pub(crate) fn enter(&mut self, id: StateId, at: HostTime) -> Result<(), StateError> {
        {
            let node = self.tree.node_mut(id);
            if node.phase != Phase::Idle {
                return Ok(());
            }
            node.phase = Phase::Pending;
            node.state_time = Some(at);
        }
        self.publish(id, "state_time", Some(at))?;
        self.transition(id, Transition::Enter, at);
        self.resolve(id, at)
    }

    /// Establishes the start of an entered node. Leaves it waiting if a
    /// value it needs is not available yet.
    fn resolve(&mut self, id: StateId, start: HostTime) -> Result<(), StateError> {
        match self.kind(id) {
            Kind::Leaf => self.resolve_leaf(id, start),
            Kind::Serial => self.begin(id, start),
            Kind::Parallel => {
                self.begin(id, start)?;
                for child in self.children(id) {
                    self.enter(child, start)?;
                }
                Ok(())
            }
            Kind::If => {
                let NodeKind::If(state) = &self.tree.node(id).kind else {
                    return Ok(());
                };
                let cond = state.cond;
                let value = self.eval(id, cond)?;
                if value.is_not_available() {
                    self.tree.node_mut(id).waiting = true;
                    return Ok(());
                }
                let outcome = value.truthy();
                if let NodeKind::If(state) = &mut self.tree.node_mut(id).kind {
                    state.outcome = Some(outcome);
                }
                self.begin(id, start)?;
                let branch = self.tree.node(id).children.get(usize::from(!outcome)).copied();
                match branch {
                    Some(branch) => self.enter(branch, start),
                    None => self.leave(id, start, Duration::ZERO),
                }
            }
            Kind::Loop => {
                self.begin(id, start)?;
                self.begin_iteration(id, start)
            }
        }
    }

    /// Marks a composite as started.
    fn begin(&mut self, id: StateId, start: HostTime) -> Result<(), StateError> {
        let node = self.tree.node_mut(id);
        node.waiting = false;
        node.start_time = Some(start);
        node.phase = Phase::Active;
        self.publish(id, "start_time", Some(start))?;
        self.transition(id, Transition::Start, start);
        Ok(())
    }

    fn resolve_leaf(&mut self, id: StateId, start: HostTime) -> Result<(), StateError> {
        let duration = match self.tree.node(id).duration {
            DurationSpec::Fixed(d) => Some(d),
            DurationSpec::SelfPaced => None,
            DurationSpec::Ref(expr) => match self.eval(id, expr)? {
                Value::NotAvailable => {
                    self.tree.node_mut(id).waiting = true;
                    return Ok(());
                }
                Value::None => None,
                value => match value.as_f64() {
                    Some(seconds) if !seconds.is_finite() => {
                        return Err(self.fail(id, StateErrorKind::NonFiniteDuration { seconds }));
                    }
                    Some(seconds) if seconds < 0.0 => {
                        return Err(self.fail(id, StateErrorKind::NegativeDuration { seconds }));
                    }
                    Some(seconds) => Some(Duration::from_secs(seconds, self.timebase)),
                    None => {
                        return Err(self.fail(
                            id,
                            StateErrorKind::InvalidDuration {
                                found: value.type_name(),
                            },
                        ));
                    }
                },
            },
        };
        let duration = duration.map(|d| self.jittered(id, d));
        let epoch = {
            let node = self.tree.node_mut(id);
            node.waiting = false;
            node.start_time = Some(start);
            node.planned_end = duration.map(|d| start.saturating_add(d));
            node.epoch
        };
        self.publish(id, "start_time", Some(start))?;
        self.call_leaf(id, (), |leaf, ctx| leaf.enter(ctx))?;
        self.clock
            .schedule(ClockEvent::Start { node: id, epoch }, When::At(start), None);
        if let Some(end) = self.tree.node(id).planned_end {
            self.clock
                .schedule(ClockEvent::End { node: id, epoch }, When::At(end), None);
        }
        Ok(())
    }

    fn jittered(&mut self, id: StateId, duration: Duration) -> Duration {
        match self.tree.node(id).jitter {
            Some(jitter) if jitter.ticks() > 0 => {
                duration.saturating_add(Duration(self.rng.gen_range(0..jitter.ticks())))
            }
            _ => duration,
        }
    }

    /// Dispatches one due clock event.
    pub(crate) fn dispatch(&mut self, event: ClockEvent) -> Result<(), StateError> {
        match event {
            ClockEvent::Start { node, epoch } => self.on_start(node, epoch),
            ClockEvent::End { node, epoch } => {
                let n = self.tree.node(node);
                if n.epoch != epoch || !n.phase.is_active() {
                    return Ok(());
                }
                let end = n.planned_end.unwrap_or(self.now.time);
                self.leave(node, end, Duration::ZERO)
            }
        }
    }

    fn on_start(&mut self, id: StateId, epoch: u32) -> Result<(), StateError> {
        let node = self.tree.node_mut(id);
        if node.epoch != epoch || node.phase != Phase::Pending {
            return Ok(());
        }
        node.phase = Phase::Active;
        let at = node.start_time.unwrap_or(self.now.time);
        self.transition(id, Transition::Start, at);
        let control = self.call_leaf(id, LeafControl::Continue, |leaf, ctx| leaf.start(ctx))?;
        if control == LeafControl::Done && self.phase(id).is_active() {
            self.leave(id, at, Duration::ZERO)?;
        }
        Ok(())
    }

    // -- advance ------------------------------------------------------------

    /// Moves a node (and its subtree) forward as far as known times allow.
    pub(crate) fn advance(&mut self, id: StateId) -> Result<(), StateError> {
        let node = self.tree.node(id);
        match node.phase {
            Phase::Pending if node.waiting => {
                let at = node.state_time.unwrap_or(self.now.time).max(self.now.time);
                return self.resolve(id, at);
            }
            Phase::Pending | Phase::Active => {}
            Phase::Idle | Phase::Left | Phase::Finalized => return Ok(()),
        }
        match self.kind(id) {
            Kind::Leaf => {
                if self.phase(id) == Phase::Active {
                    self.poll_leaf(id)?;
                }
                Ok(())
            }
            Kind::Serial => self.advance_serial(id),
            Kind::Parallel => self.advance_parallel(id),
            Kind::If => self.advance_if(id),
            Kind::Loop => self.advance_loop(id),
        }
    }

    fn poll_leaf(&mut self, id: StateId) -> Result<(), StateError> {
        let control = self.call_leaf(id, LeafControl::Continue, |leaf, ctx| leaf.poll(ctx))?;
        if control == LeafControl::Done && self.phase(id).is_active() {
            self.leave(id, self.now.time, self.now.error)?;
        }
        Ok(())
    }

    /// Enters each child at its predecessor's logical end, as soon as that
    /// end is known.
    fn advance_serial(&mut self, id: StateId) -> Result<(), StateError> {
        let children = self.children(id);
        let Some(&last) = children.last() else {
            let at = self.tree.node(id).start_time.unwrap_or(self.now.time);
            return self.leave(id, at, Duration::ZERO);
        };
        let mut cursor = self.tree.node(id).start_time;
        for &child in &children {
            if self.phase(child) == Phase::Idle {
                let Some(at) = cursor else { break };
                self.enter(child, at)?;
            }
            self.advance(child)?;
            cursor = self.logical_end(child);
            if cursor.is_none() {
                break;
            }
        }
        if self.phase(last).is_done() && self.phase(id).is_active() {
            let end = self.tree.node(last).end_time.unwrap_or(self.now.time);
            self.leave(id, end, Duration::ZERO)?;
        }
        Ok(())
    }

    /// Ends when every blocking child has ended (every child if none
    /// block), cancelling the rest.
    fn advance_parallel(&mut self, id: StateId) -> Result<(), StateError> {
        let children = self.children(id);
        for &child in &children {
            self.advance(child)?;
        }
        let blocking: Vec<StateId> = children
            .iter()
            .copied()
            .filter(|c| self.tree.node(*c).blocking)
            .collect();
        let join = if blocking.is_empty() {
            &children
        } else {
            &blocking
        };
        if !join.iter().all(|c| self.phase(*c).is_done()) {
            return Ok(());
        }
        let end = join
            .iter()
            .filter_map(|c| self.tree.node(*c).end_time)
            .max()
            .or(self.tree.node(id).start_time)
            .unwrap_or(self.now.time);
        for &child in &children {
            self.cancel(child, end)?;
        }
        if self.phase(id).is_active() {
            self.leave(id, end, Duration::ZERO)?;
        }
        Ok(())
    }

    fn advance_if(&mut self, id: StateId) -> Result<(), StateError> {
        let node = self.tree.node(id);
        let NodeKind::If(state) = &node.kind else {
            return Ok(());
        };
        let Some(outcome) = state.outcome else {
            return Ok(());
        };
        let Some(&branch) = node.children.get(usize::from(!outcome)) else {
            return Ok(());
        };
        self.advance(branch)?;
        if self.phase(branch).is_done() && self.phase(id).is_active() {
            let end = self.tree.node(branch).end_time.unwrap_or(self.now.time);
            self.leave(id, end, Duration::ZERO)?;
        }
        Ok(())
    }

    /// Runs at most one iteration boundary per call.
    fn advance_loop(&mut self, id: StateId) -> Result<(), StateError> {
        let Some(&body) = self.tree.node(id).children.first() else {
            let at = self.tree.node(id).start_time.unwrap_or(self.now.time);
            return self.leave(id, at, Duration::ZERO);
        };
        match self.phase(body) {
            Phase::Idle => {
                // Waiting for the sequence or condition to become available.
                let at = self.loop_state(id).and_then(|s| s.iteration_start);
                let at = at.unwrap_or(self.now.time).max(self.now.time);
                self.begin_iteration(id, at)
            }
            Phase::Pending | Phase::Active => {
                self.advance(body)?;
                if self.phase(body).is_done() && self.phase(id).is_active() {
                    self.next_iteration(id, body)?;
                }
                Ok(())
            }
            Phase::Left | Phase::Finalized => self.next_iteration(id, body),
        }
    }

    // -- loops --------------------------------------------------------------

    fn loop_state(&self, id: StateId) -> Option<&LoopState> {
        match &self.tree.node(id).kind {
            NodeKind::Loop(state) => Some(state),
            _ => None,
        }
    }

    fn loop_state_mut(&mut self, id: StateId) -> Option<&mut LoopState> {
        match &mut self.tree.node_mut(id).kind {
            NodeKind::Loop(state) => Some(state),
            _ => None,
        }
    }

    /// Checks the loop condition and enters the body at `at`, or leaves.
    fn begin_iteration(&mut self, id: StateId, at: HostTime) -> Result<(), StateError> {
        let Some(state) = self.loop_state_mut(id) else {
            return Ok(());
        };
        state.iteration_start = Some(at);
        let (mode, index) = (state.mode, state.index);
        let proceed = match mode {
            LoopMode::Times(n) => Some(index < n),
            LoopMode::Over(seq) => {
                let value = self.eval(id, seq)?;
                if value.is_not_available() {
                    None
                } else {
                    let len = match &value {
                        Value::List(_) | Value::Tuple(_) | Value::Str(_) => value.len(),
                        _ => None,
                    };
                    let Some(len) = len else {
                        return Err(self.fail(
                            id,
                            StateErrorKind::NotASequence {
                                found: value.type_name(),
                            },
                        ));
                    };
                    Some(usize::try_from(index).is_ok_and(|i| i < len))
                }
            }
            LoopMode::While(cond) => {
                let value = self.eval(id, cond)?;
                (!value.is_not_available()).then(|| value.truthy())
            }
        };
        let Some(&body) = self.tree.node(id).children.first() else {
            return Ok(());
        };
        match proceed {
            None => Ok(()),
            Some(false) => self.leave(id, at, Duration::ZERO),
            Some(true) => {
                if let Some(source) = self.tree.node(id).attr("i") {
                    let i = i64::try_from(index).unwrap_or(i64::MAX);
                    self.refs
                        .set(source, Value::Int(i))
                        .map_err(|e| self.fail(id, e))?;
                }
                self.enter(body, at)
            }
        }
    }

    fn next_iteration(&mut self, id: StateId, body: StateId) -> Result<(), StateError> {
        let end = self.tree.node(body).end_time.unwrap_or(self.now.time);
        self.write_iteration(id, end)?;
        if let Some(state) = self.loop_state_mut(id) {
            state.index += 1;
        }
        self.reset_subtree(body)?;
        self.begin_iteration(id, end)
    }

    /// Writes the iteration record for the iteration ending at `end`.
    fn write_iteration(&mut self, id: StateId, end: HostTime) -> Result<(), StateError> {
        let node = self.tree.node(id);
        if !node.save_log {
            return Ok(());
        }
        let start = self.loop_state(id).and_then(|s| s.iteration_start);
        let mut fields = Vec::with_capacity(4);
        for name in ["i", "current"] {
            if let Some(expr) = self.tree.node(id).attr(name) {
                fields.push((String::from(name), self.eval(id, expr)?));
            }
        }
        fields.push((
            "start_time".into(),
            start.map_or(Value::NotAvailable, |t| self.secs(t)),
        ));
        fields.push(("end_time".into(), self.secs(end)));
        let node = self.tree.node(id);
        let record = LogRecord {
            state: node.name.clone(),
            node_type: node.node_type,
            kind: RecordKind::Iteration,
            fields,
        };
        self.sink
            .write_record(&record)
            .map_err(|e| self.fail(id, e))
    }

    /// Returns a finished loop body to idle so it can run again.
    fn reset_subtree(&mut self, body: StateId) -> Result<(), StateError> {
        for id in self.tree.subtree(body) {
            self.clock.unschedule_where(|e| e.node() == id);
            let epoch = self.tree.node(id).epoch;
            // Updates a parked record waits for still go out.
            if !self.parked.iter().any(|p| p.owner == id && p.epoch == epoch) {
                self.video.cancel_owner(id);
            }
            let node = self.tree.node_mut(id);
            node.phase = Phase::Idle;
            node.epoch = node.epoch.wrapping_add(1);
            node.waiting = false;
            node.state_time = None;
            node.start_time = None;
            node.end_time = None;
            node.end_error = Duration::ZERO;
            node.planned_end = None;
            match &mut node.kind {
                NodeKind::If(state) => state.outcome = None,
                NodeKind::Loop(state) => {
                    state.index = 0;
                    state.iteration_start = None;
                }
                NodeKind::Leaf(Some(leaf)) => leaf.reset(),
                NodeKind::Serial | NodeKind::Parallel | NodeKind::Leaf(None) => {}
            }
            let sources: Vec<RefId> = node.attrs.iter().map(|(_, r)| *r).collect();
            for source in sources {
                self.refs
                    .set(source, Value::NotAvailable)
                    .map_err(|e| self.fail(id, e))?;
            }
        }
        Ok(())
    }

    /// Handles break requests raised by leaves.
    pub(crate) fn process_breaks(&mut self) -> Result<(), StateError> {
        for request in core::mem::take(&mut *self.breaks) {
            let target = self
                .tree
                .ancestors(request.from)
                .find(|a| matches!(self.tree.node(*a).kind, NodeKind::Loop(_)));
            let Some(target) = target else {
                log::warn!(
                    "break in `{}` has no enclosing loop; ignored",
                    self.tree.node(request.from).name
                );
                continue;
            };
            self.break_loop(target, request.at)?;
        }
        Ok(())
    }

    fn break_loop(&mut self, id: StateId, at: HostTime) -> Result<(), StateError> {
        if !self.phase(id).is_active() {
            return Ok(());
        }
        let Some(&body) = self.tree.node(id).children.first() else {
            return Ok(());
        };
        if !self.phase(body).is_active() {
            return Ok(());
        }
        self.cancel(body, at)?;
        let end = self.tree.node(body).end_time.unwrap_or(at);
        self.write_iteration(id, end)?;
        self.leave(id, end, Duration::ZERO)
    }

    // -- leave / cancel -----------------------------------------------------

    /// Ends an active node at `end`.
    pub(crate) fn leave(
        &mut self,
        id: StateId,
        end: HostTime,
        error: Duration,
    ) -> Result<(), StateError> {
        let (epoch, end) = {
            let node = self.tree.node_mut(id);
            if !node.phase.is_active() {
                return Ok(());
            }
            let start = *node.start_time.get_or_insert(end);
            let end = end.max(start);
            node.end_time = Some(end);
            node.end_error = error;
            node.waiting = false;
            node.phase = Phase::Left;
            (node.epoch, end)
        };
        self.clock.unschedule_where(|e| e.node() == id);
        let start = self.tree.node(id).start_time;
        self.publish(id, "start_time", start)?;
        self.publish(id, "end_time", Some(end))?;
        self.transition(id, Transition::Leave, end);
        match self.call_leaf(id, Finalize::Now, |leaf, ctx| leaf.leave(ctx))? {
            Finalize::Now => self.finalize(id),
            Finalize::AfterFlip { token, field } => {
                let record = if self.tree.node(id).save_log {
                    Some(self.build_record(id)?)
                } else {
                    None
                };
                self.parked.push(Parked {
                    owner: id,
                    epoch,
                    token,
                    field,
                    record,
                });
                Ok(())
            }
        }
    }

    /// Cancels an active node at `at`, and its active descendants with it.
    pub(crate) fn cancel(&mut self, id: StateId, at: HostTime) -> Result<(), StateError> {
        let node = self.tree.node(id);
        if !node.phase.is_active() {
            return Ok(());
        }
        let (start, planned_end) = (node.start_time, node.planned_end);
        let end = match start {
            Some(start) if at < start => {
                self.tree.node_mut(id).start_time = Some(at);
                at
            }
            Some(start) => start.max(planned_end.map_or(at, |p| p.min(at))),
            None => at,
        };
        self.transition(id, Transition::Cancel, end);
        for child in self.children(id) {
            self.cancel(child, end)?;
        }
        if self.kind(id) == Kind::Loop
            && let Some(&body) = self.tree.node(id).children.first()
            && self.phase(body).is_done()
        {
            let body_end = self.tree.node(body).end_time.unwrap_or(end);
            self.write_iteration(id, body_end)?;
        }
        self.call_leaf(id, (), |leaf, ctx| leaf.cancel(end, ctx))?;
        self.leave(id, end, Duration::ZERO)
    }

    // -- records ------------------------------------------------------------

    fn build_record(&mut self, id: StateId) -> Result<LogRecord, StateError> {
        let node = self.tree.node(id);
        let mut exprs: Vec<(String, RefId)> = node
            .attrs
            .iter()
            .chain(&node.derived)
            .map(|(name, r)| (String::from(*name), *r))
            .collect();
        exprs.extend(node.log_attrs.iter().cloned());
        let error = Value::Float(node.end_error.to_secs(self.timebase));
        let mut fields = Vec::with_capacity(exprs.len() + 1);
        for (i, (name, expr)) in exprs.into_iter().enumerate() {
            fields.push((name, self.eval(id, expr)?));
            if i == 2 {
                fields.push(("end_time_error".into(), error.clone()));
            }
        }
        let node = self.tree.node(id);
        Ok(LogRecord {
            state: node.name.clone(),
            node_type: node.node_type,
            kind: RecordKind::State,
            fields,
        })
    }

    /// Writes the node's record (if it saves one) and marks it final.
    fn finalize(&mut self, id: StateId) -> Result<(), StateError> {
        if self.tree.node(id).save_log {
            let record = self.build_record(id)?;
            self.sink
                .write_record(&record)
                .map_err(|e| self.fail(id, e))?;
        }
        let node = self.tree.node_mut(id);
        node.phase = Phase::Finalized;
        let at = node.end_time.unwrap_or(self.now.time);
        self.transition(id, Transition::Finalize, at);
        Ok(())
    }

    // -- video --------------------------------------------------------------

    /// Applies an update just before the flip that shows it. Updates from a
    /// previous run of the node are applied too: only those a parked record
    /// waits for survive a reset.
    pub(crate) fn apply_video(&mut self, tag: VideoTag) {
        if !self.tree.contains(tag.owner) {
            return;
        }
        self.with_leaf(tag.owner, |leaf, _| leaf.apply_video(tag.token));
    }

    /// Delivers a confirmed flip time for one update and finalizes the
    /// record parked on it.
    pub(crate) fn flip_confirmed(
        &mut self,
        tag: VideoTag,
        at: EventTime,
    ) -> Result<(), StateError> {
        if !self.tree.contains(tag.owner) {
            return Ok(());
        }
        if self.tree.node(tag.owner).epoch == tag.epoch {
            self.call_leaf(tag.owner, (), |leaf, ctx| {
                leaf.flip_confirmed(tag.token, at, ctx)
            })?;
        }
        let Some(pos) = self
            .parked
            .iter()
            .position(|p| p.owner == tag.owner && p.epoch == tag.epoch && p.token == tag.token)
        else {
            return Ok(());
        };
        let parked = self.parked.remove(pos);
        self.settle_parked(parked, Some(at.time))
    }

    /// Writes a parked record, filling its deferred field with `at`.
    pub(crate) fn settle_parked(
        &mut self,
        parked: Parked,
        at: Option<HostTime>,
    ) -> Result<(), StateError> {
        let node = self.tree.node(parked.owner);
        if node.epoch == parked.epoch && node.phase == Phase::Left {
            return self.finalize(parked.owner);
        }
        let Some(mut record) = parked.record else {
            return Ok(());
        };
        let value = at.map_or(Value::NotAvailable, |t| self.secs(t));
        match record.fields.iter_mut().find(|(k, _)| k == parked.field) {
            Some(slot) => slot.1 = value,
            None => record.fields.push((parked.field.into(), value)),
        }
        self.sink
            .write_record(&record)
            .map_err(|e| self.fail(parked.owner, e))
    }
}
