// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The leaf contract.
//!
//! A leaf is the unit of actual work in a state tree: waiting, evaluating an
//! expression, showing a stimulus. The runtime owns timing (when a leaf
//! enters, starts and ends, and what is logged); the leaf reacts to those
//! transitions through the [`Leaf`] trait and talks back to the runtime
//! through a [`LeafContext`].

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::error::StateErrorKind;
use crate::record::{LogRecord, LogSink, RecordKind};
use crate::reference::{RefGraph, RefId};
use crate::state::id::StateId;
use crate::time::{EventTime, HostTime, Timebase};
use crate::value::Value;
use crate::vars::Variables;
use crate::video::{VideoHandle, VideoQueue, VideoTag};

/// Whether a leaf keeps running after a callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LeafControl {
    /// Keep running until the duration elapses, a later poll returns
    /// [`LeafControl::Done`], or the node is cancelled.
    Continue,
    /// The leaf's work is complete; the node leaves.
    Done,
}

/// When a left node's log record becomes final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Finalize {
    /// Immediately.
    Now,
    /// Once the flip carrying the update with `token` is confirmed. The
    /// confirmed time is written into the record under `field`.
    AfterFlip {
        /// Video token the record waits for.
        token: u32,
        /// Record field receiving the confirmed time.
        field: &'static str,
    },
}

/// A renderable or interactive unit of work.
///
/// Call order for one run of the node:
///
/// 1. [`enter`](Leaf::enter) once the state, start and (if fixed) planned
///    end times are known.
/// 2. [`start`](Leaf::start) when the clock reaches the start time.
/// 3. [`poll`](Leaf::poll) on every settle pass while running.
/// 4. [`cancel`](Leaf::cancel) if the node is cut short, possibly before
///    `start`.
/// 5. [`leave`](Leaf::leave) once, however the node ended.
///
/// [`apply_video`](Leaf::apply_video) and
/// [`flip_confirmed`](Leaf::flip_confirmed) are called for updates the leaf
/// scheduled with [`LeafContext::schedule_video`]. Inside a loop the node is
/// re-run; [`reset`](Leaf::reset) is called before each re-run.
pub trait Leaf: fmt::Debug {
    /// Type label used in logs and records.
    fn kind(&self) -> &'static str;

    /// Names of extra attributes this leaf produces (besides the time
    /// attributes every node has).
    fn outputs(&self) -> &'static [&'static str] {
        &[]
    }

    /// Called once the node's times are established.
    fn enter(&mut self, ctx: &mut LeafContext<'_>) -> Result<(), StateErrorKind> {
        _ = ctx;
        Ok(())
    }

    /// Called when the start time is reached.
    fn start(&mut self, ctx: &mut LeafContext<'_>) -> Result<LeafControl, StateErrorKind> {
        _ = ctx;
        Ok(LeafControl::Continue)
    }

    /// Called on every settle pass while the node is active.
    fn poll(&mut self, ctx: &mut LeafContext<'_>) -> Result<LeafControl, StateErrorKind> {
        _ = ctx;
        Ok(LeafControl::Continue)
    }

    /// Called when the node is cancelled at `at`, right before
    /// [`leave`](Leaf::leave). Not called when the leaf finishes on its own
    /// or its duration elapses.
    fn cancel(&mut self, at: HostTime, ctx: &mut LeafContext<'_>) -> Result<(), StateErrorKind> {
        _ = (at, ctx);
        Ok(())
    }

    /// Called once when the node leaves. `ctx.end_time()` is set.
    fn leave(&mut self, ctx: &mut LeafContext<'_>) -> Result<Finalize, StateErrorKind> {
        _ = ctx;
        Ok(Finalize::Now)
    }

    /// Applies a scheduled visual update ahead of the flip that shows it.
    fn apply_video(&mut self, token: u32) {
        _ = token;
    }

    /// The flip showing update `token` happened at `at`.
    fn flip_confirmed(
        &mut self,
        token: u32,
        at: EventTime,
        ctx: &mut LeafContext<'_>,
    ) -> Result<(), StateErrorKind> {
        _ = (token, at, ctx);
        Ok(())
    }

    /// Clears per-run state before an enclosing loop re-runs the node.
    fn reset(&mut self) {}
}

/// The node's logical times as seen by a leaf.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Times {
    /// When the parent scheduled the node.
    pub state_time: Option<HostTime>,
    /// Logical start.
    pub start_time: Option<HostTime>,
    /// Logical end, once leaving.
    pub end_time: Option<HostTime>,
    /// Scheduled end for fixed durations.
    pub planned_end: Option<HostTime>,
}

/// A request a leaf makes of its enclosing structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct BreakRequest {
    pub(crate) from: StateId,
    pub(crate) at: HostTime,
}

/// What a leaf can reach while one of its methods runs.
pub struct LeafContext<'a> {
    pub(crate) node: StateId,
    pub(crate) epoch: u32,
    pub(crate) name: &'a str,
    pub(crate) now: EventTime,
    pub(crate) times: Times,
    pub(crate) timebase: Timebase,
    pub(crate) refs: &'a mut RefGraph,
    pub(crate) vars: &'a mut Variables,
    pub(crate) video: &'a mut VideoQueue,
    pub(crate) sink: &'a mut dyn LogSink,
    pub(crate) attrs: &'a [(&'static str, RefId)],
    pub(crate) breaks: &'a mut Vec<BreakRequest>,
}

impl fmt::Debug for LeafContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafContext")
            .field("node", &self.node)
            .field("epoch", &self.epoch)
            .field("name", &self.name)
            .field("now", &self.now)
            .field("times", &self.times)
            .finish_non_exhaustive()
    }
}

impl LeafContext<'_> {
    /// The node running this leaf.
    #[must_use]
    pub fn node(&self) -> StateId {
        self.node
    }

    /// The node's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Time of the current idle tick with its error bound.
    #[must_use]
    pub fn now(&self) -> EventTime {
        self.now
    }

    /// The node's logical times.
    #[must_use]
    pub fn times(&self) -> Times {
        self.times
    }

    /// Logical end, set while leaving.
    #[must_use]
    pub fn end_time(&self) -> Option<HostTime> {
        self.times.end_time
    }

    /// Converts a host time into the `Float` seconds references carry.
    #[must_use]
    pub fn secs(&self, t: HostTime) -> Value {
        Value::Float(t.to_secs(self.timebase))
    }

    /// Evaluates a reference.
    pub fn eval(&mut self, id: RefId) -> Result<Value, StateErrorKind> {
        Ok(self.refs.eval(id)?)
    }

    /// The reference graph, for watching or building expressions.
    pub fn refs(&mut self) -> &mut RefGraph {
        self.refs
    }

    /// Sets a variable.
    pub fn set_var(&mut self, name: &str, value: Value) -> Result<(), StateErrorKind> {
        Ok(self.vars.set(self.refs, name, value)?)
    }

    /// Publishes one of the leaf's outputs.
    pub fn set_output(&mut self, name: &str, value: Value) -> Result<(), StateErrorKind> {
        let id = self
            .attrs
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, id)| *id)
            .ok_or_else(|| StateErrorKind::Leaf(format!("no output named `{name}`")))?;
        Ok(self.refs.set(id, value)?)
    }

    /// Queues a visual update for the first flip at or after `target`.
    pub fn schedule_video(
        &mut self,
        token: u32,
        target: HostTime,
        wants_timestamp: bool,
    ) -> VideoHandle {
        let tag = VideoTag {
            owner: self.node,
            epoch: self.epoch,
            token,
        };
        self.video.schedule(tag, target, wants_timestamp)
    }

    /// Cancels an update not yet taken for a flip.
    pub fn cancel_video(&mut self, handle: VideoHandle) -> bool {
        self.video.cancel(handle)
    }

    /// Returns `true` while the update waits for a flip.
    #[must_use]
    pub fn video_pending(&self, handle: VideoHandle) -> bool {
        self.video.is_pending(handle)
    }

    /// Writes a custom record attributed to this node.
    pub fn write_record(
        &mut self,
        node_type: &'static str,
        fields: Vec<(String, Value)>,
    ) -> Result<(), StateErrorKind> {
        let record = LogRecord {
            state: self.name.into(),
            node_type,
            kind: RecordKind::Custom,
            fields,
        };
        Ok(self.sink.write_record(&record)?)
    }

    /// Ends the nearest enclosing loop after cancelling the rest of the
    /// current iteration.
    pub fn request_break(&mut self, at: HostTime) {
        self.breaks.push(BreakRequest {
            from: self.node,
            at,
        });
    }
}
