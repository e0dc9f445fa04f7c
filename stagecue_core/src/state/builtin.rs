// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Built-in leaves.
//!
//! These use the same [`Leaf`] trait external leaves implement.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::Cell;
use core::fmt::Write as _;

use crate::error::StateErrorKind;
use crate::reference::{RefId, WatchId};
use crate::state::leaf::{Finalize, Leaf, LeafContext, LeafControl};
use crate::time::EventTime;
use crate::video::VideoHandle;

/// Waits for its duration, or until a condition becomes truthy.
///
/// The duration lives on the node (see
/// [`DurationSpec`](crate::state::DurationSpec)); a self-paced wait without
/// a condition runs until cancelled.
#[derive(Debug, Default)]
pub struct Wait {
    until: Option<RefId>,
    fired: Rc<Cell<bool>>,
    watch: Option<WatchId>,
}

impl Wait {
    /// A plain wait.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A wait that also ends as soon as `cond` is truthy.
    #[must_use]
    pub fn until(cond: RefId) -> Self {
        Self {
            until: Some(cond),
            ..Self::default()
        }
    }

    fn condition_met(&self, ctx: &mut LeafContext<'_>) -> Result<bool, StateErrorKind> {
        match self.until {
            Some(cond) => Ok(ctx.eval(cond)?.truthy()),
            None => Ok(false),
        }
    }
}

impl Leaf for Wait {
    fn kind(&self) -> &'static str {
        "wait"
    }

    fn start(&mut self, ctx: &mut LeafContext<'_>) -> Result<LeafControl, StateErrorKind> {
        let Some(cond) = self.until else {
            return Ok(LeafControl::Continue);
        };
        if self.condition_met(ctx)? {
            return Ok(LeafControl::Done);
        }
        self.fired.set(false);
        let fired = Rc::clone(&self.fired);
        let watch = ctx
            .refs()
            .add_change_callback(cond, Box::new(move |_| fired.set(true)))?;
        self.watch = Some(watch);
        Ok(LeafControl::Continue)
    }

    fn poll(&mut self, ctx: &mut LeafContext<'_>) -> Result<LeafControl, StateErrorKind> {
        if !self.fired.replace(false) {
            return Ok(LeafControl::Continue);
        }
        if self.condition_met(ctx)? {
            Ok(LeafControl::Done)
        } else {
            Ok(LeafControl::Continue)
        }
    }

    fn leave(&mut self, ctx: &mut LeafContext<'_>) -> Result<Finalize, StateErrorKind> {
        if let (Some(cond), Some(watch)) = (self.until, self.watch.take()) {
            ctx.refs().remove_change_callback(cond, watch);
        }
        Ok(Finalize::Now)
    }

    fn reset(&mut self) {
        self.fired.set(false);
        self.watch = None;
    }
}

/// Evaluates an expression when started and publishes it as `result`.
#[derive(Debug)]
pub struct Func {
    expr: RefId,
}

impl Func {
    /// Evaluates `expr` at start.
    #[must_use]
    pub fn new(expr: RefId) -> Self {
        Self { expr }
    }
}

impl Leaf for Func {
    fn kind(&self) -> &'static str {
        "func"
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["result"]
    }

    fn start(&mut self, ctx: &mut LeafContext<'_>) -> Result<LeafControl, StateErrorKind> {
        let value = ctx.eval(self.expr)?;
        ctx.set_output("result", value)?;
        Ok(LeafControl::Done)
    }
}

/// Writes a variable when started.
#[derive(Debug)]
pub struct SetVar {
    var: String,
    value: RefId,
}

impl SetVar {
    /// Sets `var` to the value of `value`.
    #[must_use]
    pub fn new(var: impl Into<String>, value: RefId) -> Self {
        Self {
            var: var.into(),
            value,
        }
    }
}

impl Leaf for SetVar {
    fn kind(&self) -> &'static str {
        "set_var"
    }

    fn start(&mut self, ctx: &mut LeafContext<'_>) -> Result<LeafControl, StateErrorKind> {
        let value = ctx.eval(self.value)?;
        ctx.set_var(&self.var, value)?;
        Ok(LeafControl::Done)
    }
}

/// Writes a custom record of named expressions when started.
#[derive(Debug)]
pub struct Record {
    fields: Vec<(String, RefId)>,
}

impl Record {
    /// Records each `(name, expression)` pair.
    #[must_use]
    pub fn new<K: Into<String>>(fields: impl IntoIterator<Item = (K, RefId)>) -> Self {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl Leaf for Record {
    fn kind(&self) -> &'static str {
        "record"
    }

    fn start(&mut self, ctx: &mut LeafContext<'_>) -> Result<LeafControl, StateErrorKind> {
        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, id) in &self.fields {
            fields.push((name.clone(), ctx.eval(*id)?));
        }
        ctx.write_record("record", fields)?;
        Ok(LeafControl::Done)
    }
}

/// Logs evaluated expressions through the `log` facade when started.
#[derive(Debug)]
pub struct DebugPrint {
    label: String,
    values: Vec<(String, RefId)>,
}

impl DebugPrint {
    /// Logs `label` followed by each `name=value`.
    #[must_use]
    pub fn new<K: Into<String>>(
        label: impl Into<String>,
        values: impl IntoIterator<Item = (K, RefId)>,
    ) -> Self {
        Self {
            label: label.into(),
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl Leaf for DebugPrint {
    fn kind(&self) -> &'static str {
        "debug"
    }

    fn start(&mut self, ctx: &mut LeafContext<'_>) -> Result<LeafControl, StateErrorKind> {
        let mut line = String::new();
        for (name, id) in &self.values {
            let value = ctx.eval(*id)?;
            _ = write!(line, " {name}={value}");
        }
        log::info!("{} [{}]{line}", self.label, ctx.name());
        Ok(LeafControl::Done)
    }
}

/// Ends the nearest enclosing loop.
#[derive(Debug, Default)]
pub struct Break;

impl Leaf for Break {
    fn kind(&self) -> &'static str {
        "break"
    }

    fn start(&mut self, ctx: &mut LeafContext<'_>) -> Result<LeafControl, StateErrorKind> {
        let at = ctx.times().start_time.unwrap_or(ctx.now().time);
        ctx.request_break(at);
        Ok(LeafControl::Done)
    }
}

/// Something a [`Visual`] leaf shows and hides.
///
/// Calls happen just before the flip that makes the change visible.
pub trait Drawable: core::fmt::Debug {
    /// Make the stimulus visible on the next flip.
    fn show(&mut self);
    /// Remove the stimulus on the next flip.
    fn hide(&mut self);
}

/// A stimulus shown from the node's start until its end.
///
/// Appearance is scheduled for the start time and disappearance for the
/// end time (immediately for fixed durations, at leave time otherwise). The
/// confirmed flip times are published as `appear_time` and
/// `disappear_time`, and the node's record is final only once the
/// disappearance is confirmed.
#[derive(Debug)]
pub struct Visual {
    drawable: Box<dyn Drawable>,
    appear: Option<VideoHandle>,
    disappear: Option<VideoHandle>,
    disappeared: Option<EventTime>,
}

impl Visual {
    /// Token of the appear update.
    pub const APPEAR: u32 = 0;
    /// Token of the disappear update.
    pub const DISAPPEAR: u32 = 1;

    /// Wraps a drawable.
    #[must_use]
    pub fn new(drawable: Box<dyn Drawable>) -> Self {
        Self {
            drawable,
            appear: None,
            disappear: None,
            disappeared: None,
        }
    }
}

impl Leaf for Visual {
    fn kind(&self) -> &'static str {
        "visual"
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["appear_time", "disappear_time"]
    }

    fn enter(&mut self, ctx: &mut LeafContext<'_>) -> Result<(), StateErrorKind> {
        let times = ctx.times();
        if let Some(start) = times.start_time {
            self.appear = Some(ctx.schedule_video(Self::APPEAR, start, true));
        }
        if let Some(end) = times.planned_end {
            self.disappear = Some(ctx.schedule_video(Self::DISAPPEAR, end, true));
        }
        Ok(())
    }

    fn leave(&mut self, ctx: &mut LeafContext<'_>) -> Result<Finalize, StateErrorKind> {
        if self
            .appear
            .is_some_and(|appear| ctx.cancel_video(appear))
        {
            // Never drawn: nothing to take down.
            if let Some(disappear) = self.disappear.take() {
                ctx.cancel_video(disappear);
            }
            return Ok(Finalize::Now);
        }
        if self.disappeared.is_some() {
            return Ok(Finalize::Now);
        }
        let end = ctx.end_time().unwrap_or(ctx.now().time);
        let reschedule = match self.disappear {
            None => true,
            // Cancelled early: take it down at the actual end instead.
            Some(handle) if ctx.video_pending(handle) && ctx.times().planned_end != Some(end) => {
                ctx.cancel_video(handle);
                true
            }
            Some(_) => false,
        };
        if reschedule {
            self.disappear = Some(ctx.schedule_video(Self::DISAPPEAR, end, true));
        }
        Ok(Finalize::AfterFlip {
            token: Self::DISAPPEAR,
            field: "disappear_time",
        })
    }

    fn apply_video(&mut self, token: u32) {
        match token {
            Self::APPEAR => self.drawable.show(),
            Self::DISAPPEAR => self.drawable.hide(),
            _ => {}
        }
    }

    fn flip_confirmed(
        &mut self,
        token: u32,
        at: EventTime,
        ctx: &mut LeafContext<'_>,
    ) -> Result<(), StateErrorKind> {
        let secs = ctx.secs(at.time);
        match token {
            Self::APPEAR => ctx.set_output("appear_time", secs),
            Self::DISAPPEAR => {
                self.disappeared = Some(at);
                ctx.set_output("disappear_time", secs)
            }
            _ => Ok(()),
        }
    }

    fn reset(&mut self) {
        self.appear = None;
        self.disappear = None;
        self.disappeared = None;
    }
}
