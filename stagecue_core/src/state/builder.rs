// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tree construction.
//!
//! [`TreeBuilder`] keeps an explicit stack of open composites. New nodes are
//! added under the top of the stack. Composites can be opened and closed by
//! hand ([`begin_serial`](TreeBuilder::begin_serial) /
//! [`end`](TreeBuilder::end)) or through the scoped helpers, which take a
//! closure and always close what they opened:
//!
//! ```text
//! b.serial("trial", |b| {
//!     b.wait("fixation", DurationSpec::Fixed(half_second))?;
//!     b.if_("check", cond, |b| b.func("hit", expr).map(drop))?;
//!     b.else_(|b| b.func("miss", expr).map(drop))?;
//!     Ok(())
//! })?;
//! ```
//!
//! Every reference a node stores is pinned, so it survives
//! [`RefGraph::collect_garbage`]. Passing a stale handle is reported as
//! [`BuildError::StaleReference`].

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::BuildError;
use crate::reference::{RefGraph, RefId};
use crate::state::builtin::{Break, DebugPrint, Drawable, Func, Record, SetVar, Visual, Wait};
use crate::state::id::StateId;
use crate::state::leaf::Leaf;
use crate::state::tree::{DurationSpec, IfState, LoopMode, LoopState, NodeKind, StateTree};
use crate::time::Duration;
use crate::vars::Variables;

/// Builds a [`StateTree`] before the run starts.
#[derive(Debug)]
pub struct TreeBuilder<'e> {
    tree: &'e mut StateTree,
    refs: &'e mut RefGraph,
    vars: &'e mut Variables,
    stack: Vec<StateId>,
}

impl<'e> TreeBuilder<'e> {
    pub(crate) fn new(
        tree: &'e mut StateTree,
        refs: &'e mut RefGraph,
        vars: &'e mut Variables,
    ) -> Self {
        Self {
            tree,
            refs,
            vars,
            stack: alloc::vec![StateId::ROOT],
        }
    }

    /// The composite new nodes are added to.
    #[must_use]
    pub fn parent(&self) -> StateId {
        self.stack.last().copied().unwrap_or(StateId::ROOT)
    }

    /// The tree built so far.
    #[must_use]
    pub fn tree(&self) -> &StateTree {
        &*self.tree
    }

    /// The reference graph, for building expressions.
    pub fn refs(&mut self) -> &mut RefGraph {
        self.refs
    }

    /// The reference bound to variable `name`.
    pub fn var(&mut self, name: &str) -> RefId {
        self.vars.get(self.refs, name)
    }

    /// A runtime attribute of a node (`state_time`, `start_time`,
    /// `end_time`, a leaf output, or a loop's `i` and `current`).
    pub fn attr(&self, id: StateId, name: &str) -> Result<RefId, BuildError> {
        self.tree
            .get(id)?
            .attr(name)
            .ok_or_else(|| BuildError::UnknownAttribute {
                state: id,
                name: name.into(),
            })
    }

    fn keep(&mut self, r: RefId) -> Result<RefId, BuildError> {
        self.refs
            .pin(r)
            .map_err(|_| BuildError::StaleReference(r))?;
        Ok(r)
    }

    fn keep_duration(&mut self, spec: DurationSpec) -> Result<DurationSpec, BuildError> {
        if let DurationSpec::Ref(r) = spec {
            self.keep(r)?;
        }
        Ok(spec)
    }

    fn add(
        &mut self,
        name: &str,
        node_type: &'static str,
        kind: NodeKind,
        outputs: &[&'static str],
    ) -> StateId {
        let parent = self.parent();
        self.tree
            .add(self.refs, Some(parent), name, node_type, kind, outputs)
    }

    /// Adds a serial child under `parent` that is not logged on its own.
    fn add_branch(&mut self, parent: StateId, name: String) -> StateId {
        let id = self
            .tree
            .add(self.refs, Some(parent), &name, "serial", NodeKind::Serial, &[]);
        self.tree.node_mut(id).save_log = false;
        id
    }

    /// Runs `f` with `id` as the open composite, restoring the stack after.
    fn scoped(
        &mut self,
        id: StateId,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<(), BuildError> {
        let depth = self.stack.len();
        self.stack.push(id);
        let result = f(self);
        self.stack.truncate(depth);
        result
    }

    // -- composites ---------------------------------------------------------

    /// Opens a serial composite. Close it with [`end`](Self::end).
    pub fn begin_serial(&mut self, name: &str) -> StateId {
        let id = self.add(name, "serial", NodeKind::Serial, &[]);
        self.stack.push(id);
        id
    }

    /// Opens a parallel composite. Close it with [`end`](Self::end).
    pub fn begin_parallel(&mut self, name: &str) -> StateId {
        let id = self.add(name, "parallel", NodeKind::Parallel, &[]);
        self.stack.push(id);
        id
    }

    /// Closes the innermost open composite.
    pub fn end(&mut self) -> Result<StateId, BuildError> {
        if self.stack.len() <= 1 {
            return Err(BuildError::UnbalancedScope);
        }
        self.stack.pop().ok_or(BuildError::UnbalancedScope)
    }

    /// A serial composite whose children are added by `f`.
    pub fn serial(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<StateId, BuildError> {
        let id = self.add(name, "serial", NodeKind::Serial, &[]);
        self.scoped(id, f)?;
        Ok(id)
    }

    /// A parallel composite whose children are added by `f`.
    pub fn parallel(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<StateId, BuildError> {
        let id = self.add(name, "parallel", NodeKind::Parallel, &[]);
        self.scoped(id, f)?;
        Ok(id)
    }

    fn new_if(
        &mut self,
        parent: StateId,
        name: &str,
        cond: RefId,
    ) -> Result<(StateId, StateId), BuildError> {
        let cond = self.keep(cond)?;
        let id = self.tree.add(
            self.refs,
            Some(parent),
            name,
            "if",
            NodeKind::If(IfState {
                cond,
                outcome: None,
                elif: None,
                has_else: false,
            }),
            &[],
        );
        let then = self.add_branch(id, format!("{name}.true"));
        self.add_branch(id, format!("{name}.false"));
        Ok((id, then))
    }

    /// A conditional whose true branch is built by `f`. Follow it with
    /// [`elif`](Self::elif) or [`else_`](Self::else_) to fill the false
    /// branch. The condition is evaluated when the node enters; while it is
    /// not available the node waits.
    pub fn if_(
        &mut self,
        name: &str,
        cond: RefId,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<StateId, BuildError> {
        let (id, then) = self.new_if(self.parent(), name, cond)?;
        self.scoped(then, f)?;
        Ok(id)
    }

    /// The last conditional of the chain ending at the previous sibling.
    fn chain_tail(&self, keyword: &'static str) -> Result<StateId, BuildError> {
        let prev = self
            .tree
            .children(self.parent())
            .last()
            .copied()
            .ok_or(BuildError::DanglingBranch(keyword))?;
        let mut tail = prev;
        loop {
            let NodeKind::If(state) = &self.tree.node(tail).kind else {
                return Err(BuildError::DanglingBranch(keyword));
            };
            if state.has_else {
                return Err(BuildError::DuplicateElse);
            }
            match state.elif {
                Some(next) => tail = next,
                None => return Ok(tail),
            }
        }
    }

    /// Adds another condition to the chain started by the preceding
    /// [`if_`](Self::if_). Returns the nested conditional.
    pub fn elif(
        &mut self,
        cond: RefId,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<StateId, BuildError> {
        let tail = self.chain_tail("elif")?;
        let otherwise = self.tree.node(tail).children[1];
        let name = format!("{}.elif", self.tree.node(tail).name);
        let (id, then) = self.new_if(otherwise, &name, cond)?;
        if let NodeKind::If(state) = &mut self.tree.node_mut(tail).kind {
            state.elif = Some(id);
        }
        self.scoped(then, f)?;
        Ok(id)
    }

    /// Fills the false branch of the chain started by the preceding
    /// [`if_`](Self::if_). Returns the branch.
    pub fn else_(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<StateId, BuildError> {
        let tail = self.chain_tail("else_")?;
        let otherwise = self.tree.node(tail).children[1];
        if let NodeKind::If(state) = &mut self.tree.node_mut(tail).kind {
            state.has_else = true;
        }
        self.scoped(otherwise, f)?;
        Ok(otherwise)
    }

    fn new_loop(
        &mut self,
        name: &str,
        mode: LoopMode,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<StateId, BuildError> {
        let id = self.add(
            name,
            "loop",
            NodeKind::Loop(LoopState {
                mode,
                index: 0,
                iteration_start: None,
            }),
            &["i"],
        );
        let i = self.attr(id, "i")?;
        let current = match mode {
            LoopMode::Over(seq) => {
                let item = self.refs.get_item(seq, i);
                self.keep(item)?
            }
            LoopMode::While(_) | LoopMode::Times(_) => i,
        };
        self.tree.node_mut(id).derived.push(("current", current));
        let body = self.add_branch(id, format!("{name}.body"));
        self.scoped(body, f)?;
        Ok(id)
    }

    /// Runs the body built by `f` once per element of `seq` (a list, tuple
    /// or string). Inside, the loop's `i` and `current` attributes give the
    /// index and element.
    pub fn loop_over(
        &mut self,
        name: &str,
        seq: RefId,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<StateId, BuildError> {
        let seq = self.keep(seq)?;
        self.new_loop(name, LoopMode::Over(seq), f)
    }

    /// Runs the body while `cond` is truthy, checked before each iteration.
    pub fn loop_while(
        &mut self,
        name: &str,
        cond: RefId,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<StateId, BuildError> {
        let cond = self.keep(cond)?;
        self.new_loop(name, LoopMode::While(cond), f)
    }

    /// Runs the body `n` times.
    pub fn loop_times(
        &mut self,
        name: &str,
        n: u64,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<StateId, BuildError> {
        self.new_loop(name, LoopMode::Times(n), f)
    }

    /// Runs what `f` builds alongside the previous sibling, cancelling it
    /// once the previous sibling ends.
    pub fn meanwhile(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<StateId, BuildError> {
        self.pair("meanwhile", false, f)
    }

    /// Runs the previous sibling until what `f` builds ends, then cancels
    /// the previous sibling.
    pub fn until_done(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<StateId, BuildError> {
        self.pair("until_done", true, f)
    }

    /// Moves the previous sibling under a new parallel and adds what `f`
    /// builds next to it with the given blocking flag.
    fn pair(
        &mut self,
        label: &'static str,
        blocking: bool,
        f: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<StateId, BuildError> {
        let prev = self
            .tree
            .children(self.parent())
            .last()
            .copied()
            .ok_or(BuildError::MissingSibling(label))?;
        let name = format!("{}.{label}", self.tree.node(prev).name);
        let id = self.add(&name, "parallel", NodeKind::Parallel, &[]);
        self.tree.claim(prev, id)?;
        self.tree.node_mut(prev).blocking = !blocking;
        self.scoped(id, f)?;
        let added: Vec<StateId> = self.tree.children(id)[1..].to_vec();
        for child in added {
            self.tree.node_mut(child).blocking = blocking;
        }
        Ok(id)
    }

    // -- leaves -------------------------------------------------------------

    /// Adds a leaf. It is self-paced until given a duration with
    /// [`set_duration`](Self::set_duration).
    pub fn leaf(&mut self, name: &str, leaf: Box<dyn Leaf>) -> StateId {
        let (node_type, outputs) = (leaf.kind(), leaf.outputs());
        self.add(name, node_type, NodeKind::Leaf(Some(leaf)), outputs)
    }

    /// A leaf with a duration.
    pub fn leaf_for(
        &mut self,
        name: &str,
        leaf: Box<dyn Leaf>,
        duration: DurationSpec,
    ) -> Result<StateId, BuildError> {
        let id = self.leaf(name, leaf);
        self.set_duration(id, duration)?;
        Ok(id)
    }

    /// Waits for `duration`.
    pub fn wait(&mut self, name: &str, duration: DurationSpec) -> Result<StateId, BuildError> {
        self.leaf_for(name, Box::new(Wait::new()), duration)
    }

    /// Waits until `cond` is truthy.
    pub fn wait_until(&mut self, name: &str, cond: RefId) -> Result<StateId, BuildError> {
        let cond = self.keep(cond)?;
        Ok(self.leaf(name, Box::new(Wait::until(cond))))
    }

    /// Evaluates `expr` at start and publishes it as the `result` attribute.
    pub fn func(&mut self, name: &str, expr: RefId) -> Result<StateId, BuildError> {
        let expr = self.keep(expr)?;
        Ok(self.leaf(name, Box::new(Func::new(expr))))
    }

    /// Sets variable `var` to the value of `value` at start.
    pub fn set_var(&mut self, name: &str, var: &str, value: RefId) -> Result<StateId, BuildError> {
        let value = self.keep(value)?;
        Ok(self.leaf(name, Box::new(SetVar::new(var, value))))
    }

    /// Writes a custom record of named expressions at start.
    pub fn record<K: Into<String>>(
        &mut self,
        name: &str,
        fields: impl IntoIterator<Item = (K, RefId)>,
    ) -> Result<StateId, BuildError> {
        let mut kept: Vec<(String, RefId)> = Vec::new();
        for (k, r) in fields {
            kept.push((k.into(), self.keep(r)?));
        }
        Ok(self.leaf(name, Box::new(Record::new(kept))))
    }

    /// Logs named expressions through the `log` facade at start.
    pub fn debug<K: Into<String>>(
        &mut self,
        name: &str,
        label: &str,
        values: impl IntoIterator<Item = (K, RefId)>,
    ) -> Result<StateId, BuildError> {
        let mut kept: Vec<(String, RefId)> = Vec::new();
        for (k, r) in values {
            kept.push((k.into(), self.keep(r)?));
        }
        Ok(self.leaf(name, Box::new(DebugPrint::new(label, kept))))
    }

    /// Ends the nearest enclosing loop.
    pub fn break_loop(&mut self, name: &str) -> StateId {
        self.leaf(name, Box::new(Break))
    }

    /// Shows `drawable` for `duration`.
    pub fn visual(
        &mut self,
        name: &str,
        drawable: Box<dyn Drawable>,
        duration: DurationSpec,
    ) -> Result<StateId, BuildError> {
        self.leaf_for(name, Box::new(Visual::new(drawable)), duration)
    }

    // -- node settings ------------------------------------------------------

    /// Whether a parallel parent waits for `id`. Defaults to `true`.
    pub fn set_blocking(&mut self, id: StateId, blocking: bool) -> Result<(), BuildError> {
        self.tree.get_mut(id)?.blocking = blocking;
        Ok(())
    }

    /// Whether `id` writes a record when it finalizes. Defaults to `true`.
    pub fn set_save_log(&mut self, id: StateId, save_log: bool) -> Result<(), BuildError> {
        self.tree.get_mut(id)?.save_log = save_log;
        Ok(())
    }

    /// Adds a uniformly drawn `[0, jitter)` to the leaf's duration.
    pub fn set_jitter(&mut self, id: StateId, jitter: Duration) -> Result<(), BuildError> {
        self.tree.get_mut(id)?.jitter = Some(jitter);
        Ok(())
    }

    /// How long a leaf runs. Composites take their length from their
    /// children and ignore it.
    pub fn set_duration(&mut self, id: StateId, duration: DurationSpec) -> Result<(), BuildError> {
        self.tree.get(id)?;
        let duration = self.keep_duration(duration)?;
        self.tree.node_mut(id).duration = duration;
        Ok(())
    }

    /// Adds an expression to the node's log record under `name`.
    pub fn log_attr(&mut self, id: StateId, name: &str, expr: RefId) -> Result<(), BuildError> {
        self.tree.get(id)?;
        let expr = self.keep(expr)?;
        self.tree.node_mut(id).log_attrs.push((name.into(), expr));
        Ok(())
    }

    /// Moves `child` under `new_parent`. See [`StateTree::claim`].
    pub fn claim(&mut self, child: StateId, new_parent: StateId) -> Result<(), BuildError> {
        self.tree.claim(child, new_parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Timebase;
    use crate::value::Value;

    fn parts() -> (StateTree, RefGraph, Variables) {
        let mut refs = RefGraph::new();
        let tree = StateTree::new(&mut refs, "experiment");
        (tree, refs, Variables::new())
    }

    fn secs(s: u64) -> DurationSpec {
        DurationSpec::Fixed(Duration::from_millis(s * 1000, Timebase::NANOS))
    }

    #[test]
    fn scoped_helpers_nest_and_restore_the_stack() {
        let (mut tree, mut refs, mut vars) = parts();
        let mut b = TreeBuilder::new(&mut tree, &mut refs, &mut vars);
        let outer = b
            .serial("outer", |b| {
                b.wait("a", secs(1))?;
                b.parallel("p", |b| {
                    b.wait("x", secs(1))?;
                    b.wait("y", secs(2))?;
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        assert_eq!(b.parent(), StateId::ROOT, "scope closed");
        let t = b.tree();
        assert_eq!(t.children(StateId::ROOT), [outer]);
        let p = t.find("p").unwrap();
        assert_eq!(t.children(outer), [t.find("a").unwrap(), p]);
        assert_eq!(t.children(p).len(), 2);
        assert_eq!(t.node_type(p), Some("parallel"));
    }

    #[test]
    fn begin_and_end_must_balance() {
        let (mut tree, mut refs, mut vars) = parts();
        let mut b = TreeBuilder::new(&mut tree, &mut refs, &mut vars);
        let s = b.begin_serial("s");
        assert_eq!(b.parent(), s);
        assert_eq!(b.end(), Ok(s));
        assert_eq!(b.end(), Err(BuildError::UnbalancedScope));
    }

    #[test]
    fn failing_scope_still_closes() {
        let (mut tree, mut refs, mut vars) = parts();
        let mut b = TreeBuilder::new(&mut tree, &mut refs, &mut vars);
        let err = b.serial("s", |b| {
            b.begin_serial("left open");
            Err(BuildError::UnbalancedScope)
        });
        assert!(err.is_err());
        assert_eq!(b.parent(), StateId::ROOT);
    }

    #[test]
    fn elif_and_else_extend_the_chain() {
        let (mut tree, mut refs, mut vars) = parts();
        let mut b = TreeBuilder::new(&mut tree, &mut refs, &mut vars);
        let t = b.refs().constant(true);
        let f = b.refs().constant(false);
        let root_if = b.if_("check", f, |b| b.wait("a", secs(1)).map(drop)).unwrap();
        let nested = b.elif(t, |b| b.wait("b", secs(1)).map(drop)).unwrap();
        let otherwise = b.else_(|b| b.wait("c", secs(1)).map(drop)).unwrap();
        assert_eq!(b.else_(|_| Ok(())), Err(BuildError::DuplicateElse));
        assert_eq!(
            b.elif(t, |_| Ok(())),
            Err(BuildError::DuplicateElse),
            "nothing may follow else_"
        );

        let tree = b.tree();
        assert_eq!(tree.children(StateId::ROOT), [root_if]);
        let false_branch = tree.children(root_if)[1];
        assert_eq!(tree.children(false_branch), [nested]);
        assert_eq!(tree.children(nested)[1], otherwise);
        assert_eq!(tree.children(otherwise), [tree.find("c").unwrap()]);
    }

    #[test]
    fn branches_need_a_preceding_if() {
        let (mut tree, mut refs, mut vars) = parts();
        let mut b = TreeBuilder::new(&mut tree, &mut refs, &mut vars);
        let t = b.refs().constant(true);
        assert_eq!(b.else_(|_| Ok(())), Err(BuildError::DanglingBranch("else_")));
        b.wait("w", secs(1)).unwrap();
        assert_eq!(b.elif(t, |_| Ok(())), Err(BuildError::DanglingBranch("elif")));
    }

    #[test]
    fn meanwhile_wraps_the_previous_sibling() {
        let (mut tree, mut refs, mut vars) = parts();
        let mut b = TreeBuilder::new(&mut tree, &mut refs, &mut vars);
        assert_eq!(
            b.meanwhile(|_| Ok(())),
            Err(BuildError::MissingSibling("meanwhile"))
        );
        let main = b.wait("main", secs(2)).unwrap();
        let pair = b
            .meanwhile(|b| b.wait("side", DurationSpec::SelfPaced).map(drop))
            .unwrap();
        let tree = b.tree();
        let side = tree.find("side").unwrap();
        assert_eq!(tree.children(StateId::ROOT), [pair]);
        assert_eq!(tree.children(pair), [main, side]);
        assert!(tree.is_blocking(main), "previous sibling decides");
        assert!(!tree.is_blocking(side), "new state is cancelled");
    }

    #[test]
    fn until_done_flips_blocking() {
        let (mut tree, mut refs, mut vars) = parts();
        let mut b = TreeBuilder::new(&mut tree, &mut refs, &mut vars);
        let main = b.wait("main", DurationSpec::SelfPaced).unwrap();
        let pair = b
            .until_done(|b| b.wait("timeout", secs(1)).map(drop))
            .unwrap();
        let tree = b.tree();
        let timeout = tree.find("timeout").unwrap();
        assert_eq!(tree.children(pair), [main, timeout]);
        assert!(!tree.is_blocking(main));
        assert!(tree.is_blocking(timeout));
    }

    #[test]
    fn loops_expose_index_and_current() {
        let (mut tree, mut refs, mut vars) = parts();
        let mut b = TreeBuilder::new(&mut tree, &mut refs, &mut vars);
        let seq = b.refs().constant(Value::list([Value::Int(10), Value::Int(20)]));
        let l = b
            .loop_over("trials", seq, |b| b.wait("w", secs(1)).map(drop))
            .unwrap();
        let i = b.attr(l, "i").unwrap();
        let current = b.attr(l, "current").unwrap();
        b.refs().set(i, Value::Int(1)).unwrap();
        assert_eq!(b.refs().eval(current), Ok(Value::Int(20)));
        assert_eq!(
            b.attr(l, "nope"),
            Err(BuildError::UnknownAttribute {
                state: l,
                name: "nope".into()
            })
        );
        let body = b.tree().children(l)[0];
        assert_eq!(b.tree().children(body), [b.tree().find("w").unwrap()]);
    }

    #[test]
    fn stored_references_are_pinned() {
        let (mut tree, mut refs, mut vars) = parts();
        let mut b = TreeBuilder::new(&mut tree, &mut refs, &mut vars);
        let one = b.refs().constant(1);
        let two = b.refs().constant(2);
        let sum = b.refs().add(one, two);
        let f = b.func("f", sum).unwrap();
        let stray = b.refs().constant(99);
        assert!(b.refs().collect_garbage() > 0, "unpinned constant is freed");
        assert!(b.refs().is_alive(sum), "func expression survives collection");
        assert!(!b.refs().is_alive(stray));
        assert_eq!(b.func("g", stray), Err(BuildError::StaleReference(stray)));
        assert_eq!(b.tree().node_type(f), Some("func"));
        assert!(b.attr(f, "result").is_ok());
    }
}
