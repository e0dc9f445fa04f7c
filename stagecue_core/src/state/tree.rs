// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Arena storage for state nodes.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::BuildError;
use crate::reference::{RefGraph, RefId};
use crate::state::id::{Phase, StateId};
use crate::state::leaf::Leaf;
use crate::time::{Duration, HostTime};
use crate::value::Value;

/// How long a leaf runs once started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DurationSpec {
    /// A known duration. The leaf's end is scheduled when it enters, so the
    /// next sibling of a serial parent can be scheduled back to back.
    Fixed(Duration),
    /// Runs until the leaf reports it is done or the node is cancelled.
    SelfPaced,
    /// Resolved when the node enters: a number of seconds, or `None` for
    /// self-paced. While the reference is not available the node waits.
    Ref(RefId),
}

/// What a loop iterates over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoopMode {
    /// Each element of a list, tuple or string.
    Over(RefId),
    /// While a condition is truthy, re-evaluated before every iteration.
    While(RefId),
    /// A fixed number of iterations.
    Times(u64),
}

#[derive(Debug)]
pub(crate) struct IfState {
    pub(crate) cond: RefId,
    pub(crate) outcome: Option<bool>,
    /// The `elif` nested in the false branch, if any.
    pub(crate) elif: Option<StateId>,
    pub(crate) has_else: bool,
}

#[derive(Debug)]
pub(crate) struct LoopState {
    pub(crate) mode: LoopMode,
    pub(crate) index: u64,
    pub(crate) iteration_start: Option<HostTime>,
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    Serial,
    Parallel,
    /// `children[0]` is the true branch, `children[1]` the false branch.
    If(IfState),
    /// `children[0]` is the body.
    Loop(LoopState),
    /// Taken out while one of its methods runs.
    Leaf(Option<Box<dyn Leaf>>),
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) node_type: &'static str,
    pub(crate) parent: Option<StateId>,
    pub(crate) children: Vec<StateId>,
    pub(crate) kind: NodeKind,
    pub(crate) phase: Phase,
    pub(crate) epoch: u32,
    pub(crate) blocking: bool,
    pub(crate) save_log: bool,
    pub(crate) duration: DurationSpec,
    pub(crate) jitter: Option<Duration>,
    /// Set when resolution was deferred because a value was not available.
    pub(crate) waiting: bool,
    pub(crate) state_time: Option<HostTime>,
    pub(crate) start_time: Option<HostTime>,
    pub(crate) end_time: Option<HostTime>,
    pub(crate) end_error: Duration,
    pub(crate) planned_end: Option<HostTime>,
    /// Runtime-produced values: `state_time`, `start_time`, `end_time`, then
    /// kind-specific outputs. Each is a source reference.
    pub(crate) attrs: Vec<(&'static str, RefId)>,
    /// Runtime-produced values computed from other references (a loop's
    /// `current`).
    pub(crate) derived: Vec<(&'static str, RefId)>,
    /// Extra expressions evaluated into the log record.
    pub(crate) log_attrs: Vec<(String, RefId)>,
}

impl Node {
    pub(crate) fn attr(&self, name: &str) -> Option<RefId> {
        self.attrs
            .iter()
            .chain(&self.derived)
            .find(|(n, _)| *n == name)
            .map(|(_, id)| *id)
    }

    pub(crate) fn is_composite(&self) -> bool {
        !matches!(self.kind, NodeKind::Leaf(_))
    }
}

pub(crate) const TIME_ATTRS: [&str; 3] = ["state_time", "start_time", "end_time"];

/// The tree of states of one run.
///
/// Structure is fixed once the run starts; the runtime only changes phases,
/// times and outputs. Node `0` is the root serial.
#[derive(Debug)]
pub struct StateTree {
    nodes: Vec<Node>,
}

impl StateTree {
    pub(crate) fn new(refs: &mut RefGraph, root_name: &str) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.add(refs, None, root_name, "serial", NodeKind::Serial, &[]);
        tree
    }

    /// Adds a node under `parent`, creating one pinned source per time
    /// attribute and per extra output.
    pub(crate) fn add(
        &mut self,
        refs: &mut RefGraph,
        parent: Option<StateId>,
        name: &str,
        node_type: &'static str,
        kind: NodeKind,
        outputs: &[&'static str],
    ) -> StateId {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "state trees are far smaller than u32::MAX nodes"
        )]
        let id = StateId(self.nodes.len() as u32);
        let mut attrs = Vec::with_capacity(TIME_ATTRS.len() + outputs.len());
        for name in TIME_ATTRS.iter().chain(outputs) {
            let source = refs.source(Value::NotAvailable);
            // A fresh source is always live.
            _ = refs.pin(source);
            attrs.push((*name, source));
        }
        self.nodes.push(Node {
            name: name.into(),
            node_type,
            parent,
            children: Vec::new(),
            kind,
            phase: Phase::Idle,
            epoch: 0,
            blocking: true,
            save_log: true,
            duration: DurationSpec::SelfPaced,
            jitter: None,
            waiting: false,
            state_time: None,
            start_time: None,
            end_time: None,
            end_error: Duration::ZERO,
            planned_end: None,
            attrs,
            derived: Vec::new(),
            log_attrs: Vec::new(),
        });
        if let Some(p) = parent {
            self.nodes[p.index()].children.push(id);
        }
        id
    }

    pub(crate) fn node(&self, id: StateId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: StateId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub(crate) fn get(&self, id: StateId) -> Result<&Node, BuildError> {
        self.nodes.get(id.index()).ok_or(BuildError::UnknownState(id))
    }

    pub(crate) fn get_mut(&mut self, id: StateId) -> Result<&mut Node, BuildError> {
        self.nodes
            .get_mut(id.index())
            .ok_or(BuildError::UnknownState(id))
    }

    /// The root serial.
    #[must_use]
    pub fn root(&self) -> StateId {
        StateId::ROOT
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: a tree has at least its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns `true` if `id` names a node of this tree.
    #[must_use]
    pub fn contains(&self, id: StateId) -> bool {
        id.index() < self.nodes.len()
    }

    /// The node's name.
    #[must_use]
    pub fn name(&self, id: StateId) -> Option<&str> {
        self.nodes.get(id.index()).map(|n| n.name.as_str())
    }

    /// The node's type label (`"serial"`, `"wait"`, ...).
    #[must_use]
    pub fn node_type(&self, id: StateId) -> Option<&'static str> {
        self.nodes.get(id.index()).map(|n| n.node_type)
    }

    /// First node with the given name, in creation order.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<StateId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .and_then(|i| u32::try_from(i).ok())
            .map(StateId)
    }

    /// The node's parent.
    #[must_use]
    pub fn parent(&self, id: StateId) -> Option<StateId> {
        self.nodes.get(id.index()).and_then(|n| n.parent)
    }

    /// The node's children in order.
    #[must_use]
    pub fn children(&self, id: StateId) -> &[StateId] {
        self.nodes
            .get(id.index())
            .map_or(&[], |n| n.children.as_slice())
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self, id: StateId) -> Option<Phase> {
        self.nodes.get(id.index()).map(|n| n.phase)
    }

    /// How many times the node was reset by an enclosing loop.
    #[must_use]
    pub fn epoch(&self, id: StateId) -> Option<u32> {
        self.nodes.get(id.index()).map(|n| n.epoch)
    }

    /// Logical time the parent scheduled the node for.
    #[must_use]
    pub fn state_time(&self, id: StateId) -> Option<HostTime> {
        self.nodes.get(id.index()).and_then(|n| n.state_time)
    }

    /// Logical start time.
    #[must_use]
    pub fn start_time(&self, id: StateId) -> Option<HostTime> {
        self.nodes.get(id.index()).and_then(|n| n.start_time)
    }

    /// Logical end time.
    #[must_use]
    pub fn end_time(&self, id: StateId) -> Option<HostTime> {
        self.nodes.get(id.index()).and_then(|n| n.end_time)
    }

    /// Whether a parallel parent waits for this node.
    #[must_use]
    pub fn is_blocking(&self, id: StateId) -> bool {
        self.nodes.get(id.index()).is_some_and(|n| n.blocking)
    }

    /// The source reference holding a runtime-produced attribute
    /// (`state_time`, `start_time`, `end_time`, or a kind-specific output).
    #[must_use]
    pub fn attr(&self, id: StateId, name: &str) -> Option<RefId> {
        self.nodes.get(id.index()).and_then(|n| n.attr(name))
    }

    /// Names of the node's attributes.
    pub fn attr_names(&self, id: StateId) -> impl Iterator<Item = &'static str> + '_ {
        self.nodes
            .get(id.index())
            .into_iter()
            .flat_map(|n| n.attrs.iter().chain(&n.derived).map(|(name, _)| *name))
    }

    /// Iterates over the node's ancestors, nearest first.
    pub fn ancestors(&self, id: StateId) -> impl Iterator<Item = StateId> + '_ {
        core::iter::successors(self.parent(id), |p| self.parent(*p))
    }

    /// Moves `child` under `new_parent`, detaching it from its old parent.
    ///
    /// Only serial and parallel nodes accept claimed children, the root can't
    /// be moved, and a node can't be moved under itself or its descendants.
    pub fn claim(&mut self, child: StateId, new_parent: StateId) -> Result<(), BuildError> {
        if child == StateId::ROOT {
            return Err(BuildError::ClaimRoot);
        }
        let target = self.get(new_parent)?;
        if !matches!(target.kind, NodeKind::Serial | NodeKind::Parallel) {
            return Err(BuildError::NotAComposite(new_parent));
        }
        if target.phase != Phase::Idle {
            return Err(BuildError::AlreadyRunning(new_parent));
        }
        if self.get(child)?.phase != Phase::Idle {
            return Err(BuildError::AlreadyRunning(child));
        }
        if new_parent == child || self.ancestors(new_parent).any(|a| a == child) {
            return Err(BuildError::Cycle {
                child,
                parent: new_parent,
            });
        }
        if let Some(old) = self.node(child).parent {
            self.node_mut(old).children.retain(|c| *c != child);
        }
        self.node_mut(child).parent = Some(new_parent);
        self.node_mut(new_parent).children.push(child);
        Ok(())
    }

    /// Every node in the subtree rooted at `id`, parents before children.
    pub(crate) fn subtree(&self, id: StateId) -> Vec<StateId> {
        let mut out = Vec::new();
        let mut stack = alloc::vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.node(n).children.iter().rev().copied());
        }
        out
    }
}
