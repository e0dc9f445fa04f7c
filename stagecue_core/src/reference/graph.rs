// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reference arena: allocation, deduplication, subscriptions and collection.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::error::{EvalError, EvalErrorKind};
use crate::value::{BinaryOp, UnaryOp, Value};

use super::node::{NodeKey, RefNode};
use super::{RefFunction, RefId, WatchId};

/// A change callback. Receives the watched reference.
pub type ChangeCallback = Box<dyn FnMut(RefId)>;

struct Watcher {
    id: WatchId,
    callback: ChangeCallback,
}

struct Slot {
    node: Option<RefNode>,
    generation: u32,
    cache: Option<Value>,
    /// Dependents currently subscribed to this node.
    subscribers: Vec<u32>,
    watchers: Vec<Watcher>,
    pinned: u32,
}

impl Slot {
    fn interest(&self) -> usize {
        self.subscribers.len() + self.watchers.len()
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("node", &self.node)
            .field("generation", &self.generation)
            .field("cached", &self.cache.is_some())
            .field("subscribers", &self.subscribers)
            .field("watchers", &self.watchers.len())
            .field("pinned", &self.pinned)
            .finish()
    }
}

/// Evaluation counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvalStats {
    /// Nodes computed (cache misses).
    pub evaluations: u64,
    /// Reads answered from a cache.
    pub cache_hits: u64,
    /// Invocations of wrapped [`RefFunction`]s.
    pub function_calls: u64,
}

/// Arena owning every reference node.
#[derive(Debug, Default)]
pub struct RefGraph {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    dedup: BTreeMap<NodeKey, RefId>,
    next_watch: u64,
    pub(super) stats: EvalStats,
}

impl RefGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -- Allocation --

    fn alloc(&mut self, node: RefNode) -> RefId {
        let key = node.key();
        if let Some(key) = &key
            && let Some(&existing) = self.dedup.get(key)
            && self.is_alive(existing)
        {
            return existing;
        }

        let slot = Slot {
            node: Some(node),
            generation: 0,
            cache: None,
            subscribers: Vec::new(),
            watchers: Vec::new(),
            pinned: 0,
        };
        let id = if let Some(idx) = self.free_list.pop() {
            let generation = self.slots[idx as usize].generation;
            self.slots[idx as usize] = Slot {
                generation,
                ..slot
            };
            RefId { idx, generation }
        } else {
            let idx = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(slot);
            RefId { idx, generation: 0 }
        };
        if let Some(key) = key {
            self.dedup.insert(key, id);
        }
        id
    }

    /// Returns whether the handle refers to a live node.
    #[must_use]
    pub fn is_alive(&self, id: RefId) -> bool {
        self.slots
            .get(id.idx as usize)
            .is_some_and(|s| s.generation == id.generation && s.node.is_some())
    }

    pub(super) fn live(&self, id: RefId) -> Result<usize, EvalError> {
        if self.is_alive(id) {
            Ok(id.idx as usize)
        } else {
            Err(EvalError {
                node: id,
                kind: EvalErrorKind::StaleHandle,
            })
        }
    }

    pub(super) fn node(&self, idx: usize) -> Option<&RefNode> {
        self.slots[idx].node.as_ref()
    }

    pub(super) fn cached(&self, idx: usize) -> Option<&Value> {
        self.slots[idx].cache.as_ref()
    }

    pub(super) fn store_cache(&mut self, idx: usize, value: &Value) {
        let slot = &mut self.slots[idx];
        let cacheable = slot.interest() > 0 && slot.node.as_ref().is_some_and(RefNode::uses_cache);
        if cacheable {
            slot.cache = Some(value.clone());
        }
    }

    // -- Construction --

    /// A constant.
    pub fn constant(&mut self, value: impl Into<Value>) -> RefId {
        self.alloc(RefNode::Const(value.into()))
    }

    /// A settable slot, initialised to `value`.
    pub fn source(&mut self, value: impl Into<Value>) -> RefId {
        self.alloc(RefNode::Source(value.into()))
    }

    /// Applies a unary operator.
    pub fn unary(&mut self, op: UnaryOp, operand: RefId) -> RefId {
        self.alloc(RefNode::Unary(op, operand))
    }

    /// Applies a binary operator.
    pub fn binary(&mut self, op: BinaryOp, lhs: RefId, rhs: RefId) -> RefId {
        self.alloc(RefNode::Binary(op, lhs, rhs))
    }

    /// `lhs + rhs`
    pub fn add(&mut self, lhs: RefId, rhs: RefId) -> RefId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    /// `lhs - rhs`
    pub fn sub(&mut self, lhs: RefId, rhs: RefId) -> RefId {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    /// `lhs * rhs`
    pub fn mul(&mut self, lhs: RefId, rhs: RefId) -> RefId {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    /// `lhs / rhs`
    pub fn div(&mut self, lhs: RefId, rhs: RefId) -> RefId {
        self.binary(BinaryOp::Div, lhs, rhs)
    }

    /// `lhs == rhs`
    pub fn eq(&mut self, lhs: RefId, rhs: RefId) -> RefId {
        self.binary(BinaryOp::Eq, lhs, rhs)
    }

    /// `lhs < rhs`
    pub fn lt(&mut self, lhs: RefId, rhs: RefId) -> RefId {
        self.binary(BinaryOp::Lt, lhs, rhs)
    }

    /// `lhs > rhs`
    pub fn gt(&mut self, lhs: RefId, rhs: RefId) -> RefId {
        self.binary(BinaryOp::Gt, lhs, rhs)
    }

    /// `not operand`
    pub fn not(&mut self, operand: RefId) -> RefId {
        self.unary(UnaryOp::Not, operand)
    }

    /// `item in container`
    pub fn contains(&mut self, container: RefId, item: RefId) -> RefId {
        self.binary(BinaryOp::Contains, container, item)
    }

    /// `target.name`
    pub fn get_attr(&mut self, target: RefId, name: impl Into<String>) -> RefId {
        self.alloc(RefNode::GetAttr(target, name.into()))
    }

    /// `target[index]`
    pub fn get_item(&mut self, target: RefId, index: RefId) -> RefId {
        self.alloc(RefNode::GetItem(target, index))
    }

    /// `target[index]` with a constant index.
    pub fn index(&mut self, target: RefId, index: impl Into<Value>) -> RefId {
        let index = self.constant(index);
        self.get_item(target, index)
    }

    /// `target[start:stop:step]`; each bound must evaluate to an integer or
    /// `None`.
    pub fn slice(
        &mut self,
        target: RefId,
        start: Option<RefId>,
        stop: Option<RefId>,
        step: Option<RefId>,
    ) -> RefId {
        self.alloc(RefNode::Slice(target, [start, stop, step]))
    }

    /// A list of the given references.
    pub fn list(&mut self, items: impl IntoIterator<Item = RefId>) -> RefId {
        self.alloc(RefNode::List(items.into_iter().collect()))
    }

    /// A tuple of the given references.
    pub fn tuple(&mut self, items: impl IntoIterator<Item = RefId>) -> RefId {
        self.alloc(RefNode::Tuple(items.into_iter().collect()))
    }

    /// A dict of the given named references.
    pub fn dict<K: Into<String>>(
        &mut self,
        entries: impl IntoIterator<Item = (K, RefId)>,
    ) -> RefId {
        self.alloc(RefNode::Dict(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// `if_true if test else if_false`, evaluating only the selected branch.
    pub fn cond(&mut self, test: RefId, if_true: RefId, if_false: RefId) -> RefId {
        self.alloc(RefNode::Cond(test, if_true, if_false))
    }

    /// `func(*args)`
    pub fn call(&mut self, func: RefFunction, args: impl IntoIterator<Item = RefId>) -> RefId {
        self.alloc(RefNode::Call(func, args.into_iter().collect()))
    }

    // -- Sources --

    /// Replaces the value of a source slot and notifies dependents.
    pub fn set(&mut self, id: RefId, value: impl Into<Value>) -> Result<(), EvalError> {
        let idx = self.live(id)?;
        match &mut self.slots[idx].node {
            Some(RefNode::Source(slot)) => *slot = value.into(),
            _ => {
                return Err(EvalError {
                    node: id,
                    kind: EvalErrorKind::BadOperand {
                        op: "set",
                        operand: "derived reference",
                    },
                });
            }
        }
        self.dep_changed(id);
        Ok(())
    }

    // -- Subscriptions --

    /// Registers a change callback on `id`.
    pub fn add_change_callback(
        &mut self,
        id: RefId,
        callback: ChangeCallback,
    ) -> Result<WatchId, EvalError> {
        let idx = self.live(id)?;
        let watch = WatchId(self.next_watch);
        self.next_watch += 1;
        let first = self.slots[idx].interest() == 0;
        self.slots[idx].watchers.push(Watcher {
            id: watch,
            callback,
        });
        if first {
            self.subscribe_operands(idx);
        }
        Ok(watch)
    }

    /// Removes a change callback. Returns `false` if it was not registered.
    pub fn remove_change_callback(&mut self, id: RefId, watch: WatchId) -> bool {
        let Ok(idx) = self.live(id) else {
            return false;
        };
        let Some(pos) = self.slots[idx].watchers.iter().position(|w| w.id == watch) else {
            return false;
        };
        drop(self.slots[idx].watchers.remove(pos));
        if self.slots[idx].interest() == 0 {
            self.unsubscribe_operands(idx);
        }
        true
    }

    /// Number of watchers plus subscribed dependents of `id`.
    #[must_use]
    pub fn interest(&self, id: RefId) -> usize {
        self.live(id).map_or(0, |idx| self.slots[idx].interest())
    }

    /// Returns `true` if `id` currently holds a cached value.
    #[must_use]
    pub fn is_cached(&self, id: RefId) -> bool {
        self.live(id).is_ok_and(|idx| self.slots[idx].cache.is_some())
    }

    fn operands_of(&self, idx: usize) -> Vec<RefId> {
        self.slots[idx]
            .node
            .as_ref()
            .map(RefNode::operands)
            .unwrap_or_default()
    }

    /// Called when `idx` gains its first interest.
    fn subscribe_operands(&mut self, idx: usize) {
        self.slots[idx].cache = None;
        let dependent = u32::try_from(idx).unwrap_or(u32::MAX);
        for op in self.operands_of(idx) {
            let Ok(op_idx) = self.live(op) else { continue };
            let first = self.slots[op_idx].interest() == 0;
            self.slots[op_idx].subscribers.push(dependent);
            if first {
                self.subscribe_operands(op_idx);
            }
        }
    }

    /// Called when `idx` loses its last interest.
    fn unsubscribe_operands(&mut self, idx: usize) {
        self.slots[idx].cache = None;
        let dependent = u32::try_from(idx).unwrap_or(u32::MAX);
        for op in self.operands_of(idx) {
            let Ok(op_idx) = self.live(op) else { continue };
            let subs = &mut self.slots[op_idx].subscribers;
            if let Some(pos) = subs.iter().position(|&s| s == dependent) {
                subs.swap_remove(pos);
            }
            if self.slots[op_idx].interest() == 0 {
                self.unsubscribe_operands(op_idx);
            }
        }
    }

    /// Invalidates `id` and everything subscribed to it, then runs each
    /// affected watcher once.
    pub fn dep_changed(&mut self, id: RefId) {
        if !self.is_alive(id) {
            return;
        }
        let mut visited = BTreeSet::new();
        let mut stack = vec![id.idx];
        let mut fire = Vec::new();
        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            let slot = &mut self.slots[idx as usize];
            slot.cache = None;
            if !slot.watchers.is_empty() {
                fire.push(idx);
            }
            stack.extend(slot.subscribers.iter().copied());
        }
        for idx in fire {
            let slot = &mut self.slots[idx as usize];
            let watched = RefId {
                idx,
                generation: slot.generation,
            };
            for watcher in &mut slot.watchers {
                (watcher.callback)(watched);
            }
        }
    }

    // -- Collection --

    /// Keeps `id` (and everything it depends on) alive across
    /// [`collect_garbage`](Self::collect_garbage).
    pub fn pin(&mut self, id: RefId) -> Result<(), EvalError> {
        let idx = self.live(id)?;
        self.slots[idx].pinned += 1;
        Ok(())
    }

    /// Releases one [`pin`](Self::pin).
    pub fn unpin(&mut self, id: RefId) -> Result<(), EvalError> {
        let idx = self.live(id)?;
        self.slots[idx].pinned = self.slots[idx].pinned.saturating_sub(1);
        Ok(())
    }

    /// Frees every node not reachable from a pinned or watched node.
    /// Returns how many nodes were freed.
    pub fn collect_garbage(&mut self) -> usize {
        let mut marked = vec![false; self.slots.len()];
        let mut stack: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.node.is_some() && (s.pinned > 0 || !s.watchers.is_empty()))
            .map(|(i, _)| i)
            .collect();
        while let Some(idx) = stack.pop() {
            if marked[idx] {
                continue;
            }
            marked[idx] = true;
            for op in self.operands_of(idx) {
                if let Ok(op_idx) = self.live(op) {
                    stack.push(op_idx);
                }
            }
        }

        let mut freed = 0;
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.node.is_none() || marked[idx] {
                continue;
            }
            if let Some(key) = slot.node.as_ref().and_then(RefNode::key) {
                self.dedup.remove(&key);
            }
            slot.node = None;
            slot.cache = None;
            slot.subscribers.clear();
            slot.generation += 1;
            self.free_list.push(u32::try_from(idx).unwrap_or(u32::MAX));
            freed += 1;
        }
        freed
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    /// Returns `true` if no node is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluation counters since creation.
    #[must_use]
    pub fn stats(&self) -> EvalStats {
        self.stats
    }
}
