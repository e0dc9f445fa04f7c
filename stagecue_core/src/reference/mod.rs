// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Lazy, memoized, change-notifying references.
//!
//! A *reference* is a node in an expression graph. Each reference has:
//!
//! - An identity ([`RefId`]), a generational handle that becomes stale when
//!   the node is collected.
//! - An operation: a constant, a settable source slot, a unary or binary
//!   operator, attribute/index/slice access, a container constructor, a
//!   conditional, or a call of a named [`RefFunction`].
//! - Operand handles. Operands are always created before the node that uses
//!   them, so the graph is acyclic by construction.
//!
//! Identical operations over identical operands are deduplicated: building
//! `a + b` twice returns the same handle.
//!
//! # Evaluation
//!
//! [`RefGraph::eval`] evaluates recursively. Any operand that is or contains
//! [`Value::NotAvailable`](crate::value::Value::NotAvailable) short-circuits
//! the node to `NotAvailable` without running the operation or calling the
//! wrapped function. [`cond`](RefGraph::cond) evaluates only the branch it
//! selects.
//!
//! # Change notification
//!
//! [`add_change_callback`](RefGraph::add_change_callback) registers a watcher.
//! The first watcher of a node subscribes it to all of its operands,
//! transitively; removing the last one tears those subscriptions down again.
//! [`dep_changed`](RefGraph::dep_changed) (and [`set`](RefGraph::set) on a
//! source) invalidates caches along subscriber edges and invokes each
//! affected watcher once. Values are only recomputed on the next `eval`.
//!
//! A node's cached value is only kept while the node has at least one
//! subscriber or watcher. Without one nothing would invalidate it, so it is
//! re-evaluated on every read.

mod eval;
mod graph;
mod id;
mod node;

pub use graph::{ChangeCallback, EvalStats, RefGraph};
pub use id::{RefId, WatchId};
pub use node::RefFunction;
