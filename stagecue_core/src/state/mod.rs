// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hierarchical states.
//!
//! A run is a tree of nodes. Composites ([`serial`](TreeBuilder::serial),
//! [`parallel`](TreeBuilder::parallel), [`if_`](TreeBuilder::if_) and the
//! loops) decide when their children run; leaves ([`Leaf`]) do the work.
//! Every node goes through the same lifecycle (see [`Phase`]) and publishes
//! its logical `state_time`, `start_time` and `end_time` as source references
//! other nodes can build expressions on.
//!
//! # Logical time
//!
//! A node's times come from its parent, not from the tick that processed
//! it. When a leaf with a known duration enters, its end is known at once,
//! and a serial parent enters the next child at exactly that time. Times
//! only fall back to the tick clock when nothing better is known: a
//! self-paced leaf that finishes on a poll ends at the tick's time (with the
//! tick's error bound recorded in `end_time_error`).
//!
//! # Not-yet-available values
//!
//! A node that needs a value to start (a reference duration, a condition, a
//! loop's sequence) and finds it [`NotAvailable`](crate::value::Value::NotAvailable)
//! stays pending and retries on every settle pass. It starts at the later
//! of its scheduled time and the tick where the value appeared.

mod builder;
mod builtin;
mod id;
mod leaf;
pub(crate) mod run;
mod tree;

pub use builder::TreeBuilder;
pub use builtin::{Break, DebugPrint, Drawable, Func, Record, SetVar, Visual, Wait};
pub use id::{Phase, StateId};
pub use leaf::{Finalize, Leaf, LeafContext, LeafControl, Times};
pub(crate) use leaf::BreakRequest;
pub use tree::{DurationSpec, LoopMode, StateTree};
