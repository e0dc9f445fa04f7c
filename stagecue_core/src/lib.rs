// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Declarative runtime for timed presentation sequences.
//!
//! `stagecue_core` runs trees of states (waits, stimuli, computations,
//! loops and conditionals) against a monotonic clock, aligning visual
//! changes with display flips and logging the exact times at which things
//! happened. It is `no_std` compatible (with `alloc`).
//!
//! # Architecture
//!
//! A host drives an [`Experiment`](experiment::Experiment) by calling its
//! idle tick in a loop:
//!
//! ```text
//!   TimeSource::now()
//!       │
//!       ▼
//!   Clock::take_due() ──► Driver (enter / start / leave) ──► LogSink
//!       ▲                        │            │
//!       │                        ▼            ▼
//!   StateTree ◄── RefGraph ◄── Variables    VideoQueue
//!                                              │
//!                 ┌────────────────────────────┘
//!                 ▼
//!   FlipPacer::ready() ──► Presenter::present() ──► FlipFeedback
//!                                                       │
//!   flip_confirmed ◄──────── FlipPacer::observe() ◄─────┘
//! ```
//!
//! **[`reference`]**: Lazy expression graph over dynamic [`Value`](value::Value)s
//! with memoization, change callbacks and handle-based garbage collection.
//! Values that do not exist yet evaluate to
//! [`Value::NotAvailable`](value::Value::NotAvailable) instead of failing.
//!
//! **[`state`]**: The state tree, its builder, the leaf trait and the
//! built-in leaves. Every node has state, start and end times exposed as
//! references, so later states can be timed relative to earlier ones.
//!
//! **[`clock`]**: Priority queue of runtime events keyed by target time.
//!
//! **[`experiment`]**: Owns a tree and everything it runs against; the idle
//! tick settles the tree, paces flips and feeds confirmed flip times back.
//!
//! **[`scheduler`]**: Flip pacing with an adaptive preparation margin.
//!
//! **[`timing`]** and **[`backend`]**: Flip requests, feedback, and the
//! [`Presenter`](backend::Presenter) trait display backends implement.
//!
//! **[`record`]**: Log records and the [`LogSink`](record::LogSink) trait.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! idle-tick instrumentation, with a zero-overhead [`Tracer`](trace::Tracer)
//! wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod experiment;
pub mod record;
pub mod reference;
pub mod scheduler;
pub mod state;
pub mod time;
pub mod timing;
pub mod trace;
pub mod value;
pub mod vars;
pub mod video;
