// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording, pretty-printing, Chrome trace export and record writing for
//! stagecue runs.
//!
//! [`TraceSink`](stagecue_core::trace::TraceSink) implementations for
//! development and post-mortem analysis:
//!
//! - [`pretty::PrettyPrintSink`]: human-readable one-line-per-event output.
//! - [`recorder::RecorderSink`]: compact binary recording with
//!   [`recorder::decode`] for playback.
//! - [`chrome::export`]: writes Chrome Trace Event Format JSON from recorded
//!   bytes.
//!
//! And one [`LogSink`](stagecue_core::record::LogSink):
//!
//! - [`jsonl::JsonLinesSink`]: one JSON object per log record.

pub mod chrome;
pub mod jsonl;
pub mod pretty;
pub mod recorder;
