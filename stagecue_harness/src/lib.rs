// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Offline harness for stagecue experiments.
//!
//! - [`display::SimulatedDisplay`] is a [`Presenter`](stagecue_core::backend::Presenter)
//!   whose flips land on a simulated vertical-sync grid, with optional
//!   stalls, jitter and dropped submissions.
//! - [`stepper::Stepper`] ticks an experiment against a shared
//!   [`ManualTimeSource`](stagecue_core::time::ManualTimeSource).
//! - [`grade::FlipTimingTracker`] turns flip trace events into lateness
//!   and miss-rate figures with a letter grade.

#![no_std]

extern crate alloc;

pub mod display;
pub mod grade;
pub mod stepper;

#[cfg(test)]
mod scenarios;
