// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wall-clock host for stagecue.
//!
//! This crate runs an [`Experiment`](stagecue_core::experiment::Experiment)
//! for real:
//!
//! - [`SystemTimeSource`]: monotonic nanoseconds from `std::time::Instant`
//! - [`HeadlessPresenter`]: flips without a display
//! - [`RealtimeLoop`]: ticks and sleeps precisely until the next deadline
//! - [`load_config`]: run configuration from JSON

mod config;
mod presentation;
mod realtime;
mod time;

pub use config::{ConfigError, load_config, pacer_preset, parse_config};
pub use presentation::{HeadlessPresenter, PresentEventQueue};
pub use realtime::{LoopStats, RealtimeLoop, StopHandle, wake_time};
pub use stagecue_core::backend::Presenter;
pub use time::SystemTimeSource;
