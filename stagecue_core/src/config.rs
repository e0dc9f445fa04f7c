// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Run configuration.

use serde::{Deserialize, Serialize};

use crate::scheduler::PacerConfig;

/// Configuration for an [`Experiment`](crate::experiment::Experiment).
///
/// Missing fields fall back to [`ExperimentConfig::default`] when
/// deserialized.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Flip pacing.
    pub pacer: PacerConfig,
    /// Seed for duration jitter.
    pub seed: u64,
    /// Upper bound on clock-dispatch/advance passes per idle tick.
    pub max_settle_passes: u32,
}

impl ExperimentConfig {
    /// Configuration for runs without a display.
    #[must_use]
    pub const fn headless() -> Self {
        Self {
            pacer: PacerConfig::headless(),
            seed: 0,
            max_settle_passes: 64,
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            pacer: PacerConfig::display_60hz(),
            seed: 0,
            max_settle_passes: 64,
        }
    }
}
