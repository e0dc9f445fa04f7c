// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flip pacing with an adaptive preparation margin.
//!
//! The [`FlipPacer`] predicts the next display flip from the last confirmed
//! one and decides whether the idle tick should start preparing visual
//! updates now. It learns how long preparation takes from [`FlipFeedback`]
//! and widens or narrows its margin according to the configured
//! [`MarginPolicy`].

use serde::{Deserialize, Serialize};

use crate::time::{Duration, HostTime};
use crate::timing::FlipFeedback;

/// Controls how the pacer adapts its extra margin in response to missed and
/// hit flips.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginPolicy {
    /// Grow the extra margin by `step` after `miss_threshold` consecutive
    /// misses, shrink it by `step` after `recovery_threshold` consecutive
    /// hits. Never exceeds `max_extra`.
    Adaptive {
        /// Consecutive misses before growing.
        miss_threshold: u32,
        /// Consecutive hits before shrinking.
        recovery_threshold: u32,
        /// Adjustment size.
        step: Duration,
        /// Upper bound on the extra margin.
        max_extra: Duration,
    },
    /// Never adjust. The cost EMA is still tracked.
    Fixed,
}

/// Configuration for the [`FlipPacer`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PacerConfig {
    /// Display refresh interval. Zero means there is no display to wait for
    /// and every tick may flip.
    pub refresh_interval: Duration,
    /// EMA smoothing factor for preparation cost (0.0–1.0).
    pub ema_alpha: f32,
    /// Multiplier applied to the smoothed preparation cost.
    pub safety_multiplier: f32,
    /// Lower bound on the preparation margin.
    pub min_margin: Duration,
    /// A flip confirmed later than its prediction by more than this counts as
    /// missed.
    pub miss_tolerance: Duration,
    /// Margin adaptation policy.
    pub policy: MarginPolicy,
}

impl PacerConfig {
    /// A 60 Hz display.
    #[must_use]
    pub const fn display_60hz() -> Self {
        Self {
            refresh_interval: Duration(16_666_667),
            ema_alpha: 0.2,
            safety_multiplier: 1.5,
            min_margin: Duration(1_000_000),
            miss_tolerance: Duration(4_000_000),
            policy: MarginPolicy::Adaptive {
                miss_threshold: 3,
                recovery_threshold: 10,
                step: Duration(500_000),
                max_extra: Duration(8_000_000),
            },
        }
    }

    /// A 120 Hz display.
    #[must_use]
    pub const fn display_120hz() -> Self {
        Self {
            refresh_interval: Duration(8_333_333),
            ema_alpha: 0.2,
            safety_multiplier: 1.5,
            min_margin: Duration(500_000),
            miss_tolerance: Duration(2_000_000),
            policy: MarginPolicy::Adaptive {
                miss_threshold: 3,
                recovery_threshold: 10,
                step: Duration(250_000),
                max_extra: Duration(4_000_000),
            },
        }
    }

    /// No display: flips are confirmed as soon as they are submitted.
    #[must_use]
    pub const fn headless() -> Self {
        Self {
            refresh_interval: Duration(0),
            ema_alpha: 0.2,
            safety_multiplier: 1.0,
            min_margin: Duration(0),
            miss_tolerance: Duration(0),
            policy: MarginPolicy::Fixed,
        }
    }
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self::display_60hz()
    }
}

/// Exponential moving average tracker.
#[derive(Clone, Copy, Debug)]
struct Ema {
    value: f32,
    alpha: f32,
    initialized: bool,
}

impl Ema {
    const fn new(alpha: f32) -> Self {
        Self {
            value: 0.0,
            alpha,
            initialized: false,
        }
    }

    fn update(&mut self, sample: f32) {
        if self.initialized {
            self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        } else {
            self.value = sample;
            self.initialized = true;
        }
    }

    const fn get(&self) -> f32 {
        self.value
    }
}

/// Predicts flips and gates visual preparation.
///
/// # Readiness
///
/// Preparing updates too early means they sit in the back buffer and
/// anything scheduled between now and the flip misses it; preparing too late
/// misses the flip. [`FlipPacer::ready`] returns `true` once
/// `now + margin` reaches the predicted next flip, where the margin is the
/// smoothed preparation cost times [`PacerConfig::safety_multiplier`] (at
/// least [`PacerConfig::min_margin`]) plus the adaptive extra.
///
/// # Usage
///
/// ```rust,ignore
/// if pacer.ready(now) {
///     let flip = pacer.predicted_next_flip(now);
///     // ... apply updates with target <= flip, present ...
///     pacer.observe(&feedback);
/// }
/// ```
#[derive(Debug)]
pub struct FlipPacer {
    config: PacerConfig,
    last_flip: Option<HostTime>,
    prepare_cost: Ema,
    extra_margin: Duration,
    consecutive_misses: u32,
    consecutive_hits: u32,
    missed: u64,
    presented: u64,
}

impl FlipPacer {
    /// Creates a pacer with the given configuration.
    #[must_use]
    pub fn new(config: PacerConfig) -> Self {
        Self {
            prepare_cost: Ema::new(config.ema_alpha),
            last_flip: None,
            extra_margin: Duration::ZERO,
            consecutive_misses: 0,
            consecutive_hits: 0,
            missed: 0,
            presented: 0,
            config,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PacerConfig {
        &self.config
    }

    /// The next display flip at or after `now`.
    ///
    /// Without a confirmed flip (or without a display) this is `now`.
    #[must_use]
    pub fn predicted_next_flip(&self, now: HostTime) -> HostTime {
        let refresh = self.config.refresh_interval.ticks();
        let Some(last) = self.last_flip else {
            return now;
        };
        if refresh == 0 {
            return now;
        }
        let since = now.saturating_duration_since(last).ticks();
        let periods = since.div_ceil(refresh).max(1);
        last.saturating_add(Duration(refresh.saturating_mul(periods)))
    }

    /// Current preparation margin.
    #[must_use]
    pub fn margin(&self) -> Duration {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "smoothed preparation cost in ticks fits in u64"
        )]
        let scaled = (self.prepare_cost.get() * self.config.safety_multiplier) as u64;
        Duration(scaled.max(self.config.min_margin.ticks())).saturating_add(self.extra_margin)
    }

    /// Returns `true` if updates should be prepared for the next flip now.
    #[must_use]
    pub fn ready(&self, now: HostTime) -> bool {
        if self.config.refresh_interval == Duration::ZERO {
            return true;
        }
        let Some(last) = self.last_flip else {
            return true;
        };
        now.saturating_add(self.margin()) >= last.saturating_add(self.config.refresh_interval)
    }

    /// Records a confirmed flip without feedback (for example one observed
    /// before the run started).
    pub fn note_flip(&mut self, at: HostTime) {
        if self.last_flip.is_none_or(|last| at >= last) {
            self.last_flip = Some(at);
        }
    }

    /// Feeds flip feedback to adapt the margin.
    pub fn observe(&mut self, feedback: &FlipFeedback) {
        let cost = feedback.prepare_cost().ticks();
        self.prepare_cost.update(cost as f32);

        if let Some(at) = feedback.confirmed_at {
            self.note_flip(at);
            self.presented += 1;
        }

        match self.config.policy {
            MarginPolicy::Adaptive {
                miss_threshold,
                recovery_threshold,
                step,
                max_extra,
            } => match feedback.missed_deadline {
                Some(true) => {
                    self.missed += 1;
                    self.consecutive_misses += 1;
                    self.consecutive_hits = 0;
                    if self.consecutive_misses >= miss_threshold {
                        let grown = self.extra_margin.saturating_add(step);
                        self.extra_margin = if grown > max_extra { max_extra } else { grown };
                        self.consecutive_misses = 0;
                    }
                }
                Some(false) => {
                    self.consecutive_hits += 1;
                    self.consecutive_misses = 0;
                    if self.consecutive_hits >= recovery_threshold {
                        self.extra_margin = self.extra_margin.saturating_sub(step);
                        self.consecutive_hits = 0;
                    }
                }
                None => {
                    self.consecutive_misses = 0;
                    self.consecutive_hits = 0;
                }
            },
            MarginPolicy::Fixed => {
                if feedback.missed_deadline == Some(true) {
                    self.missed += 1;
                }
            }
        }
    }

    /// The last confirmed flip.
    #[must_use]
    pub fn last_flip(&self) -> Option<HostTime> {
        self.last_flip
    }

    /// Extra margin added by the adaptive policy.
    #[must_use]
    pub fn extra_margin(&self) -> Duration {
        self.extra_margin
    }

    /// Number of flips observed as missed.
    #[must_use]
    pub fn missed_flips(&self) -> u64 {
        self.missed
    }

    /// Number of confirmed flips observed.
    #[must_use]
    pub fn presented_flips(&self) -> u64 {
        self.presented
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFRESH: u64 = 16_666_667;

    fn feedback(missed: Option<bool>, confirmed: u64) -> FlipFeedback {
        FlipFeedback {
            prepare_started: HostTime(1_000),
            submitted_at: HostTime(2_000),
            predicted_flip: HostTime(confirmed),
            confirmed_at: Some(HostTime(confirmed)),
            missed_deadline: missed,
        }
    }

    #[test]
    fn predicts_next_vsync_after_last_flip() {
        let mut pacer = FlipPacer::new(PacerConfig::display_60hz());
        assert_eq!(pacer.predicted_next_flip(HostTime(500)), HostTime(500));

        pacer.note_flip(HostTime(0));
        assert_eq!(pacer.predicted_next_flip(HostTime(1)), HostTime(REFRESH));
        assert_eq!(
            pacer.predicted_next_flip(HostTime(REFRESH + 1)),
            HostTime(2 * REFRESH),
            "skips to the following vsync"
        );
        assert_eq!(
            pacer.predicted_next_flip(HostTime(2 * REFRESH)),
            HostTime(2 * REFRESH),
            "a vsync exactly now is still reachable"
        );
    }

    #[test]
    fn ready_waits_until_margin_before_flip() {
        let mut pacer = FlipPacer::new(PacerConfig::display_60hz());
        assert!(pacer.ready(HostTime(0)), "no flip yet");
        pacer.note_flip(HostTime(0));
        assert!(!pacer.ready(HostTime(1_000)), "just flipped");
        let margin = pacer.margin().ticks();
        assert!(pacer.ready(HostTime(REFRESH - margin)));
    }

    #[test]
    fn headless_is_always_ready() {
        let mut pacer = FlipPacer::new(PacerConfig::headless());
        pacer.note_flip(HostTime(10));
        assert!(pacer.ready(HostTime(10)));
        assert_eq!(pacer.predicted_next_flip(HostTime(11)), HostTime(11));
    }

    #[test]
    fn margin_grows_after_consecutive_misses() {
        let mut pacer = FlipPacer::new(PacerConfig::display_60hz());
        pacer.observe(&feedback(Some(true), 100));
        pacer.observe(&feedback(Some(true), 200));
        assert_eq!(pacer.extra_margin(), Duration::ZERO);
        pacer.observe(&feedback(Some(true), 300));
        assert_eq!(pacer.extra_margin(), Duration(500_000));
        assert_eq!(pacer.missed_flips(), 3);
        assert_eq!(pacer.presented_flips(), 3);
    }

    #[test]
    fn hit_resets_miss_counter() {
        let mut pacer = FlipPacer::new(PacerConfig::display_60hz());
        pacer.observe(&feedback(Some(true), 1));
        pacer.observe(&feedback(Some(true), 2));
        pacer.observe(&feedback(Some(false), 3));
        pacer.observe(&feedback(Some(true), 4));
        pacer.observe(&feedback(Some(true), 5));
        assert_eq!(pacer.extra_margin(), Duration::ZERO, "only 2 consecutive");
    }

    #[test]
    fn extra_margin_shrinks_after_sustained_hits_and_is_clamped() {
        let mut config = PacerConfig::display_60hz();
        config.policy = MarginPolicy::Adaptive {
            miss_threshold: 1,
            recovery_threshold: 2,
            step: Duration(100),
            max_extra: Duration(250),
        };
        let mut pacer = FlipPacer::new(config);
        for t in 0..5 {
            pacer.observe(&feedback(Some(true), t));
        }
        assert_eq!(pacer.extra_margin(), Duration(250), "clamped at max");
        pacer.observe(&feedback(Some(false), 10));
        pacer.observe(&feedback(Some(false), 11));
        assert_eq!(pacer.extra_margin(), Duration(150));
    }

    #[test]
    fn fixed_policy_tracks_cost_only() {
        let mut config = PacerConfig::display_60hz();
        config.policy = MarginPolicy::Fixed;
        config.min_margin = Duration::ZERO;
        let mut pacer = FlipPacer::new(config);
        assert_eq!(pacer.margin(), Duration::ZERO);
        for t in 0..10 {
            pacer.observe(&feedback(Some(true), t));
        }
        assert_eq!(pacer.extra_margin(), Duration::ZERO);
        assert!(pacer.margin() > Duration::ZERO, "cost EMA still tracked");
        assert_eq!(pacer.missed_flips(), 10);
    }

    #[test]
    fn flips_never_move_backwards() {
        let mut pacer = FlipPacer::new(PacerConfig::display_60hz());
        pacer.note_flip(HostTime(100));
        pacer.note_flip(HostTime(50));
        assert_eq!(pacer.last_flip(), Some(HostTime(100)));
    }
}
