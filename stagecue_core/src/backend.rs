// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Presentation contract for display integrations.
//!
//! The core never draws. Visual leaves apply their changes through a
//! [`Drawable`](crate::state::Drawable) when the idle tick takes their
//! updates from the [`VideoQueue`](crate::video::VideoQueue); the
//! [`Presenter`] then makes those changes visible with a single flip and
//! reports when that happened.
//!
//! An integration provides:
//!
//! - **Time**: a [`TimeSource`](crate::time::TimeSource) reading the same
//!   monotonic clock the presenter reports flips in.
//!
//! - **Presenter**: implements [`Presenter`] for the display (a swap chain,
//!   a headless counter, a simulated display in tests).
//!
//! # Crate boundaries
//!
//! `stagecue_core` owns the data model, the state tree, the idle tick and
//! this contract module. `stagecue_host` provides a std time source and a
//! headless presenter; `stagecue_harness` provides a simulated display.

use crate::error::PresentError;
use crate::timing::{FlipOutcome, FlipRequest, PresentEvent};

/// Makes applied visual changes visible.
///
/// # Idle tick pseudocode
///
/// ```rust,ignore
/// if pacer.ready(now) {
///     let flip = pacer.predicted_next_flip(now);
///     for update in video.take_due(flip) {
///         leaf.apply_video(update.tag.token);
///     }
///     match presenter.present(&request)? {
///         FlipOutcome::Confirmed(at) => confirm(at),
///         FlipOutcome::Submitted => in_flight.push(pending),
///     }
/// }
/// while let Some(event) = presenter.poll_presented() {
///     // resolve or re-queue the matching submission
/// }
/// ```
pub trait Presenter {
    /// Presents everything applied since the previous flip.
    ///
    /// When `request.blocking` is set the presenter should wait for the flip
    /// and return [`FlipOutcome::Confirmed`]. Otherwise it may return
    /// [`FlipOutcome::Submitted`] and report the result later through
    /// [`Presenter::poll_presented`].
    fn present(&mut self, request: &FlipRequest) -> Result<FlipOutcome, PresentError>;

    /// Returns the next asynchronous presentation result, if any.
    ///
    /// Called repeatedly at the end of every idle tick until it returns
    /// `None`.
    fn poll_presented(&mut self) -> Option<PresentEvent> {
        None
    }
}
