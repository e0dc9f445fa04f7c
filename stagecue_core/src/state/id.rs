// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! State identity and lifecycle phase.

use core::fmt;

/// A handle to a node in a [`StateTree`](super::StateTree).
///
/// Nodes are never removed from a tree, so handles stay valid for the life
/// of the tree they came from.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub u32);

impl StateId {
    /// The root node of every tree.
    pub const ROOT: Self = Self(0);

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateId({})", self.0)
    }
}

/// Where a node is in its lifecycle.
///
/// ```text
/// Idle ──enter──► Pending ──start──► Active ──leave──► Left ──finalize──► Finalized
///   ▲                                                                      │
///   └──────────────────────── loop iteration reset ───────────────────────┘
/// ```
///
/// A node counts as active from `enter` until `leave` (both `Pending` and
/// `Active`), and as done once it has left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Not entered in the current run of its parent.
    Idle,
    /// Entered with a state time; waiting for its start time or for a value
    /// it needs to become available.
    Pending,
    /// Started and running.
    Active,
    /// Left; logical end time recorded, physical confirmation may be
    /// outstanding.
    Left,
    /// Left and every deferred confirmation arrived; the log record is final.
    Finalized,
}

impl Phase {
    /// Between `enter` and `leave`.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }

    /// Has left (possibly awaiting finalization).
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Left | Self::Finalized)
    }
}
