// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reference and watcher identity types.

use core::fmt;

/// A handle to a node in a [`RefGraph`](super::RefGraph).
///
/// Contains both a slot index and a generation counter so that stale handles
/// can be detected after the node is collected and the slot reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefId {
    pub(crate) idx: u32,
    pub(crate) generation: u32,
}

impl RefId {
    /// Returns the raw slot index (for diagnostics only).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.idx
    }

    /// Returns the generation counter.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefId({}@gen{})", self.idx, self.generation)
    }
}

/// Identifies a registered change callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(pub(crate) u64);
